//! 解析アイテムモデル
//!
//! ラベル、コード情報、データ情報、コメントブロックを定義する。
//! ラベル・コード・コメントは種類ごとのアリーナに確保され、
//! ページからはハンドル（弱参照）で指される。
//! アリーナは個別解放せず、`free_all` で一括解放する。

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use super::address_ref::AddressRef;

/// 未アクセスを表すフレーム番号
pub const FRAME_NEVER: i32 = -1;

/// ReferenceSet が保持する参照元の最大数
pub const REFERENCE_SET_LIMIT: usize = 16;

//--------------------------------------------------
// アリーナ
//--------------------------------------------------

/// アリーナ内アイテムへの型付きハンドル
///
/// `free_all` で世代が進むため、古いハンドルは `None` に解決される。
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}@{})", self.index, self.generation)
    }
}

/// 一括解放のみをサポートするアリーナ
#[derive(Debug)]
pub struct Arena<T> {
    items: Vec<T>,
    generation: u32,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            items: Vec::new(),
            generation: 0,
        }
    }

    pub fn alloc(&mut self, item: T) -> Handle<T> {
        let index = self.items.len() as u32;
        self.items.push(item);
        Handle {
            index,
            generation: self.generation,
            _marker: PhantomData,
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if handle.generation != self.generation {
            return None;
        }
        self.items.get(handle.index as usize)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if handle.generation != self.generation {
            return None;
        }
        self.items.get_mut(handle.index as usize)
    }

    /// 全アイテムを解放し、既存ハンドルをすべて無効化する
    pub fn free_all(&mut self) {
        self.items.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// 確保済みの数（ページから外れたものも含む）
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }
}

//--------------------------------------------------
// 参照元セット
//--------------------------------------------------

/// 参照元アドレスの多重集合（上限付き）
///
/// 上限に達したら最も古い参照元を捨てる。登録は上限に対して O(1)。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    refs: Vec<(AddressRef, u32)>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, r: AddressRef) {
        if let Some(entry) = self.refs.iter_mut().find(|(a, _)| *a == r) {
            entry.1 += 1;
            return;
        }
        if self.refs.len() >= REFERENCE_SET_LIMIT {
            self.refs.remove(0);
        }
        self.refs.push((r, 1));
    }

    pub fn contains(&self, r: AddressRef) -> bool {
        self.refs.iter().any(|(a, _)| *a == r)
    }

    /// 参照元の登録回数
    pub fn count(&self, r: AddressRef) -> u32 {
        self.refs
            .iter()
            .find(|(a, _)| *a == r)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn clear(&mut self) {
        self.refs.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (AddressRef, u32)> + '_ {
        self.refs.iter().copied()
    }

    pub(crate) fn refs_mut(&mut self) -> impl Iterator<Item = &mut AddressRef> {
        self.refs.iter_mut().map(|(a, _)| a)
    }

    /// 無効化された参照元を取り除く
    pub(crate) fn remove_invalid(&mut self) {
        self.refs.retain(|(a, _)| a.is_valid());
    }
}

//--------------------------------------------------
// ラベル
//--------------------------------------------------

/// ラベルの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelType {
    Data,
    Function,
    Code,
    Text,
}

/// ラベル情報
#[derive(Debug, Clone)]
pub struct LabelInfo {
    pub address: AddressRef,
    pub name: String,
    pub global: bool,
    pub label_type: LabelType,
    /// このラベルを参照した命令
    pub references: ReferenceSet,
    pub byte_size: u16,
    pub comment: String,
}

impl LabelInfo {
    pub fn new(address: AddressRef, name: &str, label_type: LabelType) -> Self {
        LabelInfo {
            address,
            name: name.to_string(),
            // 関数ラベルはグローバル扱い
            global: label_type == LabelType::Function,
            label_type,
            references: ReferenceSet::new(),
            byte_size: 1,
            comment: String::new(),
        }
    }
}

//--------------------------------------------------
// コード情報
//--------------------------------------------------

bitflags::bitflags! {
    /// コード情報フラグ
    ///
    /// 下位ビットは `cpu::InstructionFlags` と同じ値を使う。
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct CodeFlags: u32 {
        const CALL           = 0x0001;
        const JUMP           = 0x0002;
        const RETURN         = 0x0004;
        const CONDITIONAL    = 0x0008;
        const UNDOCUMENTED   = 0x0010;
        /// 実行中に書き換えられた
        const SELF_MODIFYING = 0x0100;
        /// ユーザーが無効化した（データとして表示する）
        const DISABLED       = 0x0200;
    }
}

/// オペランドの表示形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperandType {
    #[default]
    Unknown,
    Pointer,
    JumpAddress,
    Decimal,
    Hex,
    Binary,
    Ascii,
}

/// 逆アセンブルされた1命令
#[derive(Debug, Clone)]
pub struct CodeInfo {
    /// 命令の先頭アドレス
    pub address: AddressRef,
    pub byte_size: u16,
    /// 逆アセンブル結果
    pub text: String,
    pub operand_type: OperandType,
    pub jump_address: Option<AddressRef>,
    pub pointer_address: Option<AddressRef>,
    pub flags: CodeFlags,
    pub execution_count: u32,
    pub frame_last_executed: i32,
    pub comment: String,
}

impl CodeInfo {
    pub fn new(address: AddressRef, byte_size: u16, text: String) -> Self {
        CodeInfo {
            address,
            byte_size,
            text,
            operand_type: OperandType::Unknown,
            jump_address: None,
            pointer_address: None,
            flags: CodeFlags::empty(),
            execution_count: 0,
            frame_last_executed: FRAME_NEVER,
            comment: String::new(),
        }
    }

    pub fn is_self_modifying(&self) -> bool {
        self.flags.contains(CodeFlags::SELF_MODIFYING)
    }

    pub fn is_disabled(&self) -> bool {
        self.flags.contains(CodeFlags::DISABLED)
    }
}

//--------------------------------------------------
// データ情報
//--------------------------------------------------

/// データの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    Byte,
    ByteArray,
    Word,
    WordArray,
    Text,
    Bitmap,
    CharacterMap,
    ColAttr,
    Struct,
    /// 未解析のバイト列（1バイトずつ表示）
    Blob,
    /// 画面ピクセル（1バイトずつ表示）
    ScreenPixels,
}

impl DataType {
    /// 1アイテム単位でフォーマットされる型か（配列系はまとめて1アイテム）
    pub fn is_per_item(&self) -> bool {
        matches!(self, DataType::Byte | DataType::Word | DataType::Struct)
    }

    /// アイテムリスト構築時に常に1バイトずつ進む型
    pub fn advances_by_one(&self) -> bool {
        matches!(self, DataType::Blob | DataType::ScreenPixels)
    }

    pub const ALL: [DataType; 11] = [
        DataType::Byte,
        DataType::ByteArray,
        DataType::Word,
        DataType::WordArray,
        DataType::Text,
        DataType::Bitmap,
        DataType::CharacterMap,
        DataType::ColAttr,
        DataType::Struct,
        DataType::Blob,
        DataType::ScreenPixels,
    ];
}

/// データの表示形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataDisplayType {
    #[default]
    Unknown,
    Ascii,
    Hex,
    Decimal,
    Binary,
    Pointer,
    JumpAddress,
    Bitmap,
    ColMap2Bpp,
    ColMap4Bpp,
    XPos,
    YPos,
    Palette,
}

/// 1バイト分のデータ情報（ページ内に常に存在する）
#[derive(Debug, Clone, PartialEq)]
pub struct DataInfo {
    pub address: AddressRef,
    pub data_type: DataType,
    pub display_type: DataDisplayType,
    pub byte_size: u16,
    pub comment: String,
    /// このバイトを読んだ命令
    pub reads: ReferenceSet,
    pub last_frame_read: i32,
    /// このバイトに書いた命令
    pub writes: ReferenceSet,
    pub last_frame_written: i32,
    pub char_set_address: Option<AddressRef>,
    pub struct_id: Option<i32>,
    pub palette_no: Option<i32>,
}

impl DataInfo {
    pub fn new(address: AddressRef) -> Self {
        DataInfo {
            address,
            data_type: DataType::Byte,
            display_type: DataDisplayType::Unknown,
            byte_size: 1,
            comment: String::new(),
            reads: ReferenceSet::new(),
            last_frame_read: FRAME_NEVER,
            writes: ReferenceSet::new(),
            last_frame_written: FRAME_NEVER,
            char_set_address: None,
            struct_id: None,
            palette_no: None,
        }
    }

    /// 全フィールドを初期状態に戻す
    pub fn reset(&mut self, address: AddressRef) {
        *self = DataInfo::new(address);
    }

    /// 書式だけを初期状態に戻す（アクセス履歴は残す）
    pub fn reset_format(&mut self) {
        self.data_type = DataType::Byte;
        self.display_type = DataDisplayType::Unknown;
        self.byte_size = 1;
        self.comment.clear();
        self.char_set_address = None;
        self.struct_id = None;
        self.palette_no = None;
    }

    /// 書式がデフォルトのままか（エクスポート対象の判定用）
    pub fn has_default_format(&self) -> bool {
        self.data_type == DataType::Byte
            && self.display_type == DataDisplayType::Unknown
            && self.byte_size == 1
            && self.comment.is_empty()
            && self.char_set_address.is_none()
            && self.struct_id.is_none()
            && self.palette_no.is_none()
    }

    /// アクセス履歴を消去
    pub fn clear_access(&mut self) {
        self.reads.clear();
        self.writes.clear();
        self.last_frame_read = FRAME_NEVER;
        self.last_frame_written = FRAME_NEVER;
    }
}

//--------------------------------------------------
// コメント
//--------------------------------------------------

/// アドレスに付く複数行コメント
#[derive(Debug, Clone)]
pub struct CommentBlock {
    pub address: AddressRef,
    pub comment: String,
}

/// 表示用にコメントブロックを1行ずつ展開したもの
#[derive(Debug, Clone, PartialEq)]
pub struct CommentLine {
    pub address: AddressRef,
    pub text: String,
}

impl CommentBlock {
    /// 表示対象の行（空行と '@' で始まる行は除く）
    pub fn display_lines(&self) -> impl Iterator<Item = &str> {
        self.comment
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with('@'))
    }
}

pub type LabelHandle = Handle<LabelInfo>;
pub type CodeHandle = Handle<CodeInfo>;
pub type CommentHandle = Handle<CommentBlock>;

/// 種類ごとのアリーナ
#[derive(Debug, Default)]
pub struct ItemStore {
    pub labels: Arena<LabelInfo>,
    pub code: Arena<CodeInfo>,
    pub comments: Arena<CommentBlock>,
}

impl ItemStore {
    pub fn free_all(&mut self) {
        self.labels.free_all();
        self.code.free_all();
        self.comments.free_all();
    }
}

//--------------------------------------------------
// アイテムリスト用の型
//--------------------------------------------------

/// アイテムの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Label,
    Code,
    Data,
    CommentBlock,
    CommentLine,
}

/// アイテムリストの要素が指すアイテム
///
/// データ情報はページ内に直接あるため、位置だけで特定できる。
/// コメント行はバンクごとに展開済みの行番号を持つ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRef {
    Label(LabelHandle),
    Code(CodeHandle),
    Data,
    CommentBlock(CommentHandle),
    CommentLine(u32),
}

impl ItemRef {
    pub fn item_type(&self) -> ItemType {
        match self {
            ItemRef::Label(_) => ItemType::Label,
            ItemRef::Code(_) => ItemType::Code,
            ItemRef::Data => ItemType::Data,
            ItemRef::CommentBlock(_) => ItemType::CommentBlock,
            ItemRef::CommentLine(_) => ItemType::CommentLine,
        }
    }
}

/// アイテムリストの1要素
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemListEntry {
    pub item: ItemRef,
    pub address: AddressRef,
}

/// 解決済みアイテムへの借用ビュー
#[derive(Debug, Clone, Copy)]
pub enum ItemView<'a> {
    Label(&'a LabelInfo),
    Code(&'a CodeInfo),
    Data(&'a DataInfo),
    CommentBlock(&'a CommentBlock),
    CommentLine(&'a CommentLine),
}

impl<'a> ItemView<'a> {
    pub fn address(&self) -> AddressRef {
        match self {
            ItemView::Label(l) => l.address,
            ItemView::Code(c) => c.address,
            ItemView::Data(d) => d.address,
            ItemView::CommentBlock(c) => c.address,
            ItemView::CommentLine(c) => c.address,
        }
    }

    pub fn byte_size(&self) -> u16 {
        match self {
            ItemView::Label(l) => l.byte_size,
            ItemView::Code(c) => c.byte_size,
            ItemView::Data(d) => d.byte_size,
            ItemView::CommentBlock(_) | ItemView::CommentLine(_) => 0,
        }
    }

    pub fn comment(&self) -> &'a str {
        match self {
            ItemView::Label(l) => &l.comment,
            ItemView::Code(c) => &c.comment,
            ItemView::Data(d) => &d.comment,
            ItemView::CommentBlock(c) => &c.comment,
            ItemView::CommentLine(c) => &c.text,
        }
    }

    /// 最後にアクセスされたフレーム（未アクセスは FRAME_NEVER）
    pub fn frame_last_accessed(&self) -> i32 {
        match self {
            ItemView::Code(c) => c.frame_last_executed,
            ItemView::Data(d) => d.last_frame_read.max(d.last_frame_written),
            ItemView::Label(_) | ItemView::CommentBlock(_) | ItemView::CommentLine(_) => {
                FRAME_NEVER
            }
        }
    }
}
