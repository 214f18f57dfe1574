//! バンク化メモリのコード解析エンジン
//!
//! 64KBのCPUアドレス空間を1KBページ単位でバンクに対応づけ、
//! バイトごとにコード・データ・ラベル・コメントを追跡する。
//! 解析情報は (バンクID, オフセット) で識別されるため、
//! バンク切り替えの後も同じ物理バイトに結びついたまま残る。

pub mod address_ref;
pub mod bank;
pub mod error;
pub mod formatting;
pub mod instrumentation;
pub mod item_list;
pub mod items;
pub mod mapping;
pub mod page;
pub mod persist;
pub mod region;

use std::collections::{BTreeMap, BTreeSet};

use crate::analysis_log::{self, AnalysisLogLevel};
use crate::cpu::{CpuType, MemoryPeek};

pub use address_ref::{AddressRef, INVALID_BANK_ID};
pub use bank::{Bank, BankKind};
pub use error::AnalysisError;
pub use formatting::{CharacterMap, CharacterSet, DataFormattingOptions};
pub use instrumentation::{BreakReason, InstructionStart, MemoryAccessHandler, MemoryAccessType};
pub use items::{
    CodeFlags, CodeInfo, CommentBlock, CommentLine, DataDisplayType, DataInfo, DataType,
    ItemListEntry, ItemRef, ItemType, ItemView, LabelInfo, LabelType, OperandType, ReferenceSet,
    FRAME_NEVER,
};
pub use mapping::{BankAccess, MappingTable};
pub use page::{NUM_PAGE_SLOTS, PAGE_SIZE};
pub use region::RegionDescGenerator;

use formatting::UndoCommand;
use items::ItemStore;
use page::PAGE_SHIFT;

/// 解析ビューのカーソル状態
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub cursor: AddressRef,
    /// 選択範囲（開始, 終了）
    pub selection: Option<(AddressRef, AddressRef)>,
    goto_stack: Vec<AddressRef>,
}

impl ViewState {
    /// 指定アドレスへ移動（戻り先を積む）
    pub fn go_to_address(&mut self, address: AddressRef) {
        if self.cursor.is_valid() {
            self.goto_stack.push(self.cursor);
        }
        self.cursor = address;
        self.selection = None;
    }

    /// 直前の位置に戻る
    pub fn go_back(&mut self) -> bool {
        match self.goto_stack.pop() {
            Some(prev) => {
                self.cursor = prev;
                true
            }
            None => false,
        }
    }
}

/// コード解析の状態全体
pub struct CodeAnalysisState {
    cpu_type: CpuType,
    banks: Vec<Bank>,
    mapping: MappingTable,
    items: ItemStore,
    current_frame_no: i32,

    // アイテムリスト
    item_list: Vec<ItemListEntry>,
    global_dirty: bool,
    rebuild_count: u32,

    // 計測
    exec_breakpoints: BTreeSet<u16>,
    /// 開始アドレス → バイト数
    data_breakpoints: BTreeMap<u16, u16>,
    handlers: Vec<MemoryAccessHandler>,
    watches: Vec<AddressRef>,
    last_break_reason: Option<BreakReason>,
    auto_label_jumps: bool,

    // 書式設定
    undo: Option<UndoCommand>,
    character_sets: Vec<CharacterSet>,
    character_maps: Vec<CharacterMap>,

    region_generators: Vec<Box<dyn RegionDescGenerator>>,

    pub view: ViewState,
}

impl CodeAnalysisState {
    pub fn new(cpu_type: CpuType) -> Self {
        CodeAnalysisState {
            cpu_type,
            banks: Vec::new(),
            mapping: MappingTable::new(),
            items: ItemStore::default(),
            current_frame_no: 0,
            item_list: Vec::new(),
            global_dirty: true,
            rebuild_count: 0,
            exec_breakpoints: BTreeSet::new(),
            data_breakpoints: BTreeMap::new(),
            handlers: Vec::new(),
            watches: Vec::new(),
            last_break_reason: None,
            auto_label_jumps: true,
            undo: None,
            character_sets: Vec::new(),
            character_maps: Vec::new(),
            region_generators: Vec::new(),
            view: ViewState::default(),
        }
    }

    pub fn cpu_type(&self) -> CpuType {
        self.cpu_type
    }

    pub fn set_auto_label_jumps(&mut self, enabled: bool) {
        self.auto_label_jumps = enabled;
    }

    //--------------------------------------------------
    // バンク登録
    //--------------------------------------------------

    /// バンクを登録してIDを返す
    ///
    /// サイズは1KBページの2のべき乗個。プライマリスロットはサイズに整列していること。
    pub fn register_bank(
        &mut self,
        name: &str,
        kind: BankKind,
        size_in_pages: usize,
        read_only: bool,
        primary_slot: i16,
    ) -> i16 {
        assert!(
            size_in_pages > 0 && size_in_pages.is_power_of_two() && size_in_pages <= NUM_PAGE_SLOTS,
            "bank '{}' has invalid size {} pages",
            name,
            size_in_pages
        );
        assert!(
            primary_slot < 0
                || (primary_slot as usize % size_in_pages == 0
                    && primary_slot as usize + size_in_pages <= NUM_PAGE_SLOTS),
            "bank '{}' primary slot {} not aligned",
            name,
            primary_slot
        );

        let id = self.banks.len() as i16;
        let base_offset_within_kind: u32 = self
            .banks
            .iter()
            .filter(|b| b.kind == kind)
            .map(|b| b.size_bytes() as u32)
            .sum();
        self.banks.push(Bank::new(
            id,
            name,
            kind,
            base_offset_within_kind,
            size_in_pages,
            read_only,
            primary_slot,
        ));
        self.global_dirty = true;

        if analysis_log::is_enabled(AnalysisLogLevel::BANK) {
            log::info!(
                "[BANK] registered #{} '{}' {} {}KB primary slot {}",
                id,
                name,
                kind,
                size_in_pages,
                primary_slot
            );
        }
        id
    }

    /// バンクの物理メモリ内容を設定（ROMイメージなど）
    pub fn set_bank_memory(&mut self, bank_id: i16, bytes: &[u8]) -> Result<(), AnalysisError> {
        let bank = self
            .get_bank_mut(bank_id)
            .ok_or(AnalysisError::InvalidBank(bank_id))?;
        if bytes.len() != bank.memory.len() {
            return Err(AnalysisError::BankSizeMismatch {
                bank: bank.name.clone(),
                expected: bank.size_in_pages,
                actual: bytes.len().div_ceil(PAGE_SIZE),
            });
        }
        bank.memory.copy_from_slice(bytes);
        Ok(())
    }

    pub fn get_bank(&self, bank_id: i16) -> Option<&Bank> {
        if bank_id < 0 {
            return None;
        }
        self.banks.get(bank_id as usize)
    }

    pub fn get_bank_mut(&mut self, bank_id: i16) -> Option<&mut Bank> {
        if bank_id < 0 {
            return None;
        }
        self.banks.get_mut(bank_id as usize)
    }

    pub fn get_bank_by_name(&self, name: &str) -> Option<&Bank> {
        self.banks.iter().find(|b| b.name == name)
    }

    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }

    //--------------------------------------------------
    // アドレス参照
    //--------------------------------------------------

    /// 参照先バンクと (ページ, インデックス)
    fn locate(&self, r: AddressRef) -> Option<(&Bank, usize, usize)> {
        let bank = self.get_bank(r.bank_id)?;
        let (page, index) = bank.page_and_index(r.offset)?;
        Some((bank, page, index))
    }

    /// 参照先の (バンク番号, ページ, インデックス)。フィールドを分けて借用するときに使う
    fn locate_index(&self, r: AddressRef) -> Option<(usize, usize, usize)> {
        let bank = self.get_bank(r.bank_id)?;
        let (page, index) = bank.page_and_index(r.offset)?;
        Some((r.bank_id as usize, page, index))
    }

    /// 参照が指す物理バイトを読む
    pub fn resolve(&self, r: AddressRef) -> Result<u8, AnalysisError> {
        let bank = self
            .get_bank(r.bank_id)
            .ok_or(AnalysisError::InvalidBank(r.bank_id))?;
        let index = bank.index_of(r.offset).ok_or(AnalysisError::InvalidOffset(r))?;
        Ok(bank.memory[index])
    }

    pub fn resolve_mut(&mut self, r: AddressRef) -> Result<&mut u8, AnalysisError> {
        let bank = self
            .get_bank_mut(r.bank_id)
            .ok_or(AnalysisError::InvalidBank(r.bank_id))?;
        let index = bank.index_of(r.offset).ok_or(AnalysisError::InvalidOffset(r))?;
        Ok(&mut bank.memory[index])
    }

    /// 参照が現在のバンク登録で有効か
    pub fn is_valid_ref(&self, r: AddressRef) -> bool {
        self.locate(r).is_some()
    }

    /// CPUアドレスを現在の読み出しバンクの参照に変換
    pub fn address_ref_from_physical_address(&self, addr: u16) -> AddressRef {
        let bank_id = self.mapping.read_bank(addr as usize >> PAGE_SHIFT);
        match self.get_bank(bank_id) {
            Some(bank) => AddressRef::new(bank_id, bank.normalise(addr)),
            None => AddressRef::INVALID,
        }
    }

    /// CPUアドレスを現在の書き込みバンクの参照に変換
    pub fn write_address_ref_from_physical_address(&self, addr: u16) -> AddressRef {
        let bank_id = self.mapping.write_bank(addr as usize >> PAGE_SHIFT);
        match self.get_bank(bank_id) {
            Some(bank) => AddressRef::new(bank_id, bank.normalise(addr)),
            None => AddressRef::INVALID,
        }
    }

    /// バンク内で参照を移動する（バンク境界はまたがない）
    pub fn advance_address_ref(&self, r: &mut AddressRef, delta: i32) -> bool {
        let Some(bank) = self.get_bank(r.bank_id) else {
            return false;
        };
        let Some(index) = bank.index_of(r.offset) else {
            return false;
        };
        let new_index = index as i64 + delta as i64;
        if new_index < 0 || new_index >= bank.size_bytes() as i64 {
            return false;
        }
        r.offset = bank.primary_base().wrapping_add(new_index as u16);
        true
    }

    /// 古い参照を現在のマッピングで解決し直す
    ///
    /// バンクが無効なら、元の数値アドレスのスロットに現在マップされている
    /// 読み出しバンクで置き換える。それも無ければ無効化する。
    pub fn fixup_address_ref(&self, r: &mut AddressRef) -> bool {
        let fixer = RefFixer::new(self);
        fixer.fix(r)
    }

    /// 保持している全ての参照を修正する
    ///
    /// バンク登録やマッピングの構造変更後に呼ぶ。
    pub fn fixup_address_refs(&mut self) -> usize {
        let fixer = RefFixer::new(self);
        let mut invalidated = 0;

        for label in self.items.labels.iter_mut() {
            for r in label.references.refs_mut() {
                if !fixer.fix(r) {
                    invalidated += 1;
                }
            }
            label.references.remove_invalid();
        }
        for code in self.items.code.iter_mut() {
            for r in [&mut code.jump_address, &mut code.pointer_address].into_iter().flatten() {
                if !fixer.fix(r) {
                    invalidated += 1;
                }
            }
            if code.jump_address.is_some_and(|r| !r.is_valid()) {
                code.jump_address = None;
            }
            if code.pointer_address.is_some_and(|r| !r.is_valid()) {
                code.pointer_address = None;
            }
        }
        for bank in &mut self.banks {
            for page in &mut bank.pages {
                for data in &mut page.data_info {
                    for r in data.reads.refs_mut().chain(data.writes.refs_mut()) {
                        if !fixer.fix(r) {
                            invalidated += 1;
                        }
                    }
                    data.reads.remove_invalid();
                    data.writes.remove_invalid();
                    if let Some(cs) = data.char_set_address.as_mut() {
                        if !fixer.fix(cs) {
                            invalidated += 1;
                            data.char_set_address = None;
                        }
                    }
                }
                for w in &mut page.last_writer {
                    if w.is_valid() && !fixer.fix(w) {
                        invalidated += 1;
                    }
                }
            }
        }
        for w in &mut self.watches {
            if !fixer.fix(w) {
                invalidated += 1;
            }
        }
        self.watches.retain(|w| w.is_valid());

        if invalidated > 0 {
            log::warn!("fixup_address_refs: {} references invalidated", invalidated);
        }
        self.global_dirty = true;
        invalidated
    }

    //--------------------------------------------------
    // メモリアクセス（現在のマッピング経由）
    //--------------------------------------------------

    /// 読み出しバンク経由で1バイト読む
    pub fn read_byte(&self, addr: u16) -> u8 {
        let bank_id = self.mapping.read_bank(addr as usize >> PAGE_SHIFT);
        match self.get_bank(bank_id) {
            Some(bank) => bank.memory[(addr & bank.size_mask()) as usize],
            None => 0xFF,
        }
    }

    /// 書き込みバンク経由で1バイト書く（読み出し専用バンクは無視）
    pub fn write_byte(&mut self, addr: u16, value: u8) {
        let bank_id = self.mapping.write_bank(addr as usize >> PAGE_SHIFT);
        if let Some(bank) = self.get_bank_mut(bank_id) {
            if !bank.read_only {
                let index = (addr & bank.size_mask()) as usize;
                bank.memory[index] = value;
            }
        }
    }

    //--------------------------------------------------
    // アイテム取得
    //--------------------------------------------------

    pub fn get_label_for_address(&self, r: AddressRef) -> Option<&LabelInfo> {
        let (bank, page, index) = self.locate(r)?;
        let handle = bank.pages[page].labels[index]?;
        self.items.labels.get(handle)
    }

    pub fn get_label_for_address_mut(&mut self, r: AddressRef) -> Option<&mut LabelInfo> {
        let (bank, page, index) = self.locate(r)?;
        let handle = bank.pages[page].labels[index]?;
        self.items.labels.get_mut(handle)
    }

    /// その位置を覆う命令（先頭とは限らない）
    pub fn get_code_info_for_address(&self, r: AddressRef) -> Option<&CodeInfo> {
        let (bank, page, index) = self.locate(r)?;
        let handle = bank.pages[page].code_info[index]?;
        self.items.code.get(handle)
    }

    pub fn get_code_info_for_address_mut(&mut self, r: AddressRef) -> Option<&mut CodeInfo> {
        let (bank, page, index) = self.locate(r)?;
        let handle = bank.pages[page].code_info[index]?;
        self.items.code.get_mut(handle)
    }

    pub fn get_data_info_for_address(&self, r: AddressRef) -> Option<&DataInfo> {
        let (bank, page, index) = self.locate(r)?;
        Some(&bank.pages[page].data_info[index])
    }

    pub fn get_data_info_for_address_mut(&mut self, r: AddressRef) -> Option<&mut DataInfo> {
        let bank = self.get_bank_mut(r.bank_id)?;
        let (page, index) = bank.page_and_index(r.offset)?;
        Some(&mut bank.pages[page].data_info[index])
    }

    /// CPUアドレスの読み出し側 DataInfo
    pub fn get_read_data_info_for_address(&self, addr: u16) -> Option<&DataInfo> {
        self.get_data_info_for_address(self.address_ref_from_physical_address(addr))
    }

    /// CPUアドレスの書き込み側 DataInfo
    pub fn get_write_data_info_for_address(&self, addr: u16) -> Option<&DataInfo> {
        self.get_data_info_for_address(self.write_address_ref_from_physical_address(addr))
    }

    pub fn get_comment_block_for_address(&self, r: AddressRef) -> Option<&CommentBlock> {
        let (bank, page, index) = self.locate(r)?;
        let handle = bank.pages[page].comment_blocks[index]?;
        self.items.comments.get(handle)
    }

    /// 最後にこのバイトへ書いた命令
    pub fn get_last_writer_for_address(&self, r: AddressRef) -> Option<AddressRef> {
        let (bank, page, index) = self.locate(r)?;
        let w = bank.pages[page].last_writer[index];
        if w.is_valid() {
            Some(w)
        } else {
            None
        }
    }

    /// アイテムリストの要素を解決する
    pub fn item(&self, entry: &ItemListEntry) -> Option<ItemView<'_>> {
        match entry.item {
            ItemRef::Label(h) => self.items.labels.get(h).map(ItemView::Label),
            ItemRef::Code(h) => self.items.code.get(h).map(ItemView::Code),
            ItemRef::Data => self.get_data_info_for_address(entry.address).map(ItemView::Data),
            ItemRef::CommentBlock(h) => self.items.comments.get(h).map(ItemView::CommentBlock),
            ItemRef::CommentLine(i) => self
                .get_bank(entry.address.bank_id)?
                .comment_lines
                .get(i as usize)
                .map(ItemView::CommentLine),
        }
    }

    /// 指定バンクのラベル一覧（アドレス順）
    pub fn labels_in_bank(&self, bank_id: i16) -> Vec<&LabelInfo> {
        let Some(bank) = self.get_bank(bank_id) else {
            return Vec::new();
        };
        bank.pages
            .iter()
            .flat_map(|p| p.labels.iter().flatten())
            .filter_map(|h| self.items.labels.get(*h))
            .collect()
    }

    /// 名前でラベルを探す
    pub fn find_label_by_name(&self, name: &str) -> Option<AddressRef> {
        self.banks
            .iter()
            .flat_map(|b| b.pages.iter())
            .flat_map(|p| p.labels.iter().flatten())
            .filter_map(|h| self.items.labels.get(*h))
            .find(|l| l.name == name)
            .map(|l| l.address)
    }

    /// ページから指されているラベルの数
    pub fn label_count(&self) -> usize {
        self.banks
            .iter()
            .flat_map(|b| b.pages.iter())
            .flat_map(|p| p.labels.iter().flatten())
            .filter(|h| self.items.labels.get(**h).is_some())
            .count()
    }

    //--------------------------------------------------
    // ラベル・コメント編集
    //--------------------------------------------------

    /// ラベルを設定（既存なら名前と種類を更新）
    pub fn set_label_for_address(&mut self, r: AddressRef, name: &str, label_type: LabelType) -> bool {
        let Some(bank) = self.get_bank(r.bank_id) else {
            return false;
        };
        let Some((page, index)) = bank.page_and_index(r.offset) else {
            return false;
        };
        let existing = bank.pages[page].labels[index];
        if let Some(label) = existing.and_then(|h| self.items.labels.get_mut(h)) {
            label.name = name.to_string();
            label.label_type = label_type;
        } else {
            let handle = self.items.labels.alloc(LabelInfo::new(r, name, label_type));
            self.banks[r.bank_id as usize].pages[page].labels[index] = Some(handle);
        }
        self.set_code_analysis_dirty(r);
        true
    }

    pub fn remove_label(&mut self, r: AddressRef) -> bool {
        let Some(bank) = self.get_bank_mut(r.bank_id) else {
            return false;
        };
        let Some((page, index)) = bank.page_and_index(r.offset) else {
            return false;
        };
        // アリーナの実体は free_all まで残る
        if bank.pages[page].labels[index].take().is_none() {
            return false;
        }
        self.set_code_analysis_dirty(r);
        true
    }

    /// コメントブロックを設定（空文字列で削除）
    pub fn set_comment_block_for_address(&mut self, r: AddressRef, text: &str) -> bool {
        let Some(bank) = self.get_bank(r.bank_id) else {
            return false;
        };
        let Some((page, index)) = bank.page_and_index(r.offset) else {
            return false;
        };
        let existing = bank.pages[page].comment_blocks[index];
        if text.is_empty() {
            self.banks[r.bank_id as usize].pages[page].comment_blocks[index] = None;
        } else if let Some(block) = existing.and_then(|h| self.items.comments.get_mut(h)) {
            block.comment = text.to_string();
        } else {
            let handle = self.items.comments.alloc(CommentBlock {
                address: r,
                comment: text.to_string(),
            });
            self.banks[r.bank_id as usize].pages[page].comment_blocks[index] = Some(handle);
        }
        self.set_code_analysis_dirty(r);
        true
    }

    pub fn set_code_comment(&mut self, r: AddressRef, text: &str) -> bool {
        match self.get_code_info_for_address_mut(r) {
            Some(code) => {
                code.comment = text.to_string();
                true
            }
            None => false,
        }
    }

    pub fn set_data_comment(&mut self, r: AddressRef, text: &str) -> bool {
        match self.get_data_info_for_address_mut(r) {
            Some(data) => {
                data.comment = text.to_string();
                true
            }
            None => false,
        }
    }

    //--------------------------------------------------
    // ウォッチ
    //--------------------------------------------------

    pub fn add_watch(&mut self, r: AddressRef) -> bool {
        if !self.is_valid_ref(r) || self.watches.contains(&r) {
            return false;
        }
        self.watches.push(r);
        true
    }

    pub fn remove_watch(&mut self, r: AddressRef) -> bool {
        let before = self.watches.len();
        self.watches.retain(|w| *w != r);
        self.watches.len() != before
    }

    pub fn watches(&self) -> &[AddressRef] {
        &self.watches
    }

    //--------------------------------------------------
    // フレーム・リセット
    //--------------------------------------------------

    pub fn on_frame_start(&mut self) {
        self.current_frame_no += 1;
    }

    pub fn current_frame_no(&self) -> i32 {
        self.current_frame_no
    }

    /// 解析情報を全消去（メモリ内容とマッピングは残す）
    ///
    /// 既存のハンドルはすべて無効になる。ブレークポイントとハンドラは残す。
    pub fn reset_analysis(&mut self) {
        self.items.free_all();
        for bank in &mut self.banks {
            bank.reset_analysis();
        }
        self.item_list.clear();
        self.watches.clear();
        self.undo = None;
        self.character_sets.clear();
        self.character_maps.clear();
        self.current_frame_no = 0;
        self.last_break_reason = None;
        self.view = ViewState::default();
        self.global_dirty = true;
        log::info!("Analysis reset ({} banks kept)", self.banks.len());
    }
}

impl MemoryPeek for CodeAnalysisState {
    fn peek(&self, addr: u16) -> u8 {
        self.read_byte(addr)
    }
}

/// 参照修正用のスナップショット
struct RefFixer {
    /// (プライマリ先頭, バイト数)
    banks: Vec<(u16, usize)>,
    slot_read_banks: [i16; NUM_PAGE_SLOTS],
}

impl RefFixer {
    fn new(state: &CodeAnalysisState) -> Self {
        RefFixer {
            banks: state
                .banks
                .iter()
                .map(|b| (b.primary_base(), b.size_bytes()))
                .collect(),
            slot_read_banks: state.mapping.read_banks(),
        }
    }

    fn bank(&self, id: i16) -> Option<(u16, usize)> {
        if id < 0 {
            return None;
        }
        self.banks.get(id as usize).copied()
    }

    fn fix(&self, r: &mut AddressRef) -> bool {
        if let Some((base, size)) = self.bank(r.bank_id) {
            if (r.offset.wrapping_sub(base) as usize) < size {
                return true;
            }
        }
        let slot = r.offset as usize >> PAGE_SHIFT;
        let bank_id = self.slot_read_banks[slot];
        match self.bank(bank_id) {
            Some((base, size)) => {
                let mask = (size - 1) as u16;
                *r = AddressRef::new(bank_id, base.wrapping_add(r.offset & mask));
                true
            }
            None => {
                *r = AddressRef::INVALID;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> (CodeAnalysisState, i16, i16) {
        let mut state = CodeAnalysisState::new(CpuType::Z80);
        let rom = state.register_bank("ROM", BankKind::Rom, 16, true, 0);
        let ram = state.register_bank("RAM", BankKind::Ram, 16, false, 16);
        state.map_bank(rom, 0, BankAccess::Read);
        state.map_bank(ram, 0, BankAccess::Write);
        state.map_bank(ram, 16, BankAccess::ReadWrite);
        (state, rom, ram)
    }

    #[test]
    fn test_physical_address_refs() {
        let (state, rom, ram) = test_state();
        assert_eq!(state.address_ref_from_physical_address(0x0123), AddressRef::new(rom, 0x0123));
        // ROMの下に書き込みはRAM、プライマリウィンドウへ正規化
        assert_eq!(
            state.write_address_ref_from_physical_address(0x0123),
            AddressRef::new(ram, 0x4123)
        );
        assert_eq!(state.address_ref_from_physical_address(0x4000), AddressRef::new(ram, 0x4000));
        // 未マップのスロット
        assert!(!state.address_ref_from_physical_address(0x8000).is_valid());
    }

    #[test]
    fn test_resolve_and_invalid_bank() {
        let (mut state, _rom, ram) = test_state();
        state.write_byte(0x4010, 0x3E);
        assert_eq!(state.resolve(AddressRef::new(ram, 0x4010)).unwrap(), 0x3E);
        *state.resolve_mut(AddressRef::new(ram, 0x4011)).unwrap() = 0x99;
        assert_eq!(state.read_byte(0x4011), 0x99);
        assert!(matches!(
            state.resolve(AddressRef::new(7, 0x4010)),
            Err(AnalysisError::InvalidBank(7))
        ));
        assert!(matches!(
            state.resolve(AddressRef::new(ram, 0x8000)),
            Err(AnalysisError::InvalidOffset(_))
        ));
    }

    #[test]
    fn test_write_to_rom_ignored() {
        let (mut state, rom, _ram) = test_state();
        state.set_bank_memory(rom, &vec![0xAA; 16 * 1024]).unwrap();
        state.write_byte(0x0010, 0x01);
        // 読み出しはROM、書き込みは下のRAMへ
        assert_eq!(state.read_byte(0x0010), 0xAA);
        assert_eq!(state.read_byte(0x4010), 0x01);
    }

    #[test]
    fn test_advance_never_crosses_bank() {
        let (state, _rom, ram) = test_state();
        let mut r = AddressRef::new(ram, 0x7FFE);
        assert!(state.advance_address_ref(&mut r, 1));
        assert_eq!(r.offset, 0x7FFF);
        assert!(!state.advance_address_ref(&mut r, 1));
        assert_eq!(r.offset, 0x7FFF);
        assert!(!state.advance_address_ref(&mut r, -0x4000));
        assert!(state.advance_address_ref(&mut r, -0x3FFF));
        assert_eq!(r.offset, 0x4000);
    }

    #[test]
    fn test_fixup_stale_refs() {
        let (mut state, rom, ram) = test_state();
        let mut stale = AddressRef::new(42, 0x4020);
        assert!(state.fixup_address_ref(&mut stale));
        assert_eq!(stale, AddressRef::new(ram, 0x4020));

        let mut unmapped = AddressRef::new(42, 0x9000);
        assert!(!state.fixup_address_ref(&mut unmapped));
        assert!(!unmapped.is_valid());

        // ラベル参照元の一括修正
        let target = AddressRef::new(rom, 0x0100);
        state.set_label_for_address(target, "entry", LabelType::Code);
        state
            .get_label_for_address_mut(target)
            .unwrap()
            .references
            .register(AddressRef::new(42, 0x0200));
        assert_eq!(state.fixup_address_refs(), 0);
        let label = state.get_label_for_address(target).unwrap();
        assert!(label.references.contains(AddressRef::new(rom, 0x0200)));
    }

    #[test]
    fn test_labels_and_comments() {
        let (mut state, _rom, ram) = test_state();
        let r = AddressRef::new(ram, 0x4010);
        assert!(state.set_label_for_address(r, "Loop", LabelType::Code));
        assert_eq!(state.get_label_for_address(r).unwrap().name, "Loop");
        assert_eq!(state.find_label_by_name("Loop"), Some(r));
        state.set_label_for_address(r, "Loop2", LabelType::Code);
        assert_eq!(state.label_count(), 1);
        assert!(state.remove_label(r));
        assert!(state.get_label_for_address(r).is_none());

        assert!(state.set_comment_block_for_address(r, "hello\nworld"));
        assert_eq!(state.get_comment_block_for_address(r).unwrap().comment, "hello\nworld");
        assert!(state.set_comment_block_for_address(r, ""));
        assert!(state.get_comment_block_for_address(r).is_none());
    }

    #[test]
    fn test_label_count_ignores_removed_labels() {
        let (mut state, _rom, ram) = test_state();
        let a = AddressRef::new(ram, 0x4010);
        let b = AddressRef::new(ram, 0x4020);
        state.set_label_for_address(a, "First", LabelType::Code);
        assert!(state.remove_label(a));
        assert_eq!(state.label_count(), 0);
        assert!(!state.remove_label(a));

        state.set_label_for_address(b, "Second", LabelType::Code);
        assert_eq!(state.label_count(), 1);
        assert!(state.get_label_for_address(a).is_none());
        assert_eq!(state.labels_in_bank(ram).len(), 1);
    }

    #[test]
    fn test_reset_invalidates_items_keeps_memory() {
        let (mut state, _rom, ram) = test_state();
        let r = AddressRef::new(ram, 0x4010);
        state.write_byte(0x4010, 0x55);
        state.set_label_for_address(r, "Loop", LabelType::Code);
        state.add_watch(r);
        state.on_frame_start();
        state.reset_analysis();
        assert!(state.get_label_for_address(r).is_none());
        assert!(state.watches().is_empty());
        assert_eq!(state.current_frame_no(), 0);
        assert_eq!(state.read_byte(0x4010), 0x55);
    }

    #[test]
    fn test_watch_add_remove() {
        let (mut state, _rom, ram) = test_state();
        let r = AddressRef::new(ram, 0x5000);
        assert!(state.add_watch(r));
        assert!(!state.add_watch(r));
        assert!(!state.add_watch(AddressRef::new(9, 0)));
        assert!(state.remove_watch(r));
        assert!(!state.remove_watch(r));
    }

    #[test]
    fn test_view_goto_stack() {
        let mut view = ViewState::default();
        view.go_to_address(AddressRef::new(0, 0x100));
        view.go_to_address(AddressRef::new(0, 0x200));
        assert!(view.go_back());
        assert_eq!(view.cursor, AddressRef::new(0, 0x100));
        assert!(!view.go_back());
    }
}
