//! データの書式設定と1段階のアンドゥ
//!
//! バイト範囲を配列・テキスト・ビットマップ・キャラクタマップなどとして
//! 解釈し直す。範囲は1つのバンクに収まっていなければならない。

use super::address_ref::AddressRef;
use super::items::{CodeHandle, DataDisplayType, DataInfo, DataType, LabelHandle, LabelInfo, LabelType};
use super::page::{PAGE_MASK, PAGE_SHIFT};
use super::CodeAnalysisState;

/// 配列・テキストなどを1アイテムにまとめる上限（これを超えると分割する）
pub const MAX_CHUNK_BYTES: usize = 0x8000;

/// FormatData のオプション
#[derive(Debug, Clone)]
pub struct DataFormattingOptions {
    pub start_address: AddressRef,
    pub data_type: DataType,
    pub display_type: DataDisplayType,
    /// 1アイテムのバイト数
    pub item_size: u16,
    pub no_items: u16,
    pub clear_code_info: bool,
    pub clear_labels: bool,
    pub add_label_at_start: bool,
    /// 空なら自動命名
    pub label_name: String,
    pub character_set: Option<AddressRef>,
    pub struct_id: Option<i32>,
    pub palette_no: Option<i32>,
    /// 先頭アイテムに付けるコメント
    pub comment: String,
}

impl DataFormattingOptions {
    pub fn new(start_address: AddressRef, data_type: DataType) -> Self {
        let item_size = match data_type {
            DataType::Word | DataType::WordArray => 2,
            _ => 1,
        };
        DataFormattingOptions {
            start_address,
            data_type,
            display_type: DataDisplayType::Unknown,
            item_size,
            no_items: 1,
            clear_code_info: true,
            clear_labels: false,
            add_label_at_start: false,
            label_name: String::new(),
            character_set: None,
            struct_id: None,
            palette_no: None,
            comment: String::new(),
        }
    }

    pub fn total_bytes(&self) -> u32 {
        self.item_size as u32 * self.no_items as u32
    }

    /// 呼び出し側での事前検証
    pub fn is_valid(&self) -> bool {
        if !self.start_address.is_valid() || self.item_size == 0 || self.no_items == 0 {
            return false;
        }
        if self.data_type == DataType::Word && self.item_size != 2 {
            return false;
        }
        if self.data_type == DataType::Struct && self.struct_id.is_none() {
            return false;
        }
        self.start_address.offset as u32 + self.total_bytes() <= 0x10000
    }

    /// 範囲の最終バイト
    pub fn end_address(&self) -> AddressRef {
        let last = self.total_bytes().saturating_sub(1) as u16;
        AddressRef::new(
            self.start_address.bank_id,
            self.start_address.offset.wrapping_add(last),
        )
    }
}

/// 登録済みのキャラクタセット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterSet {
    pub address: AddressRef,
    pub num_chars: u16,
    pub char_width: u8,
    pub char_height: u8,
}

/// 登録済みのキャラクタマップ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterMap {
    pub address: AddressRef,
    pub width: u16,
    pub height: u16,
    pub char_set: Option<AddressRef>,
}

#[derive(Debug, Clone)]
struct UndoEntry {
    address: AddressRef,
    data: DataInfo,
    code: Option<CodeHandle>,
    label: Option<LabelHandle>,
}

/// 直前の書式設定を取り消すためのスナップショット
#[derive(Debug, Clone)]
pub(crate) struct UndoCommand {
    entries: Vec<UndoEntry>,
    character_maps_len: usize,
    /// 置き換えられる登録も戻せるよう丸ごと保存する
    character_sets: Vec<CharacterSet>,
}

impl CodeAnalysisState {
    /// 範囲を書式設定する
    ///
    /// 範囲がバンクをまたぐ場合は何もせず false を返す。
    pub fn format_data(&mut self, options: &DataFormattingOptions) -> bool {
        if !options.is_valid() {
            return false;
        }
        let start = options.start_address;
        let Some(bank) = self.get_bank(start.bank_id) else {
            return false;
        };
        let Some(start_index) = bank.index_of(start.offset) else {
            return false;
        };
        let total = options.total_bytes() as usize;
        if start_index + total > bank.size_bytes() {
            log::debug!("format_data: {} +{} crosses bank edge", start, total);
            return false;
        }

        self.record_undo(start, total);

        let b = start.bank_id as usize;
        let chunk_size = if options.data_type.is_per_item() {
            options.item_size as usize
        } else {
            total.min(MAX_CHUNK_BYTES)
        };

        for offset in 0..total {
            let idx = start_index + offset;
            let address = AddressRef::new(start.bank_id, start.offset.wrapping_add(offset as u16));
            let page = &mut self.banks[b].pages[idx >> PAGE_SHIFT];
            let i = idx & PAGE_MASK as usize;
            if options.clear_code_info {
                page.code_info[i] = None;
            }
            if options.clear_labels {
                page.labels[i] = None;
            }

            let data = &mut page.data_info[i];
            data.reset_format();
            debug_assert_eq!(data.address, address);
            if offset % chunk_size == 0 {
                data.data_type = options.data_type;
                data.display_type = options.display_type;
                data.byte_size = chunk_size.min(total - offset) as u16;
                data.char_set_address = options.character_set;
                data.struct_id = options.struct_id;
                data.palette_no = options.palette_no;
            }
        }

        if !options.comment.is_empty() {
            self.set_data_comment(start, &options.comment);
        }

        if options.add_label_at_start {
            let name = if options.label_name.is_empty() {
                format!("data_{:04X}", start.offset)
            } else {
                options.label_name.clone()
            };
            let label_type = if options.data_type == DataType::Text {
                LabelType::Text
            } else {
                LabelType::Data
            };
            // 既存ラベルを書き換えず新しく作る（アンドゥで元のハンドルに戻せる）
            let mut label = LabelInfo::new(start, &name, label_type);
            label.byte_size = total.min(u16::MAX as usize) as u16;
            let handle = self.items.labels.alloc(label);
            let page = &mut self.banks[b].pages[start_index >> PAGE_SHIFT];
            page.labels[start_index & PAGE_MASK as usize] = Some(handle);
        }

        if options.data_type == DataType::CharacterMap {
            self.character_maps.push(CharacterMap {
                address: start,
                width: options.item_size,
                height: options.no_items,
                char_set: options.character_set,
            });
        }

        self.set_code_analysis_dirty(start);
        true
    }

    fn record_undo(&mut self, start: AddressRef, total: usize) {
        let mut entries = Vec::with_capacity(total);
        for offset in 0..total {
            let address = AddressRef::new(start.bank_id, start.offset.wrapping_add(offset as u16));
            if let Some((b, page, i)) = self.locate_index(address) {
                let p = &self.banks[b].pages[page];
                entries.push(UndoEntry {
                    address,
                    data: p.data_info[i].clone(),
                    code: p.code_info[i],
                    label: p.labels[i],
                });
            }
        }
        self.undo = Some(UndoCommand {
            entries,
            character_maps_len: self.character_maps.len(),
            character_sets: self.character_sets.clone(),
        });
    }

    /// 直前の書式設定を取り消す（1段階のみ）
    pub fn undo_command(&mut self) -> bool {
        let Some(undo) = self.undo.take() else {
            return false;
        };
        let mut first = None;
        for entry in undo.entries {
            if let Some((b, page, i)) = self.locate_index(entry.address) {
                let p = &mut self.banks[b].pages[page];
                p.data_info[i] = entry.data;
                p.code_info[i] = entry.code;
                p.labels[i] = entry.label;
                first.get_or_insert(entry.address);
            }
        }
        self.character_maps.truncate(undo.character_maps_len);
        self.character_sets = undo.character_sets;
        if let Some(r) = first {
            self.set_code_analysis_dirty(r);
        }
        true
    }

    pub fn can_undo(&self) -> bool {
        self.undo.is_some()
    }

    /// 書式を初期状態に戻す（アクセス履歴は残す）
    pub fn reset_format(&mut self, start: AddressRef, byte_count: u16) -> bool {
        let mut options = DataFormattingOptions::new(start, DataType::Byte);
        options.no_items = byte_count;
        options.clear_code_info = false;
        self.format_data(&options)
    }

    pub fn set_data_item_display_type(&mut self, r: AddressRef, display_type: DataDisplayType) -> bool {
        match self.get_data_info_for_address_mut(r) {
            Some(data) => {
                data.display_type = display_type;
                self.set_code_analysis_dirty(r);
                true
            }
            None => false,
        }
    }

    //--------------------------------------------------
    // キャラクタセット・キャラクタマップ
    //--------------------------------------------------

    /// 8x8 のキャラクタセットとして範囲を書式設定し登録する
    pub fn create_character_set(&mut self, address: AddressRef, num_chars: u16) -> bool {
        let mut options = DataFormattingOptions::new(address, DataType::Bitmap);
        options.display_type = DataDisplayType::Bitmap;
        options.item_size = 8;
        options.no_items = num_chars;
        if !self.format_data(&options) {
            return false;
        }
        self.character_sets.retain(|cs| cs.address != address);
        self.character_sets.push(CharacterSet {
            address,
            num_chars,
            char_width: 8,
            char_height: 8,
        });
        true
    }

    pub fn get_character_set(&self, address: AddressRef) -> Option<&CharacterSet> {
        self.character_sets.iter().find(|cs| cs.address == address)
    }

    pub fn character_sets(&self) -> &[CharacterSet] {
        &self.character_sets
    }

    pub fn character_maps(&self) -> &[CharacterMap] {
        &self.character_maps
    }
}
