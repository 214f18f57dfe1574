//! アイテムリストの再構築（ダーティフラグ駆動のキャッシュ）
//!
//! バンクごとにアドレス順のリストを持ち、変更のあったバンクだけを作り直す。
//! 全体のリストはマッピングテーブルをスロット順にたどって連結する。

use super::address_ref::AddressRef;
use super::items::{CommentLine, ItemListEntry, ItemRef};
use super::page::{NUM_PAGE_SLOTS, PAGE_MASK, PAGE_SHIFT};
use super::CodeAnalysisState;

impl CodeAnalysisState {
    /// 参照先のバンクと全体リストをダーティにする
    pub fn set_code_analysis_dirty(&mut self, r: AddressRef) {
        if let Some(bank) = self.get_bank_mut(r.bank_id) {
            bank.is_dirty = true;
        }
        self.global_dirty = true;
    }

    pub fn is_code_analysis_data_dirty(&self) -> bool {
        self.global_dirty || self.banks.iter().any(|b| b.is_dirty)
    }

    /// 必要ならアイテムリストを作り直す
    pub fn update_item_list(&mut self) {
        if !self.is_code_analysis_data_dirty() {
            return;
        }
        self.rebuild_count += 1;

        for b in 0..self.banks.len() {
            if self.banks[b].is_dirty || self.banks[b].item_list.is_empty() {
                let (list, lines) = self.build_bank_item_list(b);
                let bank = &mut self.banks[b];
                bank.item_list = list;
                bank.comment_lines = lines;
                bank.is_dirty = false;
            }
        }

        // スロット順に読み出しバンクを1回ずつ連結
        let mut appended = vec![false; self.banks.len()];
        let mut global = Vec::new();
        for slot in 0..NUM_PAGE_SLOTS {
            let bank_id = self.mapping.read_bank(slot);
            if bank_id < 0 {
                continue;
            }
            let b = bank_id as usize;
            if b < appended.len() && !appended[b] {
                appended[b] = true;
                global.extend_from_slice(&self.banks[b].item_list);
            }
        }
        self.item_list = global;
        self.global_dirty = false;
    }

    /// 1バンク分のリストを作る
    ///
    /// 各オフセットで コメント行 → ラベル → (未カバーなら) コード or データ の順に並べる。
    fn build_bank_item_list(&self, b: usize) -> (Vec<ItemListEntry>, Vec<CommentLine>) {
        let bank = &self.banks[b];
        let base = bank.primary_base();
        let mut list = Vec::new();
        let mut lines: Vec<CommentLine> = Vec::new();
        let mut next_free = 0usize;

        for idx in 0..bank.size_bytes() {
            let page = &bank.pages[idx >> PAGE_SHIFT];
            let i = idx & PAGE_MASK as usize;
            let address = AddressRef::new(bank.id, base.wrapping_add(idx as u16));

            if let Some(block) = page.comment_blocks[i].and_then(|h| self.items.comments.get(h)) {
                for text in block.display_lines() {
                    lines.push(CommentLine {
                        address,
                        text: text.to_string(),
                    });
                    list.push(ItemListEntry {
                        item: ItemRef::CommentLine((lines.len() - 1) as u32),
                        address,
                    });
                }
            }

            if let Some(h) = page.labels[i].filter(|h| self.items.labels.get(*h).is_some()) {
                list.push(ItemListEntry {
                    item: ItemRef::Label(h),
                    address,
                });
            }

            if idx < next_free {
                continue;
            }

            let code = page.code_info[i].and_then(|h| {
                self.items
                    .code
                    .get(h)
                    .filter(|c| c.address == address && !c.is_disabled())
                    .map(|c| (h, c))
            });
            match code {
                Some((h, c)) => {
                    list.push(ItemListEntry {
                        item: ItemRef::Code(h),
                        address,
                    });
                    // 自己書き換えコードは1バイトずつ進め、各バイトをデータとしても出す
                    next_free = idx + if c.is_self_modifying() {
                        1
                    } else {
                        c.byte_size.max(1) as usize
                    };
                }
                None => {
                    let data = &page.data_info[i];
                    list.push(ItemListEntry {
                        item: ItemRef::Data,
                        address,
                    });
                    next_free = idx + if data.data_type.advances_by_one() {
                        1
                    } else {
                        data.byte_size.max(1) as usize
                    };
                }
            }
        }
        (list, lines)
    }

    /// 全体のアイテムリスト（`update_item_list` 後に有効）
    pub fn item_list(&self) -> &[ItemListEntry] {
        &self.item_list
    }

    /// 再構築の回数
    pub fn item_list_rebuild_count(&self) -> u32 {
        self.rebuild_count
    }

    /// 参照を含むアイテムの全体リスト上の位置
    pub fn find_item_list_index(&self, r: AddressRef) -> Option<usize> {
        let mut found = None;
        for (i, entry) in self.item_list.iter().enumerate() {
            if entry.address.bank_id != r.bank_id {
                if found.is_some() {
                    break;
                }
                continue;
            }
            if entry.address.offset > r.offset {
                break;
            }
            found = Some(i);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{BankAccess, BankKind, DataFormattingOptions, DataType, ItemView, LabelType};
    use crate::cpu::CpuType;

    fn small_state() -> (CodeAnalysisState, i16) {
        let mut state = CodeAnalysisState::new(CpuType::Z80);
        let ram = state.register_bank("RAM", BankKind::Ram, 1, false, 16);
        state.map_bank(ram, 16, BankAccess::ReadWrite);
        (state, ram)
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let (mut state, ram) = small_state();
        state.set_label_for_address(AddressRef::new(ram, 0x4000), "start", LabelType::Code);
        state.update_item_list();
        let first = state.item_list().to_vec();
        let count = state.item_list_rebuild_count();
        state.update_item_list();
        assert_eq!(state.item_list_rebuild_count(), count);
        assert_eq!(state.item_list(), &first[..]);
        assert!(!state.is_code_analysis_data_dirty());
    }

    #[test]
    fn test_comment_lines_precede_label_and_item() {
        let (mut state, ram) = small_state();
        let r = AddressRef::new(ram, 0x4010);
        state.set_comment_block_for_address(r, "first\n@internal\n\nsecond");
        state.set_label_for_address(r, "Loop", LabelType::Code);
        state.update_item_list();

        let idx = state.find_item_list_index(AddressRef::new(ram, 0x400F)).unwrap();
        let entries = &state.item_list()[idx + 1..idx + 5];
        assert!(matches!(state.item(&entries[0]), Some(ItemView::CommentLine(l)) if l.text == "first"));
        assert!(matches!(state.item(&entries[1]), Some(ItemView::CommentLine(l)) if l.text == "second"));
        assert!(matches!(state.item(&entries[2]), Some(ItemView::Label(l)) if l.name == "Loop"));
        assert!(matches!(state.item(&entries[3]), Some(ItemView::Data(_))));
    }

    #[test]
    fn test_multi_byte_data_skips_covered_bytes() {
        let (mut state, ram) = small_state();
        let mut options = DataFormattingOptions::new(AddressRef::new(ram, 0x4000), DataType::Text);
        options.item_size = 8;
        options.no_items = 1;
        assert!(state.format_data(&options));
        state.update_item_list();
        // 8バイトのテキスト + 残り 1016 バイト
        assert_eq!(state.item_list().len(), 1 + 1016);
        assert_eq!(state.item_list()[1].address, AddressRef::new(ram, 0x4008));
    }

    #[test]
    fn test_blob_advances_by_one() {
        let (mut state, ram) = small_state();
        let mut options = DataFormattingOptions::new(AddressRef::new(ram, 0x4000), DataType::Blob);
        options.item_size = 16;
        options.no_items = 1;
        assert!(state.format_data(&options));
        state.update_item_list();
        assert_eq!(state.item_list().len(), 1024);
    }

    #[test]
    fn test_only_dirty_banks_rebuilt() {
        let mut state = CodeAnalysisState::new(CpuType::Z80);
        let a = state.register_bank("A", BankKind::Ram, 1, false, 0);
        let b = state.register_bank("B", BankKind::Ram, 1, false, 1);
        state.map_bank(a, 0, BankAccess::ReadWrite);
        state.map_bank(b, 1, BankAccess::ReadWrite);
        state.update_item_list();
        assert_eq!(state.item_list().len(), 2048);

        state.set_label_for_address(AddressRef::new(b, 0x0400), "b_start", LabelType::Data);
        assert!(!state.get_bank(a).unwrap().is_dirty);
        assert!(state.get_bank(b).unwrap().is_dirty);
        state.update_item_list();
        assert_eq!(state.item_list().len(), 2049);
        // バンクAの先頭が先、Bが後
        assert_eq!(state.item_list()[0].address.bank_id, a);
        assert_eq!(state.item_list()[1024].address.bank_id, b);
    }

    #[test]
    fn test_bank_mapped_twice_appended_once() {
        let mut state = CodeAnalysisState::new(CpuType::Z80);
        let ram = state.register_bank("RAM", BankKind::Ram, 1, false, 0);
        for slot in 0..4 {
            state.set_code_analysis_rw_page(slot, ram, ram);
        }
        state.update_item_list();
        assert_eq!(state.item_list().len(), 1024);
    }
}
