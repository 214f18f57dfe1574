//! バンクマッピングテーブル
//!
//! 64個の1KBスロットそれぞれに、読み出しバンクと書き込みバンクを割り当てる。
//! ROMの下のRAMのように、読み書きで別のバンクになることがある。
//! リマップは1回の呼び出しでバンク全体を切り替え、命令の途中では起こらない。

use super::address_ref::{AddressRef, INVALID_BANK_ID};
use super::page::{NUM_PAGE_SLOTS, PAGE_SHIFT};
use super::CodeAnalysisState;
use crate::analysis_log::{self, AnalysisLogLevel};

/// マッピング時のアクセス方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankAccess {
    Read,
    Write,
    ReadWrite,
}

impl BankAccess {
    fn reads(self) -> bool {
        matches!(self, BankAccess::Read | BankAccess::ReadWrite)
    }

    fn writes(self) -> bool {
        matches!(self, BankAccess::Write | BankAccess::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    read_bank: i16,
    write_bank: i16,
}

/// スロット → バンク
#[derive(Debug, Clone)]
pub struct MappingTable {
    slots: [Slot; NUM_PAGE_SLOTS],
    /// 前回の確認以降にリマップがあったか
    remapped: bool,
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingTable {
    pub fn new() -> Self {
        MappingTable {
            slots: [Slot {
                read_bank: INVALID_BANK_ID,
                write_bank: INVALID_BANK_ID,
            }; NUM_PAGE_SLOTS],
            remapped: false,
        }
    }

    /// スロット番号の検査（範囲外はプログラムの誤り）
    fn check_slot(slot: usize) {
        assert!(slot < NUM_PAGE_SLOTS, "page slot {} out of range", slot);
    }

    pub fn read_bank(&self, slot: usize) -> i16 {
        Self::check_slot(slot);
        self.slots[slot].read_bank
    }

    pub fn write_bank(&self, slot: usize) -> i16 {
        Self::check_slot(slot);
        self.slots[slot].write_bank
    }

    /// 変化があれば true
    pub fn set_read(&mut self, slot: usize, bank_id: i16) -> bool {
        Self::check_slot(slot);
        if self.slots[slot].read_bank == bank_id {
            return false;
        }
        self.slots[slot].read_bank = bank_id;
        self.remapped = true;
        true
    }

    /// 変化があれば true
    pub fn set_write(&mut self, slot: usize, bank_id: i16) -> bool {
        Self::check_slot(slot);
        if self.slots[slot].write_bank == bank_id {
            return false;
        }
        self.slots[slot].write_bank = bank_id;
        self.remapped = true;
        true
    }

    pub fn read_banks(&self) -> [i16; NUM_PAGE_SLOTS] {
        let mut out = [INVALID_BANK_ID; NUM_PAGE_SLOTS];
        for (o, s) in out.iter_mut().zip(self.slots.iter()) {
            *o = s.read_bank;
        }
        out
    }

    /// リマップフラグを読んでクリアする
    pub fn take_remapped(&mut self) -> bool {
        std::mem::replace(&mut self.remapped, false)
    }

    pub fn is_remapped(&self) -> bool {
        self.remapped
    }
}

impl CodeAnalysisState {
    /// バンクのページ数と整列を検査する
    fn check_bank_window(&self, bank_id: i16, start_slot: usize) -> usize {
        let bank = match self.get_bank(bank_id) {
            Some(b) => b,
            None => panic!("mapping unregistered bank {}", bank_id),
        };
        let pages = bank.size_in_pages;
        assert!(
            start_slot % pages == 0 && start_slot + pages <= NUM_PAGE_SLOTS,
            "bank '{}' ({} pages) cannot be mapped at slot {}",
            bank.name,
            pages,
            start_slot
        );
        pages
    }

    /// 1スロットに読み出し・書き込みバンクを設定する
    ///
    /// スロット内のページはバンク内で `slot % size_in_pages` 番目になる。
    pub fn set_code_analysis_rw_page(&mut self, slot: usize, read_bank: i16, write_bank: i16) {
        let read = self.mapping.set_read(slot, read_bank);
        let write = self.mapping.set_write(slot, write_bank);
        self.on_mapping_changed(read || write);
    }

    pub fn set_code_analysis_read_page(&mut self, slot: usize, bank_id: i16) {
        let changed = self.mapping.set_read(slot, bank_id);
        self.on_mapping_changed(changed);
    }

    pub fn set_code_analysis_write_page(&mut self, slot: usize, bank_id: i16) {
        let changed = self.mapping.set_write(slot, bank_id);
        self.on_mapping_changed(changed);
    }

    /// バンク全体を start_slot から連続してマップする
    pub fn map_bank(&mut self, bank_id: i16, start_slot: usize, access: BankAccess) {
        let pages = self.check_bank_window(bank_id, start_slot);
        let mut changed = false;
        for slot in start_slot..start_slot + pages {
            if access.reads() {
                changed |= self.mapping.set_read(slot, bank_id);
            }
            if access.writes() {
                changed |= self.mapping.set_write(slot, bank_id);
            }
        }
        self.on_mapping_changed(changed);
        if analysis_log::is_enabled(AnalysisLogLevel::BANK) {
            log::debug!(
                "[BANK] map #{} at ${:04X} {:?}",
                bank_id,
                start_slot << PAGE_SHIFT,
                access
            );
        }
    }

    /// バンクがマップされているスロットを外す
    pub fn unmap_bank(&mut self, bank_id: i16) {
        let mut changed = false;
        for slot in 0..NUM_PAGE_SLOTS {
            if self.mapping.read_bank(slot) == bank_id {
                changed |= self.mapping.set_read(slot, INVALID_BANK_ID);
            }
            if self.mapping.write_bank(slot) == bank_id {
                changed |= self.mapping.set_write(slot, INVALID_BANK_ID);
            }
        }
        self.on_mapping_changed(changed);
    }

    /// 今回の呼び出しでスロットが変わったときだけ全体リストを無効にする
    fn on_mapping_changed(&mut self, changed: bool) {
        if changed {
            self.global_dirty = true;
        }
    }

    /// リマップがあったかを読んでクリアする
    pub fn take_memory_remapped(&mut self) -> bool {
        self.mapping.take_remapped()
    }

    pub fn mapping(&self) -> &MappingTable {
        &self.mapping
    }

    pub fn read_bank_from_address(&self, addr: u16) -> i16 {
        self.mapping.read_bank(addr as usize >> PAGE_SHIFT)
    }

    pub fn write_bank_from_address(&self, addr: u16) -> i16 {
        self.mapping.write_bank(addr as usize >> PAGE_SHIFT)
    }

    /// バンクが読み出し側でどこかにマップされているスロット
    pub fn mapped_read_slots(&self, bank_id: i16) -> Vec<usize> {
        (0..NUM_PAGE_SLOTS)
            .filter(|&slot| self.mapping.read_bank(slot) == bank_id)
            .collect()
    }

    /// 参照先のバイトが現在CPUから読めるか
    pub fn is_address_mapped(&self, r: AddressRef) -> bool {
        self.cpu_address_for_ref(r).is_some()
    }

    /// 参照先のバイトが現在見えているCPUアドレス（プライマリウィンドウ優先）
    pub fn cpu_address_for_ref(&self, r: AddressRef) -> Option<u16> {
        let bank = self.get_bank(r.bank_id)?;
        let index = bank.index_of(r.offset)?;
        let page_in_bank = index >> PAGE_SHIFT;
        let primary_slot = r.offset as usize >> PAGE_SHIFT;
        if bank.primary_mapped_page >= 0 && self.mapping.read_bank(primary_slot) == r.bank_id {
            return Some(r.offset);
        }
        (0..NUM_PAGE_SLOTS)
            .find(|&slot| {
                slot % bank.size_in_pages == page_in_bank && self.mapping.read_bank(slot) == r.bank_id
            })
            .map(|slot| ((slot << PAGE_SHIFT) as u16) | (r.offset & 0x3FF))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{BankKind, LabelType};
    use crate::cpu::CpuType;

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_slot_out_of_range_panics() {
        let mut state = CodeAnalysisState::new(CpuType::Mos6502);
        let ram = state.register_bank("RAM", BankKind::Ram, 64, false, 0);
        state.set_code_analysis_rw_page(64, ram, ram);
    }

    #[test]
    #[should_panic(expected = "cannot be mapped")]
    fn test_misaligned_map_panics() {
        let mut state = CodeAnalysisState::new(CpuType::Z80);
        let ram = state.register_bank("RAM 4", BankKind::Ram, 16, false, 16);
        state.map_bank(ram, 8, BankAccess::ReadWrite);
    }

    #[test]
    fn test_remap_keeps_refs_and_labels() {
        let mut state = CodeAnalysisState::new(CpuType::Z80);
        let ram4 = state.register_bank("RAM 4", BankKind::Ram, 16, false, 16);
        let ram1 = state.register_bank("RAM 1", BankKind::Ram, 16, false, 16);
        state.map_bank(ram4, 16, BankAccess::ReadWrite);
        state.take_memory_remapped();

        let r = state.address_ref_from_physical_address(0x4010);
        assert_eq!(r, AddressRef::new(ram4, 0x4010));
        state.set_label_for_address(r, "Loop", LabelType::Code);

        // 別のバンクに切り替え、元のバンクは別ウィンドウへ
        state.map_bank(ram1, 16, BankAccess::ReadWrite);
        state.map_bank(ram4, 48, BankAccess::ReadWrite);
        assert!(state.take_memory_remapped());
        assert_ne!(state.address_ref_from_physical_address(0x4010), r);
        assert_eq!(state.address_ref_from_physical_address(0xC010), r);
        assert_eq!(state.get_label_for_address(r).unwrap().name, "Loop");
        assert_eq!(state.cpu_address_for_ref(r), Some(0xC010));

        state.unmap_bank(ram4);
        assert!(!state.is_address_mapped(r));
        assert_eq!(state.get_label_for_address(r).unwrap().name, "Loop");
    }

    #[test]
    fn test_remap_same_bank_is_not_a_change() {
        let mut state = CodeAnalysisState::new(CpuType::Z80);
        let ram = state.register_bank("RAM", BankKind::Ram, 64, false, 0);
        state.map_bank(ram, 0, BankAccess::ReadWrite);
        assert!(state.take_memory_remapped());
        state.map_bank(ram, 0, BankAccess::ReadWrite);
        assert!(!state.take_memory_remapped());
        assert_eq!(state.mapped_read_slots(ram).len(), 64);
    }

    #[test]
    fn test_noop_remap_keeps_item_list_clean() {
        let mut state = CodeAnalysisState::new(CpuType::Z80);
        let ram0 = state.register_bank("RAM 0", BankKind::Ram, 16, false, 48);
        let ram1 = state.register_bank("RAM 1", BankKind::Ram, 16, false, 48);
        state.map_bank(ram0, 48, BankAccess::ReadWrite);
        state.map_bank(ram1, 48, BankAccess::ReadWrite);
        state.update_item_list();
        let rebuilds = state.item_list_rebuild_count();

        // 同じ値を書き直しても作り直さない
        state.map_bank(ram1, 48, BankAccess::ReadWrite);
        assert!(!state.is_code_analysis_data_dirty());
        state.update_item_list();
        assert_eq!(state.item_list_rebuild_count(), rebuilds);

        state.map_bank(ram0, 48, BankAccess::ReadWrite);
        assert!(state.is_code_analysis_data_dirty());
    }
}
