//! Amstrad CPC 464 / 6128
//!
//! ゲートアレイで下位ROM（OS）と上位ROM（BASIC / AMSDOS）を有効・無効にし、
//! 6128 では追加の64KBをRAM構成で割り当てる。ROMへの書き込みは下のRAMに届く。

use std::cell::Cell;
use std::rc::Rc;

use super::{AnalysedMachine, ExecTracker, MachineType};
use crate::analysis::{AddressRef, BankAccess, BankKind, CodeAnalysisState, RegionDescGenerator};
use crate::analysis_log;
use crate::cpu::{CpuType, MemoryBus};

const BANK_PAGES: usize = 16;
/// AMSDOS の上位ROM番号
const AMSDOS_ROM_SELECT: u8 = 7;

/// RAM構成ごとの 16KB スロットに入るRAMバンク番号
const RAM_CONFIGS: [[usize; 4]; 8] = [
    [0, 1, 2, 3],
    [0, 1, 2, 7],
    [4, 5, 6, 7],
    [0, 3, 2, 7],
    [0, 4, 2, 3],
    [0, 5, 2, 3],
    [0, 6, 2, 3],
    [0, 7, 2, 3],
];

const SCREEN_BYTES_PER_ROW: u16 = 80;
const SCREEN_ROWS: u16 = 25;
const CRTC_REGISTERS: usize = 18;

pub struct Cpc {
    analysis: CodeAnalysisState,
    tracker: ExecTracker,
    is_6128: bool,
    os_rom: i16,
    basic_rom: i16,
    amsdos_rom: i16,
    ram: [i16; 8],
    /// ゲートアレイのROM無効ビット（bit2: 下位, bit3: 上位）
    rom_disable: u8,
    ram_config: u8,
    upper_rom_select: u8,
    crtc_select: u8,
    crtc: [u8; CRTC_REGISTERS],
    /// CRTC R12/R13 から求めた画面先頭の CPU アドレス
    screen_start: Rc<Cell<u16>>,
}

impl Cpc {
    pub fn new(is_6128: bool) -> Self {
        let mut analysis = CodeAnalysisState::new(CpuType::Z80);
        let os_rom = analysis.register_bank("OSROM", BankKind::Rom, BANK_PAGES, true, 0);
        let basic_rom = analysis.register_bank("BASICROM", BankKind::Rom, BANK_PAGES, true, 48);
        let amsdos_rom = if is_6128 {
            analysis.register_bank("AMSDOSROM", BankKind::Rom, BANK_PAGES, true, 48)
        } else {
            -1
        };
        let mut ram = [-1i16; 8];
        for (n, id) in ram.iter_mut().enumerate() {
            if n < 4 {
                *id = analysis.register_bank(&format!("RAM{}", n), BankKind::Ram, BANK_PAGES, false, (n * 16) as i16);
            } else if is_6128 {
                *id = analysis.register_bank(&format!("RAM{}", n), BankKind::Ram, BANK_PAGES, false, 16);
            }
        }

        let mut crtc = [0u8; CRTC_REGISTERS];
        // 電源投入時の画面は $C000
        crtc[12] = 0x30;
        let screen_start = Rc::new(Cell::new(0xC000));
        analysis.register_region_desc_generator(Box::new(ScreenRegion {
            ram: [ram[0], ram[1], ram[2], ram[3]],
            screen_start: Rc::clone(&screen_start),
        }));

        let mut cpc = Cpc {
            analysis,
            tracker: ExecTracker::new(),
            is_6128,
            os_rom,
            basic_rom,
            amsdos_rom,
            ram,
            rom_disable: 0,
            ram_config: 0,
            upper_rom_select: 0,
            crtc_select: 0,
            crtc,
            screen_start,
        };
        cpc.update_memory_map();
        cpc.analysis.take_memory_remapped();
        cpc
    }

    fn update_memory_map(&mut self) {
        let config = RAM_CONFIGS[(self.ram_config & 0x07) as usize];
        for (slot, n) in config.iter().enumerate() {
            self.analysis.map_bank(self.ram[*n], slot * 16, BankAccess::ReadWrite);
        }
        if self.rom_disable & 0x04 == 0 {
            self.analysis.map_bank(self.os_rom, 0, BankAccess::Read);
        }
        if self.rom_disable & 0x08 == 0 {
            let upper = if self.upper_rom_select == AMSDOS_ROM_SELECT && self.amsdos_rom >= 0 {
                self.amsdos_rom
            } else {
                self.basic_rom
            };
            self.analysis.map_bank(upper, 48, BankAccess::Read);
        }
    }

    fn update_screen_start(&mut self) {
        let r12 = self.crtc[12] as u16;
        let r13 = self.crtc[13] as u16;
        let page = (r12 >> 4) & 0x03;
        let offset = (((r12 & 0x03) << 8) | r13) * 2;
        self.screen_start.set(page * 0x4000 + offset);
    }

    fn write_gate_array(&mut self, value: u8) {
        match value >> 6 {
            0b10 => {
                self.rom_disable = value & 0x0C;
                self.update_memory_map();
                analysis_log::log_remap("CPC", "GA ROM", value);
            }
            0b11 if self.is_6128 => {
                self.ram_config = value & 0x07;
                self.update_memory_map();
                analysis_log::log_remap("CPC", "GA RAM", value);
            }
            // ペン・パレット選択は解析に関係しない
            _ => {}
        }
    }

    fn write_crtc(&mut self, function: u16, value: u8) {
        match function {
            0 => self.crtc_select = value & 0x1F,
            1 => {
                let reg = self.crtc_select as usize;
                if reg < CRTC_REGISTERS {
                    self.crtc[reg] = value;
                    if reg == 12 || reg == 13 {
                        self.update_screen_start();
                    }
                }
            }
            _ => {}
        }
    }

    pub fn screen_start(&self) -> u16 {
        self.screen_start.get()
    }

    pub fn ram_bank(&self, n: usize) -> i16 {
        self.ram.get(n).copied().unwrap_or(-1)
    }

    pub fn os_rom(&self) -> i16 {
        self.os_rom
    }

    pub fn basic_rom(&self) -> i16 {
        self.basic_rom
    }

    pub fn amsdos_rom(&self) -> i16 {
        self.amsdos_rom
    }
}

impl MemoryBus for Cpc {
    fn read(&mut self, address: u16) -> u8 {
        self.analysis.read_byte(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.analysis.write_byte(address, value);
    }
}

impl AnalysedMachine for Cpc {
    fn machine_type(&self) -> MachineType {
        if self.is_6128 {
            MachineType::Cpc6128
        } else {
            MachineType::Cpc464
        }
    }

    fn analysis(&self) -> &CodeAnalysisState {
        &self.analysis
    }

    fn analysis_mut(&mut self) -> &mut CodeAnalysisState {
        &mut self.analysis
    }

    fn tracker(&self) -> &ExecTracker {
        &self.tracker
    }

    fn tracker_mut(&mut self) -> &mut ExecTracker {
        &mut self.tracker
    }

    /// ポートは部分デコードで、1回の書き込みが複数のデバイスに届くことがある
    fn io_write(&mut self, port: u16, value: u8) {
        if port & 0xC000 == 0x4000 {
            self.write_gate_array(value);
        }
        if port & 0x2000 == 0 {
            self.upper_rom_select = value;
            self.update_memory_map();
            analysis_log::log_remap("CPC", "ROM select", value);
        }
        if port & 0x4000 == 0 {
            self.write_crtc((port >> 8) & 0x03, value);
        }
    }
}

/// 画面メモリ（CRTC R12/R13 に追従）
///
/// 1文字行 80 バイト、スキャンラインごとに $800 離れて並ぶ。
struct ScreenRegion {
    ram: [i16; 4],
    screen_start: Rc<Cell<u16>>,
}

impl ScreenRegion {
    /// (x, y) バイト座標
    fn position(&self, address: AddressRef) -> Option<(u16, u16)> {
        let start = self.screen_start.get();
        let page = (start >> 14) as usize;
        if address.bank_id != self.ram[page] {
            return None;
        }
        let a = address.offset & 0x3FFF;
        let line = a >> 11;
        let index = (a & 0x07FF).wrapping_sub(start & 0x07FF) & 0x07FF;
        if index >= SCREEN_BYTES_PER_ROW * SCREEN_ROWS {
            return None;
        }
        Some((index % SCREEN_BYTES_PER_ROW, (index / SCREEN_BYTES_PER_ROW) * 8 + line))
    }
}

impl RegionDescGenerator for ScreenRegion {
    fn in_region(&self, address: AddressRef) -> bool {
        self.position(address).is_some()
    }

    fn generate_address_string(&self, address: AddressRef) -> String {
        let (x, y) = self.position(address).unwrap_or((0, 0));
        format!("Screen[{},{}]", x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_on_map() {
        let cpc = Cpc::new(false);
        let state = cpc.analysis();
        assert_eq!(state.read_bank_from_address(0x0000), cpc.os_rom());
        assert_eq!(state.write_bank_from_address(0x0000), cpc.ram_bank(0));
        assert_eq!(state.read_bank_from_address(0x4000), cpc.ram_bank(1));
        assert_eq!(state.read_bank_from_address(0xC000), cpc.basic_rom());
        assert_eq!(state.write_bank_from_address(0xC000), cpc.ram_bank(3));
        assert_eq!(cpc.amsdos_rom(), -1);
    }

    #[test]
    fn test_gate_array_rom_disable() {
        let mut cpc = Cpc::new(false);
        // 下位・上位ROMとも無効
        cpc.io_write(0x7F00, 0x8C);
        assert_eq!(cpc.analysis().read_bank_from_address(0x0000), cpc.ram_bank(0));
        assert_eq!(cpc.analysis().read_bank_from_address(0xC000), cpc.ram_bank(3));
        cpc.io_write(0x7F00, 0x88);
        assert_eq!(cpc.analysis().read_bank_from_address(0x0000), cpc.os_rom());
        assert_eq!(cpc.analysis().read_bank_from_address(0xC000), cpc.ram_bank(3));
    }

    #[test]
    fn test_6128_ram_configs() {
        let mut cpc = Cpc::new(true);
        cpc.io_write(0x7F00, 0x8C);
        cpc.io_write(0x7F00, 0xC2);
        let state = cpc.analysis();
        for (slot, n) in [4, 5, 6, 7].iter().enumerate() {
            assert_eq!(state.read_bank_from_address((slot * 0x4000) as u16), cpc.ram_bank(*n));
        }
        cpc.io_write(0x7F00, 0xC4);
        assert_eq!(cpc.analysis().read_bank_from_address(0x4000), cpc.ram_bank(4));
        assert_eq!(cpc.analysis().read_bank_from_address(0xC000), cpc.ram_bank(3));
        // RAM4 はどのウィンドウに出てもプライマリ $4000 に正規化される
        let r = cpc.analysis().address_ref_from_physical_address(0x4010);
        assert_eq!(r, AddressRef::new(cpc.ram_bank(4), 0x4010));

        // 464 では RAM 構成は無視
        let mut cpc464 = Cpc::new(false);
        cpc464.io_write(0x7F00, 0xC2);
        assert_eq!(cpc464.analysis().read_bank_from_address(0x4000), cpc464.ram_bank(1));
    }

    #[test]
    fn test_upper_rom_select() {
        let mut cpc = Cpc::new(true);
        cpc.io_write(0xDF00, AMSDOS_ROM_SELECT);
        assert_eq!(cpc.analysis().read_bank_from_address(0xC000), cpc.amsdos_rom());
        cpc.io_write(0xDF00, 0);
        assert_eq!(cpc.analysis().read_bank_from_address(0xC000), cpc.basic_rom());
    }

    #[test]
    fn test_crtc_screen_region() {
        let mut cpc = Cpc::new(false);
        let ram3 = cpc.ram_bank(3);
        assert_eq!(cpc.screen_start(), 0xC000);
        let state = cpc.analysis();
        assert_eq!(state.address_label_string(AddressRef::new(ram3, 0xC000)), "Screen[0,0]");
        // 2行目のスキャンライン1
        assert_eq!(state.address_label_string(AddressRef::new(ram3, 0xC851)), "Screen[1,9]");

        // R12 = $10 で画面を $4000 へ
        cpc.io_write(0xBC00, 12);
        cpc.io_write(0xBD00, 0x10);
        cpc.io_write(0xBC00, 13);
        cpc.io_write(0xBD00, 0x00);
        assert_eq!(cpc.screen_start(), 0x4000);
        let ram1 = cpc.ram_bank(1);
        assert_eq!(cpc.analysis().address_label_string(AddressRef::new(ram1, 0x4000)), "Screen[0,0]");
        assert_eq!(cpc.analysis().address_label_string(AddressRef::new(ram3, 0xC000)), "$C000");
    }
}
