//! Commodore 64
//!
//! 6510 の $00/$01 ポートで BASIC / KERNAL / キャラクタROM / I/O の見え方が変わる。
//! ROM の下への書き込みは常に RAM に届く。I/O が見えているときだけ I/O バンクに書く。

use std::cell::Cell;
use std::rc::Rc;

use super::{AnalysedMachine, ExecTracker, MachineType};
use crate::analysis::{AddressRef, BankAccess, BankKind, CodeAnalysisState, RegionDescGenerator};
use crate::analysis_log;
use crate::cpu::{CpuType, MemoryBus};

/// 電源投入時の $00（データ方向）
const DEFAULT_DDR: u8 = 0x2F;
/// 電源投入時の $01
const DEFAULT_PORT: u8 = 0x37;

const SCREEN_COLUMNS: u16 = 40;
const SCREEN_ROWS: u16 = 25;
const COLOUR_RAM: u16 = 0xD800;

pub struct C64 {
    analysis: CodeAnalysisState,
    tracker: ExecTracker,
    ram: i16,
    basic_rom: i16,
    char_rom: i16,
    io: i16,
    kernal_rom: i16,
    port_ddr: u8,
    port_data: u8,
    /// VICバンクの先頭アドレス（$DD00 で選択）
    vic_base: Rc<Cell<u16>>,
    /// VICバンク内の画面メモリオフセット（$D018 で選択）
    screen_offset: Rc<Cell<u16>>,
}

impl C64 {
    pub fn new() -> Self {
        let mut analysis = CodeAnalysisState::new(CpuType::Mos6502);
        let ram = analysis.register_bank("RAM", BankKind::Ram, 64, false, 0);
        let basic_rom = analysis.register_bank("BASIC", BankKind::Rom, 8, true, 40);
        let char_rom = analysis.register_bank("CHARROM", BankKind::Rom, 4, true, 52);
        let io = analysis.register_bank("IO", BankKind::Io, 4, false, 52);
        let kernal_rom = analysis.register_bank("KERNAL", BankKind::Rom, 8, true, 56);

        let vic_base = Rc::new(Cell::new(0));
        let screen_offset = Rc::new(Cell::new(0x0400));
        analysis.register_region_desc_generator(Box::new(ScreenRamRegion {
            ram,
            vic_base: Rc::clone(&vic_base),
            screen_offset: Rc::clone(&screen_offset),
        }));
        analysis.register_region_desc_generator(Box::new(ColourRamRegion { io }));

        let mut c64 = C64 {
            analysis,
            tracker: ExecTracker::new(),
            ram,
            basic_rom,
            char_rom,
            io,
            kernal_rom,
            port_ddr: DEFAULT_DDR,
            port_data: DEFAULT_PORT,
            vic_base,
            screen_offset,
        };
        c64.update_memory_map();
        c64.analysis.take_memory_remapped();
        c64
    }

    /// ポート出力（入力ビットはプルアップで 1）
    fn port_value(&self) -> u8 {
        (self.port_data | !self.port_ddr) & 0x07
    }

    /// ポート値からマッピングを作り直す
    fn update_memory_map(&mut self) {
        let port = self.port_value();
        let loram = port & 0x01 != 0;
        let hiram = port & 0x02 != 0;
        let charen = port & 0x04 != 0;

        self.analysis.map_bank(self.ram, 0, BankAccess::ReadWrite);
        if hiram && loram {
            self.analysis.map_bank(self.basic_rom, 40, BankAccess::Read);
        }
        if hiram {
            self.analysis.map_bank(self.kernal_rom, 56, BankAccess::Read);
        }
        if hiram || loram {
            if charen {
                self.analysis.map_bank(self.io, 52, BankAccess::ReadWrite);
            } else {
                self.analysis.map_bank(self.char_rom, 52, BankAccess::Read);
            }
        }
    }

    /// I/O が $D000 に見えているか
    pub fn io_visible(&self) -> bool {
        self.analysis.read_bank_from_address(0xD000) == self.io
    }

    /// 現在の画面メモリの CPU アドレス
    pub fn screen_address(&self) -> u16 {
        self.vic_base.get().wrapping_add(self.screen_offset.get())
    }

    fn write_io_register(&mut self, address: u16, value: u8) {
        match address {
            // VIC $D018（64バイトごとにミラー）
            0xD000..=0xD3FF if address & 0x3F == 0x18 => {
                self.screen_offset.set(((value >> 4) & 0x0F) as u16 * 0x0400);
                analysis_log::log_remap("C64", "$D018", value);
            }
            // CIA2 ポートA（16バイトごとにミラー、下位2ビットは反転）
            0xDD00..=0xDDFF if address & 0x0F == 0x00 => {
                let bank = 3 - (value & 0x03) as u16;
                self.vic_base.set(bank * 0x4000);
                analysis_log::log_remap("C64", "$DD00", value);
            }
            _ => {}
        }
    }
}

impl Default for C64 {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus for C64 {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x0000 => self.port_ddr,
            0x0001 => (self.port_data & self.port_ddr) | (!self.port_ddr & 0x17),
            _ => self.analysis.read_byte(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000 | 0x0001 => {
                if address == 0 {
                    self.port_ddr = value;
                } else {
                    self.port_data = value;
                }
                // 下のRAMにも書かれる
                self.analysis.write_byte(address, value);
                let before = self.analysis.mapping().read_banks();
                self.update_memory_map();
                if self.analysis.mapping().read_banks() != before {
                    analysis_log::log_remap("C64", "$01", self.port_value());
                }
            }
            0xD000..=0xDFFF if self.io_visible() => {
                self.analysis.write_byte(address, value);
                self.write_io_register(address, value);
            }
            _ => self.analysis.write_byte(address, value),
        }
    }
}

impl AnalysedMachine for C64 {
    fn machine_type(&self) -> MachineType {
        MachineType::C64
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

    /// 6502 に I/O 空間はないので、ポート番号をアドレスとして扱う
    fn io_write(&mut self, port: u16, value: u8) {
        self.write(port, value);
    }
}

/// 画面RAM（VICバンクと $D018 に追従）
struct ScreenRamRegion {
    ram: i16,
    vic_base: Rc<Cell<u16>>,
    screen_offset: Rc<Cell<u16>>,
}

impl ScreenRamRegion {
    fn index(&self, address: AddressRef) -> Option<u16> {
        if address.bank_id != self.ram {
            return None;
        }
        let start = self.vic_base.get().wrapping_add(self.screen_offset.get());
        let index = address.offset.wrapping_sub(start);
        (index < SCREEN_COLUMNS * SCREEN_ROWS).then_some(index)
    }
}

impl RegionDescGenerator for ScreenRamRegion {
    fn in_region(&self, address: AddressRef) -> bool {
        self.index(address).is_some()
    }

    fn generate_address_string(&self, address: AddressRef) -> String {
        let index = self.index(address).unwrap_or(0);
        format!("Screen[{},{}]", index % SCREEN_COLUMNS, index / SCREEN_COLUMNS)
    }
}

/// カラーRAM $D800-$DBE7
struct ColourRamRegion {
    io: i16,
}

impl RegionDescGenerator for ColourRamRegion {
    fn in_region(&self, address: AddressRef) -> bool {
        address.bank_id == self.io
            && address.offset >= COLOUR_RAM
            && address.offset < COLOUR_RAM + SCREEN_COLUMNS * SCREEN_ROWS
    }

    fn generate_address_string(&self, address: AddressRef) -> String {
        let index = address.offset - COLOUR_RAM;
        format!("ColourRAM[{},{}]", index % SCREEN_COLUMNS, index / SCREEN_COLUMNS)
    }
}
