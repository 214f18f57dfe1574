//! ZX Spectrum 48K / 128K
//!
//! 128K はポート $7FFD でROMと $C000 のRAMバンク、表示画面を切り替える。
//! ビット5を立てると次のリセットまでページングが固定される。

use std::cell::Cell;
use std::rc::Rc;

use super::{AnalysedMachine, ExecTracker, MachineType};
use crate::analysis::{AddressRef, BankAccess, BankKind, CodeAnalysisState, RegionDescGenerator};
use crate::analysis_log;
use crate::cpu::{CpuType, MemoryBus};

const PIXEL_BYTES: u16 = 0x1800;
const ATTR_BYTES: u16 = 0x0300;
const BANK_PAGES: usize = 16;

pub struct Spectrum {
    analysis: CodeAnalysisState,
    tracker: ExecTracker,
    is_128: bool,
    rom: [i16; 2],
    ram: [i16; 8],
    port_7ffd: u8,
    paging_locked: bool,
    /// 表示中の画面があるバンク
    screen_bank: Rc<Cell<i16>>,
}

impl Spectrum {
    pub fn new(is_128: bool) -> Self {
        let mut analysis = CodeAnalysisState::new(CpuType::Z80);
        let mut rom = [-1i16; 2];
        let mut ram = [-1i16; 8];

        rom[0] = analysis.register_bank("ROM0", BankKind::Rom, BANK_PAGES, true, 0);
        if is_128 {
            rom[1] = analysis.register_bank("ROM1", BankKind::Rom, BANK_PAGES, true, 0);
        }
        for (n, id) in ram.iter_mut().enumerate() {
            let primary = match n {
                5 => 16,
                2 => 32,
                _ => 48,
            };
            // 48K は 5/2/0 の3バンクだけ
            if is_128 || matches!(n, 0 | 2 | 5) {
                *id = analysis.register_bank(&format!("RAM{}", n), BankKind::Ram, BANK_PAGES, false, primary);
            }
        }

        let screen_bank = Rc::new(Cell::new(ram[5]));
        analysis.register_region_desc_generator(Box::new(PixelRegion {
            screen_bank: Rc::clone(&screen_bank),
        }));
        analysis.register_region_desc_generator(Box::new(AttributeRegion {
            screen_bank: Rc::clone(&screen_bank),
        }));

        let mut spectrum = Spectrum {
            analysis,
            tracker: ExecTracker::new(),
            is_128,
            rom,
            ram,
            port_7ffd: 0,
            paging_locked: false,
            screen_bank,
        };
        spectrum.update_paging();
        spectrum.analysis.take_memory_remapped();
        spectrum
    }

    fn update_paging(&mut self) {
        let rom = if self.port_7ffd & 0x10 != 0 && self.rom[1] >= 0 {
            self.rom[1]
        } else {
            self.rom[0]
        };
        self.analysis.map_bank(rom, 0, BankAccess::Read);
        self.analysis.map_bank(self.ram[5], 16, BankAccess::ReadWrite);
        self.analysis.map_bank(self.ram[2], 32, BankAccess::ReadWrite);
        let upper = if self.is_128 {
            self.ram[(self.port_7ffd & 0x07) as usize]
        } else {
            self.ram[0]
        };
        self.analysis.map_bank(upper, 48, BankAccess::ReadWrite);

        let screen = if self.port_7ffd & 0x08 != 0 {
            self.ram[7]
        } else {
            self.ram[5]
        };
        self.screen_bank.set(screen);
    }

    pub fn is_paging_locked(&self) -> bool {
        self.paging_locked
    }

    pub fn screen_bank(&self) -> i16 {
        self.screen_bank.get()
    }

    pub fn ram_bank(&self, n: usize) -> i16 {
        self.ram.get(n).copied().unwrap_or(-1)
    }

    pub fn rom_bank(&self, n: usize) -> i16 {
        self.rom.get(n).copied().unwrap_or(-1)
    }
}

impl MemoryBus for Spectrum {
    fn read(&mut self, address: u16) -> u8 {
        self.analysis.read_byte(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.analysis.write_byte(address, value);
    }
}

impl AnalysedMachine for Spectrum {
    fn machine_type(&self) -> MachineType {
        if self.is_128 {
            MachineType::Spectrum128
        } else {
            MachineType::Spectrum48
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

    fn io_write(&mut self, port: u16, value: u8) {
        // $7FFD は A15 と A1 が 0 のときに選択される
        if self.is_128 && port & 0x8002 == 0 {
            if self.paging_locked {
                log::debug!("$7FFD write ${:02X} ignored (paging locked)", value);
                return;
            }
            self.port_7ffd = value;
            self.paging_locked = value & 0x20 != 0;
            self.update_paging();
            analysis_log::log_remap("Spectrum", "$7FFD", value);
        }
    }
}

/// 画面バンク内のオフセット（16KB 境界に整列している）
fn screen_offset(screen_bank: &Cell<i16>, address: AddressRef) -> Option<u16> {
    (address.bank_id == screen_bank.get()).then_some(address.offset & 0x3FFF)
}

/// ピクセル領域 $0000-$17FF（画面バンク相対）
struct PixelRegion {
    screen_bank: Rc<Cell<i16>>,
}

impl RegionDescGenerator for PixelRegion {
    fn in_region(&self, address: AddressRef) -> bool {
        screen_offset(&self.screen_bank, address).is_some_and(|a| a < PIXEL_BYTES)
    }

    fn generate_address_string(&self, address: AddressRef) -> String {
        let a = address.offset & 0x3FFF;
        let y = ((a >> 11) & 0x03) * 64 + ((a >> 5) & 0x07) * 8 + ((a >> 8) & 0x07);
        let x = (a & 0x1F) * 8;
        format!("Pixel[{},{}]", x, y)
    }
}

/// 属性領域 $1800-$1AFF（画面バンク相対）
struct AttributeRegion {
    screen_bank: Rc<Cell<i16>>,
}

impl RegionDescGenerator for AttributeRegion {
    fn in_region(&self, address: AddressRef) -> bool {
        screen_offset(&self.screen_bank, address)
            .is_some_and(|a| (PIXEL_BYTES..PIXEL_BYTES + ATTR_BYTES).contains(&a))
    }

    fn generate_address_string(&self, address: AddressRef) -> String {
        let a = (address.offset & 0x3FFF) - PIXEL_BYTES;
        format!("Attr[{},{}]", a % 32, a / 32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_48k_layout() {
        let spectrum = Spectrum::new(false);
        let state = spectrum.analysis();
        assert_eq!(state.banks().len(), 4);
        assert_eq!(state.read_bank_from_address(0x0000), spectrum.rom_bank(0));
        assert_eq!(state.read_bank_from_address(0x4000), spectrum.ram_bank(5));
        assert_eq!(state.read_bank_from_address(0x8000), spectrum.ram_bank(2));
        assert_eq!(state.read_bank_from_address(0xC000), spectrum.ram_bank(0));
        assert!(state.write_bank_from_address(0x0000) < 0);
        assert_eq!(spectrum.ram_bank(7), -1);
    }

    #[test]
    fn test_7ffd_paging_and_lock() {
        let mut spectrum = Spectrum::new(true);
        spectrum.io_write(0x7FFD, 0x13);
        let state = spectrum.analysis();
        assert_eq!(state.read_bank_from_address(0x0000), spectrum.rom_bank(1));
        assert_eq!(state.read_bank_from_address(0xC000), spectrum.ram_bank(3));
        // 部分デコード（A15=0, A1=0 ならどのポートでも）
        spectrum.io_write(0x1FFD, 0x24);
        assert!(spectrum.is_paging_locked());
        assert_eq!(spectrum.analysis().read_bank_from_address(0xC000), spectrum.ram_bank(4));
        spectrum.io_write(0x7FFD, 0x01);
        assert_eq!(spectrum.analysis().read_bank_from_address(0xC000), spectrum.ram_bank(4));
        // ロック直前の書き込みで ROM0 に戻っている
        assert_eq!(spectrum.analysis().read_bank_from_address(0x0000), spectrum.rom_bank(0));
    }

    #[test]
    fn test_48k_ignores_7ffd() {
        let mut spectrum = Spectrum::new(false);
        spectrum.io_write(0x7FFD, 0x07);
        assert_eq!(spectrum.analysis().read_bank_from_address(0xC000), spectrum.ram_bank(0));
    }

    #[test]
    fn test_screen_regions() {
        let mut spectrum = Spectrum::new(true);
        let ram5 = spectrum.ram_bank(5);
        let state = spectrum.analysis();
        assert_eq!(state.address_label_string(AddressRef::new(ram5, 0x4000)), "Pixel[0,0]");
        // 3分割の2番目、文字行1、スキャンライン1
        assert_eq!(state.address_label_string(AddressRef::new(ram5, 0x4921)), "Pixel[8,73]");
        assert_eq!(state.address_label_string(AddressRef::new(ram5, 0x5821)), "Attr[1,1]");
        assert_eq!(state.address_label_string(AddressRef::new(ram5, 0x5B00)), "$5B00");

        // シャドウ画面に切り替えると RAM7 が対象になる
        spectrum.io_write(0x7FFD, 0x08);
        let ram7 = spectrum.ram_bank(7);
        assert_eq!(spectrum.screen_bank(), ram7);
        let state = spectrum.analysis();
        assert_eq!(state.address_label_string(AddressRef::new(ram7, 0xC000)), "Pixel[0,0]");
        assert_eq!(state.address_label_string(AddressRef::new(ram5, 0x4000)), "$4000");
    }
}
