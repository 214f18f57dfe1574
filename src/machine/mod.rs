//! 解析対象マシン
//!
//! 各マシンはバンクを登録し、ハードウェアのバンク切り替えレジスタへの
//! 書き込みに合わせてマッピングテーブルを更新する。
//! CPUコアからは `tick`（バスアクセス）と `trap`（命令境界）で呼ばれる。

pub mod c64;
pub mod cpc;
pub mod spectrum;

use std::fmt;
use std::str::FromStr;

use crate::analysis::{AddressRef, AnalysisError, CodeAnalysisState, InstructionStart};
use crate::cpu::{BusPins, CpuType, MemoryBus, PinFlags};

pub use c64::C64;
pub use cpc::Cpc;
pub use spectrum::Spectrum;

/// トラップなし
pub const TRAP_NONE: i32 = 0;
/// これ以上のトラップIDはブレーク要求
pub const TRAP_BREAK_BASE: i32 = 128;
pub const TRAP_EXEC_BREAKPOINT: i32 = TRAP_BREAK_BASE;
pub const TRAP_DATA_BREAKPOINT: i32 = TRAP_BREAK_BASE + 1;
pub const TRAP_HANDLER_BREAK: i32 = TRAP_BREAK_BASE + 2;
/// デバッガのステップ完了
pub const TRAP_STEP: i32 = TRAP_BREAK_BASE + 3;

/// マシンの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineType {
    C64,
    Cpc464,
    Cpc6128,
    Spectrum48,
    Spectrum128,
}

impl MachineType {
    pub fn cpu_type(&self) -> CpuType {
        match self {
            MachineType::C64 => CpuType::Mos6502,
            _ => CpuType::Z80,
        }
    }

    /// 設定ファイル・CLIで使う名前
    pub fn name(&self) -> &'static str {
        match self {
            MachineType::C64 => "c64",
            MachineType::Cpc464 => "cpc464",
            MachineType::Cpc6128 => "cpc6128",
            MachineType::Spectrum48 => "spectrum48",
            MachineType::Spectrum128 => "spectrum128",
        }
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineType::C64 => write!(f, "Commodore 64"),
            MachineType::Cpc464 => write!(f, "Amstrad CPC 464"),
            MachineType::Cpc6128 => write!(f, "Amstrad CPC 6128"),
            MachineType::Spectrum48 => write!(f, "ZX Spectrum 48K"),
            MachineType::Spectrum128 => write!(f, "ZX Spectrum 128K"),
        }
    }
}

impl FromStr for MachineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c64" => Ok(MachineType::C64),
            "cpc464" | "cpc" => Ok(MachineType::Cpc464),
            "cpc6128" => Ok(MachineType::Cpc6128),
            "spectrum48" | "48k" | "zx48" => Ok(MachineType::Spectrum48),
            "spectrum128" | "128k" | "zx128" | "spectrum" => Ok(MachineType::Spectrum128),
            _ => Err(format!("Unknown machine: {}", s)),
        }
    }
}

/// 命令境界の追跡
///
/// 実行中の命令を開始時のマッピングで解決して保持し、
/// データアクセスと実行記録はこの位置に帰属させる。
#[derive(Debug, Default)]
pub struct ExecTracker {
    current: Option<InstructionStart>,
    pending_trap: i32,
    instructions: u64,
}

impl ExecTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 実行中の命令（最初のトラップ前は None）
    pub fn pc(&self) -> Option<u16> {
        self.current.as_ref().map(|s| s.pc)
    }

    /// 実行中の命令の (pc, 解決済みアドレス)
    pub fn current(&self) -> Option<(u16, AddressRef)> {
        self.current.as_ref().map(|s| (s.pc, s.address))
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    fn raise(&mut self, trap_id: i32) {
        if self.pending_trap == TRAP_NONE {
            self.pending_trap = trap_id;
        }
    }
}

/// 解析機能付きのマシン
pub trait AnalysedMachine: MemoryBus {
    fn machine_type(&self) -> MachineType;
    fn analysis(&self) -> &CodeAnalysisState;
    fn analysis_mut(&mut self) -> &mut CodeAnalysisState;
    fn tracker(&self) -> &ExecTracker;
    fn tracker_mut(&mut self) -> &mut ExecTracker;

    /// I/Oポートへの書き込み（バンク切り替えレジスタを含む）
    fn io_write(&mut self, port: u16, value: u8);

    fn io_read(&mut self, _port: u16) -> u8 {
        0xFF
    }

    /// 1回のバスアクセス
    ///
    /// オペコードフェッチ（M1）以外のメモリアクセスを、実行中の命令に帰属させて記録する。
    fn tick(&mut self, mut pins: BusPins) -> BusPins {
        let current = self.tracker().current();
        if pins.is_mem_read() {
            pins.data = self.read(pins.address);
            if let Some((pc, pc_ref)) = current.filter(|_| !pins.control.contains(PinFlags::M1)) {
                if self.analysis_mut().register_data_read_from(pc_ref, pc, pins.address) {
                    let id = break_trap_id(self.analysis());
                    self.tracker_mut().raise(id);
                }
            }
        } else if pins.is_mem_write() {
            // 書き込み先はバンク切り替え前のマッピングで決まる
            if let Some((pc, pc_ref)) = current {
                if self.analysis_mut().register_data_write_from(pc_ref, pc, pins.address) {
                    let id = break_trap_id(self.analysis());
                    self.tracker_mut().raise(id);
                }
            }
            self.write(pins.address, pins.data);
        } else if pins.is_io_write() {
            self.io_write(pins.address, pins.data);
        } else if pins.is_io_read() {
            pins.data = self.io_read(pins.address);
        }
        pins
    }

    /// 命令境界で呼ばれる。`pc` は次に実行する命令
    ///
    /// 次の命令をこの時点のマッピングで捕まえてから直前の命令の実行を記録し、
    /// ブレークが必要ならそのトラップIDを返す。
    fn trap(&mut self, pc: u16, _ticks: u32, _pins: BusPins) -> i32 {
        let start = self.analysis().begin_instruction(pc);
        let prev = self.tracker_mut().current.replace(start);
        let mut trap_id = TRAP_NONE;
        match prev {
            Some(prev) => {
                self.tracker_mut().instructions += 1;
                if self.analysis_mut().register_instruction_executed(&prev, pc) {
                    trap_id = break_trap_id(self.analysis());
                }
            }
            None => {
                if self.analysis().has_exec_breakpoint(pc) {
                    trap_id = TRAP_EXEC_BREAKPOINT;
                }
            }
        }
        let pending = std::mem::replace(&mut self.tracker_mut().pending_trap, TRAP_NONE);
        if trap_id == TRAP_NONE {
            trap_id = pending;
        }
        trap_id
    }

    fn on_frame(&mut self) {
        self.analysis_mut().on_frame_start();
    }

    /// 名前で指定したバンクにROMイメージを読み込む
    fn load_rom(&mut self, bank_name: &str, bytes: &[u8]) -> Result<(), AnalysisError> {
        let bank_id = self
            .analysis()
            .get_bank_by_name(bank_name)
            .map(|b| b.id)
            .ok_or_else(|| AnalysisError::UnknownBank(bank_name.to_string()))?;
        self.analysis_mut().set_bank_memory(bank_id, bytes)?;
        log::info!("Loaded {} bytes into bank '{}'", bytes.len(), bank_name);
        Ok(())
    }

    /// 現在の書き込みマッピングでメモリにデータを置く（解析情報は更新しない）
    fn load_memory(&mut self, address: u16, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.analysis_mut().write_byte(address.wrapping_add(i as u16), *b);
        }
    }
}

/// 直近のブレーク理由に対応するトラップID
fn break_trap_id(state: &CodeAnalysisState) -> i32 {
    state
        .last_break_reason()
        .map(|r| r.trap_id())
        .unwrap_or(TRAP_EXEC_BREAKPOINT)
}

/// マシンを作成
pub fn create(machine_type: MachineType) -> Box<dyn AnalysedMachine> {
    log::info!("Creating {}", machine_type);
    match machine_type {
        MachineType::C64 => Box::new(C64::new()),
        MachineType::Cpc464 => Box::new(Cpc::new(false)),
        MachineType::Cpc6128 => Box::new(Cpc::new(true)),
        MachineType::Spectrum48 => Box::new(Spectrum::new(false)),
        MachineType::Spectrum128 => Box::new(Spectrum::new(true)),
    }
}
