//! CPUインターフェースと命令デコーダ
//!
//! チップレベルのCPUコアは外部にあり、ここでは解析に必要な
//! バスのインターフェースと、6502/Z80の命令デコード（逆アセンブル）だけを持つ。

pub mod addressing;
pub mod mos6502;
pub mod z80;

use std::fmt;
use std::str::FromStr;

/// CPUの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuType {
    /// MOS 6502 / 6510 (C64)
    Mos6502,
    /// Zilog Z80 (CPC, Spectrum)
    Z80,
}

impl fmt::Display for CpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuType::Mos6502 => write!(f, "6502"),
            CpuType::Z80 => write!(f, "Z80"),
        }
    }
}

impl FromStr for CpuType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "6502" | "6510" | "mos6502" => Ok(CpuType::Mos6502),
            "z80" => Ok(CpuType::Z80),
            _ => Err(format!("Unknown CPU type: {}", s)),
        }
    }
}

/// メモリバスインターフェース
/// CPUコアがメモリにアクセスするために必要なトレイト
pub trait MemoryBus {
    /// メモリから1バイト読み取り
    fn read(&mut self, address: u16) -> u8;
    /// メモリに1バイト書き込み
    fn write(&mut self, address: u16, value: u8);
}

/// 副作用なしでメモリを覗く（逆アセンブル用）
pub trait MemoryPeek {
    fn peek(&self, address: u16) -> u8;

    fn peek_word(&self, address: u16) -> u16 {
        let low = self.peek(address) as u16;
        let high = self.peek(address.wrapping_add(1)) as u16;
        (high << 8) | low
    }
}

impl MemoryPeek for [u8] {
    fn peek(&self, address: u16) -> u8 {
        self.get(address as usize).copied().unwrap_or(0xFF)
    }
}

bitflags::bitflags! {
    /// バスの制御ピン
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct PinFlags: u8 {
        /// メモリ要求
        const MREQ = 0b0000_0001;
        /// I/O要求
        const IORQ = 0b0000_0010;
        const RD   = 0b0000_0100;
        const WR   = 0b0000_1000;
        /// オペコードフェッチ
        const M1   = 0b0001_0000;
    }
}

/// 1クロック分のバスの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusPins {
    pub address: u16,
    pub data: u8,
    pub control: PinFlags,
}

impl BusPins {
    pub fn mem_read(address: u16) -> Self {
        BusPins {
            address,
            data: 0,
            control: PinFlags::MREQ | PinFlags::RD,
        }
    }

    pub fn mem_write(address: u16, data: u8) -> Self {
        BusPins {
            address,
            data,
            control: PinFlags::MREQ | PinFlags::WR,
        }
    }

    pub fn io_write(port: u16, data: u8) -> Self {
        BusPins {
            address: port,
            data,
            control: PinFlags::IORQ | PinFlags::WR,
        }
    }

    pub fn io_read(port: u16) -> Self {
        BusPins {
            address: port,
            data: 0,
            control: PinFlags::IORQ | PinFlags::RD,
        }
    }

    pub fn is_mem_read(&self) -> bool {
        self.control.contains(PinFlags::MREQ | PinFlags::RD)
    }

    pub fn is_mem_write(&self) -> bool {
        self.control.contains(PinFlags::MREQ | PinFlags::WR)
    }

    pub fn is_io_write(&self) -> bool {
        self.control.contains(PinFlags::IORQ | PinFlags::WR)
    }

    pub fn is_io_read(&self) -> bool {
        self.control.contains(PinFlags::IORQ | PinFlags::RD)
    }
}

bitflags::bitflags! {
    /// 命令の性質
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct InstructionFlags: u32 {
        const CALL         = 0x0001;
        const JUMP         = 0x0002;
        const RETURN       = 0x0004;
        const CONDITIONAL  = 0x0008;
        /// 非公式命令
        const UNDOCUMENTED = 0x0010;
    }
}

/// デコード済みの1命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub byte_size: u16,
    /// 逆アセンブル文字列
    pub text: String,
    /// 分岐先（CALL/JUMP）
    pub jump_address: Option<u16>,
    /// オペランドが指すメモリ
    pub pointer_address: Option<u16>,
    pub flags: InstructionFlags,
}

impl DecodedInstruction {
    pub fn is_call(&self) -> bool {
        self.flags.contains(InstructionFlags::CALL)
    }
}

/// pc の命令をデコードする
pub fn decode<M: MemoryPeek + ?Sized>(cpu_type: CpuType, mem: &M, pc: u16) -> DecodedInstruction {
    match cpu_type {
        CpuType::Mos6502 => mos6502::decode(mem, pc),
        CpuType::Z80 => z80::decode(mem, pc),
    }
}
