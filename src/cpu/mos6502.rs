//! 6502 命令デコーダ
//!
//! 公式命令はすべてニーモニック付きで、非公式命令は "???" として
//! アドレッシング列から求めたバイト数でデコードする。

use super::addressing::AddressingMode;
use super::{DecodedInstruction, InstructionFlags, MemoryPeek};

use AddressingMode::*;

/// 01列グループ（aaa bbb 01）のニーモニック
const GROUP1_MNEMONICS: [&str; 8] = ["ORA", "AND", "EOR", "ADC", "STA", "LDA", "CMP", "SBC"];
/// 01列グループのアドレッシング（bbb）
const GROUP1_MODES: [AddressingMode; 8] = [
    IndirectX, ZeroPage, Immediate, Absolute, IndirectY, ZeroPageX, AbsoluteY, AbsoluteX,
];

/// 公式命令のニーモニックとアドレッシングモード
fn lookup(opcode: u8) -> Option<(&'static str, AddressingMode)> {
    if opcode & 0x03 == 0x01 {
        // STA #imm は存在しない
        if opcode == 0x89 {
            return None;
        }
        let aaa = (opcode >> 5) as usize;
        let bbb = ((opcode >> 2) & 0x07) as usize;
        return Some((GROUP1_MNEMONICS[aaa], GROUP1_MODES[bbb]));
    }

    let entry = match opcode {
        0x00 => ("BRK", Implied),
        0x08 => ("PHP", Implied),
        0x10 => ("BPL", Relative),
        0x18 => ("CLC", Implied),
        0x20 => ("JSR", Absolute),
        0x24 => ("BIT", ZeroPage),
        0x28 => ("PLP", Implied),
        0x2C => ("BIT", Absolute),
        0x30 => ("BMI", Relative),
        0x38 => ("SEC", Implied),
        0x40 => ("RTI", Implied),
        0x48 => ("PHA", Implied),
        0x4C => ("JMP", Absolute),
        0x50 => ("BVC", Relative),
        0x58 => ("CLI", Implied),
        0x60 => ("RTS", Implied),
        0x68 => ("PLA", Implied),
        0x6C => ("JMP", Indirect),
        0x70 => ("BVS", Relative),
        0x78 => ("SEI", Implied),
        0x84 => ("STY", ZeroPage),
        0x88 => ("DEY", Implied),
        0x8C => ("STY", Absolute),
        0x90 => ("BCC", Relative),
        0x94 => ("STY", ZeroPageX),
        0x98 => ("TYA", Implied),
        0xA0 => ("LDY", Immediate),
        0xA4 => ("LDY", ZeroPage),
        0xA8 => ("TAY", Implied),
        0xAC => ("LDY", Absolute),
        0xB0 => ("BCS", Relative),
        0xB4 => ("LDY", ZeroPageX),
        0xB8 => ("CLV", Implied),
        0xBC => ("LDY", AbsoluteX),
        0xC0 => ("CPY", Immediate),
        0xC4 => ("CPY", ZeroPage),
        0xC8 => ("INY", Implied),
        0xCC => ("CPY", Absolute),
        0xD0 => ("BNE", Relative),
        0xD8 => ("CLD", Implied),
        0xE0 => ("CPX", Immediate),
        0xE4 => ("CPX", ZeroPage),
        0xE8 => ("INX", Implied),
        0xEC => ("CPX", Absolute),
        0xF0 => ("BEQ", Relative),
        0xF8 => ("SED", Implied),

        // 10列
        0x06 => ("ASL", ZeroPage),
        0x0A => ("ASL", Accumulator),
        0x0E => ("ASL", Absolute),
        0x16 => ("ASL", ZeroPageX),
        0x1E => ("ASL", AbsoluteX),
        0x26 => ("ROL", ZeroPage),
        0x2A => ("ROL", Accumulator),
        0x2E => ("ROL", Absolute),
        0x36 => ("ROL", ZeroPageX),
        0x3E => ("ROL", AbsoluteX),
        0x46 => ("LSR", ZeroPage),
        0x4A => ("LSR", Accumulator),
        0x4E => ("LSR", Absolute),
        0x56 => ("LSR", ZeroPageX),
        0x5E => ("LSR", AbsoluteX),
        0x66 => ("ROR", ZeroPage),
        0x6A => ("ROR", Accumulator),
        0x6E => ("ROR", Absolute),
        0x76 => ("ROR", ZeroPageX),
        0x7E => ("ROR", AbsoluteX),
        0x86 => ("STX", ZeroPage),
        0x8A => ("TXA", Implied),
        0x8E => ("STX", Absolute),
        0x96 => ("STX", ZeroPageY),
        0x9A => ("TXS", Implied),
        0xA2 => ("LDX", Immediate),
        0xA6 => ("LDX", ZeroPage),
        0xAA => ("TAX", Implied),
        0xAE => ("LDX", Absolute),
        0xB6 => ("LDX", ZeroPageY),
        0xBA => ("TSX", Implied),
        0xBE => ("LDX", AbsoluteY),
        0xC6 => ("DEC", ZeroPage),
        0xCA => ("DEX", Implied),
        0xCE => ("DEC", Absolute),
        0xD6 => ("DEC", ZeroPageX),
        0xDE => ("DEC", AbsoluteX),
        0xE6 => ("INC", ZeroPage),
        0xEA => ("NOP", Implied),
        0xEE => ("INC", Absolute),
        0xF6 => ("INC", ZeroPageX),
        0xFE => ("INC", AbsoluteX),
        _ => return None,
    };
    Some(entry)
}

/// 非公式命令のアドレッシング（バイト数を合わせるため）
fn undocumented_mode(opcode: u8) -> AddressingMode {
    let bbb = (opcode >> 2) & 0x07;
    let cc = opcode & 0x03;
    match (bbb, cc) {
        (0, 1) | (0, 3) => IndirectX,
        // NOP #imm / KIL
        (0, _) => {
            if opcode >= 0x80 {
                Immediate
            } else {
                Implied
            }
        }
        (1, _) => ZeroPage,
        (2, 0) | (2, 2) => Implied,
        (2, _) => Immediate,
        (3, _) => Absolute,
        (4, 0) => Relative,
        (4, 2) => Implied,
        (4, _) => IndirectY,
        (5, _) => ZeroPageX,
        (6, 1) | (6, 3) => AbsoluteY,
        (6, _) => Implied,
        _ => AbsoluteX,
    }
}

/// pc の6502命令をデコードする
pub fn decode<M: MemoryPeek + ?Sized>(mem: &M, pc: u16) -> DecodedInstruction {
    let opcode = mem.peek(pc);
    let (mnemonic, mode, mut flags) = match lookup(opcode) {
        Some((m, mode)) => (m, mode, InstructionFlags::empty()),
        None => ("???", undocumented_mode(opcode), InstructionFlags::UNDOCUMENTED),
    };

    let value = match mode.operand_size() {
        0 => 0,
        1 => mem.peek(pc.wrapping_add(1)) as u16,
        _ => mem.peek_word(pc.wrapping_add(1)),
    };
    let operand = mode.format(value, pc);

    let mut jump_address = None;
    let mut pointer_address = None;
    match (opcode, mode) {
        (0x20, _) => {
            flags |= InstructionFlags::CALL;
            jump_address = operand.address;
        }
        (0x4C, _) => {
            flags |= InstructionFlags::JUMP;
            jump_address = operand.address;
        }
        (0x6C, _) => {
            flags |= InstructionFlags::JUMP;
            pointer_address = operand.address;
        }
        (0x40, _) | (0x60, _) => flags |= InstructionFlags::RETURN,
        (_, Relative) if !flags.contains(InstructionFlags::UNDOCUMENTED) => {
            flags |= InstructionFlags::JUMP | InstructionFlags::CONDITIONAL;
            jump_address = operand.address;
        }
        (_, Immediate) | (_, Implied) | (_, Accumulator) | (_, Relative) => {}
        _ => pointer_address = operand.address,
    }

    let text = if operand.text.is_empty() {
        mnemonic.to_string()
    } else {
        format!("{} {}", mnemonic, operand.text)
    };

    DecodedInstruction {
        byte_size: mode.instruction_size(),
        text,
        jump_address,
        pointer_address,
        flags,
    }
}
