//! Z80 命令デコーダ
//!
//! オペコードを x/y/z/p/q のビットフィールドに分解してデコードする。
//! CB, ED, DD/FD（IX/IY）, DDCB/FDCB の各プレフィックスに対応。

use super::{DecodedInstruction, InstructionFlags, MemoryPeek};

const R: [&str; 8] = ["B", "C", "D", "E", "H", "L", "(HL)", "A"];
const RP: [&str; 4] = ["BC", "DE", "HL", "SP"];
const RP2: [&str; 4] = ["BC", "DE", "HL", "AF"];
const CC: [&str; 8] = ["NZ", "Z", "NC", "C", "PO", "PE", "P", "M"];
const ALU: [&str; 8] = ["ADD A,", "ADC A,", "SUB ", "SBC A,", "AND ", "XOR ", "OR ", "CP "];
const ROT: [&str; 8] = ["RLC", "RRC", "RL", "RR", "SLA", "SRA", "SLL", "SRL"];
const IM: [&str; 8] = ["0", "0/1", "1", "2", "0", "0/1", "1", "2"];
const BLOCK: [[&str; 4]; 4] = [
    ["LDI", "CPI", "INI", "OUTI"],
    ["LDD", "CPD", "IND", "OUTD"],
    ["LDIR", "CPIR", "INIR", "OTIR"],
    ["LDDR", "CPDR", "INDR", "OTDR"],
];

/// HL の置き換え先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Index {
    HL,
    IX,
    IY,
}

impl Index {
    fn name(self) -> &'static str {
        match self {
            Index::HL => "HL",
            Index::IX => "IX",
            Index::IY => "IY",
        }
    }
}

struct Decoder<'a, M: MemoryPeek + ?Sized> {
    mem: &'a M,
    pc: u16,
    len: u16,
    index: Index,
    /// (IX+d) の変位（DDCB では先に読む）
    disp: Option<i8>,
    flags: InstructionFlags,
    jump_address: Option<u16>,
    pointer_address: Option<u16>,
}

impl<'a, M: MemoryPeek + ?Sized> Decoder<'a, M> {
    fn new(mem: &'a M, pc: u16) -> Self {
        Decoder {
            mem,
            pc,
            len: 0,
            index: Index::HL,
            disp: None,
            flags: InstructionFlags::empty(),
            jump_address: None,
            pointer_address: None,
        }
    }

    fn fetch(&mut self) -> u8 {
        let b = self.mem.peek(self.pc.wrapping_add(self.len));
        self.len += 1;
        b
    }

    fn imm8(&mut self) -> String {
        format!("${:02X}", self.fetch())
    }

    fn imm16(&mut self) -> u16 {
        let low = self.fetch() as u16;
        let high = self.fetch() as u16;
        (high << 8) | low
    }

    /// (nn) 形式のオペランド
    fn pointer16(&mut self) -> String {
        let nn = self.imm16();
        self.pointer_address = Some(nn);
        format!("(${:04X})", nn)
    }

    fn relative(&mut self) -> String {
        let d = self.fetch() as i8;
        let target = self.pc.wrapping_add(self.len).wrapping_add(d as u16);
        self.jump_address = Some(target);
        format!("${:04X}", target)
    }

    fn hl(&self) -> &'static str {
        self.index.name()
    }

    fn rp(&self, p: u8) -> &'static str {
        if p == 2 {
            self.hl()
        } else {
            RP[p as usize]
        }
    }

    fn rp2(&self, p: u8) -> &'static str {
        if p == 2 {
            self.hl()
        } else {
            RP2[p as usize]
        }
    }

    /// (IX+d) 形式
    fn indexed(&mut self) -> String {
        let d = match self.disp {
            Some(d) => d,
            None => {
                let d = self.fetch() as i8;
                self.disp = Some(d);
                d
            }
        };
        if d < 0 {
            format!("({}-${:02X})", self.hl(), (d as i16).unsigned_abs())
        } else {
            format!("({}+${:02X})", self.hl(), d)
        }
    }

    /// 8ビットレジスタ。`sub_hl` が偽なら H/L を IXH/IXL に置き換えない
    fn reg(&mut self, i: u8, sub_hl: bool) -> String {
        match (i, self.index) {
            (6, Index::HL) => R[6].to_string(),
            (6, _) => self.indexed(),
            (4, Index::IX) | (5, Index::IX) | (4, Index::IY) | (5, Index::IY) if sub_hl => {
                self.flags |= InstructionFlags::UNDOCUMENTED;
                let half = if i == 4 { "H" } else { "L" };
                format!("{}{}", self.hl(), half)
            }
            _ => R[i as usize].to_string(),
        }
    }

    fn call(&mut self, target: u16, conditional: bool) {
        self.flags |= InstructionFlags::CALL;
        if conditional {
            self.flags |= InstructionFlags::CONDITIONAL;
        }
        self.jump_address = Some(target);
    }

    fn jump(&mut self, conditional: bool) {
        self.flags |= InstructionFlags::JUMP;
        if conditional {
            self.flags |= InstructionFlags::CONDITIONAL;
        }
    }

    fn ret(&mut self, conditional: bool) {
        self.flags |= InstructionFlags::RETURN;
        if conditional {
            self.flags |= InstructionFlags::CONDITIONAL;
        }
    }

    fn decode(mut self) -> DecodedInstruction {
        let mut op = self.fetch();
        // DD/FD プレフィックス
        if op == 0xDD || op == 0xFD {
            let next = self.mem.peek(self.pc.wrapping_add(1));
            if matches!(next, 0xDD | 0xED | 0xFD) {
                // 後続のプレフィックスに置き換えられる
                self.flags |= InstructionFlags::UNDOCUMENTED;
                return self.finish("NOP*".to_string());
            }
            self.index = if op == 0xDD { Index::IX } else { Index::IY };
            op = self.fetch();
        }
        let text = match op {
            0xCB => self.decode_cb(),
            0xED => self.decode_ed(),
            _ => self.decode_main(op),
        };
        self.finish(text)
    }

    fn finish(self, text: String) -> DecodedInstruction {
        DecodedInstruction {
            byte_size: self.len,
            text,
            jump_address: self.jump_address,
            pointer_address: self.pointer_address,
            flags: self.flags,
        }
    }

    fn decode_main(&mut self, op: u8) -> String {
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;

        match x {
            0 => match z {
                0 => match y {
                    0 => "NOP".to_string(),
                    1 => "EX AF,AF'".to_string(),
                    2 => {
                        self.jump(true);
                        format!("DJNZ {}", self.relative())
                    }
                    3 => {
                        self.jump(false);
                        format!("JR {}", self.relative())
                    }
                    _ => {
                        self.jump(true);
                        format!("JR {},{}", CC[(y - 4) as usize], self.relative())
                    }
                },
                1 => {
                    if q == 0 {
                        let nn = self.imm16();
                        format!("LD {},${:04X}", self.rp(p), nn)
                    } else {
                        format!("ADD {},{}", self.hl(), self.rp(p))
                    }
                }
                2 => match (q, p) {
                    (0, 0) => "LD (BC),A".to_string(),
                    (0, 1) => "LD (DE),A".to_string(),
                    (0, 2) => format!("LD {},{}", self.pointer16(), self.hl()),
                    (0, _) => format!("LD {},A", self.pointer16()),
                    (_, 0) => "LD A,(BC)".to_string(),
                    (_, 1) => "LD A,(DE)".to_string(),
                    (_, 2) => {
                        let hl = self.hl();
                        format!("LD {},{}", hl, self.pointer16())
                    }
                    _ => format!("LD A,{}", self.pointer16()),
                },
                3 => {
                    let mnemonic = if q == 0 { "INC" } else { "DEC" };
                    format!("{} {}", mnemonic, self.rp(p))
                }
                4 => format!("INC {}", self.reg(y, true)),
                5 => format!("DEC {}", self.reg(y, true)),
                6 => {
                    let r = self.reg(y, true);
                    format!("LD {},{}", r, self.imm8())
                }
                _ => ["RLCA", "RRCA", "RLA", "RRA", "DAA", "CPL", "SCF", "CCF"][y as usize]
                    .to_string(),
            },
            1 => {
                if y == 6 && z == 6 {
                    "HALT".to_string()
                } else {
                    // (IX+d) と組む側の H/L は置き換えない
                    let sub = y != 6 && z != 6;
                    let dst = self.reg(y, sub);
                    let src = self.reg(z, sub);
                    format!("LD {},{}", dst, src)
                }
            }
            2 => format!("{}{}", ALU[y as usize], self.reg(z, true)),
            _ => self.decode_main_x3(y, z, p, q),
        }
    }

    fn decode_main_x3(&mut self, y: u8, z: u8, p: u8, q: u8) -> String {
        match z {
            0 => {
                self.ret(true);
                format!("RET {}", CC[y as usize])
            }
            1 => {
                if q == 0 {
                    format!("POP {}", self.rp2(p))
                } else {
                    match p {
                        0 => {
                            self.ret(false);
                            "RET".to_string()
                        }
                        1 => "EXX".to_string(),
                        2 => {
                            self.jump(false);
                            format!("JP ({})", self.hl())
                        }
                        _ => format!("LD SP,{}", self.hl()),
                    }
                }
            }
            2 => {
                let nn = self.imm16();
                self.jump(true);
                self.jump_address = Some(nn);
                format!("JP {},${:04X}", CC[y as usize], nn)
            }
            3 => match y {
                0 => {
                    let nn = self.imm16();
                    self.jump(false);
                    self.jump_address = Some(nn);
                    format!("JP ${:04X}", nn)
                }
                2 => format!("OUT ({}),A", self.imm8()),
                3 => format!("IN A,({})", self.imm8()),
                4 => format!("EX (SP),{}", self.hl()),
                5 => "EX DE,HL".to_string(),
                6 => "DI".to_string(),
                7 => "EI".to_string(),
                // CB はここに来ない
                _ => "???".to_string(),
            },
            4 => {
                let nn = self.imm16();
                self.call(nn, true);
                format!("CALL {},${:04X}", CC[y as usize], nn)
            }
            5 => {
                if q == 0 {
                    format!("PUSH {}", self.rp2(p))
                } else {
                    // p == 0 のみ（他はプレフィックス）
                    let nn = self.imm16();
                    self.call(nn, false);
                    format!("CALL ${:04X}", nn)
                }
            }
            6 => format!("{}{}", ALU[y as usize], self.imm8()),
            _ => {
                let target = (y as u16) * 8;
                self.call(target, false);
                format!("RST ${:02X}", target)
            }
        }
    }

    fn decode_cb(&mut self) -> String {
        // DDCB d op: 変位が先
        if self.index != Index::HL {
            let d = self.fetch() as i8;
            self.disp = Some(d);
        }
        let op = self.fetch();
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;

        if self.index != Index::HL {
            let target = self.indexed();
            if z != 6 && x != 1 {
                // 結果をレジスタにもコピーする非公式命令
                self.flags |= InstructionFlags::UNDOCUMENTED;
            }
            if x == 1 && z != 6 {
                self.flags |= InstructionFlags::UNDOCUMENTED;
            }
            let copy = if z != 6 && x != 1 {
                format!(",{}", R[z as usize])
            } else {
                String::new()
            };
            return match x {
                0 => format!("{} {}{}", ROT[y as usize], target, copy),
                1 => format!("BIT {},{}", y, target),
                2 => format!("RES {},{}{}", y, target, copy),
                _ => format!("SET {},{}{}", y, target, copy),
            };
        }

        let r = R[z as usize];
        match x {
            0 => {
                if y == 6 {
                    self.flags |= InstructionFlags::UNDOCUMENTED;
                }
                format!("{} {}", ROT[y as usize], r)
            }
            1 => format!("BIT {},{}", y, r),
            2 => format!("RES {},{}", y, r),
            _ => format!("SET {},{}", y, r),
        }
    }

    fn decode_ed(&mut self) -> String {
        // ED 命令は IX/IY の影響を受けない
        self.index = Index::HL;
        let op = self.fetch();
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;

        match x {
            1 => match z {
                0 => {
                    if y == 6 {
                        "IN (C)".to_string()
                    } else {
                        format!("IN {},(C)", R[y as usize])
                    }
                }
                1 => {
                    if y == 6 {
                        "OUT (C),0".to_string()
                    } else {
                        format!("OUT (C),{}", R[y as usize])
                    }
                }
                2 => {
                    let mnemonic = if q == 0 { "SBC" } else { "ADC" };
                    format!("{} HL,{}", mnemonic, RP[p as usize])
                }
                3 => {
                    if q == 0 {
                        format!("LD {},{}", self.pointer16(), RP[p as usize])
                    } else {
                        format!("LD {},{}", RP[p as usize], self.pointer16())
                    }
                }
                4 => "NEG".to_string(),
                5 => {
                    self.ret(false);
                    if y == 1 {
                        "RETI".to_string()
                    } else {
                        "RETN".to_string()
                    }
                }
                6 => format!("IM {}", IM[y as usize]),
                _ => match y {
                    0 => "LD I,A".to_string(),
                    1 => "LD R,A".to_string(),
                    2 => "LD A,I".to_string(),
                    3 => "LD A,R".to_string(),
                    4 => "RRD".to_string(),
                    5 => "RLD".to_string(),
                    _ => {
                        self.flags |= InstructionFlags::UNDOCUMENTED;
                        "NOP*".to_string()
                    }
                },
            },
            2 if z <= 3 && y >= 4 => BLOCK[(y - 4) as usize][z as usize].to_string(),
            _ => {
                self.flags |= InstructionFlags::UNDOCUMENTED;
                "NOP*".to_string()
            }
        }
    }
}

/// pc のZ80命令をデコードする
pub fn decode<M: MemoryPeek + ?Sized>(mem: &M, pc: u16) -> DecodedInstruction {
    Decoder::new(mem, pc).decode()
}
