//! アドレッシングモードの定義
//!
//! 6502のアドレッシングモードと、逆アセンブル時のオペランド表記

/// アドレッシングモードの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// 即値（Immediate） - #$nn
    Immediate,
    /// ゼロページ - $nn
    ZeroPage,
    /// ゼロページ,X - $nn,X
    ZeroPageX,
    /// ゼロページ,Y - $nn,Y
    ZeroPageY,
    /// 絶対 - $nnnn
    Absolute,
    /// 絶対,X - $nnnn,X
    AbsoluteX,
    /// 絶対,Y - $nnnn,Y
    AbsoluteY,
    /// 間接 - ($nnnn)
    Indirect,
    /// 間接,X（プリインデックス） - ($nn,X)
    IndirectX,
    /// 間接,Y（ポストインデックス） - ($nn),Y
    IndirectY,
    /// 相対（ブランチ命令用） - $nnnn
    Relative,
    /// アキュムレータ - A
    Accumulator,
    /// 暗黙的
    Implied,
}

/// オペランドの整形結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub text: String,
    /// 実効アドレスが静的に決まる場合のアドレス
    pub address: Option<u16>,
}

impl AddressingMode {
    /// オペランドのバイト数
    pub fn operand_size(&self) -> u16 {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 0,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndirectX
            | AddressingMode::IndirectY
            | AddressingMode::Relative => 1,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => 2,
        }
    }

    /// 命令全体のバイト数
    pub fn instruction_size(&self) -> u16 {
        1 + self.operand_size()
    }

    /// オペランドを文字列にする
    ///
    /// `value` は1バイトまたは2バイトのオペランド、`pc` は命令の先頭。
    pub fn format(&self, value: u16, pc: u16) -> Operand {
        let zp = value & 0xFF;
        let (text, address) = match self {
            AddressingMode::Implied => (String::new(), None),
            AddressingMode::Accumulator => ("A".to_string(), None),
            AddressingMode::Immediate => (format!("#${:02X}", zp), None),
            AddressingMode::ZeroPage => (format!("${:02X}", zp), Some(zp)),
            AddressingMode::ZeroPageX => (format!("${:02X},X", zp), Some(zp)),
            AddressingMode::ZeroPageY => (format!("${:02X},Y", zp), Some(zp)),
            AddressingMode::Absolute => (format!("${:04X}", value), Some(value)),
            AddressingMode::AbsoluteX => (format!("${:04X},X", value), Some(value)),
            AddressingMode::AbsoluteY => (format!("${:04X},Y", value), Some(value)),
            AddressingMode::Indirect => (format!("(${:04X})", value), Some(value)),
            AddressingMode::IndirectX => (format!("(${:02X},X)", zp), Some(zp)),
            AddressingMode::IndirectY => (format!("(${:02X}),Y", zp), Some(zp)),
            AddressingMode::Relative => {
                let target = relative_target(pc, zp as u8);
                (format!("${:04X}", target), Some(target))
            }
        };
        Operand { text, address }
    }
}

/// 相対分岐の分岐先
pub fn relative_target(pc: u16, offset: u8) -> u16 {
    pc.wrapping_add(2).wrapping_add(offset as i8 as u16)
}
