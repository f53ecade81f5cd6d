//! The 65C816 opcode table: mnemonic, addressing mode, and operand size per
//! opcode byte.
//!
//! This table is pure data — it has no notion of ROM contents or processor
//! state beyond the operand-size ambiguity that `IMMEDIATE_M`/`IMMEDIATE_X`
//! addressing modes carry (their size depends on the `m`/`x` flags in
//! effect at decode time, which [`crate::instruction::Instruction::decode`]
//! resolves).

/// One of the 28 65C816 addressing modes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum AddressMode {
    /// No operand.
    Implied = 0,
    /// Immediate operand sized by the accumulator width (`m`).
    ImmediateM = 1,
    /// Immediate operand sized by the index register width (`x`).
    ImmediateX = 2,
    /// Immediate operand, always one byte (e.g. `SEP`/`REP`/`BRK`/`COP`).
    Immediate8 = 3,
    /// 8-bit signed PC-relative branch offset.
    Relative = 4,
    /// 16-bit signed PC-relative branch offset (`BRL`, `PER`).
    RelativeLong = 5,
    /// Direct page.
    DirectPage = 6,
    /// Direct page, indexed by X.
    DirectPageIndexedX = 7,
    /// Direct page, indexed by Y.
    DirectPageIndexedY = 8,
    /// Direct page indirect.
    DirectPageIndirect = 9,
    /// Direct page, indexed by X, indirect.
    DirectPageIndexedIndirect = 10,
    /// Direct page indirect, indexed by Y.
    DirectPageIndirectIndexed = 11,
    /// Direct page indirect long (24-bit pointer).
    DirectPageIndirectLong = 12,
    /// Direct page indirect long, indexed by Y.
    DirectPageIndirectIndexedLong = 13,
    /// Absolute (16-bit within the current data bank).
    Absolute = 14,
    /// Absolute, indexed by X.
    AbsoluteIndexedX = 15,
    /// Absolute, indexed by Y.
    AbsoluteIndexedY = 16,
    /// Absolute long (24-bit address).
    AbsoluteLong = 17,
    /// Absolute long, indexed by X.
    AbsoluteIndexedLong = 18,
    /// Stack relative.
    StackRelative = 19,
    /// Stack relative indirect, indexed by Y.
    StackRelativeIndirectIndexed = 20,
    /// Absolute indirect (`JMP ($nnnn)`).
    AbsoluteIndirect = 21,
    /// Absolute indirect long (`JML [$nnnn]`).
    AbsoluteIndirectLong = 22,
    /// Absolute, indexed by X, indirect (`JMP ($nnnn,X)` / `JSR`).
    AbsoluteIndexedIndirect = 23,
    /// Implied, operating on the accumulator (shifts/rotates).
    ImpliedAccumulator = 24,
    /// Block move (`MVN`/`MVP`): two bank-byte operands.
    Move = 25,
    /// Stack absolute (`PEA`).
    StackAbsolute = 26,
    /// `PEI (dp)`.
    PeiDirectPageIndirect = 27,
}

impl AddressMode {
    /// Static operand size in bytes, or `None` if it depends on processor
    /// state (`ImmediateM`/`ImmediateX`).
    #[must_use]
    pub fn static_argument_size(self) -> Option<u8> {
        ARGUMENT_SIZE_TABLE[self as usize]
    }
}

/// Operand size in bytes for each [`AddressMode`], indexed by its discriminant.
/// `None` means the size depends on the processor state at decode time.
pub const ARGUMENT_SIZE_TABLE: [Option<u8>; 28] = [
    Some(0), // Implied
    None,    // ImmediateM
    None,    // ImmediateX
    Some(1), // Immediate8
    Some(1), // Relative
    Some(2), // RelativeLong
    Some(1), // DirectPage
    Some(1), // DirectPageIndexedX
    Some(1), // DirectPageIndexedY
    Some(1), // DirectPageIndirect
    Some(1), // DirectPageIndexedIndirect
    Some(1), // DirectPageIndirectIndexed
    Some(1), // DirectPageIndirectLong
    Some(1), // DirectPageIndirectIndexedLong
    Some(2), // Absolute
    Some(2), // AbsoluteIndexedX
    Some(2), // AbsoluteIndexedY
    Some(3), // AbsoluteLong
    Some(3), // AbsoluteIndexedLong
    Some(1), // StackRelative
    Some(1), // StackRelativeIndirectIndexed
    Some(2), // AbsoluteIndirect
    Some(2), // AbsoluteIndirectLong
    Some(2), // AbsoluteIndexedIndirect
    Some(0), // ImpliedAccumulator
    Some(2), // Move
    Some(2), // StackAbsolute
    Some(1), // PeiDirectPageIndirect
];

/// A 65C816 instruction mnemonic.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum Op {
    ADC,
    AND,
    ASL,
    BCC,
    BCS,
    BEQ,
    BIT,
    BMI,
    BNE,
    BPL,
    BRA,
    BRK,
    BRL,
    BVC,
    BVS,
    CLC,
    CLD,
    CLI,
    CLV,
    CMP,
    COP,
    CPX,
    CPY,
    DEC,
    DEX,
    DEY,
    EOR,
    INC,
    INX,
    INY,
    JML,
    JMP,
    JSL,
    JSR,
    LDA,
    LDX,
    LDY,
    LSR,
    MVN,
    MVP,
    NOP,
    ORA,
    PEA,
    PEI,
    PER,
    PHA,
    PHB,
    PHD,
    PHK,
    PHP,
    PHX,
    PHY,
    PLA,
    PLB,
    PLD,
    PLP,
    PLX,
    PLY,
    REP,
    ROL,
    ROR,
    RTI,
    RTL,
    RTS,
    SBC,
    SEC,
    SED,
    SEI,
    SEP,
    STA,
    STP,
    STX,
    STY,
    STZ,
    TAX,
    TAY,
    TCD,
    TCS,
    TDC,
    TRB,
    TSB,
    TSC,
    TSX,
    TXA,
    TXS,
    TXY,
    TYA,
    TYX,
    WAI,
    WDM,
    XBA,
    XCE,
}

impl Op {
    /// Lowercase mnemonic as it appears in disassembly text.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::ADC => "adc",
            Op::AND => "and",
            Op::ASL => "asl",
            Op::BCC => "bcc",
            Op::BCS => "bcs",
            Op::BEQ => "beq",
            Op::BIT => "bit",
            Op::BMI => "bmi",
            Op::BNE => "bne",
            Op::BPL => "bpl",
            Op::BRA => "bra",
            Op::BRK => "brk",
            Op::BRL => "brl",
            Op::BVC => "bvc",
            Op::BVS => "bvs",
            Op::CLC => "clc",
            Op::CLD => "cld",
            Op::CLI => "cli",
            Op::CLV => "clv",
            Op::CMP => "cmp",
            Op::COP => "cop",
            Op::CPX => "cpx",
            Op::CPY => "cpy",
            Op::DEC => "dec",
            Op::DEX => "dex",
            Op::DEY => "dey",
            Op::EOR => "eor",
            Op::INC => "inc",
            Op::INX => "inx",
            Op::INY => "iny",
            Op::JML => "jml",
            Op::JMP => "jmp",
            Op::JSL => "jsl",
            Op::JSR => "jsr",
            Op::LDA => "lda",
            Op::LDX => "ldx",
            Op::LDY => "ldy",
            Op::LSR => "lsr",
            Op::MVN => "mvn",
            Op::MVP => "mvp",
            Op::NOP => "nop",
            Op::ORA => "ora",
            Op::PEA => "pea",
            Op::PEI => "pei",
            Op::PER => "per",
            Op::PHA => "pha",
            Op::PHB => "phb",
            Op::PHD => "phd",
            Op::PHK => "phk",
            Op::PHP => "php",
            Op::PHX => "phx",
            Op::PHY => "phy",
            Op::PLA => "pla",
            Op::PLB => "plb",
            Op::PLD => "pld",
            Op::PLP => "plp",
            Op::PLX => "plx",
            Op::PLY => "ply",
            Op::REP => "rep",
            Op::ROL => "rol",
            Op::ROR => "ror",
            Op::RTI => "rti",
            Op::RTL => "rtl",
            Op::RTS => "rts",
            Op::SBC => "sbc",
            Op::SEC => "sec",
            Op::SED => "sed",
            Op::SEI => "sei",
            Op::SEP => "sep",
            Op::STA => "sta",
            Op::STP => "stp",
            Op::STX => "stx",
            Op::STY => "sty",
            Op::STZ => "stz",
            Op::TAX => "tax",
            Op::TAY => "tay",
            Op::TCD => "tcd",
            Op::TCS => "tcs",
            Op::TDC => "tdc",
            Op::TRB => "trb",
            Op::TSB => "tsb",
            Op::TSC => "tsc",
            Op::TSX => "tsx",
            Op::TXA => "txa",
            Op::TXS => "txs",
            Op::TXY => "txy",
            Op::TYA => "tya",
            Op::TYX => "tyx",
            Op::WAI => "wai",
            Op::WDM => "wdm",
            Op::XBA => "xba",
            Op::XCE => "xce",
        }
    }

    /// `true` for the unconditional and conditional branch mnemonics
    /// (`BRA`/`BRL` and the eight `Bxx` conditionals).
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Op::BCC
                | Op::BCS
                | Op::BEQ
                | Op::BMI
                | Op::BNE
                | Op::BPL
                | Op::BVC
                | Op::BVS
                | Op::BRA
                | Op::BRL
        )
    }

    /// `true` for the conditional branch mnemonics only (excludes the
    /// unconditional `BRA`/`BRL`).
    #[must_use]
    pub fn is_conditional_branch(self) -> bool {
        matches!(
            self,
            Op::BCC | Op::BCS | Op::BEQ | Op::BMI | Op::BNE | Op::BPL | Op::BVC | Op::BVS
        )
    }

    /// `true` for subroutine call mnemonics (`JSR`/`JSL`).
    #[must_use]
    pub fn is_call(self) -> bool {
        matches!(self, Op::JSR | Op::JSL)
    }

    /// `true` for unconditional jump mnemonics (`JMP`/`JML`).
    #[must_use]
    pub fn is_jump(self) -> bool {
        matches!(self, Op::JMP | Op::JML)
    }

    /// `true` for return mnemonics (`RTS`/`RTL`/`RTI`).
    #[must_use]
    pub fn is_return(self) -> bool {
        matches!(self, Op::RTS | Op::RTL | Op::RTI)
    }

    /// `true` for the interrupt-return mnemonic.
    #[must_use]
    pub fn is_interrupt_return(self) -> bool {
        matches!(self, Op::RTI)
    }

    /// `true` for flag-setting mnemonics (`SEP`/`REP`).
    #[must_use]
    pub fn is_sep_or_rep(self) -> bool {
        matches!(self, Op::SEP | Op::REP)
    }

    /// `true` for `SEP` specifically.
    #[must_use]
    pub fn is_sep(self) -> bool {
        matches!(self, Op::SEP)
    }

    /// `true` for push mnemonics.
    #[must_use]
    pub fn is_push(self) -> bool {
        matches!(
            self,
            Op::PHA
                | Op::PHB
                | Op::PHD
                | Op::PHK
                | Op::PHP
                | Op::PHX
                | Op::PHY
                | Op::PEA
                | Op::PEI
                | Op::PER
        )
    }

    /// `true` for pull mnemonics.
    #[must_use]
    pub fn is_pull(self) -> bool {
        matches!(
            self,
            Op::PLA | Op::PLB | Op::PLD | Op::PLP | Op::PLX | Op::PLY
        )
    }

    /// `true` for `PHP`.
    #[must_use]
    pub fn is_php(self) -> bool {
        matches!(self, Op::PHP)
    }

    /// `true` for `PLP`.
    #[must_use]
    pub fn is_plp(self) -> bool {
        matches!(self, Op::PLP)
    }

    /// `true` for mnemonics that write directly to the A register with a
    /// size that depends on `m` (`LDA`/`ADC`/`SBC` and friends), used by
    /// the "register tracking" tests.
    #[must_use]
    pub fn touches_accumulator_width(self) -> bool {
        matches!(
            self,
            Op::LDA | Op::ADC | Op::SBC | Op::AND | Op::ORA | Op::EOR | Op::CMP | Op::STA
        )
    }

    /// `true` for mnemonics the analyzer treats as "suspect": execution
    /// past this point cannot be trusted to follow normal control flow.
    #[must_use]
    pub fn is_suspect(self) -> bool {
        matches!(self, Op::BRK | Op::COP | Op::STP | Op::WDM)
    }
}

/// `(mnemonic, addressing mode)` for each of the 256 possible opcode bytes.
pub const OPCODE_TABLE: [(Op, AddressMode); 256] = [
    (Op::BRK, AddressMode::Immediate8), // 0x00
    (Op::ORA, AddressMode::DirectPageIndexedIndirect),
    (Op::COP, AddressMode::Immediate8),
    (Op::ORA, AddressMode::StackRelative),
    (Op::TSB, AddressMode::DirectPage),
    (Op::ORA, AddressMode::DirectPage),
    (Op::ASL, AddressMode::DirectPage),
    (Op::ORA, AddressMode::DirectPageIndirectLong),
    (Op::PHP, AddressMode::Implied),
    (Op::ORA, AddressMode::ImmediateM),
    (Op::ASL, AddressMode::ImpliedAccumulator),
    (Op::PHD, AddressMode::Implied),
    (Op::TSB, AddressMode::Absolute),
    (Op::ORA, AddressMode::Absolute),
    (Op::ASL, AddressMode::Absolute),
    (Op::ORA, AddressMode::AbsoluteLong),
    (Op::BPL, AddressMode::Relative), // 0x10
    (Op::ORA, AddressMode::DirectPageIndirectIndexed),
    (Op::ORA, AddressMode::DirectPageIndirect),
    (Op::ORA, AddressMode::StackRelativeIndirectIndexed),
    (Op::TRB, AddressMode::DirectPage),
    (Op::ORA, AddressMode::DirectPageIndexedX),
    (Op::ASL, AddressMode::DirectPageIndexedX),
    (Op::ORA, AddressMode::DirectPageIndirectIndexedLong),
    (Op::CLC, AddressMode::Implied),
    (Op::ORA, AddressMode::AbsoluteIndexedY),
    (Op::INC, AddressMode::ImpliedAccumulator),
    (Op::TCS, AddressMode::Implied),
    (Op::TRB, AddressMode::Absolute),
    (Op::ORA, AddressMode::AbsoluteIndexedX),
    (Op::ASL, AddressMode::AbsoluteIndexedX),
    (Op::ORA, AddressMode::AbsoluteIndexedLong),
    (Op::JSR, AddressMode::Absolute), // 0x20
    (Op::AND, AddressMode::DirectPageIndexedIndirect),
    (Op::JSL, AddressMode::AbsoluteLong),
    (Op::AND, AddressMode::StackRelative),
    (Op::BIT, AddressMode::DirectPage),
    (Op::AND, AddressMode::DirectPage),
    (Op::ROL, AddressMode::DirectPage),
    (Op::AND, AddressMode::DirectPageIndirectLong),
    (Op::PLP, AddressMode::Implied),
    (Op::AND, AddressMode::ImmediateM),
    (Op::ROL, AddressMode::ImpliedAccumulator),
    (Op::PLD, AddressMode::Implied),
    (Op::BIT, AddressMode::Absolute),
    (Op::AND, AddressMode::Absolute),
    (Op::ROL, AddressMode::Absolute),
    (Op::AND, AddressMode::AbsoluteLong),
    (Op::BMI, AddressMode::Relative), // 0x30
    (Op::AND, AddressMode::DirectPageIndirectIndexed),
    (Op::AND, AddressMode::DirectPageIndirect),
    (Op::AND, AddressMode::StackRelativeIndirectIndexed),
    (Op::BIT, AddressMode::DirectPageIndexedX),
    (Op::AND, AddressMode::DirectPageIndexedX),
    (Op::ROL, AddressMode::DirectPageIndexedX),
    (Op::AND, AddressMode::DirectPageIndirectIndexedLong),
    (Op::SEC, AddressMode::Implied),
    (Op::AND, AddressMode::AbsoluteIndexedY),
    (Op::DEC, AddressMode::ImpliedAccumulator),
    (Op::TSC, AddressMode::Implied),
    (Op::BIT, AddressMode::AbsoluteIndexedX),
    (Op::AND, AddressMode::AbsoluteIndexedX),
    (Op::ROL, AddressMode::AbsoluteIndexedX),
    (Op::AND, AddressMode::AbsoluteIndexedLong),
    (Op::RTI, AddressMode::Implied), // 0x40
    (Op::EOR, AddressMode::DirectPageIndexedIndirect),
    (Op::WDM, AddressMode::Immediate8),
    (Op::EOR, AddressMode::StackRelative),
    (Op::MVP, AddressMode::Move),
    (Op::EOR, AddressMode::DirectPage),
    (Op::LSR, AddressMode::DirectPage),
    (Op::EOR, AddressMode::DirectPageIndirectLong),
    (Op::PHA, AddressMode::Implied),
    (Op::EOR, AddressMode::ImmediateM),
    (Op::LSR, AddressMode::ImpliedAccumulator),
    (Op::PHK, AddressMode::Implied),
    (Op::JMP, AddressMode::Absolute),
    (Op::EOR, AddressMode::Absolute),
    (Op::LSR, AddressMode::Absolute),
    (Op::EOR, AddressMode::AbsoluteLong),
    (Op::BVC, AddressMode::Relative), // 0x50
    (Op::EOR, AddressMode::DirectPageIndirectIndexed),
    (Op::EOR, AddressMode::DirectPageIndirect),
    (Op::EOR, AddressMode::StackRelativeIndirectIndexed),
    (Op::MVN, AddressMode::Move),
    (Op::EOR, AddressMode::DirectPageIndexedX),
    (Op::LSR, AddressMode::DirectPageIndexedX),
    (Op::EOR, AddressMode::DirectPageIndirectIndexedLong),
    (Op::CLI, AddressMode::Implied),
    (Op::EOR, AddressMode::AbsoluteIndexedY),
    (Op::PHY, AddressMode::Implied),
    (Op::TCD, AddressMode::Implied),
    (Op::JML, AddressMode::AbsoluteLong),
    (Op::EOR, AddressMode::AbsoluteIndexedX),
    (Op::LSR, AddressMode::AbsoluteIndexedX),
    (Op::EOR, AddressMode::AbsoluteIndexedLong),
    (Op::RTS, AddressMode::Implied), // 0x60
    (Op::ADC, AddressMode::DirectPageIndexedIndirect),
    (Op::PER, AddressMode::RelativeLong),
    (Op::ADC, AddressMode::StackRelative),
    (Op::STZ, AddressMode::DirectPage),
    (Op::ADC, AddressMode::DirectPage),
    (Op::ROR, AddressMode::DirectPage),
    (Op::ADC, AddressMode::DirectPageIndirectLong),
    (Op::PLA, AddressMode::Implied),
    (Op::ADC, AddressMode::ImmediateM),
    (Op::ROR, AddressMode::ImpliedAccumulator),
    (Op::RTL, AddressMode::Implied),
    (Op::JMP, AddressMode::AbsoluteIndirect),
    (Op::ADC, AddressMode::Absolute),
    (Op::ROR, AddressMode::Absolute),
    (Op::ADC, AddressMode::AbsoluteLong),
    (Op::BVS, AddressMode::Relative), // 0x70
    (Op::ADC, AddressMode::DirectPageIndirectIndexed),
    (Op::ADC, AddressMode::DirectPageIndirect),
    (Op::ADC, AddressMode::StackRelativeIndirectIndexed),
    (Op::STZ, AddressMode::DirectPageIndexedX),
    (Op::ADC, AddressMode::DirectPageIndexedX),
    (Op::ROR, AddressMode::DirectPageIndexedX),
    (Op::ADC, AddressMode::DirectPageIndirectIndexedLong),
    (Op::SEI, AddressMode::Implied),
    (Op::ADC, AddressMode::AbsoluteIndexedY),
    (Op::PLY, AddressMode::Implied),
    (Op::TDC, AddressMode::Implied),
    (Op::JMP, AddressMode::AbsoluteIndexedIndirect),
    (Op::ADC, AddressMode::AbsoluteIndexedX),
    (Op::ROR, AddressMode::AbsoluteIndexedX),
    (Op::ADC, AddressMode::AbsoluteIndexedLong),
    (Op::BRA, AddressMode::Relative), // 0x80
    (Op::STA, AddressMode::DirectPageIndexedIndirect),
    (Op::BRL, AddressMode::RelativeLong),
    (Op::STA, AddressMode::StackRelative),
    (Op::STY, AddressMode::DirectPage),
    (Op::STA, AddressMode::DirectPage),
    (Op::STX, AddressMode::DirectPage),
    (Op::STA, AddressMode::DirectPageIndirectLong),
    (Op::DEY, AddressMode::Implied),
    (Op::BIT, AddressMode::ImmediateM),
    (Op::TXA, AddressMode::Implied),
    (Op::PHB, AddressMode::Implied),
    (Op::STY, AddressMode::Absolute),
    (Op::STA, AddressMode::Absolute),
    (Op::STX, AddressMode::Absolute),
    (Op::STA, AddressMode::AbsoluteLong),
    (Op::BCC, AddressMode::Relative), // 0x90
    (Op::STA, AddressMode::DirectPageIndirectIndexed),
    (Op::STA, AddressMode::DirectPageIndirect),
    (Op::STA, AddressMode::StackRelativeIndirectIndexed),
    (Op::STY, AddressMode::DirectPageIndexedX),
    (Op::STA, AddressMode::DirectPageIndexedX),
    (Op::STX, AddressMode::DirectPageIndexedY),
    (Op::STA, AddressMode::DirectPageIndirectIndexedLong),
    (Op::TYA, AddressMode::Implied),
    (Op::STA, AddressMode::AbsoluteIndexedY),
    (Op::TXS, AddressMode::Implied),
    (Op::TXY, AddressMode::Implied),
    (Op::STZ, AddressMode::Absolute),
    (Op::STA, AddressMode::AbsoluteIndexedX),
    (Op::STZ, AddressMode::AbsoluteIndexedX),
    (Op::STA, AddressMode::AbsoluteIndexedLong),
    (Op::LDY, AddressMode::ImmediateX), // 0xA0
    (Op::LDA, AddressMode::DirectPageIndexedIndirect),
    (Op::LDX, AddressMode::ImmediateX),
    (Op::LDA, AddressMode::StackRelative),
    (Op::LDY, AddressMode::DirectPage),
    (Op::LDA, AddressMode::DirectPage),
    (Op::LDX, AddressMode::DirectPage),
    (Op::LDA, AddressMode::DirectPageIndirectLong),
    (Op::TAY, AddressMode::Implied),
    (Op::LDA, AddressMode::ImmediateM),
    (Op::TAX, AddressMode::Implied),
    (Op::PLB, AddressMode::Implied),
    (Op::LDY, AddressMode::Absolute),
    (Op::LDA, AddressMode::Absolute),
    (Op::LDX, AddressMode::Absolute),
    (Op::LDA, AddressMode::AbsoluteLong),
    (Op::BCS, AddressMode::Relative), // 0xB0
    (Op::LDA, AddressMode::DirectPageIndirectIndexed),
    (Op::LDA, AddressMode::DirectPageIndirect),
    (Op::LDA, AddressMode::StackRelativeIndirectIndexed),
    (Op::LDY, AddressMode::DirectPageIndexedX),
    (Op::LDA, AddressMode::DirectPageIndexedX),
    (Op::LDX, AddressMode::DirectPageIndexedY),
    (Op::LDA, AddressMode::DirectPageIndirectIndexedLong),
    (Op::CLV, AddressMode::Implied),
    (Op::LDA, AddressMode::AbsoluteIndexedY),
    (Op::TSX, AddressMode::Implied),
    (Op::TYX, AddressMode::Implied),
    (Op::LDY, AddressMode::AbsoluteIndexedX),
    (Op::LDA, AddressMode::AbsoluteIndexedX),
    (Op::LDX, AddressMode::AbsoluteIndexedY),
    (Op::LDA, AddressMode::AbsoluteIndexedLong),
    (Op::CPY, AddressMode::ImmediateX), // 0xC0
    (Op::CMP, AddressMode::DirectPageIndexedIndirect),
    (Op::REP, AddressMode::Immediate8),
    (Op::CMP, AddressMode::StackRelative),
    (Op::CPY, AddressMode::DirectPage),
    (Op::CMP, AddressMode::DirectPage),
    (Op::DEC, AddressMode::DirectPage),
    (Op::CMP, AddressMode::DirectPageIndirectLong),
    (Op::INY, AddressMode::Implied),
    (Op::CMP, AddressMode::ImmediateM),
    (Op::DEX, AddressMode::Implied),
    (Op::WAI, AddressMode::Implied),
    (Op::CPY, AddressMode::Absolute),
    (Op::CMP, AddressMode::Absolute),
    (Op::DEC, AddressMode::Absolute),
    (Op::CMP, AddressMode::AbsoluteLong),
    (Op::BNE, AddressMode::Relative), // 0xD0
    (Op::CMP, AddressMode::DirectPageIndirectIndexed),
    (Op::CMP, AddressMode::DirectPageIndirect),
    (Op::CMP, AddressMode::StackRelativeIndirectIndexed),
    (Op::PEI, AddressMode::PeiDirectPageIndirect),
    (Op::CMP, AddressMode::DirectPageIndexedX),
    (Op::DEC, AddressMode::DirectPageIndexedX),
    (Op::CMP, AddressMode::DirectPageIndirectIndexedLong),
    (Op::CLD, AddressMode::Implied),
    (Op::CMP, AddressMode::AbsoluteIndexedY),
    (Op::PHX, AddressMode::Implied),
    (Op::STP, AddressMode::Implied),
    (Op::JML, AddressMode::AbsoluteIndirectLong),
    (Op::CMP, AddressMode::AbsoluteIndexedX),
    (Op::DEC, AddressMode::AbsoluteIndexedX),
    (Op::CMP, AddressMode::AbsoluteIndexedLong),
    (Op::CPX, AddressMode::ImmediateX), // 0xE0
    (Op::SBC, AddressMode::DirectPageIndexedIndirect),
    (Op::SEP, AddressMode::Immediate8),
    (Op::SBC, AddressMode::StackRelative),
    (Op::CPX, AddressMode::DirectPage),
    (Op::SBC, AddressMode::DirectPage),
    (Op::INC, AddressMode::DirectPage),
    (Op::SBC, AddressMode::DirectPageIndirectLong),
    (Op::INX, AddressMode::Implied),
    (Op::SBC, AddressMode::ImmediateM),
    (Op::NOP, AddressMode::Implied),
    (Op::XBA, AddressMode::Implied),
    (Op::CPX, AddressMode::Absolute),
    (Op::SBC, AddressMode::Absolute),
    (Op::INC, AddressMode::Absolute),
    (Op::SBC, AddressMode::AbsoluteLong),
    (Op::BEQ, AddressMode::Relative), // 0xF0
    (Op::SBC, AddressMode::DirectPageIndirectIndexed),
    (Op::SBC, AddressMode::DirectPageIndirect),
    (Op::SBC, AddressMode::StackRelativeIndirectIndexed),
    (Op::PEA, AddressMode::StackAbsolute),
    (Op::SBC, AddressMode::DirectPageIndexedX),
    (Op::INC, AddressMode::DirectPageIndexedX),
    (Op::SBC, AddressMode::DirectPageIndirectIndexedLong),
    (Op::SED, AddressMode::Implied),
    (Op::SBC, AddressMode::AbsoluteIndexedY),
    (Op::PLX, AddressMode::Implied),
    (Op::XCE, AddressMode::Implied),
    (Op::JSR, AddressMode::AbsoluteIndexedIndirect),
    (Op::SBC, AddressMode::AbsoluteIndexedX),
    (Op::INC, AddressMode::AbsoluteIndexedX),
    (Op::SBC, AddressMode::AbsoluteIndexedLong),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_256_entries() {
        assert_eq!(OPCODE_TABLE.len(), 256);
    }

    #[test]
    fn brk_is_immediate_8_and_suspect() {
        let (op, mode) = OPCODE_TABLE[0x00];
        assert_eq!(op, Op::BRK);
        assert_eq!(mode, AddressMode::Immediate8);
        assert!(op.is_suspect());
    }

    #[test]
    fn jsr_absolute_is_a_call() {
        let (op, mode) = OPCODE_TABLE[0x20];
        assert_eq!(op, Op::JSR);
        assert_eq!(mode, AddressMode::Absolute);
        assert!(op.is_call());
    }

    #[test]
    fn rts_is_a_return() {
        let (op, _) = OPCODE_TABLE[0x60];
        assert!(op.is_return());
    }

    #[test]
    fn lda_immediate_m_has_state_dependent_size() {
        let (op, mode) = OPCODE_TABLE[0xA9];
        assert_eq!(op, Op::LDA);
        assert_eq!(mode, AddressMode::ImmediateM);
        assert_eq!(mode.static_argument_size(), None);
    }

    #[test]
    fn sep_is_one_byte_immediate() {
        let (op, mode) = OPCODE_TABLE[0xE2];
        assert_eq!(op, Op::SEP);
        assert_eq!(mode.static_argument_size(), Some(1));
        assert!(op.is_sep());
        assert!(op.is_sep_or_rep());
    }
}
