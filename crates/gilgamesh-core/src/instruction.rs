//! A single decoded instruction occurrence and its contextual identity.

use crate::opcodes::{AddressMode, Op, OPCODE_TABLE};
use crate::registers::RegisterSnapshot;
use crate::state::{State, StateChange};

/// Sign-extends an 8-bit value to `i32`.
fn s8(v: u8) -> i32 {
    i32::from(v as i8)
}

/// Sign-extends a 16-bit value to `i32`.
fn s16(v: u16) -> i32 {
    i32::from(v as i16)
}

/// Uniquely identifies an instruction *occurrence*: the same byte at the
/// same `pc` can decode differently (different operand width) depending on
/// the processor state it's reached in, and can be reached from more than
/// one subroutine. Identity is therefore `(pc, state, subroutine_pc)`, not
/// `pc` alone.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct InstructionId {
    pc: usize,
    p: u8,
    subroutine_pc: usize,
}

impl InstructionId {
    /// Builds an identity from a pc, the state in effect at that pc, and
    /// the subroutine this occurrence belongs to.
    #[must_use]
    pub fn new(pc: usize, state: State, subroutine_pc: usize) -> Self {
        Self {
            pc,
            p: state.p(),
            subroutine_pc,
        }
    }

    /// Program counter this occurrence was decoded at.
    #[must_use]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Processor state in effect when this occurrence was decoded.
    #[must_use]
    pub fn state(&self) -> State {
        State::from_p(self.p)
    }

    /// The subroutine this occurrence belongs to.
    #[must_use]
    pub fn subroutine_pc(&self) -> usize {
        self.subroutine_pc
    }
}

/// Whether a writer instruction's effect on the stack breaks the ordinary
/// call/return/PHx-PLx discipline, and if so how badly.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StackManipulation {
    /// This instruction's stack effect is ordinary.
    None,
    /// The instruction moves the stack pointer in a way that can't be
    /// tracked precisely (e.g. `TXS` with an unknown `X`), but doesn't by
    /// itself corrupt a return address.
    Harmless,
    /// A `PLP`/return popped a cell this instruction wrote that wasn't the
    /// payload the popping instruction expected, so the caller's resulting
    /// state cannot be trusted.
    CausesUnknownState,
}

/// A decoded instruction: mnemonic, addressing mode, operand, and the
/// contextual identity it was decoded under, plus the facts the symbolic
/// CPU discovers about this specific occurrence during analysis.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    pc: usize,
    state: State,
    subroutine_pc: usize,
    opcode: u8,
    raw_argument: u32,
    /// Set once the symbolic CPU determines this occurrence ends the path
    /// it's on (a return, an unresolved jump, a suspect instruction).
    pub stopped_execution: bool,
    /// Registers as tracked by the symbolic CPU when it reached this
    /// occurrence.
    register_snapshot: RegisterSnapshot,
    /// Accumulated `StateChange` since subroutine entry, just before this
    /// instruction executed.
    state_change_before: StateChange,
    /// Accumulated `StateChange` just after this instruction executed,
    /// including any instruction-level assertion applied at this pc.
    state_change_after: StateChange,
    /// `true` for a call/jump whose target could not be derived directly
    /// and is instead resolved through one or more jump-table assertions.
    pub is_jump_table: bool,
    /// How this occurrence's stack writes interact with later pops.
    pub stack_manipulation: StackManipulation,
}

impl Instruction {
    /// Decodes `opcode`/`raw_argument` at `pc`, under `state`, as part of
    /// `subroutine_pc`. Pure: reads no ROM and has no side effects.
    #[must_use]
    pub fn decode(
        pc: usize,
        state: State,
        subroutine_pc: usize,
        opcode: u8,
        raw_argument: u32,
    ) -> Self {
        Self {
            pc,
            state,
            subroutine_pc,
            opcode,
            raw_argument,
            stopped_execution: false,
            register_snapshot: RegisterSnapshot::default(),
            state_change_before: StateChange::none(),
            state_change_after: StateChange::none(),
            is_jump_table: false,
            stack_manipulation: StackManipulation::None,
        }
    }

    /// Registers as tracked by the symbolic CPU when it reached this
    /// occurrence.
    #[must_use]
    pub fn register_snapshot(&self) -> RegisterSnapshot {
        self.register_snapshot
    }

    /// Records the register snapshot taken when this occurrence was
    /// reached.
    pub fn set_register_snapshot(&mut self, snapshot: RegisterSnapshot) {
        self.register_snapshot = snapshot;
    }

    /// The `StateChange` accumulated since subroutine entry, just before
    /// this instruction executed.
    #[must_use]
    pub fn state_change_before(&self) -> StateChange {
        self.state_change_before
    }

    /// Records the `StateChange` accumulated just before this instruction
    /// executed.
    pub fn set_state_change_before(&mut self, change: StateChange) {
        self.state_change_before = change;
    }

    /// The `StateChange` accumulated just after this instruction executed.
    #[must_use]
    pub fn state_change_after(&self) -> StateChange {
        self.state_change_after
    }

    /// Records the `StateChange` accumulated just after this instruction
    /// executed (possibly overridden by an instruction-level assertion).
    pub fn set_state_change_after(&mut self, change: StateChange) {
        self.state_change_after = change;
    }

    /// Contextual identity of this occurrence.
    #[must_use]
    pub fn id(&self) -> InstructionId {
        InstructionId::new(self.pc, self.state, self.subroutine_pc)
    }

    /// Program counter.
    #[must_use]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Processor state this occurrence was decoded under.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The subroutine this occurrence belongs to.
    #[must_use]
    pub fn subroutine_pc(&self) -> usize {
        self.subroutine_pc
    }

    /// Raw opcode byte.
    #[must_use]
    pub fn opcode_byte(&self) -> u8 {
        self.opcode
    }

    /// Mnemonic.
    #[must_use]
    pub fn operation(&self) -> Op {
        OPCODE_TABLE[self.opcode as usize].0
    }

    /// Addressing mode.
    #[must_use]
    pub fn address_mode(&self) -> AddressMode {
        OPCODE_TABLE[self.opcode as usize].1
    }

    /// Lowercase mnemonic name, as used in disassembly text.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.operation().mnemonic()
    }

    /// Total instruction length in bytes, including the opcode byte.
    #[must_use]
    pub fn size(&self) -> u8 {
        self.argument_size() + 1
    }

    /// Operand length in bytes (0–3), resolving `ImmediateM`/`ImmediateX`
    /// against this occurrence's state.
    #[must_use]
    pub fn argument_size(&self) -> u8 {
        match self.address_mode().static_argument_size() {
            Some(size) => size,
            None => match self.address_mode() {
                AddressMode::ImmediateM => self.state.a_size(),
                AddressMode::ImmediateX => self.state.x_size(),
                _ => unreachable!("only ImmediateM/ImmediateX have a state-dependent size"),
            },
        }
    }

    /// The operand value, masked to `argument_size` bytes.
    #[must_use]
    pub fn argument(&self) -> Option<u32> {
        match self.argument_size() {
            0 => None,
            1 => Some(self.raw_argument & 0xFF),
            2 => Some(self.raw_argument & 0xFFFF),
            3 => Some(self.raw_argument & 0xFF_FFFF),
            _ => unreachable!("argument size is at most 3 bytes"),
        }
    }

    /// Program counter immediately after this instruction.
    #[must_use]
    pub fn next_pc(&self) -> usize {
        self.pc + self.size() as usize
    }

    /// The fully-specified target address this instruction's operand
    /// refers to, when that can be determined without further context
    /// (immediates, absolute-long, `JMP $nnnn` within the current bank,
    /// and PC-relative branches). `None` for addressing modes whose
    /// effective address depends on runtime register contents.
    #[must_use]
    pub fn absolute_argument(&self) -> Option<usize> {
        match self.address_mode() {
            AddressMode::ImmediateM
            | AddressMode::ImmediateX
            | AddressMode::Immediate8
            | AddressMode::AbsoluteLong => self.argument().map(|a| a as usize),

            AddressMode::Absolute if self.is_control() => {
                self.argument().map(|a| (self.pc & 0xFF_0000) | a as usize)
            }

            AddressMode::Relative => self
                .argument()
                .map(|a| (self.pc as i64 + i64::from(self.size()) + i64::from(s8(a as u8))) as usize),

            AddressMode::RelativeLong => self.argument().map(|a| {
                (self.pc as i64 + i64::from(self.size()) + i64::from(s16(a as u16))) as usize
            }),

            _ => None,
        }
    }

    /// `true` for the eight conditional branches.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.operation().is_conditional_branch()
    }

    /// `true` for `JSR`/`JSL`.
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.operation().is_call()
    }

    /// `true` for `BRA`/`BRL`/`JMP`/`JML`.
    #[must_use]
    pub fn is_jump(&self) -> bool {
        matches!(self.operation(), Op::BRA | Op::BRL) || self.operation().is_jump()
    }

    /// `true` for `RTS`/`RTL`/`RTI`.
    #[must_use]
    pub fn is_return(&self) -> bool {
        self.operation().is_return()
    }

    /// `true` for `BRK`/`RTI`.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self.operation(), Op::BRK | Op::RTI)
    }

    /// `true` if this instruction affects control flow in any way.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.is_branch()
            || self.is_call()
            || self.is_jump()
            || self.is_return()
            || self.is_interrupt()
    }

    /// `true` for `SEP`/`REP`.
    #[must_use]
    pub fn is_sep_rep(&self) -> bool {
        self.operation().is_sep_or_rep()
    }

    /// `true` for an indirect jump/call whose target cannot be resolved
    /// statically (`JMP ($nnnn)`, `JMP ($nnnn,X)`, `JML [$nnnn]`,
    /// `JSR ($nnnn,X)`).
    #[must_use]
    pub fn is_indirect_jump(&self) -> bool {
        self.is_control()
            && matches!(
                self.address_mode(),
                AddressMode::AbsoluteIndirect
                    | AddressMode::AbsoluteIndirectLong
                    | AddressMode::AbsoluteIndexedIndirect
            )
    }

    /// `true` for any push mnemonic (`PHA`/`PHX`/`PHY`/`PHP`/`PHB`/`PHD`/
    /// `PHK`/`PEA`/`PEI`/`PER`).
    #[must_use]
    pub fn is_push(&self) -> bool {
        self.operation().is_push()
    }

    /// `true` for any pull mnemonic (`PLA`/`PLX`/`PLY`/`PLP`/`PLB`/`PLD`).
    #[must_use]
    pub fn is_pop(&self) -> bool {
        self.operation().is_pull()
    }

    /// Number of bytes this push/pull instruction moves, sized by `state`
    /// where the width depends on it (`PHA`/`PLA` follow `a_size`,
    /// `PHX`/`PHY`/`PLX`/`PLY` follow `x_size`). Panics if this instruction
    /// is neither a push nor a pull.
    #[must_use]
    pub fn stack_transfer_size(&self, state: State) -> u8 {
        match self.operation() {
            Op::PHA | Op::PLA => state.a_size(),
            Op::PHX | Op::PHY | Op::PLX | Op::PLY => state.x_size(),
            Op::PHB | Op::PHK | Op::PLB => 1,
            Op::PHD | Op::PLD | Op::PEA | Op::PER | Op::PEI => 2,
            Op::PHP | Op::PLP => 1,
            _ => unreachable!("not a push/pull mnemonic"),
        }
    }

    /// Renders this instruction's operand the way the disassembly view
    /// does (`#$42`, `$1234,x`, `(${$12}),y`, ...).
    #[must_use]
    pub fn argument_string(&self) -> String {
        use AddressMode::{
            Absolute, AbsoluteIndexedIndirect, AbsoluteIndexedLong, AbsoluteIndexedX,
            AbsoluteIndexedY, AbsoluteIndirect, AbsoluteIndirectLong, AbsoluteLong, DirectPage,
            DirectPageIndexedIndirect, DirectPageIndexedX, DirectPageIndexedY, DirectPageIndirect,
            DirectPageIndirectIndexed, DirectPageIndirectIndexedLong, DirectPageIndirectLong,
            Immediate8, ImmediateM, ImmediateX, Implied, ImpliedAccumulator, Move,
            PeiDirectPageIndirect, Relative, RelativeLong, StackAbsolute, StackRelative,
            StackRelativeIndirectIndexed,
        };

        let mode = self.address_mode();
        if mode == Implied {
            return String::new();
        }
        if mode == ImpliedAccumulator {
            return "a".to_string();
        }

        let argument = self.argument().expect("non-implied mode has an argument");
        let width = self.argument_size() as usize * 2;

        match mode {
            ImmediateM | ImmediateX | Immediate8 => format!("#${argument:0width$X}"),
            Relative | RelativeLong | DirectPage | Absolute | AbsoluteLong | StackAbsolute => {
                format!("${argument:0width$X}")
            }
            DirectPageIndexedX | AbsoluteIndexedX | AbsoluteIndexedLong => {
                format!("${argument:0width$X},x")
            }
            DirectPageIndexedY | AbsoluteIndexedY => format!("${argument:0width$X},y"),
            DirectPageIndirect | AbsoluteIndirect | PeiDirectPageIndirect => {
                format!("(${argument:0width$X})")
            }
            DirectPageIndirectLong | AbsoluteIndirectLong => format!("[${argument:0width$X}]"),
            DirectPageIndexedIndirect | AbsoluteIndexedIndirect => {
                format!("(${argument:0width$X},x)")
            }
            DirectPageIndirectIndexed => format!("(${argument:0width$X}),y"),
            DirectPageIndirectIndexedLong => format!("[${argument:0width$X}],y"),
            StackRelative => format!("${:02X},s", argument),
            StackRelativeIndirectIndexed => format!("(${:02X},s),y", argument),
            Move => format!("{:02X},{:02X}", argument & 0xFF, argument >> 8),
            Implied | ImpliedAccumulator => unreachable!("handled above"),
        }
    }
}
