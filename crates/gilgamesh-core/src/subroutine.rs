//! A subroutine: the instructions reachable from one entry point, the
//! state changes it's been observed to cause, and the derived facts the
//! analyzer attaches to it.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::instruction::Instruction;
use crate::opcodes::Op;
use crate::state::{State, StateChange, UnknownReason};

/// One byte-addressed subroutine, identified by its entry `pc`.
#[derive(Debug, Clone)]
pub struct Subroutine {
    pc: usize,
    label: String,
    instructions: BTreeMap<usize, Instruction>,
    /// `StateChange`s this subroutine has been observed to cause, keyed by
    /// the pc of the return instruction that produced them.
    state_changes: HashMap<usize, StateChange>,
    /// Distinct caller stack traces that have reached this subroutine.
    stack_traces: HashSet<Vec<usize>>,
    /// `true` once a `PLP`/return has popped a cell that wasn't placed by
    /// the matching push/call, anywhere in this subroutine.
    pub has_stack_manipulation: bool,
    /// `true` once a call back into this subroutine (direct or mutual) is
    /// observed while it is still being analyzed.
    pub is_recursive: bool,
    /// `true` once a `BRK`/`COP`/`STP`/`WDM` has been executed on some path.
    pub has_suspect_instructions: bool,
    /// pcs of indirect jumps/calls inside this subroutine whose target
    /// could not be derived directly.
    pub indirect_jumps: HashSet<usize>,
    /// `true` while at least one indirect jump/call in this subroutine has
    /// not been marked as an exhaustively-resolved jump table.
    pub has_incomplete_jump_table: bool,
    /// `true` once any return from this subroutine ended in an unknown
    /// state.
    pub has_unknown_return_state: bool,
    /// `true` once at least one of this subroutine's recorded state
    /// changes came from a user assertion.
    pub has_asserted_state_change: bool,
}

impl Subroutine {
    /// A fresh, empty subroutine entered at `pc`.
    #[must_use]
    pub fn new(pc: usize, label: String) -> Self {
        Self {
            pc,
            label,
            instructions: BTreeMap::new(),
            state_changes: HashMap::new(),
            stack_traces: HashSet::new(),
            has_stack_manipulation: false,
            is_recursive: false,
            has_suspect_instructions: false,
            indirect_jumps: HashSet::new(),
            has_incomplete_jump_table: false,
            has_unknown_return_state: false,
            has_asserted_state_change: false,
        }
    }

    /// Entry pc.
    #[must_use]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Current label (subroutine name, no leading dot).
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Renames this subroutine. Validation of the new name happens in
    /// [`crate::log::Log::rename_label`]; this is a raw setter.
    pub fn set_label(&mut self, label: String) {
        self.label = label;
    }

    /// Instructions belonging to this subroutine, in pc order.
    #[must_use]
    pub fn instructions(&self) -> &BTreeMap<usize, Instruction> {
        &self.instructions
    }

    /// Records (or overwrites) the decoded occurrence at `instruction`'s pc.
    /// A pc reached more than once under different states within the same
    /// subroutine keeps only the most recently recorded occurrence; the
    /// `InstructionId`-keyed visited set in [`crate::log::Log`] is what
    /// actually governs loop-cutting during analysis.
    pub fn add_instruction(&mut self, instruction: Instruction) {
        if instruction.is_indirect_jump() {
            self.indirect_jumps.insert(instruction.pc());
            self.has_incomplete_jump_table = true;
        }
        if instruction.operation().is_suspect() {
            self.has_suspect_instructions = true;
        }
        self.instructions.insert(instruction.pc(), instruction);
    }

    /// Returns a mutable handle to the instruction at `pc`, if one has been
    /// recorded.
    pub fn instruction_mut(&mut self, pc: usize) -> Option<&mut Instruction> {
        self.instructions.get_mut(&pc)
    }

    /// Records a new distinct stack trace (sequence of caller pcs) that
    /// reached this subroutine.
    pub fn add_stack_trace(&mut self, trace: Vec<usize>) {
        self.stack_traces.insert(trace);
    }

    /// All distinct stack traces recorded for this subroutine.
    #[must_use]
    pub fn stack_traces(&self) -> &HashSet<Vec<usize>> {
        &self.stack_traces
    }

    /// Records the `StateChange` observed when returning via the
    /// instruction at `return_pc`.
    pub fn add_state_change(&mut self, return_pc: usize, change: StateChange) {
        if change.asserted {
            self.has_asserted_state_change = true;
        }
        if change.is_unknown() {
            self.has_unknown_return_state = true;
        }
        self.state_changes.insert(return_pc, change);
    }

    /// `StateChange`s observed so far, keyed by the pc of the returning
    /// instruction.
    #[must_use]
    pub fn state_changes(&self) -> &HashMap<usize, StateChange> {
        &self.state_changes
    }

    /// The distinct `StateChange`s this subroutine can return, as seen by
    /// a caller currently in `caller_state`, each simplified against that
    /// state. If no return has been observed yet, this subroutine is
    /// (mutually) recursive from the caller's point of view: it's flagged
    /// as such and a single `unknown{recursion}` change is returned.
    pub fn simplify_return_states(&mut self, caller_state: State) -> HashSet<StateChange> {
        if self.state_changes.is_empty() {
            self.is_recursive = true;
            let mut set = HashSet::new();
            set.insert(StateChange::unknown(UnknownReason::Recursion));
            return set;
        }
        self.state_changes
            .values()
            .map(|c| c.simplify(caller_state))
            .collect()
    }

    /// The single `StateChange` this subroutine causes regardless of which
    /// return instruction was taken, if every recorded change agrees; `None`
    /// if there are no recorded changes, more than one distinct known
    /// change, or more than one distinct unknown change.
    #[must_use]
    pub fn unified_state_change(&self) -> Option<StateChange> {
        let mut changes = self.state_changes.values().copied();
        let first = changes.next()?;
        if changes.all(|c| c == first) {
            Some(first)
        } else {
            None
        }
    }

    /// `true` if a `PHP` occurs, in pc order, before any `SEP`/`REP` or
    /// control-flow instruction — i.e. the subroutine saves the incoming
    /// `P` register before doing anything that could change it, which
    /// means it will very likely restore it (via a matching `PLP`) before
    /// returning. Used to suggest a `none` return-state assertion.
    #[must_use]
    pub fn does_save_state_in_incipit(&self) -> bool {
        for instruction in self.instructions.values() {
            if instruction.operation() == Op::PHP {
                return true;
            }
            if instruction.is_sep_rep() || instruction.is_control() {
                return false;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    fn instr_at(pc: usize, opcode: u8, arg: u32) -> Instruction {
        Instruction::decode(pc, State::POWER_ON, 0x8000, opcode, arg)
    }

    #[test]
    fn empty_subroutine_simplifies_to_recursion() {
        let mut sub = Subroutine::new(0x8000, "sub_008000".into());
        let result = sub.simplify_return_states(State::POWER_ON);
        assert!(sub.is_recursive);
        assert_eq!(result.len(), 1);
        assert!(result
            .iter()
            .all(|c| c.unknown_reason() == UnknownReason::Recursion));
    }

    #[test]
    fn unified_state_change_requires_agreement() {
        let mut sub = Subroutine::new(0x8000, "sub_008000".into());
        sub.add_state_change(0x8010, StateChange::known(Some(true), None));
        sub.add_state_change(0x8020, StateChange::known(Some(true), None));
        assert_eq!(
            sub.unified_state_change(),
            Some(StateChange::known(Some(true), None))
        );

        sub.add_state_change(0x8030, StateChange::known(Some(false), None));
        assert_eq!(sub.unified_state_change(), None);
    }

    #[test]
    fn does_save_state_in_incipit_detects_leading_php() {
        let mut sub = Subroutine::new(0x8000, "sub_008000".into());
        sub.add_instruction(instr_at(0x8000, 0x08, 0)); // PHP
        sub.add_instruction(instr_at(0x8001, 0xC2, 0x30)); // REP #$30
        assert!(sub.does_save_state_in_incipit());
    }

    #[test]
    fn does_save_state_in_incipit_false_when_sep_comes_first() {
        let mut sub = Subroutine::new(0x8000, "sub_008000".into());
        sub.add_instruction(instr_at(0x8000, 0xC2, 0x30)); // REP #$30
        sub.add_instruction(instr_at(0x8002, 0x08, 0)); // PHP
        assert!(!sub.does_save_state_in_incipit());
    }

    #[test]
    fn add_instruction_flags_indirect_jump() {
        let mut sub = Subroutine::new(0x8000, "sub_008000".into());
        sub.add_instruction(instr_at(0x8000, 0x6C, 0x1234)); // JMP ($1234)
        assert!(sub.indirect_jumps.contains(&0x8000));
        assert!(sub.has_incomplete_jump_table);
    }

    #[test]
    fn add_instruction_flags_suspect() {
        let mut sub = Subroutine::new(0x8000, "sub_008000".into());
        sub.add_instruction(instr_at(0x8000, 0x00, 0)); // BRK
        assert!(sub.has_suspect_instructions);
    }
}
