//! The symbolic CPU: an instruction-level interpreter that forks on
//! conditional branches, recurses into subroutines on calls, and tracks
//! the processor's `m`/`x` state and the hardware stack purely
//! symbolically. It never touches actual memory contents, never computes
//! arithmetic results, and never "runs" in the emulation sense — every
//! step is a static inference about what control flow and state changes
//! are possible from here.

use std::collections::HashSet;

use log::{debug, trace};

use crate::error::GilgameshError;
use crate::instruction::{Instruction, InstructionId, StackManipulation};
use crate::log::Log;
use crate::opcodes::{AddressMode, Op, OPCODE_TABLE};
use crate::registers::Registers;
use crate::rom::{Addr, Rom};
use crate::stack::{Stack, StackData};
use crate::state::{State, StateChange, UnknownReason};

/// Runs the symbolic CPU over one subroutine invocation starting at
/// `entry_pc` (normally equal to `subroutine_pc`; they differ only when
/// re-entering a subroutine's incipit from a forked path). `active_subroutines`
/// is the chain of subroutine entry pcs already on the call path, used
/// both for recursion detection and as the stack trace recorded against
/// newly-discovered subroutines.
pub(crate) fn run_subroutine<R: Rom>(
    log: &mut Log<R>,
    entry_pc: Addr,
    entry_state: State,
    subroutine_pc: Addr,
    active_subroutines: Vec<Addr>,
    budget: &mut usize,
) -> Result<(), GilgameshError> {
    // Top-level entry points (reset/NMI vectors) start with a bare, unseeded
    // stack and are never treated as having an enclosing call frame.
    run_subroutine_with_stack(
        log,
        entry_pc,
        entry_state,
        subroutine_pc,
        active_subroutines,
        budget,
        Stack::new(),
        false,
    )
}

/// Shared by [`run_subroutine`] (top-level entry points) and
/// [`call_subroutine`] (nested calls, whose `stack` already carries the
/// call's pseudo-stack entry). `under_call` says which of those this is,
/// and gates how strictly `step` checks return-site stack provenance.
#[allow(clippy::too_many_arguments)]
fn run_subroutine_with_stack<R: Rom>(
    log: &mut Log<R>,
    entry_pc: Addr,
    entry_state: State,
    subroutine_pc: Addr,
    active_subroutines: Vec<Addr>,
    budget: &mut usize,
    mut stack: Stack,
    under_call: bool,
) -> Result<(), GilgameshError> {
    trace!(
        "entering subroutine ${subroutine_pc:06X} at ${entry_pc:06X}, depth {}",
        active_subroutines.len()
    );
    let mut registers = Registers::new();
    step(
        log,
        entry_pc,
        entry_state,
        subroutine_pc,
        StateChange::none(),
        &mut stack,
        &mut registers,
        &active_subroutines,
        budget,
        under_call,
    )
}

/// Byte width of the pseudo-stack entry a call instruction pushes for its
/// own return address: 3 for `JSL` (24-bit), 2 for `JSR`.
fn call_frame_width(op: Op) -> usize {
    if op == Op::JSL {
        3
    } else {
        2
    }
}

/// Composes a subroutine's own net effect (`on_top`, already simplified
/// against the state at its call site) onto the calling subroutine's
/// accumulated change-since-entry (`base`). An unknown `on_top` swallows
/// `base` entirely — the combined path's net effect from here on is
/// simply unknown for the same reason.
fn overlay(mut base: StateChange, on_top: StateChange) -> StateChange {
    if on_top.is_unknown() {
        return on_top;
    }
    if let Some(m) = on_top.m {
        base.m = Some(m);
    }
    if let Some(x) = on_top.x {
        base.x = Some(x);
    }
    base
}

fn immediate_value(instr: &Instruction) -> Option<u32> {
    match instr.address_mode() {
        AddressMode::ImmediateM | AddressMode::ImmediateX => instr.argument(),
        _ => None,
    }
}

/// The bitmask for the accumulator's current width (`$FF` or `$FFFF`).
fn width_mask(state: State) -> u32 {
    if state.a_size() == 1 {
        0xFF
    } else {
        0xFFFF
    }
}

/// Updates the symbolic `A`/`X`/`Y` registers for instructions whose
/// effect on them is either exactly known (immediate loads, and immediate
/// `ADC`/`SBC` against a known accumulator) or definitely invalidating
/// (other arithmetic, transfers, pulls). Everything else (stores,
/// compares, flag-only ops) leaves the registers untouched.
fn apply_register_effects(instr: &Instruction, state: State, registers: &mut Registers) {
    let immediate = immediate_value(instr);
    match instr.operation() {
        Op::LDA => registers.a.set(state, immediate),
        Op::LDX => registers.x.set(state, immediate),
        Op::LDY => registers.y.set(state, immediate),
        Op::ADC => {
            let result = immediate
                .zip(registers.a.get(state))
                .map(|(imm, a)| a.wrapping_add(imm) & width_mask(state));
            registers.a.set(state, result);
        }
        Op::SBC => {
            let result = immediate
                .zip(registers.a.get(state))
                .map(|(imm, a)| a.wrapping_sub(imm) & width_mask(state));
            registers.a.set(state, result);
        }
        Op::AND | Op::ORA | Op::EOR | Op::PLA | Op::TXA | Op::TYA | Op::TDC => {
            registers.a.set(state, None);
        }
        Op::INX | Op::DEX | Op::TAX | Op::TSX | Op::PLX | Op::TYX => {
            registers.x.set(state, None);
        }
        Op::INY | Op::DEY | Op::TAY | Op::PLY | Op::TXY => {
            registers.y.set(state, None);
        }
        Op::ASL | Op::LSR | Op::ROL | Op::ROR | Op::INC | Op::DEC
            if instr.address_mode() == AddressMode::ImpliedAccumulator =>
        {
            registers.a.set(state, None);
        }
        _ => {}
    }
}

/// Recursively calls `target`, reusing the already-discovered subroutine's
/// return states if `target` is still on the active call path (direct or
/// mutual recursion) instead of re-entering it.
#[allow(clippy::too_many_arguments)]
fn call_subroutine<R: Rom>(
    log: &mut Log<R>,
    target: Addr,
    caller_state: State,
    active_subroutines: &[Addr],
    budget: &mut usize,
    call_instruction: InstructionId,
    call_width: usize,
) -> Result<HashSet<StateChange>, GilgameshError> {
    if active_subroutines.contains(&target) {
        debug!("recursive call to ${target:06X}, reusing known return states");
        return Ok(log.simplify_subroutine_return_states(target, caller_state));
    }
    log.add_subroutine(target, active_subroutines)?;
    let mut child_active = active_subroutines.to_vec();
    child_active.push(target);
    // Seed the callee's fresh stack with a pseudo-entry for this call's own
    // return address, so a stray pop deep inside the callee can't silently
    // consume the call's bytes and be mistaken for a clean return.
    let mut stack = Stack::new();
    stack.push(call_instruction, StackData::Call, call_width);
    run_subroutine_with_stack(log, target, caller_state, target, child_active, budget, stack, true)?;
    Ok(log.simplify_subroutine_return_states(target, caller_state))
}

/// Finishes processing a (possibly jump-table-resolved) call: logs the
/// call instruction itself, then forks a continuation past it for every
/// distinct non-unknown state the callee(s) can return in.
#[allow(clippy::too_many_arguments)]
fn continue_after_call<R: Rom>(
    log: &mut Log<R>,
    instr: &mut Instruction,
    next_pc: Addr,
    call_site_state: State,
    subroutine_pc: Addr,
    stack: &Stack,
    registers: &Registers,
    active_subroutines: &[Addr],
    budget: &mut usize,
    results: HashSet<StateChange>,
    under_call: bool,
) -> Result<(), GilgameshError> {
    let change_so_far = instr.state_change_before();
    instr.set_state_change_after(change_so_far);
    log.add_instruction(subroutine_pc, *instr);

    for change in &results {
        let overlaid = overlay(change_so_far, *change);
        if overlaid.is_unknown() {
            continue;
        }
        let new_state = change.apply_to(call_site_state);
        let mut forked_stack = stack.clone();
        let mut forked_registers = *registers;
        step(
            log,
            next_pc,
            new_state,
            subroutine_pc,
            overlaid,
            &mut forked_stack,
            &mut forked_registers,
            active_subroutines,
            budget,
            under_call,
        )?;
    }
    Ok(())
}

/// Resolves an indirect jump/call through `Log`'s jump-table assertions.
/// With no assertions recorded, the path dead-ends here with an unknown
/// state change; with one or more, every asserted target is explored (as
/// a fork for a plain jump, as a call for `JSR`/`JSL`).
#[allow(clippy::too_many_arguments)]
fn handle_indirect_transfer<R: Rom>(
    log: &mut Log<R>,
    instr: &mut Instruction,
    pc: Addr,
    state: State,
    subroutine_pc: Addr,
    stack: &Stack,
    registers: &Registers,
    active_subroutines: &[Addr],
    budget: &mut usize,
    is_call: bool,
    under_call: bool,
) -> Result<(), GilgameshError> {
    let targets: Vec<Addr> = log
        .jump_assertions(pc)
        .map(|set| set.iter().map(|&(_, target)| target).collect())
        .unwrap_or_default();

    if targets.is_empty() {
        // With no jump-table targets asserted, an instruction-level
        // assertion at `pc` is the only way to escape "unknown": for a
        // call, it stands in for the (unresolvable) callee's return state
        // and execution continues past the call; for a plain jump there is
        // no pc to continue from, so it only turns the recorded state from
        // unknown into the asserted one.
        let before = instr.state_change_before();
        if before.asserted {
            if is_call {
                let next_pc = instr.next_pc();
                let mut results = HashSet::new();
                results.insert(before);
                return continue_after_call(
                    log,
                    instr,
                    next_pc,
                    state,
                    subroutine_pc,
                    stack,
                    registers,
                    active_subroutines,
                    budget,
                    results,
                    under_call,
                );
            }
            instr.stopped_execution = true;
            instr.set_state_change_after(before);
            log.add_instruction(subroutine_pc, *instr);
            return Ok(());
        }
        instr.stopped_execution = true;
        instr.set_state_change_after(StateChange::unknown(UnknownReason::IndirectJump));
        log.add_instruction(subroutine_pc, *instr);
        return Ok(());
    }

    instr.is_jump_table = true;
    for &target in &targets {
        log.add_reference(target, pc, subroutine_pc);
    }

    if is_call {
        let width = call_frame_width(instr.operation());
        let mut results = HashSet::new();
        for &target in &targets {
            results.extend(call_subroutine(
                log,
                target,
                state,
                active_subroutines,
                budget,
                instr.id(),
                width,
            )?);
        }
        let next_pc = instr.next_pc();
        return continue_after_call(
            log,
            instr,
            next_pc,
            state,
            subroutine_pc,
            stack,
            registers,
            active_subroutines,
            budget,
            results,
            under_call,
        );
    }

    let change_so_far = instr.state_change_before();
    instr.set_state_change_after(change_so_far);
    log.add_instruction(subroutine_pc, *instr);
    for &target in &targets {
        let mut branch_stack = stack.clone();
        let mut branch_registers = *registers;
        step(
            log,
            target,
            state,
            subroutine_pc,
            change_so_far,
            &mut branch_stack,
            &mut branch_registers,
            active_subroutines,
            budget,
            under_call,
        )?;
    }
    Ok(())
}

/// Decodes and dispatches one instruction, recursing into whatever
/// continuation(s) its control-flow effect implies. Returns once every
/// path reachable from `pc` has either returned, dead-ended, or looped
/// back onto an already-logged occurrence.
#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
fn step<R: Rom>(
    log: &mut Log<R>,
    pc: Addr,
    mut state: State,
    subroutine_pc: Addr,
    mut change_so_far: StateChange,
    stack: &mut Stack,
    registers: &mut Registers,
    active_subroutines: &[Addr],
    budget: &mut usize,
    under_call: bool,
) -> Result<(), GilgameshError> {
    if log.rom().is_ram(pc) {
        debug!("dead-end: ${pc:06X} falls in RAM, not ROM");
        return Ok(());
    }
    let opcode = log.rom().read_byte(pc);
    let (_, mode) = OPCODE_TABLE[opcode as usize];
    let size = match mode.static_argument_size() {
        Some(s) => s,
        None => match mode {
            AddressMode::ImmediateM => state.a_size(),
            AddressMode::ImmediateX => state.x_size(),
            _ => unreachable!("only ImmediateM/ImmediateX are state-dependent"),
        },
    };
    let raw_argument = match size {
        0 => 0,
        1 => u32::from(log.rom().read_byte(pc + 1)),
        2 => u32::from(log.rom().read_word(pc + 1)),
        3 => log.rom().read_address(pc + 1),
        _ => unreachable!("argument size is at most 3 bytes"),
    };
    let mut instr = Instruction::decode(pc, state, subroutine_pc, opcode, raw_argument);

    if log.is_logged(instr.id()) {
        return Ok(());
    }
    *budget = budget.saturating_sub(1);
    if *budget == 0 {
        debug!("analysis step budget exhausted at ${pc:06X}");
        return Err(GilgameshError::AnalysisLimitExceeded(log.limits().max_steps));
    }

    if let Some(asserted) = log.instruction_assertion(pc) {
        change_so_far = asserted;
    }
    instr.set_state_change_before(change_so_far);

    instr.set_register_snapshot(registers.snapshot(state));
    apply_register_effects(&instr, state, registers);

    let next_pc = instr.next_pc();
    let op = instr.operation();

    if op.is_sep_or_rep() {
        let bits = instr.argument().unwrap_or(0) as u8;
        if op.is_sep() {
            state.set(bits);
            change_so_far.set(bits);
        } else {
            state.reset(bits);
            change_so_far.reset(bits);
        }
        instr.set_state_change_after(change_so_far);
        log.add_instruction(subroutine_pc, instr);
        return step(
            log,
            next_pc,
            state,
            subroutine_pc,
            change_so_far,
            stack,
            registers,
            active_subroutines,
            budget,
            under_call,
        );
    }

    if op.is_php() {
        stack.push(instr.id(), StackData::State(state), 1);
        instr.set_state_change_after(change_so_far);
        log.add_instruction(subroutine_pc, instr);
        return step(
            log,
            next_pc,
            state,
            subroutine_pc,
            change_so_far,
            stack,
            registers,
            active_subroutines,
            budget,
            under_call,
        );
    }

    if op.is_plp() {
        match stack.pop_one() {
            Some(entry) => match entry.data {
                StackData::State(saved) => {
                    state = saved;
                    change_so_far = StateChange::known(Some(saved.m()), Some(saved.x()));
                }
                StackData::StateChange(saved_change) => {
                    state = saved_change.apply_to(state);
                    change_so_far = saved_change;
                }
                StackData::None | StackData::Call => {
                    debug!("PLP at ${pc:06X} pulls a non-state push, state now unknown");
                    instr.stack_manipulation = StackManipulation::CausesUnknownState;
                    log.mark_stack_manipulation(subroutine_pc);
                    change_so_far = StateChange::unknown(UnknownReason::StackManipulation);
                }
            },
            None => {
                debug!("PLP at ${pc:06X} with an empty stack, state now unknown");
                instr.stack_manipulation = StackManipulation::CausesUnknownState;
                log.mark_stack_manipulation(subroutine_pc);
                change_so_far = StateChange::unknown(UnknownReason::StackManipulation);
            }
        }
        instr.set_state_change_after(change_so_far);
        log.add_instruction(subroutine_pc, instr);
        return step(
            log,
            next_pc,
            state,
            subroutine_pc,
            change_so_far,
            stack,
            registers,
            active_subroutines,
            budget,
            under_call,
        );
    }

    if instr.is_push() {
        let transfer = instr.stack_transfer_size(state) as usize;
        stack.push(instr.id(), StackData::None, transfer);
        instr.set_state_change_after(change_so_far);
        log.add_instruction(subroutine_pc, instr);
        return step(
            log,
            next_pc,
            state,
            subroutine_pc,
            change_so_far,
            stack,
            registers,
            active_subroutines,
            budget,
            under_call,
        );
    }

    if instr.is_pop() {
        let transfer = instr.stack_transfer_size(state) as usize;
        let popped = stack.pop(transfer);
        if popped.len() < transfer {
            instr.stack_manipulation = StackManipulation::Harmless;
            log.mark_stack_manipulation(subroutine_pc);
        }
        instr.set_state_change_after(change_so_far);
        log.add_instruction(subroutine_pc, instr);
        return step(
            log,
            next_pc,
            state,
            subroutine_pc,
            change_so_far,
            stack,
            registers,
            active_subroutines,
            budget,
            under_call,
        );
    }

    if matches!(op, Op::TCS | Op::TXS) {
        let source = match op {
            Op::TCS => registers.a.get(state),
            Op::TXS => registers.x.get(state),
            _ => unreachable!("checked above"),
        };
        if source.is_some() {
            *stack = Stack::new();
        } else {
            instr.stack_manipulation = StackManipulation::Harmless;
            log.mark_stack_manipulation(subroutine_pc);
        }
        instr.set_state_change_after(change_so_far);
        log.add_instruction(subroutine_pc, instr);
        return step(
            log,
            next_pc,
            state,
            subroutine_pc,
            change_so_far,
            stack,
            registers,
            active_subroutines,
            budget,
            under_call,
        );
    }

    if op.is_suspect() {
        instr.stopped_execution = true;
        instr.set_state_change_after(StateChange::unknown(UnknownReason::SuspectInstruction));
        log.add_instruction(subroutine_pc, instr);
        return Ok(());
    }

    if instr.is_branch() {
        let target = instr.absolute_argument().expect("relative branch always resolves");
        log.add_reference(target, pc, subroutine_pc);
        instr.set_state_change_after(change_so_far);
        log.add_instruction(subroutine_pc, instr);

        // Spec §5 Ordering: explore the non-taken path before the taken
        // branch. Both forks start from the stack/register state as of
        // the branch itself, so the first-explored path runs against a
        // clone and the second reuses the untouched original.
        let mut not_taken_stack = stack.clone();
        let mut not_taken_registers = *registers;
        step(
            log,
            next_pc,
            state,
            subroutine_pc,
            change_so_far,
            &mut not_taken_stack,
            &mut not_taken_registers,
            active_subroutines,
            budget,
            under_call,
        )?;
        return step(
            log,
            target,
            state,
            subroutine_pc,
            change_so_far,
            stack,
            registers,
            active_subroutines,
            budget,
            under_call,
        );
    }

    if instr.is_jump() {
        if instr.is_indirect_jump() {
            return handle_indirect_transfer(
                log,
                &mut instr,
                pc,
                state,
                subroutine_pc,
                stack,
                registers,
                active_subroutines,
                budget,
                false,
                under_call,
            );
        }
        let target = instr.absolute_argument().expect("direct jump always resolves");
        log.add_reference(target, pc, subroutine_pc);
        instr.set_state_change_after(change_so_far);
        log.add_instruction(subroutine_pc, instr);
        return step(
            log,
            target,
            state,
            subroutine_pc,
            change_so_far,
            stack,
            registers,
            active_subroutines,
            budget,
            under_call,
        );
    }

    if instr.is_call() {
        if instr.is_indirect_jump() {
            return handle_indirect_transfer(
                log,
                &mut instr,
                pc,
                state,
                subroutine_pc,
                stack,
                registers,
                active_subroutines,
                budget,
                true,
                under_call,
            );
        }
        let target = instr.absolute_argument().expect("direct call always resolves");
        log.add_reference(target, pc, subroutine_pc);
        let width = call_frame_width(op);
        let results = call_subroutine(
            log,
            target,
            state,
            active_subroutines,
            budget,
            instr.id(),
            width,
        )?;
        return continue_after_call(
            log,
            &mut instr,
            next_pc,
            state,
            subroutine_pc,
            stack,
            registers,
            active_subroutines,
            budget,
            results,
            under_call,
        );
    }

    if instr.is_return() {
        // Spec §4.3 special case: a return whose pc is itself asserted as a
        // jump table is a contrived indirect transfer, not an ordinary
        // return — resolve it as a call or a jump, never as a return.
        let jump_table_targets: Vec<Addr> = log
            .jump_assertions(pc)
            .map(|set| set.iter().map(|&(_, target)| target).collect())
            .unwrap_or_default();
        if !jump_table_targets.is_empty() {
            return handle_return_jump_table(
                log,
                &mut instr,
                pc,
                state,
                subroutine_pc,
                stack,
                registers,
                active_subroutines,
                budget,
                under_call,
                jump_table_targets,
            );
        }

        let mut final_change = change_so_far;
        if !op.is_interrupt_return() {
            let ret_size = if op == Op::RTL { 3 } else { 2 };
            let manipulated = if under_call {
                let popped = stack.pop(ret_size);
                popped.len() < ret_size
                    || popped.iter().any(|cell| !matches!(cell.data, StackData::Call))
                    || !stack.is_empty()
            } else {
                !stack.is_empty()
            };
            if manipulated {
                final_change = StateChange::unknown(UnknownReason::StackManipulation);
                instr.stack_manipulation = StackManipulation::CausesUnknownState;
                log.mark_stack_manipulation(subroutine_pc);
            }
        }
        if let Some(asserted) = log.subroutine_assertion(subroutine_pc, pc) {
            final_change = asserted;
        }
        instr.stopped_execution = true;
        instr.set_state_change_after(final_change);
        log.add_subroutine_state(subroutine_pc, pc, final_change);
        log.add_instruction(subroutine_pc, instr);
        return Ok(());
    }

    instr.set_state_change_after(change_so_far);
    log.add_instruction(subroutine_pc, instr);
    step(
        log,
        next_pc,
        state,
        subroutine_pc,
        change_so_far,
        stack,
        registers,
        active_subroutines,
        budget,
        under_call,
    )
}

/// Resolves a return instruction whose pc is asserted as a jump table: the
/// code uses a contrived stack (commonly two pushed bytes before an
/// RTS/RTL) to perform an indirect transfer instead of an ordinary return.
/// If the stack cells it pops would otherwise have validated as this
/// subroutine's own intact call frame, the return would have behaved
/// exactly like a normal return — so it is resolved as a call to each
/// asserted target (the transfer is a tail call); otherwise it is resolved
/// as a plain jump.
#[allow(clippy::too_many_arguments)]
fn handle_return_jump_table<R: Rom>(
    log: &mut Log<R>,
    instr: &mut Instruction,
    pc: Addr,
    state: State,
    subroutine_pc: Addr,
    stack: &mut Stack,
    registers: &Registers,
    active_subroutines: &[Addr],
    budget: &mut usize,
    under_call: bool,
    targets: Vec<Addr>,
) -> Result<(), GilgameshError> {
    instr.is_jump_table = true;
    let op = instr.operation();
    let ret_size = if op == Op::RTL { 3 } else { 2 };
    let popped = stack.pop(ret_size);
    let behaves_as_call = under_call
        && popped.len() == ret_size
        && popped.iter().all(|cell| matches!(cell.data, StackData::Call))
        && stack.is_empty();

    for &target in &targets {
        log.add_reference(target, pc, subroutine_pc);
    }

    if behaves_as_call {
        let width = ret_size;
        let mut results = HashSet::new();
        for &target in &targets {
            results.extend(call_subroutine(
                log,
                target,
                state,
                active_subroutines,
                budget,
                instr.id(),
                width,
            )?);
        }
        let next_pc = instr.next_pc();
        return continue_after_call(
            log,
            instr,
            next_pc,
            state,
            subroutine_pc,
            stack,
            registers,
            active_subroutines,
            budget,
            results,
            under_call,
        );
    }

    let change_so_far = instr.state_change_before();
    instr.stopped_execution = true;
    instr.set_state_change_after(change_so_far);
    log.add_instruction(subroutine_pc, *instr);
    for &target in &targets {
        let mut branch_stack = stack.clone();
        let mut branch_registers = *registers;
        step(
            log,
            target,
            state,
            subroutine_pc,
            change_so_far,
            &mut branch_stack,
            &mut branch_registers,
            active_subroutines,
            budget,
            under_call,
        )?;
    }
    Ok(())
}
