//! End-to-end scenarios driving a [`Log`] from raw ROM bytes through
//! analysis, assertions, and disassembly, exercising paths no single
//! module's inline unit tests cover on their own.

use gilgamesh_core::{
    AnalysisLimits, DisassemblyEdit, GilgameshError, Log, Rom, State, StateChange,
};

/// A flat 64K LoROM image, bank `$80` mapped at file offset `$0000`, reset
/// vector fixed at `$8000`. Large enough to place a callee far from its
/// caller without the two overlapping.
struct FlatLoRom {
    data: Vec<u8>,
}

impl FlatLoRom {
    fn new(data: Vec<u8>) -> Self {
        let mut data = data;
        data.resize(0x10000, 0xEA);
        data[0x7FFC] = 0x00;
        data[0x7FFD] = 0x80;
        data[0x7FEA] = 0x00;
        data[0x7FEB] = 0x80;
        Self { data }
    }

    fn offset(&self, addr: usize) -> usize {
        addr & 0xFFFF
    }
}

impl Rom for FlatLoRom {
    fn is_ram(&self, addr: usize) -> bool {
        let bank = (addr >> 16) & 0xFF;
        (bank == 0x7E || bank == 0x7F) || (addr & 0xFFFF) < 0x8000
    }

    fn read_byte(&self, addr: usize) -> u8 {
        self.data[self.offset(addr)]
    }

    fn read_word(&self, addr: usize) -> u16 {
        u16::from(self.read_byte(addr)) | (u16::from(self.read_byte(addr + 1)) << 8)
    }

    fn read_address(&self, addr: usize) -> u32 {
        u32::from(self.read_byte(addr))
            | (u32::from(self.read_byte(addr + 1)) << 8)
            | (u32::from(self.read_byte(addr + 2)) << 16)
    }

    fn reset_vector(&self) -> usize {
        self.read_word(0x00_FFFC) as usize
    }

    fn nmi_vector(&self) -> usize {
        self.read_word(0x00_FFEA) as usize
    }
}

/// Reading through bank `$80` and its mirror at bank `$00` must return the
/// same byte, since LoROM maps both to the same underlying half-bank — the
/// symbolic CPU relies on this to decode the same code no matter which
/// mirror a call target happens to reference.
#[test]
fn lorom_bank_80_and_bank_00_mirror_the_same_bytes() {
    let mut bytes = vec![0u8; 3];
    bytes[0] = 0xA9; // LDA #$imm
    bytes[1] = 0x7E;
    bytes[2] = 0x60; // RTS
    let rom = FlatLoRom::new(bytes);
    assert_eq!(rom.read_byte(0x80_8000), rom.read_byte(0x00_8000));
    assert_eq!(rom.read_byte(0x80_8001), rom.read_byte(0x00_8001));
    assert!(!rom.is_ram(0x80_8000));
    assert!(rom.is_ram(0x7E_0000));
}

/// A width-narrowing `SEP` followed by an 8-bit load, then a width-widening
/// `REP` and a 16-bit load: the register snapshot on each instruction must
/// reflect the width in force when that instruction executed, not the width
/// in force afterward.
#[test]
fn register_tracking_survives_a_width_transition() {
    // SEP #$20 ; LDA #$7E ; REP #$20 ; LDA #$1234 ; RTS
    let program = vec![0xE2, 0x20, 0xA9, 0x7E, 0xC2, 0x20, 0xA9, 0x34, 0x12, 0x60];
    let mut log = Log::new(FlatLoRom::new(program));
    log.analyze().unwrap();
    let sub = log.subroutine(0x8000).unwrap();

    let eight_bit_load = sub.instructions().get(&0x8002).unwrap();
    assert_eq!(eight_bit_load.argument_size(), 1);
    let after_eight_bit_load = sub.instructions().get(&0x8004).unwrap();
    assert_eq!(after_eight_bit_load.register_snapshot().a, Some(0x7E));

    let sixteen_bit_load = sub.instructions().get(&0x8006).unwrap();
    assert_eq!(sixteen_bit_load.argument_size(), 2);
    let after_sixteen_bit_load = sub.instructions().get(&0x8009).unwrap();
    assert_eq!(after_sixteen_bit_load.register_snapshot().a, Some(0x1234));
}

/// `BRK` is a suspect instruction: the walk stops dead rather than
/// guessing what comes after a software interrupt.
#[test]
fn suspect_instruction_halts_the_walk() {
    // BRK #$00 ; (never reached) RTS
    let program = vec![0x00, 0x00, 0x60];
    let mut log = Log::new(FlatLoRom::new(program));
    log.analyze().unwrap();
    let sub = log.subroutine(0x8000).unwrap();

    assert!(sub.has_suspect_instructions);
    assert_eq!(sub.instructions().len(), 1);
    let brk = sub.instructions().get(&0x8000).unwrap();
    assert!(brk.stopped_execution);
    assert_eq!(
        brk.state_change_after().unknown_reason(),
        gilgamesh_core::UnknownReason::SuspectInstruction
    );
}

/// A push with no matching pull before `RTS` leaves the hardware stack
/// unbalanced: the return's state is unknown and the subroutine is flagged,
/// the same outcome a human reviewing the disassembly would need to see
/// and correct with an assertion.
#[test]
fn unbalanced_push_flags_stack_manipulation_on_return() {
    // PHA ; RTS
    let program = vec![0x48, 0x60];
    let mut log = Log::new(FlatLoRom::new(program));
    log.analyze().unwrap();
    let sub = log.subroutine(0x8000).unwrap();

    assert!(sub.has_stack_manipulation);
    assert!(sub.has_unknown_return_state);
    let change = sub.state_changes().get(&0x8001).unwrap();
    assert!(change.is_unknown());
}

/// Two call sites reach the same callee under different incoming `m`/`x`
/// states. Because instruction identity is `(pc, state, subroutine_pc)`,
/// the callee is walked once per distinct incoming state, and each caller
/// only sees the return state that corresponds to its own call.
#[test]
fn two_call_sites_get_independent_return_states() {
    // $8000 SEP #$30 ; $8002 JSR $8010 ; $8005 RTS
    // $8006 REP #$30 ; $8008 JSR $8010 ; $800B RTS
    // ... (padding to $8010)
    // $8010 RTS  (callee: net effect is "none", so return state == caller's incoming state)
    let mut program = vec![0xE2, 0x30, 0x20, 0x10, 0x80, 0x60, 0xC2, 0x30, 0x20, 0x10, 0x80, 0x60];
    program.resize(0x10, 0xEA);
    program.push(0x60); // RTS at $8010

    let mut log = Log::new(FlatLoRom::new(program));
    log.add_entry_point(0x8006, "second_caller", State::POWER_ON);
    log.analyze().unwrap();

    let first_caller = log.subroutine(0x8000).unwrap();
    assert_eq!(
        *first_caller.state_changes().get(&0x8005).unwrap(),
        StateChange::known(Some(true), Some(true))
    );

    let second_caller = log.subroutine(0x8006).unwrap();
    assert_eq!(
        *second_caller.state_changes().get(&0x800B).unwrap(),
        StateChange::known(Some(false), Some(false))
    );

    let callee = log.subroutine(0x8010).unwrap();
    assert_eq!(*callee.state_changes().get(&0x8010).unwrap(), StateChange::none());
}

/// An indirect `JSR (abs,X)` with no recorded jump-table assertions is an
/// unresolved dead end. Asserting its targets turns it into a resolved
/// call into both callees; marking the table complete clears
/// `has_incomplete_jump_table` even though new indices could, in
/// principle, still be asserted later.
#[test]
fn jump_table_assertions_resolve_an_indirect_call() {
    // JSR ($9000,X) ; RTS, at $8000..$8003
    let mut program = vec![0xFC, 0x00, 0x90, 0x60];
    program.resize(0x1000, 0xEA);
    program.extend_from_slice(&[0x60]); // RTS at $9000
    program.resize(0x1010, 0xEA);
    program.push(0x60); // RTS at $9010

    let mut log = Log::new(FlatLoRom::new(program));
    log.analyze().unwrap();
    let sub = log.subroutine(0x8000).unwrap();
    assert!(sub.has_incomplete_jump_table);
    let unresolved = sub.instructions().get(&0x8000).unwrap();
    assert!(unresolved.stopped_execution);

    log.assert_jump(0x8000, 0x9000, Some(0));
    log.assert_jump(0x8000, 0x9010, Some(1));
    log.mark_jump_table_complete(0x8000);
    log.analyze().unwrap();

    assert!(log.is_jump_table_complete(0x8000));
    let sub = log.subroutine(0x8000).unwrap();
    assert!(!sub.has_incomplete_jump_table);
    let resolved = sub.instructions().get(&0x8000).unwrap();
    assert!(resolved.is_jump_table);
    assert!(log.subroutine(0x9000).is_some());
    assert!(log.subroutine(0x9010).is_some());
}

/// A `SubroutineHandle` obtained before a re-analysis is rejected rather
/// than silently resolving to a different (or absent) subroutine once the
/// generation counter moves on.
#[test]
fn stale_subroutine_handle_is_rejected_after_reanalysis() {
    let program = vec![0x60];
    let mut log = Log::new(FlatLoRom::new(program));
    log.analyze().unwrap();
    let handle = log.subroutine_handle(0x8000).unwrap();
    assert!(log.subroutine_by_handle(handle).is_ok());

    log.analyze().unwrap();
    assert!(matches!(
        log.subroutine_by_handle(handle),
        Err(GilgameshError::InvalidHandle)
    ));
}

/// The defensive step budget is enforced across the whole `analyze()` run,
/// not per-subroutine: a pathological amount of reachable code fails
/// loudly with `AnalysisLimitExceeded` instead of hanging.
#[test]
fn analysis_limit_is_enforced() {
    // A chain of trivial three-byte subroutines, each calling the next,
    // comfortably exceeding a tiny step budget.
    let mut program = Vec::new();
    for i in 0..64u16 {
        let target = 0x8000 + (i + 1) * 4;
        program.push(0x20); // JSR
        program.push((target & 0xFF) as u8);
        program.push((target >> 8) as u8);
        program.push(0xEA); // NOP filler so each block is 4 bytes apart
    }
    program.push(0x60); // final RTS

    let mut log = Log::with_limits(FlatLoRom::new(program), AnalysisLimits { max_steps: 8 });
    assert!(matches!(
        log.analyze(),
        Err(GilgameshError::AnalysisLimitExceeded(8))
    ));
}

/// Renaming a subroutine label through the bulk-rename pipeline and then
/// re-rendering every subroutine in the ROM reflects the new name, and the
/// rendered-then-reparsed token stream still round-trips exactly.
#[test]
fn renamed_subroutine_round_trips_through_rom_disassembly() {
    // JSR $8010 ; RTS ... $8010 RTS
    let mut program = vec![0x20, 0x10, 0x80, 0x60];
    program.resize(0x10, 0xEA);
    program.push(0x60);

    let mut log = Log::new(FlatLoRom::new(program));
    log.analyze().unwrap();

    log.rename_labels_bulk(&[("sub_008010".to_string(), "helper".to_string(), None)])
        .unwrap();
    assert!(log.subroutine_by_label("helper").is_some());

    let rom = gilgamesh_core::disassembly::render_rom(&log).unwrap();
    assert!(rom.subroutines.iter().any(|d| d.tokens.iter().any(|t| t.text == "helper")));

    for disasm in &rom.subroutines {
        let text = disasm.render_text();
        let reparsed = gilgamesh_core::disassembly::parse(&text).unwrap();
        assert_eq!(disasm.tokens, reparsed);
    }
}

/// An instruction-level assertion applied through a parsed disassembly
/// edit actually changes what `analyze()` subsequently records, closing
/// the loop from "render -> human edits text -> parse -> apply -> re-analyze".
#[test]
fn applying_a_parsed_assertion_edit_changes_the_next_analysis() {
    // JMP ($9000) ; (unresolved indirect jump, one assertable site)
    let program = vec![0x6C, 0x00, 0x90];
    let mut log = Log::new(FlatLoRom::new(program));
    log.analyze().unwrap();

    let disasm = gilgamesh_core::disassembly::render(&log, 0x8000).unwrap();
    let text = disasm
        .render_text()
        .replacen("; assert none none", "; assert instruction m=1,x=1", 1);
    let edits = disasm.diff_edit(&text).unwrap();
    assert_eq!(
        edits,
        vec![DisassemblyEdit::AssertInstruction {
            pc: 0x8000,
            change: StateChange::known(Some(true), Some(true)),
        }]
    );

    for edit in edits {
        if let DisassemblyEdit::AssertInstruction { pc, change } = edit {
            log.assert_instruction_state_change(pc, change).unwrap();
        }
    }
    log.analyze().unwrap();

    let sub = log.subroutine(0x8000).unwrap();
    let instr = sub.instructions().get(&0x8000).unwrap();
    assert_eq!(instr.state_change_after(), StateChange::known(Some(true), Some(true)));
}

/// Every reference target `analyze()` records is either a subroutine in its
/// own right or shows up in exactly the local labels of each subroutine that
/// refers to it — no reference is left dangling or duplicated across the
/// wrong subroutine's local-label set.
#[test]
fn every_reference_is_a_subroutine_or_exactly_one_local_label() {
    // $8000 BEQ +2 ; $8002 NOP ; $8003 NOP ; $8004 JSR $8010 ; $8007 RTS
    // $8010 RTS
    // The branch targets $8004 directly, the same pc fallthrough would reach,
    // so $8004 picks up a local label without being a subroutine entry.
    let mut program = vec![0xF0, 0x02, 0xEA, 0xEA, 0x20, 0x10, 0x80, 0x60];
    program.resize(0x10, 0xEA);
    program.push(0x60);

    let mut log = Log::new(FlatLoRom::new(program));
    log.analyze().unwrap();

    for (&target, sources) in log.references() {
        let is_subroutine = log.subroutine(target).is_some();
        for &(_, source_subroutine_pc) in sources {
            if is_subroutine {
                continue;
            }
            let locals = log
                .local_labels(source_subroutine_pc)
                .expect("referring subroutine has a local-label table");
            assert!(
                locals.name_of(target).is_some(),
                "target ${target:06X} referenced from ${source_subroutine_pc:06X} has neither \
                 a subroutine nor a local label"
            );
        }
    }
}

/// Two independent `Log`s built from identical ROM bytes and analyzed once
/// each must produce byte-identical rendered disassembly: `analyze()` has no
/// hidden nondeterminism (iteration order, label numbering) that would make
/// the same input produce a different Log on a different run.
#[test]
fn analyze_is_deterministic_across_independent_runs() {
    let mut program = vec![0x20, 0x10, 0x80, 0x60];
    program.resize(0x10, 0xEA);
    program.push(0x60);

    let mut first = Log::new(FlatLoRom::new(program.clone()));
    first.analyze().unwrap();
    let mut second = Log::new(FlatLoRom::new(program));
    second.analyze().unwrap();

    let first_text = gilgamesh_core::disassembly::render_rom(&first).unwrap().render_text();
    let second_text = gilgamesh_core::disassembly::render_rom(&second).unwrap().render_text();
    assert_eq!(first_text, second_text);
}

/// Asserting an instruction-level state change and then deasserting it,
/// followed by re-analysis, must land back exactly where never asserting it
/// at all would have.
#[test]
fn asserting_then_deasserting_matches_never_asserting() {
    // JMP ($9000), unresolved indirect jump.
    let program = vec![0x6C, 0x00, 0x90];

    let mut baseline = Log::new(FlatLoRom::new(program.clone()));
    baseline.analyze().unwrap();
    let baseline_text = gilgamesh_core::disassembly::render_rom(&baseline).unwrap().render_text();

    let mut round_tripped = Log::new(FlatLoRom::new(program));
    round_tripped.analyze().unwrap();
    round_tripped
        .assert_instruction_state_change(0x8000, StateChange::known(Some(true), Some(true)))
        .unwrap();
    round_tripped.analyze().unwrap();
    round_tripped.deassert_instruction_state_change(0x8000);
    round_tripped.analyze().unwrap();

    let round_tripped_text = gilgamesh_core::disassembly::render_rom(&round_tripped)
        .unwrap()
        .render_text();
    assert_eq!(baseline_text, round_tripped_text);
}
