//! The `Log`: the single aggregate that owns every discovered fact about a
//! ROM — subroutines, instructions, labels, cross-references, comments,
//! and the user assertions that refine or correct the analysis.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{info, warn};

use crate::cpu;
use crate::error::GilgameshError;
use crate::instruction::{Instruction, InstructionId};
use crate::rom::{Addr, Rom};
use crate::state::{State, StateChange, UnknownReason};
use crate::subroutine::Subroutine;

/// A named entry point into the analysis: a pc plus the processor state
/// execution is assumed to start in. `reset`/`nmi` are built in; others
/// are added by the user (e.g. an IRQ handler or a hand-identified
/// subroutine the analyzer hasn't reached through any known call site).
#[derive(Debug, Clone)]
pub struct EntryPoint {
    /// Display name (becomes the subroutine's initial label).
    pub name: String,
    /// Processor state execution is assumed to begin in.
    pub initial_state: State,
}

/// Defensive limits the driver enforces against pathological inputs (spec
/// §5, "Cancellation & timeouts": no timeouts exist, but recursion/step
/// depth may be bounded defensively).
#[derive(Debug, Clone, Copy)]
pub struct AnalysisLimits {
    /// Maximum number of instruction steps a single `analyze()` call may
    /// take across all entry points combined before giving up with
    /// [`GilgameshError::AnalysisLimitExceeded`].
    pub max_steps: usize,
}

impl Default for AnalysisLimits {
    fn default() -> Self {
        Self {
            max_steps: 2_000_000,
        }
    }
}

/// A bidirectional name↔pc map scoped to one subroutine's local labels
/// (spec §9, "Bidirectional maps").
#[derive(Debug, Clone, Default)]
pub struct LocalLabels {
    name_to_pc: HashMap<String, Addr>,
    pc_to_name: HashMap<Addr, String>,
}

impl LocalLabels {
    /// The pc a local label name resolves to, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Addr> {
        self.name_to_pc.get(name).copied()
    }

    /// The local label name for a pc, if one has been assigned.
    #[must_use]
    pub fn name_of(&self, pc: Addr) -> Option<&str> {
        self.pc_to_name.get(&pc).map(String::as_str)
    }

    /// All `(name, pc)` pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Addr)> {
        self.name_to_pc.iter().map(|(name, pc)| (name.as_str(), *pc))
    }

    fn insert(&mut self, name: String, pc: Addr) {
        if let Some(old_name) = self.pc_to_name.insert(pc, name.clone()) {
            self.name_to_pc.remove(&old_name);
        }
        self.name_to_pc.insert(name, pc);
    }
}

/// A pc-keyed lookup key for a [`Subroutine`], paired with the [`Log`]
/// generation it was obtained from (spec §9, "Shared-but-invalidated
/// objects"). Using it through [`Log::subroutine_by_handle`] after a
/// `reset()`/`analyze()` fails loudly instead of silently returning stale
/// or absent data.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SubroutineHandle {
    pc: Addr,
    generation: u64,
}

/// The identifier-validity and rename-uniqueness facts `rename_label`
/// checks. Kept minimal; SNES hardware register aliases a label can't
/// collide with.
const RESERVED_ALIASES: &[&str] = &[
    "INIDISP", "OBSEL", "OAMADDL", "OAMADDH", "OAMDATA", "BGMODE", "MOSAIC", "BG1SC", "BG2SC",
    "BG3SC", "BG4SC", "BG12NBA", "BG34NBA", "TM", "TS", "CGADD", "CGDATA", "NMITIMEN", "WRIO",
    "WRMPYA", "WRMPYB", "WRDIVL", "WRDIVH", "WRDIVB", "HTIMEL", "HTIMEH", "VTIMEL", "VTIMEH",
    "MDMAEN", "HDMAEN", "MEMSEL", "RDNMI", "TIMEUP", "HVBJOY", "RDIO", "RDDIVL", "RDDIVH",
    "RDMPYL", "RDMPYH", "JOY1L", "JOY1H", "JOY2L", "JOY2H", "JOY3L", "JOY3H", "JOY4L", "JOY4H",
];

fn validate_identifier(name: &str) -> Result<(), GilgameshError> {
    let bare = name.strip_prefix('.').unwrap_or(name);
    let mut chars = bare.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return Err(GilgameshError::InvalidLabel(name.to_string())),
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(GilgameshError::InvalidLabel(name.to_string()));
    }
    if bare.starts_with("sub_") || bare.starts_with("loc_") {
        return Err(GilgameshError::InvalidLabel(name.to_string()));
    }
    if RESERVED_ALIASES.contains(&bare.to_ascii_uppercase().as_str()) {
        return Err(GilgameshError::InvalidLabel(name.to_string()));
    }
    Ok(())
}

/// A suggested assertion the log can offer a user for an instruction whose
/// recorded `StateChange` is unknown (spec §4.5, "Suggested-assertion
/// heuristic").
#[derive(Debug, Clone, PartialEq)]
pub enum Suggestion {
    /// Assert `change` at a specific instruction pc.
    Instruction {
        /// The call-site pc to assert at.
        pc: Addr,
        /// The suggested change.
        change: StateChange,
    },
    /// Assert `change` as the return state for an entire subroutine.
    Subroutine {
        /// The subroutine's entry pc.
        subroutine_pc: Addr,
        /// The suggested change.
        change: StateChange,
    },
}

/// The central analysis database: every subroutine, instruction, label,
/// reference, comment, and assertion discovered or supplied for one ROM.
pub struct Log<R: Rom> {
    rom: R,
    limits: AnalysisLimits,
    generation: u64,
    entry_points: BTreeMap<Addr, EntryPoint>,
    entry_order: Vec<Addr>,
    subroutines: BTreeMap<Addr, Subroutine>,
    subroutines_by_label: HashMap<String, Addr>,
    instructions: HashMap<Addr, HashSet<InstructionId>>,
    local_labels: HashMap<Addr, LocalLabels>,
    references: HashMap<Addr, HashSet<(Addr, Addr)>>,
    instruction_assertions: HashMap<Addr, StateChange>,
    subroutine_assertions: HashMap<Addr, HashMap<Addr, StateChange>>,
    jump_assertions: HashMap<Addr, BTreeSet<(Option<usize>, Addr)>>,
    jump_table_targets: HashMap<Addr, usize>,
    complete_jump_tables: HashSet<Addr>,
    preserved_labels: HashMap<Addr, String>,
    comments: HashMap<Addr, String>,
    dirty: bool,
}

impl<R: Rom> Log<R> {
    /// Builds a fresh log over `rom`, with the default `reset`/`nmi` entry
    /// points read from its vector table, both assumed to start in
    /// [`State::POWER_ON`].
    #[must_use]
    pub fn new(rom: R) -> Self {
        Self::with_limits(rom, AnalysisLimits::default())
    }

    /// Like [`Log::new`], overriding the defensive analysis step budget.
    #[must_use]
    pub fn with_limits(rom: R, limits: AnalysisLimits) -> Self {
        let reset_pc = rom.reset_vector();
        let nmi_pc = rom.nmi_vector();
        let mut entry_points = BTreeMap::new();
        entry_points.insert(
            reset_pc,
            EntryPoint {
                name: "reset".to_string(),
                initial_state: State::POWER_ON,
            },
        );
        entry_points.insert(
            nmi_pc,
            EntryPoint {
                name: "nmi".to_string(),
                initial_state: State::POWER_ON,
            },
        );
        let mut entry_order = vec![reset_pc];
        if nmi_pc != reset_pc {
            entry_order.push(nmi_pc);
        }
        Self {
            rom,
            limits,
            generation: 0,
            entry_points,
            entry_order,
            subroutines: BTreeMap::new(),
            subroutines_by_label: HashMap::new(),
            instructions: HashMap::new(),
            local_labels: HashMap::new(),
            references: HashMap::new(),
            instruction_assertions: HashMap::new(),
            subroutine_assertions: HashMap::new(),
            jump_assertions: HashMap::new(),
            jump_table_targets: HashMap::new(),
            complete_jump_tables: HashSet::new(),
            preserved_labels: HashMap::new(),
            comments: HashMap::new(),
            dirty: true,
        }
    }

    /// The ROM this log analyzes.
    #[must_use]
    pub fn rom(&self) -> &R {
        &self.rom
    }

    /// `true` if an assertion has changed since the last successful
    /// `analyze()`.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Monotonic counter bumped every time `reset()` invalidates prior
    /// `Subroutine`/`Instruction` state.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Declared entry points, keyed by pc.
    #[must_use]
    pub fn entry_points(&self) -> &BTreeMap<Addr, EntryPoint> {
        &self.entry_points
    }

    /// Adds (or idempotently overwrites) an entry point. Declared order is
    /// the order `analyze()` walks entry points in (spec §5 Ordering); an
    /// entry point re-added at the same `pc` keeps its original position.
    pub fn add_entry_point(&mut self, pc: Addr, name: impl Into<String>, initial_state: State) {
        if self
            .entry_points
            .insert(
                pc,
                EntryPoint {
                    name: name.into(),
                    initial_state,
                },
            )
            .is_none()
        {
            self.entry_order.push(pc);
        }
        self.dirty = true;
    }

    /// All discovered subroutines, ordered by entry pc.
    #[must_use]
    pub fn subroutines(&self) -> &BTreeMap<Addr, Subroutine> {
        &self.subroutines
    }

    /// The subroutine entered at `pc`, if one has been discovered.
    #[must_use]
    pub fn subroutine(&self, pc: Addr) -> Option<&Subroutine> {
        self.subroutines.get(&pc)
    }

    /// The subroutine named `label`, if one exists.
    #[must_use]
    pub fn subroutine_by_label(&self, label: &str) -> Option<&Subroutine> {
        self.subroutines_by_label
            .get(label)
            .and_then(|pc| self.subroutines.get(pc))
    }

    /// A generation-stamped handle to the subroutine at `pc`.
    #[must_use]
    pub fn subroutine_handle(&self, pc: Addr) -> Option<SubroutineHandle> {
        self.subroutines.contains_key(&pc).then_some(SubroutineHandle {
            pc,
            generation: self.generation,
        })
    }

    /// Resolves a handle, failing if the log has been reset/re-analyzed
    /// since it was obtained.
    pub fn subroutine_by_handle(&self, handle: SubroutineHandle) -> Result<&Subroutine, GilgameshError> {
        if handle.generation != self.generation {
            return Err(GilgameshError::InvalidHandle);
        }
        self.subroutines.get(&handle.pc).ok_or(GilgameshError::InvalidHandle)
    }

    /// Local labels scoped to the subroutine at `subroutine_pc`.
    #[must_use]
    pub fn local_labels(&self, subroutine_pc: Addr) -> Option<&LocalLabels> {
        self.local_labels.get(&subroutine_pc)
    }

    /// Every recorded cross-reference, keyed by the referenced target pc.
    #[must_use]
    pub fn references(&self) -> &HashMap<Addr, HashSet<(Addr, Addr)>> {
        &self.references
    }

    /// The user comment attached to `pc`, if any.
    #[must_use]
    pub fn comment(&self, pc: Addr) -> Option<&str> {
        self.comments.get(&pc).map(String::as_str)
    }

    /// Attaches (or replaces) a comment at `pc`.
    pub fn set_comment(&mut self, pc: Addr, text: String) {
        self.comments.insert(pc, text);
    }

    /// Removes the comment at `pc`, if any.
    pub fn clear_comment(&mut self, pc: Addr) {
        self.comments.remove(&pc);
    }

    /// Reference count of how many jump-table assertions target `pc`, used
    /// to preserve "this is a jump-table target" during label generation
    /// and rendering even across a `reset()`.
    #[must_use]
    pub fn jump_table_target_count(&self, pc: Addr) -> usize {
        self.jump_table_targets.get(&pc).copied().unwrap_or(0)
    }

    /// `true` once the indirect jump/call at `caller_pc` has been marked
    /// exhaustively resolved.
    #[must_use]
    pub fn is_jump_table_complete(&self, caller_pc: Addr) -> bool {
        self.complete_jump_tables.contains(&caller_pc)
    }

    /// Marks the indirect jump/call at `caller_pc` as exhaustively
    /// resolved: no further targets remain to be discovered.
    pub fn mark_jump_table_complete(&mut self, caller_pc: Addr) {
        self.complete_jump_tables.insert(caller_pc);
        self.dirty = true;
    }

    /// The `(index, target)` pairs asserted for the indirect jump/call at
    /// `caller_pc`, sorted by index then target pc (used to render a
    /// `JUMP_TABLE` block in [`crate::disassembly`]).
    #[must_use]
    pub fn jump_table_entries(&self, caller_pc: Addr) -> Vec<(Option<usize>, Addr)> {
        self.jump_assertions
            .get(&caller_pc)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The instruction-level `StateChange` assertion at `pc`, if any (read
    /// access for [`crate::disassembly`]; the symbolic CPU uses the
    /// crate-private `instruction_assertion` instead).
    #[must_use]
    pub fn instruction_assertion_at(&self, pc: Addr) -> Option<StateChange> {
        self.instruction_assertions.get(&pc).copied()
    }

    /// The subroutine-level `StateChange` assertion for the return site
    /// `return_pc` of the subroutine entered at `subroutine_pc`, if any.
    #[must_use]
    pub fn subroutine_assertion_at(&self, subroutine_pc: Addr, return_pc: Addr) -> Option<StateChange> {
        self.subroutine_assertions
            .get(&subroutine_pc)
            .and_then(|m| m.get(&return_pc))
            .copied()
    }

    // ---- assertions (spec §4.5 / §6) ----------------------------------

    /// Asserts the `StateChange` an instruction at `pc` causes, overriding
    /// whatever the symbolic CPU would otherwise record there.
    pub fn assert_instruction_state_change(
        &mut self,
        pc: Addr,
        change: StateChange,
    ) -> Result<(), GilgameshError> {
        if change.is_unknown() {
            return Err(GilgameshError::InvalidAssertion(
                "unknown cannot be asserted positively".to_string(),
            ));
        }
        let mut asserted = change;
        asserted.asserted = true;
        if let Some(previous) = self.instruction_assertions.insert(pc, asserted) {
            if previous != asserted {
                warn!("overwriting instruction assertion at ${pc:06X}: {previous} -> {asserted}");
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Removes an instruction-level state-change assertion.
    pub fn deassert_instruction_state_change(&mut self, pc: Addr) {
        if self.instruction_assertions.remove(&pc).is_some() {
            self.dirty = true;
        }
    }

    /// Asserts the `StateChange` a subroutine causes when returning via
    /// the instruction at `return_pc`. Distinct return sites of the same
    /// subroutine can be asserted independently.
    pub fn assert_subroutine_state_change(
        &mut self,
        subroutine_pc: Addr,
        return_pc: Addr,
        change: StateChange,
    ) -> Result<(), GilgameshError> {
        if change.is_unknown() {
            return Err(GilgameshError::InvalidAssertion(
                "unknown cannot be asserted positively".to_string(),
            ));
        }
        let mut asserted = change;
        asserted.asserted = true;
        if let Some(previous) = self
            .subroutine_assertions
            .entry(subroutine_pc)
            .or_default()
            .insert(return_pc, asserted)
        {
            if previous != asserted {
                warn!(
                    "overwriting subroutine assertion at ${subroutine_pc:06X} return ${return_pc:06X}: {previous} -> {asserted}"
                );
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Removes a subroutine-level return-state assertion at one return
    /// site.
    pub fn deassert_subroutine_state_change(&mut self, subroutine_pc: Addr, return_pc: Addr) {
        if let Some(map) = self.subroutine_assertions.get_mut(&subroutine_pc) {
            if map.remove(&return_pc).is_some() {
                self.dirty = true;
            }
        }
    }

    /// Asserts that the indirect jump/call at `caller_pc` can target
    /// `target_pc`, optionally at a specific jump-table `index`.
    pub fn assert_jump(&mut self, caller_pc: Addr, target_pc: Addr, index: Option<usize>) {
        self.jump_assertions
            .entry(caller_pc)
            .or_default()
            .insert((index, target_pc));
        *self.jump_table_targets.entry(target_pc).or_insert(0) += 1;
        self.dirty = true;
    }

    /// Removes a jump-table assertion.
    pub fn deassert_jump(&mut self, caller_pc: Addr, target_pc: Addr) {
        if let Some(set) = self.jump_assertions.get_mut(&caller_pc) {
            let before = set.len();
            set.retain(|&(_, target)| target != target_pc);
            if set.len() != before {
                self.dirty = true;
                if let Some(count) = self.jump_table_targets.get_mut(&target_pc) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.jump_table_targets.remove(&target_pc);
                    }
                }
            }
        }
    }

    /// Suggests an assertion for an unknown-state instruction at `pc`, per
    /// spec §4.5. "Unsafe" suggestions (recursion; `PLP` stack
    /// manipulation) are only returned when `unsafe_suggestions` is set.
    #[must_use]
    pub fn suggest_assertion(&self, pc: Addr, unsafe_suggestions: bool) -> Option<Suggestion> {
        let id = self.instructions.get(&pc)?.iter().next().copied()?;
        let sub = self.subroutines.get(&id.subroutine_pc())?;
        let instr = sub.instructions().get(&pc)?;
        let change = instr.state_change_after();
        if !change.is_unknown() {
            return None;
        }
        let reason = change.unknown_reason();
        if reason == UnknownReason::IndirectJump && instr.is_call() {
            return Some(Suggestion::Instruction {
                pc,
                change: StateChange::none(),
            });
        }
        if reason == UnknownReason::IndirectJump && instr.is_jump() && sub.does_save_state_in_incipit() {
            return Some(Suggestion::Subroutine {
                subroutine_pc: sub.pc(),
                change: StateChange::none(),
            });
        }
        if reason == UnknownReason::StackManipulation && instr.is_return() {
            if let Some(unified) = sub.unified_state_change() {
                return Some(Suggestion::Subroutine {
                    subroutine_pc: sub.pc(),
                    change: unified,
                });
            }
        }
        if unsafe_suggestions && matches!(reason, UnknownReason::Recursion | UnknownReason::StackManipulation) {
            return Some(Suggestion::Subroutine {
                subroutine_pc: sub.pc(),
                change: StateChange::none(),
            });
        }
        None
    }

    // ---- renames (spec §4.5 / §4.6) ------------------------------------

    /// Renames a label, eagerly validating the new name and the rename's
    /// legality (no crossing the subroutine/local-label boundary, no
    /// collision, no reserved prefix/alias).
    pub fn rename_label(
        &mut self,
        old: &str,
        new: &str,
        current_subroutine: Option<Addr>,
    ) -> Result<(), GilgameshError> {
        self.rename_label_impl(old, new, current_subroutine, false)
    }

    /// Validates a rename without applying it (used by the bulk rename
    /// pipeline's dry-run pass).
    pub fn rename_label_dry_run(
        &mut self,
        old: &str,
        new: &str,
        current_subroutine: Option<Addr>,
    ) -> Result<(), GilgameshError> {
        self.rename_label_impl(old, new, current_subroutine, true)
    }

    fn rename_label_impl(
        &mut self,
        old: &str,
        new: &str,
        current_subroutine: Option<Addr>,
        dry_run: bool,
    ) -> Result<(), GilgameshError> {
        validate_identifier(new)?;
        let old_is_local = old.starts_with('.');
        let new_is_local = new.starts_with('.');
        if old_is_local != new_is_local {
            return Err(GilgameshError::InvalidLabel(format!(
                "rename from {old} to {new} crosses the subroutine/local-label boundary"
            )));
        }

        if old_is_local {
            let subroutine_pc = current_subroutine.ok_or_else(|| {
                GilgameshError::InvalidLabel("local rename requires a current subroutine".to_string())
            })?;
            let labels = self.local_labels.get(&subroutine_pc).ok_or_else(|| {
                GilgameshError::InvalidLabel(format!("no such subroutine ${subroutine_pc:06X}"))
            })?;
            let old_name = &old[1..];
            let new_name = new[1..].to_string();
            let pc = labels
                .get(old_name)
                .ok_or_else(|| GilgameshError::InvalidLabel(format!("no local label {old}")))?;
            if let Some(existing) = labels.get(&new_name) {
                if existing != pc {
                    return Err(GilgameshError::AmbiguousRename {
                        from: old.to_string(),
                        to: new.to_string(),
                        conflict: new.to_string(),
                    });
                }
            }
            if dry_run {
                return Ok(());
            }
            self.local_labels
                .get_mut(&subroutine_pc)
                .expect("checked above")
                .insert(new_name.clone(), pc);
            self.preserved_labels.insert(pc, new_name);
        } else {
            let pc = *self
                .subroutines_by_label
                .get(old)
                .ok_or_else(|| GilgameshError::InvalidLabel(format!("no such subroutine {old}")))?;
            if let Some(&existing) = self.subroutines_by_label.get(new) {
                if existing != pc {
                    return Err(GilgameshError::AmbiguousRename {
                        from: old.to_string(),
                        to: new.to_string(),
                        conflict: new.to_string(),
                    });
                }
            }
            if dry_run {
                return Ok(());
            }
            self.subroutines_by_label.remove(old);
            self.subroutines_by_label.insert(new.to_string(), pc);
            if let Some(sub) = self.subroutines.get_mut(&pc) {
                sub.set_label(new.to_string());
            }
            self.preserved_labels.insert(pc, new.to_string());
        }
        Ok(())
    }

    /// Bulk-renames many labels at once, using the two-phase placeholder
    /// strategy from spec §4.6: every rename first runs in dry-run mode to
    /// surface conflicts, then each old name is renamed to a fresh unique
    /// placeholder, then each placeholder to its final name. This is what
    /// lets `A↔B` swaps complete without a transient collision.
    pub fn rename_labels_bulk(
        &mut self,
        renames: &[(String, String, Option<Addr>)],
    ) -> Result<(), GilgameshError> {
        for (old, new, scope) in renames {
            self.rename_label_dry_run(old, new, *scope)?;
        }

        let mut placeholders = Vec::with_capacity(renames.len());
        for (i, (old, _, scope)) in renames.iter().enumerate() {
            let bare = format!("__gilgamesh_rename_tmp_{i}__");
            let placeholder = if old.starts_with('.') {
                format!(".{bare}")
            } else {
                bare
            };
            self.rename_label_impl(old, &placeholder, *scope, false)?;
            placeholders.push(placeholder);
        }
        for ((_, new, scope), placeholder) in renames.iter().zip(placeholders.iter()) {
            self.rename_label_impl(placeholder, new, *scope, false)?;
        }
        Ok(())
    }

    // ---- lifecycle ------------------------------------------------------

    /// Clears every derived field (subroutines, instructions, local
    /// labels, references) but retains user assertions, preserved labels,
    /// comments, and entry points. Bumps [`Log::generation`], invalidating
    /// any handle obtained before this call.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.subroutines.clear();
        self.subroutines_by_label.clear();
        self.instructions.clear();
        self.local_labels.clear();
        self.references.clear();
    }

    /// Re-runs the analysis from every entry point, preserving current
    /// labels across the reset.
    pub fn analyze(&mut self) -> Result<(), GilgameshError> {
        self.analyze_preserving(true)
    }

    /// Re-runs the analysis from every entry point.
    ///
    /// 1. If `preserve_labels`, snapshots current subroutine and local
    ///    label name→pc maps into `preserved_labels`.
    /// 2. Invalidates all current `Subroutine`/`Instruction` objects
    ///    (`reset()`).
    /// 3. Recreates a subroutine entry for every declared entry point.
    /// 4. Runs the symbolic CPU from each, in declared order (spec §5
    ///    Ordering: "entry points in declared order").
    /// 5. Regenerates local labels from `references`.
    /// 6. Clears `dirty`.
    pub fn analyze_preserving(&mut self, preserve_labels: bool) -> Result<(), GilgameshError> {
        if preserve_labels {
            self.snapshot_labels();
        }
        self.reset();

        let entries: Vec<(Addr, EntryPoint)> = self
            .entry_order
            .iter()
            .filter_map(|pc| self.entry_points.get(pc).map(|ep| (*pc, ep.clone())))
            .collect();
        info!("analyzing {} entry point(s)", entries.len());
        let mut budget = self.limits.max_steps;
        for (pc, entry) in entries {
            self.add_subroutine(pc, &[])?;
            cpu::run_subroutine(self, pc, entry.initial_state, pc, Vec::new(), &mut budget)?;
        }

        self.generate_local_labels();
        self.recompute_jump_table_completeness();
        self.dirty = false;
        info!(
            "analysis complete: {} subroutine(s) discovered",
            self.subroutines.len()
        );
        Ok(())
    }

    fn snapshot_labels(&mut self) {
        for (&pc, sub) in &self.subroutines {
            self.preserved_labels.insert(pc, sub.label().to_string());
        }
        for labels in self.local_labels.values() {
            for (name, pc) in labels.iter() {
                self.preserved_labels.insert(pc, name.to_string());
            }
        }
    }

    fn generate_local_labels(&mut self) {
        let references: Vec<(Addr, Addr)> = self
            .references
            .iter()
            .flat_map(|(&target, sources)| sources.iter().map(move |&(_, sub_pc)| (target, sub_pc)))
            .collect();
        for (target, sub_pc) in references {
            if self.subroutines.contains_key(&target) {
                continue;
            }
            if !self.subroutines.contains_key(&sub_pc) {
                continue;
            }
            let name = self
                .preserved_labels
                .get(&target)
                .cloned()
                .unwrap_or_else(|| format!("loc_{target:06X}"));
            self.local_labels.entry(sub_pc).or_default().insert(name, target);
        }
    }

    fn recompute_jump_table_completeness(&mut self) {
        let complete = self.complete_jump_tables.clone();
        for sub in self.subroutines.values_mut() {
            sub.has_incomplete_jump_table = sub.indirect_jumps.iter().any(|pc| !complete.contains(pc));
        }
    }

    // ---- mutators used only by the symbolic CPU -------------------------

    pub(crate) fn add_subroutine(&mut self, pc: Addr, stack_trace: &[Addr]) -> Result<(), GilgameshError> {
        if self.rom.is_ram(pc) {
            return Err(GilgameshError::InvalidAddress(pc));
        }
        if !self.subroutines.contains_key(&pc) {
            let label = self
                .preserved_labels
                .get(&pc)
                .cloned()
                .unwrap_or_else(|| format!("sub_{pc:06X}"));
            self.subroutines_by_label.insert(label.clone(), pc);
            self.subroutines.insert(pc, Subroutine::new(pc, label));
            self.local_labels.entry(pc).or_default();
        }
        if !stack_trace.is_empty() {
            self.subroutines
                .get_mut(&pc)
                .expect("just inserted")
                .add_stack_trace(stack_trace.to_vec());
        }
        Ok(())
    }

    pub(crate) fn add_instruction(&mut self, subroutine_pc: Addr, instruction: Instruction) {
        self.instructions
            .entry(instruction.pc())
            .or_default()
            .insert(instruction.id());
        if let Some(sub) = self.subroutines.get_mut(&subroutine_pc) {
            sub.add_instruction(instruction);
        }
    }

    pub(crate) fn is_logged(&self, id: InstructionId) -> bool {
        self.instructions
            .get(&id.pc())
            .is_some_and(|set| set.contains(&id))
    }

    pub(crate) fn instruction_mut(&mut self, subroutine_pc: Addr, pc: Addr) -> Option<&mut Instruction> {
        self.subroutines.get_mut(&subroutine_pc)?.instruction_mut(pc)
    }

    pub(crate) fn add_subroutine_state(&mut self, subroutine_pc: Addr, return_pc: Addr, change: StateChange) {
        if let Some(sub) = self.subroutines.get_mut(&subroutine_pc) {
            sub.add_state_change(return_pc, change);
        }
    }

    pub(crate) fn add_reference(&mut self, target_pc: Addr, source_pc: Addr, source_subroutine_pc: Addr) {
        self.references
            .entry(target_pc)
            .or_default()
            .insert((source_pc, source_subroutine_pc));
    }

    pub(crate) fn instruction_assertion(&self, pc: Addr) -> Option<StateChange> {
        self.instruction_assertions.get(&pc).copied()
    }

    pub(crate) fn subroutine_assertion(&self, subroutine_pc: Addr, return_pc: Addr) -> Option<StateChange> {
        self.subroutine_assertions
            .get(&subroutine_pc)
            .and_then(|m| m.get(&return_pc))
            .copied()
    }

    pub(crate) fn jump_assertions(&self, caller_pc: Addr) -> Option<&BTreeSet<(Option<usize>, Addr)>> {
        self.jump_assertions.get(&caller_pc)
    }

    pub(crate) fn limits(&self) -> AnalysisLimits {
        self.limits
    }

    /// The distinct `StateChange`s the subroutine at `subroutine_pc` can
    /// return to a caller currently in `caller_state`. If the subroutine
    /// hasn't recorded any return yet (it's still being walked further up
    /// the same call chain), this is a recursive call: a single
    /// `unknown{recursion}` change is returned without recursing further.
    pub(crate) fn simplify_subroutine_return_states(
        &mut self,
        subroutine_pc: Addr,
        caller_state: State,
    ) -> HashSet<StateChange> {
        match self.subroutines.get_mut(&subroutine_pc) {
            Some(sub) => sub.simplify_return_states(caller_state),
            None => {
                let mut set = HashSet::new();
                set.insert(StateChange::unknown(UnknownReason::Recursion));
                set
            }
        }
    }

    /// Flags the subroutine at `subroutine_pc` as having observed a stack
    /// write/read that breaks ordinary call/return discipline.
    pub(crate) fn mark_stack_manipulation(&mut self, subroutine_pc: Addr) {
        if let Some(sub) = self.subroutines.get_mut(&subroutine_pc) {
            sub.has_stack_manipulation = true;
        }
    }
}

#[cfg(feature = "serde")]
mod persistence {
    use super::{Addr, HashMap, HashSet, Log, Rom, StateChange};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeSet;

    /// The serializable subset of a [`Log`]: everything spec §6
    /// ("Persistence") lists as needing to round-trip through a project
    /// file. Derived analysis state (subroutines, instructions,
    /// references, labels) is not included — it's regenerated by
    /// `analyze()` after `load`.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LogSnapshot {
        /// `(pc, name, initial_state_p)` triples.
        pub entry_points: Vec<(Addr, String, u8)>,
        /// `(pc, change)` pairs.
        pub instruction_assertions: Vec<(Addr, StateChangeSnapshot)>,
        /// `(subroutine_pc, return_pc, change)` triples.
        pub subroutine_assertions: Vec<(Addr, Addr, StateChangeSnapshot)>,
        /// `(caller_pc, index, target_pc)` triples.
        pub jump_assertions: Vec<(Addr, Option<usize>, Addr)>,
        /// Reference counts for jump-table targets.
        pub jump_table_targets: Vec<(Addr, usize)>,
        /// Callers whose jump table has been marked exhaustively resolved.
        pub complete_jump_tables: Vec<Addr>,
        /// `(pc, label)` pairs.
        pub preserved_labels: Vec<(Addr, String)>,
        /// `(pc, text)` pairs.
        pub comments: Vec<(Addr, String)>,
    }

    /// A serializable mirror of [`StateChange`] (which itself is not
    /// `Serialize` so that its reason-driven equality can't be confused
    /// with field equality at the serialization boundary).
    #[derive(Debug, Clone, Copy, Serialize, Deserialize)]
    pub struct StateChangeSnapshot {
        m: Option<bool>,
        x: Option<bool>,
        asserted: bool,
    }

    impl From<StateChange> for StateChangeSnapshot {
        fn from(change: StateChange) -> Self {
            Self {
                m: change.m,
                x: change.x,
                asserted: change.asserted,
            }
        }
    }

    impl From<StateChangeSnapshot> for StateChange {
        fn from(snapshot: StateChangeSnapshot) -> Self {
            let mut change = StateChange::known(snapshot.m, snapshot.x);
            change.asserted = snapshot.asserted;
            change
        }
    }

    impl<R: Rom> Log<R> {
        /// Serializes the persistent (user-supplied) half of this log:
        /// entry points, all assertion kinds, preserved labels, and
        /// comments. Derived analysis state is intentionally excluded —
        /// call `analyze()` after `load` to regenerate it.
        #[must_use]
        pub fn save(&self) -> LogSnapshot {
            LogSnapshot {
                entry_points: self
                    .entry_order
                    .iter()
                    .filter_map(|&pc| {
                        self.entry_points.get(&pc).map(|ep| (pc, ep.name.clone(), ep.initial_state.p()))
                    })
                    .collect(),
                instruction_assertions: self
                    .instruction_assertions
                    .iter()
                    .map(|(&pc, &change)| (pc, change.into()))
                    .collect(),
                subroutine_assertions: self
                    .subroutine_assertions
                    .iter()
                    .flat_map(|(&sub_pc, returns)| {
                        returns
                            .iter()
                            .map(move |(&return_pc, &change)| (sub_pc, return_pc, change.into()))
                    })
                    .collect(),
                jump_assertions: self
                    .jump_assertions
                    .iter()
                    .flat_map(|(&caller_pc, targets)| {
                        targets.iter().map(move |&(index, target_pc)| (caller_pc, index, target_pc))
                    })
                    .collect(),
                jump_table_targets: self.jump_table_targets.iter().map(|(&pc, &n)| (pc, n)).collect(),
                complete_jump_tables: self.complete_jump_tables.iter().copied().collect(),
                preserved_labels: self.preserved_labels.iter().map(|(&pc, l)| (pc, l.clone())).collect(),
                comments: self.comments.iter().map(|(&pc, c)| (pc, c.clone())).collect(),
            }
        }

        /// Restores the persistent half of a log from a snapshot. Derived
        /// analysis state is left empty; call `analyze()` to populate it.
        pub fn load(rom: R, snapshot: LogSnapshot) -> Self {
            let mut log = Self::with_limits(rom, super::AnalysisLimits::default());
            log.entry_points.clear();
            log.entry_order.clear();
            for (pc, name, p) in snapshot.entry_points {
                log.entry_points.insert(
                    pc,
                    super::EntryPoint {
                        name,
                        initial_state: crate::state::State::from_p(p),
                    },
                );
                log.entry_order.push(pc);
            }
            log.instruction_assertions = snapshot
                .instruction_assertions
                .into_iter()
                .map(|(pc, change)| (pc, change.into()))
                .collect();
            let mut subroutine_assertions: HashMap<Addr, HashMap<Addr, StateChange>> = HashMap::new();
            for (sub_pc, return_pc, change) in snapshot.subroutine_assertions {
                subroutine_assertions.entry(sub_pc).or_default().insert(return_pc, change.into());
            }
            log.subroutine_assertions = subroutine_assertions;
            let mut jump_assertions: HashMap<Addr, BTreeSet<(Option<usize>, Addr)>> = HashMap::new();
            for (caller_pc, index, target_pc) in snapshot.jump_assertions {
                jump_assertions.entry(caller_pc).or_default().insert((index, target_pc));
            }
            log.jump_assertions = jump_assertions;
            log.jump_table_targets = snapshot.jump_table_targets.into_iter().collect();
            log.complete_jump_tables = snapshot.complete_jump_tables.into_iter().collect::<HashSet<_>>();
            log.preserved_labels = snapshot.preserved_labels.into_iter().collect();
            log.comments = snapshot.comments.into_iter().collect();
            log.dirty = true;
            log
        }
    }
}

#[cfg(feature = "serde")]
pub use persistence::LogSnapshot;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::test_support::TestRom;

    fn log_with(program: &[u8]) -> Log<TestRom> {
        Log::new(TestRom::with_program(program))
    }

    #[test]
    fn new_log_has_reset_and_nmi_entry_points() {
        let log = log_with(&[0xEA]);
        assert_eq!(log.entry_points().len(), 2);
        let names: Vec<&str> = log.entry_points().values().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"reset"));
        assert!(names.contains(&"nmi"));
    }

    #[test]
    fn add_subroutine_rejects_ram() {
        let mut log = log_with(&[0xEA]);
        let err = log.add_subroutine(0x7E_0000, &[]).unwrap_err();
        assert!(matches!(err, GilgameshError::InvalidAddress(_)));
    }

    #[test]
    fn rename_subroutine_updates_all_indexes() {
        let mut log = log_with(&[0xEA]);
        log.add_subroutine(0x8000, &[]).unwrap();
        log.rename_label("sub_008000", "main", None).unwrap();
        assert!(log.subroutine_by_label("main").is_some());
        assert!(log.subroutine_by_label("sub_008000").is_none());
        assert_eq!(log.subroutine(0x8000).unwrap().label(), "main");
    }

    #[test]
    fn rename_rejects_crossing_local_boundary() {
        let mut log = log_with(&[0xEA]);
        log.add_subroutine(0x8000, &[]).unwrap();
        let err = log.rename_label("sub_008000", ".oops", None).unwrap_err();
        assert!(matches!(err, GilgameshError::InvalidLabel(_)));
    }

    #[test]
    fn rename_rejects_sub_prefix() {
        let mut log = log_with(&[0xEA]);
        log.add_subroutine(0x8000, &[]).unwrap();
        let err = log.rename_label("sub_008000", "sub_foo", None).unwrap_err();
        assert!(matches!(err, GilgameshError::InvalidLabel(_)));
    }

    #[test]
    fn rename_swap_completes_without_transient_collision() {
        let mut log = log_with(&[0xEA]);
        log.add_subroutine(0x8000, &[]).unwrap();
        log.add_subroutine(0x8010, &[]).unwrap();
        log.rename_label("sub_008000", "alpha", None).unwrap();
        log.rename_label("sub_008010", "beta", None).unwrap();

        log.rename_labels_bulk(&[
            ("alpha".to_string(), "beta".to_string(), None),
            ("beta".to_string(), "alpha".to_string(), None),
        ])
        .unwrap();

        assert_eq!(log.subroutine(0x8000).unwrap().label(), "beta");
        assert_eq!(log.subroutine(0x8010).unwrap().label(), "alpha");
    }

    #[test]
    fn assertion_marks_dirty_and_deassert_clears_it_only_when_present() {
        let mut log = log_with(&[0xEA]);
        assert!(log.is_dirty());
        log.dirty = false;
        log.assert_instruction_state_change(0x8000, StateChange::none()).unwrap();
        assert!(log.is_dirty());
    }

    #[test]
    fn reset_bumps_generation_and_invalidates_handles() {
        let mut log = log_with(&[0xEA]);
        log.add_subroutine(0x8000, &[]).unwrap();
        let handle = log.subroutine_handle(0x8000).unwrap();
        log.reset();
        assert!(matches!(log.subroutine_by_handle(handle), Err(GilgameshError::InvalidHandle)));
    }

    #[test]
    fn suggest_instruction_assertion_for_indirect_call() {
        use crate::instruction::Instruction;
        let mut log = log_with(&[0xEA]);
        log.add_subroutine(0x8000, &[]).unwrap();
        let mut instr = Instruction::decode(0x8000, State::POWER_ON, 0x8000, 0x20, 0x1234);
        instr.set_state_change_after(StateChange::unknown(UnknownReason::IndirectJump));
        log.add_instruction(0x8000, instr);
        let suggestion = log.suggest_assertion(0x8000, false);
        assert_eq!(
            suggestion,
            Some(Suggestion::Instruction {
                pc: 0x8000,
                change: StateChange::none()
            })
        );
    }
}
