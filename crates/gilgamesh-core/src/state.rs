//! Processor status state (`M`/`X` width flags) and the [`StateChange`]s
//! subroutines are observed to cause in that state.

use std::fmt;

use bitflags::bitflags;

use crate::error::GilgameshError;

/// Bit position of the accumulator-width flag in the status byte.
pub const M_BIT: u8 = 5;
/// Bit position of the index-register-width flag in the status byte.
pub const X_BIT: u8 = 4;

bitflags! {
    /// The two `P` register bits this crate tracks, at their real bit
    /// positions (`M` = bit 5, `X` = bit 4). Every other `P` bit (N, V, D, I,
    /// Z, C, the emulation-mode B/break bit) is irrelevant to instruction
    /// decoding and is truncated away wherever a raw byte enters this type.
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
    struct StatusFlags: u8 {
        /// Accumulator width: 8-bit when set, 16-bit when clear.
        const M = 1 << M_BIT;
        /// Index register width: 8-bit when set, 16-bit when clear.
        const X = 1 << X_BIT;
    }
}

/// A snapshot of the two processor status bits the decoder cares about:
/// `m` (accumulator width) and `x` (index register width). `true` means
/// 8-bit, `false` means 16-bit, matching the real 65C816 `P` register.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct State {
    p: StatusFlags,
}

impl State {
    /// Power-on state: both accumulator and index registers 8-bit,
    /// the state the processor is in after `SEP #$30`.
    pub const POWER_ON: State = State {
        p: StatusFlags::M.union(StatusFlags::X),
    };

    /// Builds a state from a raw status byte, keeping only the `m`/`x` bits.
    #[must_use]
    pub fn from_p(p: u8) -> Self {
        Self {
            p: StatusFlags::from_bits_truncate(p),
        }
    }

    /// Builds a state from explicit `m`/`x` widths.
    #[must_use]
    pub fn from_mx(m: bool, x: bool) -> Self {
        let mut p = StatusFlags::empty();
        p.set(StatusFlags::M, m);
        p.set(StatusFlags::X, x);
        Self { p }
    }

    /// Parses the `"m=0,x=1"` / `"x=1,m=0"` textual form used by the
    /// disassembly view and by subroutine-state assertions.
    pub fn from_expr(expr: &str) -> Result<Self, GilgameshError> {
        let mut m = None;
        let mut x = None;
        for part in expr.split(',') {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| GilgameshError::InvalidAssertion(expr.to_string()))?;
            let value = match value {
                "0" => false,
                "1" => true,
                _ => return Err(GilgameshError::InvalidAssertion(expr.to_string())),
            };
            match name {
                "m" => m = Some(value),
                "x" => x = Some(value),
                _ => return Err(GilgameshError::InvalidAssertion(expr.to_string())),
            }
        }
        match (m, x) {
            (Some(m), Some(x)) => Ok(Self::from_mx(m, x)),
            _ => Err(GilgameshError::InvalidAssertion(expr.to_string())),
        }
    }

    /// Raw status byte, `m`/`x` bits only.
    #[must_use]
    pub fn p(&self) -> u8 {
        self.p.bits()
    }

    /// Accumulator width flag: `true` means 8-bit.
    #[must_use]
    pub fn m(&self) -> bool {
        self.p.contains(StatusFlags::M)
    }

    /// Index register width flag: `true` means 8-bit.
    #[must_use]
    pub fn x(&self) -> bool {
        self.p.contains(StatusFlags::X)
    }

    /// Accumulator width in bytes (1 or 2).
    #[must_use]
    pub fn a_size(&self) -> u8 {
        if self.m() {
            1
        } else {
            2
        }
    }

    /// Index register width in bytes (1 or 2).
    #[must_use]
    pub fn x_size(&self) -> u8 {
        if self.x() {
            1
        } else {
            2
        }
    }

    /// Sets `m`.
    pub fn set_m(&mut self, m: bool) {
        self.set_bit(M_BIT, m);
    }

    /// Sets `x`.
    pub fn set_x(&mut self, x: bool) {
        self.set_bit(X_BIT, x);
    }

    fn set_bit(&mut self, bit: u8, value: bool) {
        if value {
            self.p |= 1 << bit;
        } else {
            self.p &= !(1 << bit);
        }
    }

    /// Sets the bits present in `p_set` (an SEP operand).
    pub fn set(&mut self, p_set: u8) {
        self.p |= p_set & ((1 << M_BIT) | (1 << X_BIT));
    }

    /// Clears the bits present in `p_reset` (a REP operand).
    pub fn reset(&mut self, p_reset: u8) {
        self.p &= !(p_reset & ((1 << M_BIT) | (1 << X_BIT)));
    }
}

impl Default for State {
    fn default() -> Self {
        Self::POWER_ON
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={},x={}", u8::from(self.m()), u8::from(self.x()))
    }
}

/// Why a [`StateChange`] could not be determined exactly.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum UnknownReason {
    /// Not actually unknown — the change is fully known.
    Known,
    /// No information could be derived at all.
    Unknown,
    /// The subroutine is (mutually) recursive; its net effect cannot be
    /// computed without assuming a fixed point.
    Recursion,
    /// The subroutine ends in an indirect jump whose target could not be
    /// resolved.
    IndirectJump,
    /// The subroutine manipulates the stack in a way that breaks the
    /// normal call/return discipline.
    StackManipulation,
    /// The subroutine executes an instruction (e.g. `BRK`/`STP`/`COP`) that
    /// makes further static analysis of that path unreliable.
    SuspectInstruction,
    /// The subroutine returns with more than one distinct, non-unifiable
    /// state.
    MultipleReturnStates,
}

impl UnknownReason {
    /// Lowercase, space-separated rendering used in diagnostics
    /// (`"stack manipulation"`, not `"StackManipulation"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            UnknownReason::Known => "known",
            UnknownReason::Unknown => "unknown",
            UnknownReason::Recursion => "recursion",
            UnknownReason::IndirectJump => "indirect jump",
            UnknownReason::StackManipulation => "stack manipulation",
            UnknownReason::SuspectInstruction => "suspect instruction",
            UnknownReason::MultipleReturnStates => "multiple return states",
        }
    }
}

/// The net change in processor state (`m`/`x`) a subroutine is observed to
/// cause, from the point of view of its caller.
///
/// Equality and hashing are reason-driven rather than field-driven: two
/// unknown changes are equal iff their [`UnknownReason`]s match (the
/// `asserted` flag is ignored); two known changes are equal iff `m` and `x`
/// match. This is what lets a [`crate::subroutine::Subroutine`] dedup
/// `state_changes` observed across different call sites into a set.
#[derive(Debug, Clone, Copy)]
pub struct StateChange {
    /// `Some(true)`/`Some(false)` if this subroutine is known to set/clear
    /// `m`; `None` if it leaves `m` alone (or the change is unknown).
    pub m: Option<bool>,
    /// Same as `m`, for the index-register width flag.
    pub x: Option<bool>,
    unknown_reason: UnknownReason,
    /// Whether this change came from a user assertion rather than from
    /// symbolic execution.
    pub asserted: bool,
}

impl StateChange {
    /// No change: the subroutine returns with the same `m`/`x` it was
    /// entered with.
    #[must_use]
    pub fn none() -> Self {
        Self {
            m: None,
            x: None,
            unknown_reason: UnknownReason::Known,
            asserted: false,
        }
    }

    /// A known change to `m` and/or `x`.
    #[must_use]
    pub fn known(m: Option<bool>, x: Option<bool>) -> Self {
        Self {
            m,
            x,
            unknown_reason: UnknownReason::Known,
            asserted: false,
        }
    }

    /// An unknown change, tagged with why it couldn't be resolved.
    #[must_use]
    pub fn unknown(reason: UnknownReason) -> Self {
        debug_assert_ne!(reason, UnknownReason::Known);
        Self {
            m: None,
            x: None,
            unknown_reason: reason,
            asserted: false,
        }
    }

    /// A change supplied directly by a user assertion.
    #[must_use]
    pub fn asserted(m: Option<bool>, x: Option<bool>) -> Self {
        let mut change = Self::known(m, x);
        change.asserted = true;
        change
    }

    /// `true` if this change's effect could not be determined exactly.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.unknown_reason != UnknownReason::Known
    }

    /// The reason this change is unknown, if it is.
    #[must_use]
    pub fn unknown_reason(&self) -> UnknownReason {
        self.unknown_reason
    }

    /// Parses the `"none"` / `"m=0"` / `"x=1"` / `"m=0,x=1"` textual form.
    /// `"unknown"` is rejected — it cannot be asserted positively, only
    /// observed (see `spec.md` §7).
    pub fn from_expr(expr: &str) -> Result<Self, GilgameshError> {
        if expr == "none" {
            return Ok(Self::none());
        }
        if expr == "unknown" {
            return Err(GilgameshError::InvalidAssertion(expr.to_string()));
        }

        let mut m = None;
        let mut x = None;
        for part in expr.split(',') {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| GilgameshError::InvalidAssertion(expr.to_string()))?;
            let value = match value {
                "0" => false,
                "1" => true,
                _ => return Err(GilgameshError::InvalidAssertion(expr.to_string())),
            };
            match name {
                "m" => m = Some(value),
                "x" => x = Some(value),
                _ => return Err(GilgameshError::InvalidAssertion(expr.to_string())),
            }
        }
        if m.is_none() && x.is_none() {
            return Err(GilgameshError::InvalidAssertion(expr.to_string()));
        }
        Ok(Self::known(m, x))
    }

    /// Applies the bits set by an SEP-style operand: any bit present in
    /// `p_set` becomes a known "set to 1" change.
    pub fn set(&mut self, p_set: u8) {
        let change = State::from_p(p_set);
        if change.m() {
            self.m = Some(true);
        }
        if change.x() {
            self.x = Some(true);
        }
    }

    /// Applies the bits cleared by a REP-style operand.
    pub fn reset(&mut self, p_reset: u8) {
        let change = State::from_p(p_reset);
        if change.m() {
            self.m = Some(false);
        }
        if change.x() {
            self.x = Some(false);
        }
    }

    /// Folds an inferred requirement on the *entry* state into this change:
    /// if we already know this subroutine sets `m` to some value, and the
    /// inference says the caller must already have `m` at that value, then
    /// the subroutine isn't really changing `m` — it's a no-op on that bit.
    pub fn apply_inference(&mut self, inference: &StateChange) {
        if let (Some(im), Some(sm)) = (inference.m, self.m) {
            if im == sm {
                self.m = None;
            }
        }
        if let (Some(ix), Some(sx)) = (inference.x, self.x) {
            if ix == sx {
                self.x = None;
            }
        }
    }

    /// Returns a copy of this change with any bit that matches `state`
    /// elided — i.e. the smallest change that, applied to `state`, yields
    /// the same result.
    #[must_use]
    pub fn simplify(&self, state: State) -> StateChange {
        let mut change = *self;
        if let Some(m) = change.m {
            if state.m() == m {
                change.m = None;
            }
        }
        if let Some(x) = change.x {
            if state.x() == x {
                change.x = None;
            }
        }
        change
    }

    /// Applies this change to `state`, returning the resulting state.
    /// Has no effect on bits this change leaves `None`.
    #[must_use]
    pub fn apply_to(&self, mut state: State) -> State {
        if let Some(m) = self.m {
            state.set_m(m);
        }
        if let Some(x) = self.x {
            state.set_x(x);
        }
        state
    }
}

impl PartialEq for StateChange {
    fn eq(&self, other: &Self) -> bool {
        if self.is_unknown() || other.is_unknown() {
            self.unknown_reason == other.unknown_reason
        } else {
            self.m == other.m && self.x == other.x
        }
    }
}

impl Eq for StateChange {}

impl std::hash::Hash for StateChange {
    fn hash<H: std::hash::Hasher>(&self, state_hasher: &mut H) {
        if self.is_unknown() {
            (None::<bool>, None::<bool>, self.unknown_reason).hash(state_hasher);
        } else {
            (self.m, self.x, self.unknown_reason).hash(state_hasher);
        }
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return write!(f, "unknown");
        }
        let mut parts = Vec::new();
        if let Some(m) = self.m {
            parts.push(format!("m={}", u8::from(m)));
        }
        if let Some(x) = self.x {
            parts.push(format!("x={}", u8::from(x)));
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_on_is_8_bit_everything() {
        let s = State::POWER_ON;
        assert!(s.m());
        assert!(s.x());
        assert_eq!(s.a_size(), 1);
        assert_eq!(s.x_size(), 1);
    }

    #[test]
    fn state_from_expr_roundtrips() {
        let s = State::from_expr("m=0,x=1").unwrap();
        assert!(!s.m());
        assert!(s.x());
        assert_eq!(s.to_string(), "m=0,x=1");
    }

    #[test]
    fn state_from_expr_rejects_garbage() {
        assert!(State::from_expr("nonsense").is_err());
        assert!(State::from_expr("m=2,x=0").is_err());
    }

    #[test]
    fn none_change_is_a_no_op() {
        let change = StateChange::none();
        let s = State::from_mx(true, false);
        assert_eq!(change.apply_to(s), s);
        assert_eq!(change.to_string(), "none");
    }

    #[test]
    fn unknown_changes_compare_equal_by_reason_only() {
        let a = StateChange::unknown(UnknownReason::Recursion);
        let b = StateChange::unknown(UnknownReason::Recursion);
        let c = StateChange::unknown(UnknownReason::StackManipulation);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn known_changes_compare_by_mx_only() {
        let mut a = StateChange::known(Some(true), None);
        a.asserted = true;
        let b = StateChange::known(Some(true), None);
        assert_eq!(a, b);
    }

    #[test]
    fn simplify_elides_bits_already_matching_state() {
        let change = StateChange::known(Some(true), Some(false));
        let state = State::from_mx(true, true);
        let simplified = change.simplify(state);
        assert_eq!(simplified.m, None);
        assert_eq!(simplified.x, Some(false));
    }

    #[test]
    fn apply_inference_cancels_redundant_bits() {
        let mut change = StateChange::known(Some(true), Some(false));
        let inference = StateChange::known(Some(true), None);
        change.apply_inference(&inference);
        assert_eq!(change.m, None);
        assert_eq!(change.x, Some(false));
    }

    #[test]
    fn from_expr_rejects_unknown_as_assertion() {
        assert!(matches!(
            StateChange::from_expr("unknown"),
            Err(GilgameshError::InvalidAssertion(_))
        ));
    }

    #[test]
    fn display_matches_expr_grammar() {
        assert_eq!(StateChange::known(Some(false), None).to_string(), "m=0");
        assert_eq!(
            StateChange::unknown(UnknownReason::IndirectJump).to_string(),
            "unknown"
        );
    }
}
