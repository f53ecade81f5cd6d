//! Error taxonomy for the analysis engine.

use thiserror::Error;

/// Errors returned by the public API of `gilgamesh-core`.
#[derive(Debug, Clone, Error)]
pub enum GilgameshError {
    /// The log has not been fully analyzed yet, or analysis is stale with
    /// respect to pending assertions.
    #[error("analysis is incomplete: {0}")]
    AnalysisIncomplete(String),

    /// An address fell outside the ROM's addressable range, or could not be
    /// translated to a file offset.
    #[error("invalid address: ${0:06X}")]
    InvalidAddress(usize),

    /// A label name was malformed, or referred to a namespace it cannot
    /// belong to (e.g. a local label with no enclosing subroutine).
    #[error("invalid label: {0}")]
    InvalidLabel(String),

    /// A bulk rename would merge two distinct names into one.
    #[error("rename from {from:?} to {to:?} is ambiguous: {conflict:?} already exists")]
    AmbiguousRename {
        /// The label being renamed.
        from: String,
        /// The name it was being renamed to.
        to: String,
        /// The existing label the rename collides with.
        conflict: String,
    },

    /// A disassembly-text edit could not be parsed back into tokens.
    #[error("line {line}: {message}")]
    ParserError {
        /// 1-based line number within the edited text.
        line: usize,
        /// Description of what failed to parse.
        message: String,
    },

    /// A user-supplied state, state-change, or jump-table assertion was
    /// malformed or inapplicable.
    #[error("invalid assertion: {0}")]
    InvalidAssertion(String),

    /// A handle (to a [`crate::subroutine::Subroutine`] or
    /// [`crate::instruction::Instruction`]) was used after the [`crate::log::Log`]
    /// it came from was reset or re-analyzed.
    #[error("stale handle: the log has been reset or re-analyzed since this handle was obtained")]
    InvalidHandle,

    /// Symbolic execution exceeded [`crate::log::AnalysisLimits::max_steps`].
    #[error("analysis limit exceeded after {0} steps")]
    AnalysisLimitExceeded(usize),
}
