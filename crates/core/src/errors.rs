use thiserror::Error;

/// Why a lifecycle transition was refused. `AlreadyClosed` is deliberately
/// distinct from the other variants so callers can tell a terminal record
/// apart from a claim race or an ownership failure.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("application is already closed")]
    AlreadyClosed,
    #[error("application is not pending")]
    NotPending,
    #[error("actor is not the current claimant")]
    NotClaimant,
}
