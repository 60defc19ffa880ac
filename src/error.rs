//! Error taxonomy for the sync core.
//!
//! Everything here is fatal: the protocol has no internal retry. Re-running
//! from OPEN against an untouched destination table is always safe, so retry
//! policy belongs to the operator, not this crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Schema reconciliation failure; the message is the full diagnostic line
    /// shown to the operator (e.g. "Missing column another_col on table footbl").
    #[error("{0}")]
    SchemaMismatch(String),

    /// The two ends could not agree on an exact protocol version.
    #[error("Protocol version mismatch: we speak {ours}, peer answered {theirs}")]
    ProtocolMismatch { ours: u32, theirs: u32 },

    /// A frame arrived with a code we don't understand.
    #[error("Unknown command {0}")]
    UnknownCommand(u8),

    /// A frame arrived that is valid in general but not at this point in the
    /// exchange (e.g. a hash command before any OPEN).
    #[error("Unexpected command {0}")]
    UnexpectedCommand(&'static str),

    /// A range request that cannot be answered without desynchronizing the
    /// cursor (zero-row hash, bound below the cursor). Indicates a peer bug,
    /// not a data problem.
    #[error("Protocol desync: {0}")]
    RangeDesync(String),

    /// Another worker failed first; this worker is shutting down.
    #[error("Sync aborted")]
    Aborted,
}
