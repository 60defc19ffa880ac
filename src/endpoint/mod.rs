//! Endpoint workers for the two roles and their shared coordination.
//!
//! The same wire protocol runs in both directions: the destination initiates
//! every command, the source answers, and both sides evaluate ranges with the
//! engine in `crate::diff`.

pub mod coordinator;
pub mod from;
pub mod to;

pub use coordinator::SyncQueue;
pub use from::FromWorker;
pub use to::{SyncReport, TableStats, ToOptions, ToWorker};
