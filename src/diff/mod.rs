//! Row-range hash-diff engine.
//!
//! Locates the rows that differ between two copies of a table without
//! transferring either copy: a cursor walks the table in primary-key order
//! while a window of rows is hashed on both ends, doubling on agreement and
//! halving on disagreement until single differing rows are shipped directly.

pub mod applier;
pub mod hasher;
pub mod range;
pub mod responder;
pub mod window;

pub use applier::RowApplier;
pub use hasher::{hash_rows, RowHash, RowHasher, RowHasherAndLastKey};
pub use range::{check_hash, propose_next, HashOutcome, Proposal, TableSession};
pub use responder::TableResponder;
pub use window::WindowState;
