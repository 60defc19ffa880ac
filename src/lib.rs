//! # rowsync
//!
//! Minimal-transfer table synchronization: a "from" (source) endpoint and a
//! "to" (destination) endpoint exchange a compact binary protocol that
//! converges destination tables to the source without shipping either table
//! in full.
//!
//! The interesting parts:
//!
//! - **Row-range hash-diff engine** (`diff`): walks each table in primary-key
//!   order hashing windows of rows, doubling the window on agreement and
//!   halving on disagreement until single differing rows are shipped.
//! - **Schema reconciler** (`schema::reconcile`): compares the source's
//!   declared schema against the destination's live one, drops local extras,
//!   and fails with a precise one-line diagnostic on anything structural.
//! - **Command channel** (`protocol`): framed typed messages over any
//!   `AsyncRead`/`AsyncWrite` pair - stdio for remote peers, duplex pipes for
//!   in-process runs.
//! - **Endpoints** (`endpoint`): the role workers, plus snapshot sharing so
//!   several table workers see one consistent source view.
//!
//! Databases live behind the `store` traits; the bundled implementation is an
//! in-memory store with JSON-file persistence.

pub mod diff;
pub mod endpoint;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod schema;
pub mod store;
pub mod value;

pub use diff::{hash_rows, RowApplier, RowHash, RowHasher, TableResponder, WindowState};
pub use endpoint::{FromWorker, SyncQueue, SyncReport, TableStats, ToOptions, ToWorker};
pub use error::SyncError;
pub use pipeline::{sync_stores, SyncOptions};
pub use protocol::{Channel, Message, MessageCode, PROTOCOL_VERSION};
pub use schema::reconcile::{reconcile, SchemaChange, TableFilter};
pub use schema::{Column, Database, Key, Table};
pub use store::{Datastore, FileStore, MemoryStore, WritableDatastore};
pub use value::{KeyTuple, Row, Value};
