//! Datastore seam between the sync core and whatever holds the rows.
//!
//! The engine only ever needs key-ordered range scans, so the trait surface
//! stays small: visit rows after a cursor up to a bound or a count, plus the
//! snapshot contract and (destination side) row/DDL writes. Adapters for real
//! database engines live behind this seam; the bundled implementations are an
//! in-memory store and its JSON-file persistence.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::schema::Database;
use crate::schema::Table;
use crate::value::{KeyTuple, Row};
use anyhow::Result;

/// Callback receiving rows in key order during a scan.
pub type RowVisitor<'a> = dyn FnMut(&Row) -> Result<()> + 'a;

/// Read side: every store an endpoint can respond from.
pub trait Datastore {
    /// The live table catalog.
    fn schema(&self) -> Result<Database>;

    /// Visit rows with key in `(after, last]` in key order. An empty `after`
    /// starts at the beginning of the table; an empty `last` runs to the end.
    fn visit_range(
        &self,
        table: &Table,
        after: &KeyTuple,
        last: &KeyTuple,
        visit: &mut RowVisitor<'_>,
    ) -> Result<()>;

    /// Visit up to `limit` rows with key greater than `after`, in key order.
    fn visit_limit(
        &self,
        table: &Table,
        after: &KeyTuple,
        limit: usize,
        visit: &mut RowVisitor<'_>,
    ) -> Result<()>;

    /// Begin a held, shareable point-in-time view and return its opaque token.
    fn export_snapshot(&mut self) -> Result<String>;

    /// Adopt a snapshot previously exported by a peer handle.
    fn import_snapshot(&mut self, token: &str) -> Result<()>;

    /// Release the hold taken by `export_snapshot`; adopted views stay valid.
    fn unhold_snapshot(&mut self) -> Result<()>;

    /// Start an independent read view (the no-snapshot-sharing path).
    fn start_read_transaction(&mut self) -> Result<()>;
}

/// Write side: what the destination endpoint additionally needs. How an
/// insert/update/delete is realized is the store's business, not the core's.
pub trait WritableDatastore: Datastore {
    fn begin_write(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    /// Insert the row, or replace the existing row with the same key tuple.
    fn replace_row(&mut self, table: &Table, row: Row) -> Result<()>;
    fn delete_row(&mut self, table: &Table, key: &KeyTuple) -> Result<()>;

    // Destructive schema actions decided by the reconciler.
    fn drop_table(&mut self, name: &str) -> Result<()>;
    fn drop_columns(&mut self, table: &str, columns: &[String]) -> Result<()>;
    fn drop_key(&mut self, table: &str, key: &str) -> Result<()>;
}
