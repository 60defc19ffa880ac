//! The check-hash / propose-next-range engine shared by both roles.
//!
//! The destination proposes range hashes and the source answers, but both
//! sides run the identical comparison against their own store: hash the rows
//! in `(prev_key, last_key]`, advance and double on a match, narrow on a
//! mismatch, fall back to row data at a single row. Keeping one implementation
//! here is what guarantees the two ends converge instead of talking past each
//! other. Hashes are always computed against the live store at call time -
//! never cached - so in-flight writes on the source (unique values migrating
//! between rows) resolve themselves on the next exchange.

use crate::diff::hasher::{RowHash, RowHasher, RowHasherAndLastKey};
use crate::diff::window::WindowState;
use crate::error::SyncError;
use crate::schema::Table;
use crate::store::Datastore;
use crate::value::KeyTuple;
use anyhow::Result;

/// Mutable per-table traversal state. Owned by exactly one worker's session;
/// `prev_key` is the cursor below which both ends agree.
#[derive(Debug, Clone)]
pub struct TableSession {
    pub table: Table,
    pub prev_key: KeyTuple,
    pub last_key: KeyTuple,
    pub state: WindowState,
}

impl TableSession {
    pub fn open(table: Table) -> Self {
        Self {
            table,
            prev_key: KeyTuple::empty(),
            last_key: KeyTuple::empty(),
            state: WindowState::AwaitingFirstHash,
        }
    }

    /// NEXT-verb commands confirm the previous bound before naming a new one.
    pub fn advance(&mut self) {
        self.prev_key = self.last_key.clone();
    }

    /// A bound below the cursor can only mean the peers have desynchronized.
    fn check_bounds(&self) -> Result<()> {
        if !self.last_key.is_empty() && !self.prev_key.is_empty() && self.last_key < self.prev_key {
            return Err(SyncError::RangeDesync(format!(
                "range end {} is below cursor {} on table {}",
                self.last_key, self.prev_key, self.table.name
            ))
            .into());
        }
        Ok(())
    }
}

/// What should happen next for this table, decided from a hash comparison.
#[derive(Debug)]
pub enum HashOutcome {
    /// Hashes matched; the cursor advanced and this is the follow-up proposal.
    Match(Proposal),
    /// Hashes differed over several rows; re-propose the lower half from the
    /// same cursor.
    Narrowed { last_key: KeyTuple, hash: RowHash },
    /// Hashes differed over at most one row; row data must flow for
    /// `(prev_key, last_key]`.
    ShipRows { last_key: KeyTuple },
}

/// A forward range proposal.
#[derive(Debug)]
pub enum Proposal {
    /// Hash of the next `window` rows, ending at `last_key`.
    Hash { last_key: KeyTuple, hash: RowHash },
    /// No rows remain past the cursor; time for the terminal response.
    EndOfTable,
}

/// Compare the peer's hash for `(prev_key, last_key]` against local rows and
/// decide the next step, updating the session's cursor, bound, and window.
pub fn check_hash<S: Datastore + ?Sized>(
    store: &S,
    session: &mut TableSession,
    their_hash: &RowHash,
) -> Result<HashOutcome> {
    if their_hash.0.is_empty() {
        return Err(SyncError::RangeDesync("no hash to check given".into()).into());
    }
    if session.last_key.is_empty() {
        return Err(SyncError::RangeDesync("no range end given".into()).into());
    }
    session.check_bounds()?;

    let mut hasher = RowHasher::new();
    store.visit_range(
        &session.table,
        &session.prev_key,
        &session.last_key,
        &mut |row| {
            hasher.update(row);
            Ok(())
        },
    )?;
    let observed = hasher.row_count;

    if hasher.finish() == *their_hash {
        // Match: move on to the next run of rows, optimistically doubled.
        session.advance();
        session.state = WindowState::after_match(observed);
        return Ok(HashOutcome::Match(propose_next(store, session)?));
    }

    if let Some(state) = WindowState::after_mismatch(observed) {
        // Try again from the same cursor over the lower half.
        session.state = state;
        let mut hasher = RowHasherAndLastKey::new(&session.table);
        store.visit_limit(
            &session.table,
            &session.prev_key,
            session.state.window(),
            &mut |row| {
                hasher.update(row);
                Ok(())
            },
        )?;
        let (hash, _, last_key) = hasher.finish();
        session.last_key = last_key.clone();
        return Ok(HashOutcome::Narrowed { last_key, hash });
    }

    // One or zero local rows disagree: trade data, not hashes. If our side has
    // no rows in the range at all, widen the bound to the next local row so a
    // deleted run on this end clears in one exchange instead of key by key.
    if observed == 0 && !session.last_key.is_empty() {
        session.last_key = extend_last_key(store, &session.table, &session.last_key)?;
    }
    Ok(HashOutcome::ShipRows {
        last_key: session.last_key.clone(),
    })
}

/// Hash the next `session.state.window()` rows after the cursor and produce
/// the forward proposal, updating `last_key` to the proposed bound.
pub fn propose_next<S: Datastore + ?Sized>(
    store: &S,
    session: &mut TableSession,
) -> Result<Proposal> {
    let window = session.state.window();
    if window == 0 {
        return Err(SyncError::RangeDesync("can't hash 0 rows".into()).into());
    }

    let mut hasher = RowHasherAndLastKey::new(&session.table);
    store.visit_limit(&session.table, &session.prev_key, window, &mut |row| {
        hasher.update(row);
        Ok(())
    })?;

    if hasher.row_count() == 0 {
        session.last_key = KeyTuple::empty();
        session.state = WindowState::Done;
        return Ok(Proposal::EndOfTable);
    }

    let (hash, _, last_key) = hasher.finish();
    session.last_key = last_key.clone();
    Ok(Proposal::Hash { last_key, hash })
}

/// The key of the first row after `last_key`, or the empty tuple if the table
/// ends there.
pub fn extend_last_key<S: Datastore + ?Sized>(
    store: &S,
    table: &Table,
    last_key: &KeyTuple,
) -> Result<KeyTuple> {
    let mut next = KeyTuple::empty();
    store.visit_limit(table, last_key, 1, &mut |row| {
        next = table.key_of(row);
        Ok(())
    })?;
    Ok(next)
}
