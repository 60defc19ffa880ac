//! Source-side per-table session: answers the destination's commands.
//!
//! Holds the cursor for one open table and turns each incoming command into
//! the full response sequence - possibly several frames, since a rows
//! response is the echoed range, the row data, the terminator, and the next
//! proposal in one burst.

use crate::diff::range::{check_hash, propose_next, HashOutcome, Proposal, TableSession};
use crate::diff::hasher::RowHash;
use crate::diff::window::WindowState;
use crate::error::SyncError;
use crate::protocol::Message;
use crate::store::Datastore;
use crate::value::KeyTuple;
use anyhow::Result;

pub struct TableResponder {
    session: TableSession,
}

impl TableResponder {
    /// Open a table: reset the cursor and propose a hash of exactly the first
    /// row (or the terminal response if the table is empty).
    pub fn open<S: Datastore + ?Sized>(
        store: &S,
        table: crate::schema::Table,
    ) -> Result<(Self, Vec<Message>)> {
        let mut responder = Self {
            session: TableSession::open(table),
        };
        let mut out = Vec::new();
        let proposal = propose_next(store, &mut responder.session)?;
        Self::emit_proposal(proposal, &mut out);
        Ok((responder, out))
    }

    pub fn table_name(&self) -> &str {
        &self.session.table.name
    }

    /// Handle one of the four range commands for this table.
    pub fn handle<S: Datastore + ?Sized>(
        &mut self,
        store: &S,
        msg: &Message,
    ) -> Result<Vec<Message>> {
        match msg {
            Message::HashNext(last_key, hash) => {
                self.session.advance();
                self.session.last_key = last_key.clone();
                self.check(store, hash)
            }
            Message::HashCurr(last_key, hash) => {
                self.session.last_key = last_key.clone();
                self.check(store, hash)
            }
            Message::RowsNext(last_key) => {
                self.session.advance();
                self.session.last_key = last_key.clone();
                self.requested_rows(store)
            }
            Message::RowsCurr(last_key) => {
                self.session.last_key = last_key.clone();
                self.requested_rows(store)
            }
            _ => Err(SyncError::UnexpectedCommand("non-range command for open table").into()),
        }
    }

    fn check<S: Datastore + ?Sized>(&mut self, store: &S, hash: &RowHash) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        match check_hash(store, &mut self.session, hash)? {
            HashOutcome::Match(proposal) => Self::emit_proposal(proposal, &mut out),
            HashOutcome::Narrowed { last_key, hash } => {
                out.push(Message::HashCurr(last_key, hash));
            }
            HashOutcome::ShipRows { last_key } => {
                self.rows_response(store, last_key, &mut out)?;
            }
        }
        Ok(out)
    }

    /// Answer a direct rows request, clamping a bound that overshoots the
    /// table to the last key actually available.
    fn requested_rows<S: Datastore + ?Sized>(&mut self, store: &S) -> Result<Vec<Message>> {
        let requested = self.session.last_key.clone();
        let effective = if requested.is_empty() {
            requested
        } else {
            // Within the table if any row lies beyond the requested bound;
            // otherwise the range's own last row (or the open end) is all we
            // can offer.
            let mut beyond = false;
            store.visit_limit(&self.session.table, &requested, 1, &mut |_| {
                beyond = true;
                Ok(())
            })?;
            if beyond {
                requested
            } else {
                let mut last_present = KeyTuple::empty();
                store.visit_range(
                    &self.session.table,
                    &self.session.prev_key,
                    &requested,
                    &mut |row| {
                        last_present = self.session.table.key_of(row);
                        Ok(())
                    },
                )?;
                last_present
            }
        };
        self.session.last_key = effective.clone();

        let mut out = Vec::new();
        self.rows_response(store, effective, &mut out)?;
        Ok(out)
    }

    /// Echo the range, stream its rows, terminate, and follow up with the
    /// next one-row proposal (or the terminal) unless the range ran open.
    fn rows_response<S: Datastore + ?Sized>(
        &mut self,
        store: &S,
        last_key: KeyTuple,
        out: &mut Vec<Message>,
    ) -> Result<()> {
        out.push(Message::RowsCurr(last_key.clone()));
        store.visit_range(
            &self.session.table,
            &self.session.prev_key,
            &last_key,
            &mut |row| {
                out.push(Message::Row(row.clone()));
                Ok(())
            },
        )?;
        out.push(Message::Row(vec![]));

        if last_key.is_empty() {
            // The range extended to the end of the table; nothing follows.
            self.session.state = WindowState::Done;
            return Ok(());
        }

        self.session.prev_key = last_key;
        self.session.state = WindowState::after_rows(false);
        let proposal = propose_next(store, &mut self.session)?;
        Self::emit_proposal(proposal, out);
        Ok(())
    }

    fn emit_proposal(proposal: Proposal, out: &mut Vec<Message>) {
        match proposal {
            Proposal::Hash { last_key, hash } => out.push(Message::HashNext(last_key, hash)),
            Proposal::EndOfTable => {
                out.push(Message::RowsNext(KeyTuple::empty()));
                out.push(Message::Row(vec![]));
            }
        }
    }
}
