//! Destination ("to") endpoint: drives the exchange.
//!
//! Negotiates the protocol and snapshot mode, reconciles schema (leader
//! only), then works through the table queue. For each table it runs the same
//! hash-diff logic as the source against its own store, requesting row data
//! where hashing bottoms out and applying each received range only after its
//! terminator.

use crate::diff::range::{check_hash, HashOutcome, Proposal, TableSession};
use crate::diff::{RowApplier, RowHash};
use crate::error::SyncError;
use crate::value::KeyTuple;
use crate::protocol::{Channel, Message, PROTOCOL_VERSION};
use crate::schema::reconcile::{reconcile, SchemaChange, TableFilter};
use crate::schema::{Database, Table};
use crate::store::WritableDatastore;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use super::coordinator::SyncQueue;

#[derive(Debug, Clone)]
pub struct ToOptions {
    pub filter: TableFilter,
    /// Share one held snapshot across workers (only meaningful with >1).
    pub snapshot: bool,
    /// Roll the write transaction back instead of committing (verification runs).
    pub rollback_after: bool,
    /// On failure, commit whatever was applied instead of losing it.
    pub partial: bool,
}

impl Default for ToOptions {
    fn default() -> Self {
        Self {
            filter: TableFilter::default(),
            snapshot: true,
            rollback_after: false,
            partial: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub table: String,
    pub hash_commands: usize,
    pub rows_commands: usize,
    pub rows_changed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub tables: Vec<TableStats>,
}

impl SyncReport {
    pub fn rows_changed(&self) -> usize {
        self.tables.iter().map(|t| t.rows_changed).sum()
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.tables.extend(other.tables);
    }
}

pub struct ToWorker<S, R, W> {
    store: S,
    channel: Channel<R, W>,
    queue: Arc<SyncQueue>,
    leader: bool,
    opts: Arc<ToOptions>,
    report: SyncReport,
}

impl<S, R, W> ToWorker<S, R, W>
where
    S: WritableDatastore,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        store: S,
        reader: R,
        writer: W,
        queue: Arc<SyncQueue>,
        leader: bool,
        opts: Arc<ToOptions>,
    ) -> Self {
        Self {
            store,
            channel: Channel::new(reader, writer),
            queue,
            leader,
            opts,
            report: SyncReport::default(),
        }
    }

    pub async fn run(mut self) -> Result<SyncReport> {
        match self.run_inner().await {
            Ok(()) => Ok(self.report),
            Err(e) => {
                // Make sure the other workers stop promptly; only the first
                // failure carries the interesting error.
                if self.queue.abort() {
                    tracing::error!("{e:#}");
                }
                // Settle the write transaction so the destination stays
                // resumable: keep what we applied only if asked to.
                if self.opts.partial {
                    let _ = self.store.commit();
                } else {
                    let _ = self.store.rollback();
                }
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<()> {
        self.negotiate_protocol().await?;
        self.share_snapshot().await?;

        self.store.begin_write()?;

        self.compare_schema().await?;
        self.queue.wait_at_barrier().await?;

        self.sync_tables().await?;

        if self.opts.rollback_after {
            self.store.rollback()?;
        } else {
            self.store.commit()?;
        }

        self.send_quit().await;
        Ok(())
    }

    async fn negotiate_protocol(&mut self) -> Result<()> {
        let reply = self.channel.request(&Message::Protocol(PROTOCOL_VERSION)).await?;
        let Message::Protocol(theirs) = reply else {
            return Err(SyncError::UnexpectedCommand("expected a protocol reply").into());
        };
        if theirs != PROTOCOL_VERSION {
            return Err(SyncError::ProtocolMismatch {
                ours: PROTOCOL_VERSION,
                theirs,
            }
            .into());
        }
        Ok(())
    }

    /// With several workers and snapshots enabled, the leader exports one held
    /// snapshot and every follower adopts it, bracketed by barriers so the
    /// hold lasts no longer than it must. Otherwise each connection reads
    /// independently.
    async fn share_snapshot(&mut self) -> Result<()> {
        if self.queue.workers > 1 && self.opts.snapshot {
            self.queue.wait_at_barrier().await?;

            if self.leader {
                let reply = self.channel.request(&Message::ExportSnapshot).await?;
                let Message::Token(token) = reply else {
                    return Err(SyncError::UnexpectedCommand("expected a snapshot token").into());
                };
                debug!(%token, "snapshot exported");
                self.queue.set_snapshot(token);
            }
            self.queue.wait_at_barrier().await?;

            if !self.leader {
                let token = self
                    .queue
                    .snapshot()
                    .context("leader did not publish a snapshot token")?;
                self.expect_ack(&Message::ImportSnapshot(token)).await?;
            }
            self.queue.wait_at_barrier().await?;

            if self.leader {
                self.expect_ack(&Message::UnholdSnapshot).await?;
            }
        } else {
            self.expect_ack(&Message::WithoutSnapshot).await?;
        }
        Ok(())
    }

    async fn expect_ack(&mut self, msg: &Message) -> Result<()> {
        let reply = self.channel.request(msg).await?;
        if reply != Message::Ack {
            return Err(SyncError::UnexpectedCommand("expected an ack").into());
        }
        Ok(())
    }

    /// Leader fetches the source's declared tables, reconciles them against
    /// our live schema, applies the resulting drops, and loads the queue in
    /// the declared (authoritative) order.
    async fn compare_schema(&mut self) -> Result<()> {
        if !self.leader {
            return Ok(());
        }

        let reply = self.channel.request(&Message::SchemaRequest).await?;
        let Message::SchemaReply(declared) = reply else {
            return Err(SyncError::UnexpectedCommand("expected a schema reply").into());
        };

        let live = self.store.schema()?;
        let changes = reconcile(&declared, &live, &self.opts.filter)?;
        self.apply_schema_changes(changes)?;

        self.enqueue_tables(&declared);
        Ok(())
    }

    fn apply_schema_changes(&mut self, changes: Vec<SchemaChange>) -> Result<()> {
        for change in changes {
            info!(?change, "applying schema change");
            match change {
                SchemaChange::DropTable { table } => self.store.drop_table(&table)?,
                SchemaChange::DropColumns { table, columns } => {
                    self.store.drop_columns(&table, &columns)?
                }
                SchemaChange::DropKey { table, key } => self.store.drop_key(&table, &key)?,
            }
        }
        Ok(())
    }

    fn enqueue_tables(&self, declared: &Database) {
        self.queue.enqueue(
            declared
                .tables
                .iter()
                .filter(|t| !self.opts.filter.skips(&t.name))
                .cloned(),
        );
    }

    async fn sync_tables(&mut self) -> Result<()> {
        while let Some(table) = self.queue.pop() {
            self.sync_table(table).await?;
        }
        self.queue.wait_at_barrier().await?;
        Ok(())
    }

    async fn sync_table(&mut self, table: Table) -> Result<()> {
        let started = Instant::now();
        let name = table.name.clone();
        info!(table = %name, "starting");

        let mut session = TableSession::open(table);
        let mut applier = RowApplier::new();
        let mut hash_commands = 0usize;
        let mut rows_commands = 0usize;

        self.channel.send_all(&[Message::Open(name.clone())]).await?;

        loop {
            self.queue.check_aborted()?;

            let msg = self.channel.recv().await?;
            match msg {
                // The source is sending (ROWS_CURR) or announcing (terminal
                // ROWS_NEXT) row data for a range; apply it in full.
                Message::RowsNext(last_key) => {
                    session.advance();
                    session.last_key = last_key;
                    rows_commands += 1;
                    self.apply_rows(&mut session, &mut applier).await?;
                    if session.last_key.is_empty() {
                        break;
                    }
                }
                Message::RowsCurr(last_key) => {
                    session.last_key = last_key;
                    rows_commands += 1;
                    self.apply_rows(&mut session, &mut applier).await?;
                    if session.last_key.is_empty() {
                        break;
                    }
                }

                // The source proposed a hash; run the same comparison on our
                // rows and answer with the next step.
                Message::HashNext(last_key, hash) => {
                    session.advance();
                    session.last_key = last_key;
                    hash_commands += 1;
                    self.answer_hash(&mut session, &hash).await?;
                }
                Message::HashCurr(last_key, hash) => {
                    session.last_key = last_key;
                    hash_commands += 1;
                    self.answer_hash(&mut session, &hash).await?;
                }

                _ => {
                    return Err(
                        SyncError::UnexpectedCommand("unexpected frame during table sync").into(),
                    )
                }
            }
        }

        info!(
            table = %name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            hash_commands,
            rows_commands,
            rows_changed = applier.rows_changed,
            "finished"
        );
        self.report.tables.push(TableStats {
            table: name,
            hash_commands,
            rows_commands,
            rows_changed: applier.rows_changed,
        });
        Ok(())
    }

    /// Read row frames up to the terminator, then converge the range. Nothing
    /// touches the store until the terminator has arrived, so a dropped
    /// connection leaves the range untouched and the table resumable.
    async fn apply_rows(
        &mut self,
        session: &mut TableSession,
        applier: &mut RowApplier,
    ) -> Result<()> {
        let mut rows = Vec::new();
        loop {
            match self.channel.recv().await? {
                Message::Row(row) if row.is_empty() => break,
                Message::Row(row) => rows.push(row),
                _ => {
                    return Err(
                        SyncError::UnexpectedCommand("expected row data or terminator").into(),
                    )
                }
            }
        }
        debug!(table = %session.table.name, range_end = %session.last_key, rows = rows.len(), "applying range");
        applier.apply_range(
            &mut self.store,
            &session.table,
            &session.prev_key,
            &session.last_key,
            rows,
        )
    }

    async fn answer_hash(&mut self, session: &mut TableSession, hash: &RowHash) -> Result<()> {
        let next = match check_hash(&self.store, session, hash)? {
            HashOutcome::Match(Proposal::Hash { last_key, hash }) => Message::HashNext(last_key, hash),
            HashOutcome::Match(Proposal::EndOfTable) => Message::RowsNext(KeyTuple::empty()),
            HashOutcome::Narrowed { last_key, hash } => Message::HashCurr(last_key, hash),
            HashOutcome::ShipRows { last_key } => Message::RowsCurr(last_key),
        };
        self.channel.send_all(&[next]).await
    }

    async fn send_quit(&mut self) {
        // Failure to deliver the quit doesn't matter; we're past the point
        // where it could change anything.
        let _ = self.channel.send_all(&[Message::Quit]).await;
    }
}
