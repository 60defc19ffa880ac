//! In-process sync runner.
//!
//! Wires N source workers to N destination workers over duplex pipes and runs
//! them to completion - the same code paths a networked deployment uses, just
//! with both ends in one process. Worker 0 leads: it reconciles schema, loads
//! the table queue, and drives the snapshot handshake.

use crate::endpoint::{FromWorker, SyncQueue, SyncReport, ToOptions, ToWorker};
use crate::error::SyncError;
use crate::schema::reconcile::TableFilter;
use crate::store::{Datastore, WritableDatastore};
use anyhow::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub filter: TableFilter,
    pub no_snapshot: bool,
    pub rollback_after: bool,
    pub partial: bool,
}

/// Run a full sync between paired store handles; `from.len()` is the worker
/// count and must match `to.len()`. Returns the merged per-table report.
pub async fn sync_stores<SF, ST>(
    from: Vec<SF>,
    to: Vec<ST>,
    opts: SyncOptions,
) -> Result<SyncReport>
where
    SF: Datastore + Send + 'static,
    ST: WritableDatastore + Send + 'static,
{
    anyhow::ensure!(!from.is_empty(), "at least one worker is required");
    anyhow::ensure!(
        from.len() == to.len(),
        "source and destination worker counts must match"
    );

    let workers = from.len();
    let queue = Arc::new(SyncQueue::new(workers));
    let to_opts = Arc::new(ToOptions {
        filter: opts.filter,
        snapshot: !opts.no_snapshot,
        rollback_after: opts.rollback_after,
        partial: opts.partial,
    });

    let mut from_handles = Vec::with_capacity(workers);
    let mut to_handles = Vec::with_capacity(workers);

    for (i, (from_store, to_store)) in from.into_iter().zip(to).enumerate() {
        let (from_end, to_end) = tokio::io::duplex(256 * 1024);

        let (fr, fw) = tokio::io::split(from_end);
        from_handles.push(tokio::spawn(FromWorker::new(from_store, fr, fw).run()));

        let (tr, tw) = tokio::io::split(to_end);
        let worker = ToWorker::new(
            to_store,
            tr,
            tw,
            Arc::clone(&queue),
            i == 0,
            Arc::clone(&to_opts),
        );
        to_handles.push(tokio::spawn(worker.run()));
    }

    let mut report = SyncReport::default();
    let mut first_error: Option<anyhow::Error> = None;
    let mut aborted_error: Option<anyhow::Error> = None;

    for handle in to_handles {
        match handle.await? {
            Ok(worker_report) => report.merge(worker_report),
            Err(e) => {
                // Workers that merely noticed the abort are noise next to the
                // one that actually failed.
                if e.downcast_ref::<SyncError>()
                    .map(|s| matches!(s, SyncError::Aborted))
                    .unwrap_or(false)
                {
                    aborted_error.get_or_insert(e);
                } else if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    let mut from_error: Option<anyhow::Error> = None;
    for handle in from_handles {
        if let Err(e) = handle.await? {
            from_error.get_or_insert(e);
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    if let Some(e) = aborted_error {
        return Err(e);
    }
    if let Some(e) = from_error {
        return Err(e);
    }
    Ok(report)
}
