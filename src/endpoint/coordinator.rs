//! Coordination between concurrent destination workers.
//!
//! Workers share a FIFO of tables to sync, barriers for the snapshot
//! handshake, the published snapshot token, and an abort flag so the first
//! failure stops the whole run promptly instead of leaving peers blocked.

use crate::error::SyncError;
use crate::schema::Table;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{Barrier, Notify};

pub struct SyncQueue {
    pub workers: usize,
    barrier: Barrier,
    tables: Mutex<VecDeque<Table>>,
    snapshot: Mutex<Option<String>>,
    aborted: AtomicBool,
    abort_notify: Notify,
}

impl SyncQueue {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            barrier: Barrier::new(workers),
            tables: Mutex::new(VecDeque::new()),
            snapshot: Mutex::new(None),
            aborted: AtomicBool::new(false),
            abort_notify: Notify::new(),
        }
    }

    /// Rendezvous with the other workers, bailing out if anyone aborted.
    pub async fn wait_at_barrier(&self) -> Result<()> {
        self.check_aborted()?;
        tokio::select! {
            _ = self.barrier.wait() => self.check_aborted(),
            _ = self.abort_notify.notified() => Err(SyncError::Aborted.into()),
        }
    }

    /// Leader loads the full work list before releasing the barrier, so pop
    /// never needs to block.
    pub fn enqueue(&self, tables: impl IntoIterator<Item = Table>) {
        self.tables.lock().unwrap().extend(tables);
    }

    pub fn pop(&self) -> Option<Table> {
        self.tables.lock().unwrap().pop_front()
    }

    pub fn set_snapshot(&self, token: String) {
        *self.snapshot.lock().unwrap() = Some(token);
    }

    pub fn snapshot(&self) -> Option<String> {
        self.snapshot.lock().unwrap().clone()
    }

    /// Record a failure; returns true for the first caller, which is the one
    /// that should report the underlying error.
    pub fn abort(&self) -> bool {
        let first = !self.aborted.swap(true, Ordering::SeqCst);
        self.abort_notify.notify_waiters();
        first
    }

    pub fn check_aborted(&self) -> Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            Err(SyncError::Aborted.into())
        } else {
            Ok(())
        }
    }
}
