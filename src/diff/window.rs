//! Window-size state machine for the hash-diff engine.
//!
//! The window is the number of rows the next proposed range should cover. It
//! doubles after a confirmed match, halves (rounding down, floor of one) after
//! a mismatch, and collapses to shipping literal rows once a single-row range
//! still disagrees. Transitions are pure functions of the observed row count,
//! so the whole machine is testable without a store.

/// Per-table diff progress, as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Table just opened (or a row range just landed); the next proposal
    /// covers exactly one row to establish a baseline.
    AwaitingFirstHash,
    /// The last comparison matched; growing.
    Advancing { window: usize },
    /// The last comparison mismatched; shrinking toward the difference.
    Narrowing { window: usize },
    /// Terminal response sent or received; nothing left to propose.
    Done,
}

impl WindowState {
    /// Rows the next proposed range should cover. Zero only when done.
    pub fn window(&self) -> usize {
        match self {
            WindowState::AwaitingFirstHash => 1,
            WindowState::Advancing { window } | WindowState::Narrowing { window } => *window,
            WindowState::Done => 0,
        }
    }

    /// A hash over `observed` rows matched: advance with a doubled window.
    pub fn after_match(observed: usize) -> Self {
        WindowState::Advancing {
            window: observed.saturating_mul(2),
        }
    }

    /// A hash over `observed` rows mismatched. More than one row: narrow to
    /// the lower half. One or zero: no further bisection helps, ship rows.
    pub fn after_mismatch(observed: usize) -> Option<Self> {
        if observed > 1 {
            Some(WindowState::Narrowing {
                window: observed / 2,
            })
        } else {
            None
        }
    }

    /// A row range was delivered; restart from a one-row baseline, or finish
    /// if the range ran to the end of the table.
    pub fn after_rows(end_of_table: bool) -> Self {
        if end_of_table {
            WindowState::Done
        } else {
            WindowState::AwaitingFirstHash
        }
    }
}
