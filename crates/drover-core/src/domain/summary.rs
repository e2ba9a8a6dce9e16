//! Task summary: counts by status for one task set.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::TaskStatus;

/// Counts by status plus the completion percentage.
///
/// `completed + failed + pending + processing == total` always holds.
/// `percent` is `completed / total * 100` with two decimals and a `%` suffix
/// (`"0.00%"` for an empty task set).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    pub processing: u64,
    pub percent: String,
}

impl TaskSummary {
    /// Build from per-status counts; `total` is derived from them.
    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (TaskStatus, u64)>,
    {
        let mut summary = TaskSummary::default();
        for (status, n) in counts {
            match status {
                TaskStatus::Pending => summary.pending += n,
                TaskStatus::Processing => summary.processing += n,
                TaskStatus::Completed => summary.completed += n,
                TaskStatus::Failed => summary.failed += n,
            }
        }
        summary.total = summary.pending + summary.processing + summary.completed + summary.failed;
        summary.percent = format_percent(summary.completed, summary.total);
        summary
    }

    /// No task is waiting for dispatch.
    pub fn is_drained(&self) -> bool {
        self.pending == 0
    }
}

fn format_percent(completed: u64, total: u64) -> String {
    let percent = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    };
    format!("{percent:.2}%")
}

/// Progress line: `completed 9/10, failed 1`.
impl fmt::Display for TaskSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completed {}/{}, failed {}",
            self.completed, self.total, self.failed
        )
    }
}
