use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

impl StepStatus {
    /// Status is fully determined by which timestamps are present; this is
    /// the only way a status should ever be derived for a step.
    pub fn from_timestamps(
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Self {
        match (started_at, finished_at) {
            (None, _) => Self::Pending,
            (Some(_), None) => Self::InProgress,
            (Some(_), Some(_)) => Self::Completed,
        }
    }

    pub fn display_label(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In progress",
            Self::Completed => "Completed",
        }
    }
}

/// One ordered unit of work within a production order. Owned exclusively by
/// its parent order; `process_name`/`process_description` are snapshots taken
/// from the specification at configuration time and never re-read from the
/// master process definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// 1-based sequence position within the order.
    pub process_order: u32,
    pub process_name: String,
    pub process_description: String,
    pub assigned_worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: StepStatus,
    pub observations: String,
}

impl Step {
    pub fn timestamps_consistent(&self) -> bool {
        self.status == StepStatus::from_timestamps(self.started_at, self.finished_at)
    }
}
