use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A pipeline stage. Each stage is owned by one role and ends with a
/// hand-off artifact of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Spec,
    Implementation,
    Review,
    TestReport,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[
            Stage::Spec,
            Stage::Implementation,
            Stage::Review,
            Stage::TestReport,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// The following stage, or `None` after `TestReport` (the task is done).
    pub fn next(self) -> Option<Stage> {
        Stage::all().get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Spec => "spec",
            Stage::Implementation => "implementation",
            Stage::Review => "review",
            Stage::TestReport => "test_report",
        }
    }

    /// Review and test-report artifacts must verify the Spec's criteria.
    pub fn verifies_criteria(self) -> bool {
        matches!(self, Stage::Review | Stage::TestReport)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = crate::error::RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spec" => Ok(Stage::Spec),
            "implementation" => Ok(Stage::Implementation),
            "review" => Ok(Stage::Review),
            "test_report" | "test-report" => Ok(Stage::TestReport),
            _ => Err(crate::error::RelayError::InvalidStage(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Disposition
// ---------------------------------------------------------------------------

/// How the post-gate judged a recorded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Accepted,
    NeedsRevision,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Disposition::Accepted => "accepted",
            Disposition::NeedsRevision => "needs_revision",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Blocked,
    NeedsRevision,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never run again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Blocked => "blocked",
            TaskStatus::NeedsRevision => "needs_revision",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
