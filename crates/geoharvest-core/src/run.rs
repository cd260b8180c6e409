//! Run status for harvest executions.
//!
//! Runs flow through these states:
//! ```text
//! pending → running → completed
//!    │         ├────→ failed
//!    │         └────→ cancelled
//!    └──────────────→ cancelled   (cancelled before dispatch)
//! ```
//! Terminal states never change again.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Status of a harvest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Harvesting.
    Running,
    /// All configured searches were exhausted.
    Completed,
    /// Ended by a configuration or pre-progress protocol failure.
    Failed,
    /// Ended by an external cancellation request.
    Cancelled,
}

impl RunStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Cancelled)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }

    /// Moves to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), AppError> {
        if !self.can_transition_to(next) {
            return Err(AppError::Generic(format!(
                "invalid run transition: {} -> {}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

/// Error type for parsing RunStatus from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRunStatusError(String);

impl std::fmt::Display for ParseRunStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid run status: {}", self.0)
    }
}

impl std::error::Error for ParseRunStatusError {}

impl std::str::FromStr for RunStatus {
    type Err = ParseRunStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(ParseRunStatusError(s.to_string())),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
