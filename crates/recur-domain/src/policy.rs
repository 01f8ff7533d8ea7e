//! Policies governing how a rule's checkpoint moves after a materialization pass.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Decides which due date a rule's checkpoint advances to after a pass.
pub enum CheckpointPolicy {
    /// Attempt every due date and checkpoint the latest one attempted, even when
    /// that insertion failed. Failed dates are not retried.
    #[default]
    LatestAttempted,
    /// Stop the rule's pass at the first failed insertion and checkpoint the last
    /// successful due date, so the failed date and everything after it is retried
    /// on the next run.
    StopAtFirstFailure,
}

impl CheckpointPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointPolicy::LatestAttempted => "latest_attempted",
            CheckpointPolicy::StopAtFirstFailure => "stop_at_first_failure",
        }
    }
}

impl fmt::Display for CheckpointPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
