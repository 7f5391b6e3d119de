//! Reported job states and the device status table.
//!
//! A job's reported state is what the control plane sees. Device-driven
//! states are derived from the raw status string returned by the print
//! subsystem through [`DEVICE_STATUS_TABLE`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// State reported to the control plane for a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Payload is being fetched (also carries fetch errors).
    Downloading,
    /// Waiting on the device, or a retryable local error awaiting retry.
    Pending,
    Aborted,
    Cancelled,
    /// The device paused the job.
    Stopped,
    Processing,
    Completed,
}

impl JobState {
    /// Wire name of the state, e.g. `"downloading"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Pending => "pending",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
            Self::Stopped => "stopped",
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Device status mapping
// ---------------------------------------------------------------------------

/// Ordered `(token, state)` pairs used to interpret device status strings.
///
/// Matching is by substring and every entry is evaluated in order, so when a
/// status contains several tokens the last matching entry decides the final
/// state of a poll tick. Switching to first-match or exact-match changes
/// observable behaviour.
pub const DEVICE_STATUS_TABLE: &[(&str, JobState)] = &[
    ("ABORTED", JobState::Aborted),
    ("CANCELLED", JobState::Cancelled),
    ("PAUSED", JobState::Stopped),
    ("PENDING", JobState::Pending),
    ("PRINTED", JobState::Completed),
    ("PRINTING", JobState::Processing),
];

/// States matched by a device status string, in table order.
pub fn matching_states(status: &str) -> impl Iterator<Item = JobState> + '_ {
    DEVICE_STATUS_TABLE
        .iter()
        .filter(move |(token, _)| status.contains(token))
        .map(|(_, state)| *state)
}
