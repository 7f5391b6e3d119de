//! Print device boundary.
//!
//! The agent talks to the local print subsystem only through
//! [`PrintDevice`]: submit a payload, query a submitted job, cancel it.
//! [`CupsDevice`] implements the trait on top of the CUPS command-line
//! tools.

pub mod cups;

use async_trait::async_trait;
use bytes::Bytes;
use printlink_core::types::{DeviceJobId, Timestamp};

pub use cups::CupsDevice;

/// Status snapshot of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceJobStatus {
    /// Raw status tokens, e.g. `"PRINTING"` or `"CANCELLED"`.
    pub status: String,
    /// When the device finished with the job; `None` while it is active.
    pub completed_time: Option<Timestamp>,
}

impl DeviceJobStatus {
    /// Status of a job the device is still working on.
    pub fn active(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            completed_time: None,
        }
    }

    /// Status of a job the device has finished with.
    pub fn completed(status: impl Into<String>, at: Timestamp) -> Self {
        Self {
            status: status.into(),
            completed_time: Some(at),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_time.is_some()
    }
}

/// Opaque print subsystem API.
#[async_trait]
pub trait PrintDevice: Send + Sync {
    /// Submit a payload for printing and return the device's job handle.
    async fn submit(&self, payload: Bytes, content_type: &str)
        -> Result<DeviceJobId, DeviceError>;

    /// Query the current status of a submitted job.
    async fn status(&self, job: DeviceJobId) -> Result<DeviceJobStatus, DeviceError>;

    /// Ask the device to cancel a submitted job.
    async fn cancel(&self, job: DeviceJobId) -> Result<(), DeviceError>;
}

/// Errors raised by a [`PrintDevice`].
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device tool could not be started or its pipes failed.
    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device tool ran but reported failure.
    #[error("{command} failed (exit {code}): {stderr}")]
    CommandFailed {
        command: &'static str,
        code: i32,
        stderr: String,
    },

    /// The device tool did not finish in time.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The device tool's output could not be interpreted.
    #[error("Unexpected device output: {0}")]
    UnexpectedOutput(String),

    /// The device has no record of the job.
    #[error("Device job {0} not found")]
    UnknownJob(DeviceJobId),
}
