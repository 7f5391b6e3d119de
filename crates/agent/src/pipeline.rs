//! Fetch → submit → poll driver for a single job.
//!
//! The pipeline runs as its own task and never touches the job record
//! directly: every observation is posted to the agent through a
//! [`JobReporter`], which keeps reports in the order they were made.
//!
//! Failure policy:
//! - fetch transport error: reported, not retried;
//! - fetch bad status: reported, whole fetch retried after `retry_delay`;
//! - submit failure: reported as `pending`, retried after `retry_delay`;
//! - status query failure: logged, retried after `poll_interval`.
//!
//! A stop request does not interrupt the pipeline. A download in flight
//! runs to completion and is still submitted.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use printlink_core::job_state::{matching_states, JobState};
use printlink_core::types::{DeviceJobId, JobId};
use printlink_device::PrintDevice;
use tokio::sync::mpsc;

use crate::agent::AgentEvent;
use crate::config::Timings;
use crate::fetcher::{FetchError, PayloadSource};

/// Collaborators shared by every job pipeline.
pub struct PipelineContext {
    pub source: Arc<dyn PayloadSource>,
    pub device: Arc<dyn PrintDevice>,
    pub content_type: String,
    pub timings: Timings,
}

/// Posts a pipeline's observations back to the agent.
pub struct JobReporter {
    id: JobId,
    events: mpsc::UnboundedSender<AgentEvent>,
}

impl JobReporter {
    pub fn new(id: JobId, events: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { id, events }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn state(&self, state: JobState, message: Option<String>) {
        self.send(AgentEvent::JobState {
            id: self.id.clone(),
            state,
            message,
        });
    }

    fn submitted(&self, device_job: DeviceJobId) {
        self.send(AgentEvent::JobSubmitted {
            id: self.id.clone(),
            device_job,
        });
    }

    fn completed(&self) {
        self.send(AgentEvent::JobCompleted {
            id: self.id.clone(),
        });
    }

    fn send(&self, event: AgentEvent) {
        // The agent outlives its pipelines except during shutdown.
        let _ = self.events.send(event);
    }
}

/// Run the full pipeline for one job.
pub async fn run(ctx: Arc<PipelineContext>, reporter: JobReporter) {
    let Some(payload) = fetch(&ctx, &reporter).await else {
        return;
    };

    let device_job = submit(&ctx, &reporter, payload).await;
    reporter.submitted(device_job);

    poll(&ctx, &reporter, device_job).await;
    reporter.completed();
}

/// Fetch the payload, retrying on bad status. Returns `None` after a
/// transport error.
async fn fetch(ctx: &PipelineContext, reporter: &JobReporter) -> Option<Bytes> {
    loop {
        reporter.state(JobState::Downloading, None);

        match download(ctx, reporter).await {
            Ok(payload) => return Some(payload),
            Err(FetchError::BadStatus(code)) => {
                reporter.state(JobState::Downloading, Some(format!("Bad status: {code}")));
                tokio::time::sleep(ctx.timings.retry_delay).await;
            }
            Err(e @ FetchError::Transport(_)) => {
                tracing::warn!(job_id = %reporter.id(), error = %e, "Payload fetch failed");
                reporter.state(JobState::Downloading, Some(format!("Error: {e}")));
                return None;
            }
        }
    }
}

/// One download attempt: open the stream, accumulate chunks, concatenate.
async fn download(ctx: &PipelineContext, reporter: &JobReporter) -> Result<Bytes, FetchError> {
    let mut body = ctx.source.open(reporter.id()).await?;
    reporter.state(
        JobState::Downloading,
        Some("Received response headers".to_string()),
    );

    let mut chunks: Vec<Bytes> = Vec::new();
    let mut received = 0usize;
    while let Some(chunk) = body.next_chunk().await? {
        received += chunk.len();
        chunks.push(chunk);
        reporter.state(JobState::Downloading, Some(format!("Downloaded {received} bytes")));
    }

    let mut payload = BytesMut::with_capacity(received);
    for chunk in chunks.drain(..) {
        payload.extend_from_slice(&chunk);
    }
    reporter.state(JobState::Downloading, Some("Completed".to_string()));
    Ok(payload.freeze())
}

/// Submit the payload until the device accepts it.
async fn submit(ctx: &PipelineContext, reporter: &JobReporter, payload: Bytes) -> DeviceJobId {
    loop {
        match ctx.device.submit(payload.clone(), &ctx.content_type).await {
            Ok(device_job) => {
                tracing::info!(job_id = %reporter.id(), device_job, "Payload submitted");
                return device_job;
            }
            Err(e) => {
                reporter.state(JobState::Pending, Some(format!("Error: {e}")));
                tokio::time::sleep(ctx.timings.retry_delay).await;
            }
        }
    }
}

/// Poll the device until it reports a completion time.
async fn poll(ctx: &PipelineContext, reporter: &JobReporter, device_job: DeviceJobId) {
    loop {
        match ctx.device.status(device_job).await {
            Ok(status) => {
                for state in matching_states(&status.status) {
                    reporter.state(state, Some(format!("Job #{device_job}")));
                }
                if status.is_complete() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %reporter.id(),
                    device_job,
                    error = %e,
                    "Device status query failed",
                );
            }
        }
        tokio::time::sleep(ctx.timings.poll_interval).await;
    }
}
