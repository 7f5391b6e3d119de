//! Per-job lifecycle record.
//!
//! A [`Job`] holds what the control plane should be told about one print
//! job: the current state and message, whether that pair still needs to
//! be sent, and the terminal `finished` flag. Updates are debounced
//! through a single flush timer per job:
//!
//! - a repeated identical `(state, message)` is ignored;
//! - a new message for the same state is held until the debounce window
//!   (counted from the first held change) elapses;
//! - a new state cancels any held timer and is released immediately.
//!
//! The timer is a spawned task that posts [`AgentEvent::FlushDue`] back to
//! the agent. Each arm bumps a generation counter so that a timer which
//! fired just before being replaced is recognised as stale.

use std::sync::Arc;
use std::time::Duration;

use printlink_core::job_state::JobState;
use printlink_core::protocol::JobUpdate;
use printlink_core::types::{DeviceJobId, JobId};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::agent::AgentEvent;
use crate::pipeline::{self, JobReporter, PipelineContext};

/// The single outstanding flush timer of a job.
struct FlushTimer {
    generation: u64,
    handle: AbortHandle,
}

/// Read-only view of a job, returned by [`AgentHandle::jobs`](crate::agent::AgentHandle::jobs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: Option<JobState>,
    pub message: Option<String>,
    pub pending_update: bool,
    pub finished: bool,
    pub stop_requested: bool,
    pub device_job: Option<DeviceJobId>,
}

pub struct Job {
    id: JobId,
    state: Option<JobState>,
    message: Option<String>,
    pending_update: bool,
    finished: bool,
    stop_requested: bool,
    device_job: Option<DeviceJobId>,
    flush_timer: Option<FlushTimer>,
    timer_generation: u64,
    pipeline: Option<AbortHandle>,
    debounce: Duration,
    events: mpsc::UnboundedSender<AgentEvent>,
}

impl Job {
    pub fn new(id: JobId, debounce: Duration, events: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self {
            id,
            state: None,
            message: None,
            pending_update: false,
            finished: false,
            stop_requested: false,
            device_job: None,
            flush_timer: None,
            timer_generation: 0,
            pipeline: None,
            debounce,
            events,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            state: self.state,
            message: self.message.clone(),
            pending_update: self.pending_update,
            finished: self.finished,
            stop_requested: self.stop_requested,
            device_job: self.device_job,
        }
    }

    /// Spawn the fetch → submit → poll pipeline for this job.
    pub fn start(&mut self, ctx: Arc<PipelineContext>) {
        tracing::info!(job_id = %self.id, "#{}: Started", self.id);
        let reporter = JobReporter::new(self.id.clone(), self.events.clone());
        let task = tokio::spawn(pipeline::run(ctx, reporter));
        self.pipeline = Some(task.abort_handle());
    }

    /// Record a new `(state, message)` pair and arm delivery.
    ///
    /// Returns `false` when the pair is identical to the current one.
    pub fn set_state(&mut self, state: JobState, message: Option<String>) -> bool {
        let delay = if self.state == Some(state) {
            if self.message == message {
                return false;
            }
            self.debounce
        } else {
            self.cancel_timer();
            Duration::ZERO
        };

        self.state = Some(state);
        self.message = message;
        self.pending_update = true;
        tracing::info!(
            job_id = %self.id,
            state = %state,
            "#{}: {}: {}",
            self.id,
            state,
            self.message.as_deref().unwrap_or(""),
        );

        if self.flush_timer.is_none() {
            self.replace_timer(delay);
        }
        true
    }

    /// Handle a fired flush timer. Returns `true` when the timer is the
    /// current one, meaning the held update is now due.
    pub fn flush_due(&mut self, generation: u64) -> bool {
        match &self.flush_timer {
            Some(timer) if timer.generation == generation => {
                self.flush_timer = None;
                true
            }
            _ => false,
        }
    }

    pub fn set_device_job(&mut self, device_job: DeviceJobId) {
        self.device_job = Some(device_job);
    }

    /// Mark the job as finished. Any held update is released with it.
    pub fn complete(&mut self) {
        self.cancel_timer();
        self.finished = true;
        tracing::info!(job_id = %self.id, "#{}: Completed on device", self.id);
    }

    /// Record a stop request. Returns the device job to cancel, if the
    /// request is the first one and the job has reached the device.
    pub fn request_stop(&mut self) -> Option<DeviceJobId> {
        if self.stop_requested {
            return None;
        }
        self.stop_requested = true;
        tracing::info!(job_id = %self.id, "#{}: Stopped", self.id);
        self.device_job
    }

    /// Take the update to send in the current broadcast, if any.
    ///
    /// State and message are included only when an update is pending and
    /// not held by a flush timer; `finish` is set on every update once the
    /// job has finished.
    pub fn take_update(&mut self) -> Option<JobUpdate> {
        let deliver_state = self.pending_update && self.flush_timer.is_none();
        if !deliver_state && !self.finished {
            return None;
        }

        let mut update = JobUpdate {
            id: self.id.clone(),
            state: None,
            message: None,
            finish: self.finished,
        };
        if deliver_state {
            update.state = self.state;
            update.message = self.message.clone();
            self.pending_update = false;
        }
        Some(update)
    }

    /// Cancel the outstanding flush timer and arm a new one.
    fn replace_timer(&mut self, delay: Duration) {
        self.cancel_timer();
        self.timer_generation += 1;

        let generation = self.timer_generation;
        let deadline = tokio::time::Instant::now() + delay;
        let id = self.id.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = events.send(AgentEvent::FlushDue { id, generation });
        });

        self.flush_timer = Some(FlushTimer {
            generation,
            handle: task.abort_handle(),
        });
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.flush_timer.take() {
            timer.handle.abort();
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        self.cancel_timer();
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.abort();
        }
    }
}
