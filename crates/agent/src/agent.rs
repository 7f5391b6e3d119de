//! Agent actor: Job Set owner, reconciler and broadcaster.
//!
//! All mutable job state lives in [`Agent`] and is touched only from its
//! event loop, one [`AgentEvent`] at a time. Pipelines, flush timers and
//! the connection manager run as separate tasks and talk to the agent
//! only through the event channel.
//!
//! Broadcast runs happen every `broadcast_interval` (measured from the end
//! of the previous run) and immediately on connection open, on a due
//! flush timer, and on job completion.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use printlink_core::job_state::JobState;
use printlink_core::protocol::HEARTBEAT_FRAME;
use printlink_core::types::{DeviceJobId, JobId};
use printlink_device::PrintDevice;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::job::{Job, JobSnapshot};
use crate::pipeline::PipelineContext;

/// Outbound half of an open control-plane connection.
pub type FrameSender = mpsc::UnboundedSender<String>;

/// Everything the agent reacts to.
#[derive(Debug)]
pub enum AgentEvent {
    /// A complete desired-id list from the control plane.
    DesiredJobs(Vec<JobId>),
    /// The control-plane connection opened; frames go to the sender.
    ConnectionOpened(FrameSender),
    ConnectionClosed,
    JobState {
        id: JobId,
        state: JobState,
        message: Option<String>,
    },
    JobSubmitted {
        id: JobId,
        device_job: DeviceJobId,
    },
    JobCompleted {
        id: JobId,
    },
    /// A job's flush timer fired.
    FlushDue {
        id: JobId,
        generation: u64,
    },
    /// Request a snapshot of the Job Set.
    Inspect(oneshot::Sender<Vec<JobSnapshot>>),
}

/// Cloneable handle used by other tasks to post events to the agent.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    events: mpsc::UnboundedSender<AgentEvent>,
}

impl AgentHandle {
    pub fn desired_jobs(&self, ids: Vec<JobId>) {
        self.send(AgentEvent::DesiredJobs(ids));
    }

    pub fn connection_opened(&self, frames: FrameSender) {
        self.send(AgentEvent::ConnectionOpened(frames));
    }

    pub fn connection_closed(&self) {
        self.send(AgentEvent::ConnectionClosed);
    }

    /// Snapshot of every job currently in the Job Set, ordered by id.
    ///
    /// Returns an empty list if the agent has stopped.
    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(AgentEvent::Inspect(tx));
        rx.await.unwrap_or_default()
    }

    fn send(&self, event: AgentEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Agent stopped, dropping event");
        }
    }
}

pub struct Agent {
    jobs: BTreeMap<JobId, Job>,
    outbound: Option<FrameSender>,
    ctx: Arc<PipelineContext>,
    events_tx: mpsc::UnboundedSender<AgentEvent>,
    events_rx: mpsc::UnboundedReceiver<AgentEvent>,
}

impl Agent {
    pub fn new(ctx: PipelineContext) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            jobs: BTreeMap::new(),
            outbound: None,
            ctx: Arc::new(ctx),
            events_tx,
            events_rx,
        }
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Process events and run the broadcaster until `cancel` fires.
    ///
    /// On exit every job is dropped, which aborts its pipeline and timer.
    pub async fn run(mut self, cancel: CancellationToken) {
        let interval = self.ctx.timings.broadcast_interval;
        let next_broadcast = tokio::time::sleep(interval);
        tokio::pin!(next_broadcast);

        loop {
            let broadcast_now = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut next_broadcast => true,
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            };

            if broadcast_now {
                self.broadcast();
                next_broadcast.as_mut().reset(Instant::now() + interval);
            }
        }

        tracing::info!(jobs = self.jobs.len(), "Agent stopping");
        self.jobs.clear();
    }

    /// Apply one event. Returns `true` when a broadcast should run now.
    fn handle_event(&mut self, event: AgentEvent) -> bool {
        match event {
            AgentEvent::DesiredJobs(ids) => {
                self.reconcile(ids);
                false
            }
            AgentEvent::ConnectionOpened(frames) => {
                self.outbound = Some(frames);
                true
            }
            AgentEvent::ConnectionClosed => {
                self.outbound = None;
                false
            }
            AgentEvent::JobState { id, state, message } => {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.set_state(state, message);
                }
                false
            }
            AgentEvent::JobSubmitted { id, device_job } => {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.set_device_job(device_job);
                }
                false
            }
            AgentEvent::JobCompleted { id } => match self.jobs.get_mut(&id) {
                Some(job) => {
                    job.complete();
                    true
                }
                None => false,
            },
            AgentEvent::FlushDue { id, generation } => self
                .jobs
                .get_mut(&id)
                .is_some_and(|job| job.flush_due(generation)),
            AgentEvent::Inspect(reply) => {
                let _ = reply.send(self.jobs.values().map(Job::snapshot).collect());
                false
            }
        }
    }

    /// Diff the desired list against the Job Set.
    ///
    /// New ids get a job that is started right away; jobs missing from the
    /// list are asked to stop. Stopping is two-phase: a job is removed only
    /// once it is already finished when `stop` runs.
    fn reconcile(&mut self, ids: Vec<JobId>) {
        tracing::debug!(desired = ids.len(), tracked = self.jobs.len(), "Reconciling jobs");

        let desired: HashSet<&JobId> = ids.iter().collect();
        for id in &ids {
            if self.jobs.contains_key(id) {
                continue;
            }
            let mut job = Job::new(
                id.clone(),
                self.ctx.timings.debounce,
                self.events_tx.clone(),
            );
            job.start(Arc::clone(&self.ctx));
            self.jobs.insert(id.clone(), job);
        }

        let undesired: Vec<JobId> = self
            .jobs
            .keys()
            .filter(|id| !desired.contains(id))
            .cloned()
            .collect();
        for id in undesired {
            self.stop(&id);
        }
    }

    fn stop(&mut self, id: &str) {
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };

        if job.is_finished() {
            self.jobs.remove(id);
            tracing::info!(job_id = %id, "#{id}: Finished");
            return;
        }

        if let Some(device_job) = job.request_stop() {
            cancel_on_device(Arc::clone(&self.ctx.device), id.to_string(), device_job);
        }
    }

    /// Send every due job update, or a heartbeat when there is none.
    fn broadcast(&mut self) {
        let Some(outbound) = self.outbound.as_ref().filter(|tx| !tx.is_closed()) else {
            return;
        };

        let mut idle = true;
        for job in self.jobs.values_mut() {
            let Some(update) = job.take_update() else {
                continue;
            };
            let frame = update.to_frame();
            tracing::debug!("SEND {frame}");
            let _ = outbound.send(frame);
            idle = false;
        }

        if idle {
            let _ = outbound.send(HEARTBEAT_FRAME.to_string());
        }
    }
}

/// Issue a device cancel without blocking the agent loop.
fn cancel_on_device(device: Arc<dyn PrintDevice>, id: JobId, device_job: DeviceJobId) {
    tokio::spawn(async move {
        if let Err(e) = device.cancel(device_job).await {
            tracing::error!(job_id = %id, device_job, error = %e, "Device cancel failed");
        }
    });
}
