//! Shared fakes and helpers for agent integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use printlink_agent::agent::{Agent, AgentHandle};
use printlink_agent::config::Timings;
use printlink_agent::fetcher::{FetchError, PayloadBody, PayloadSource};
use printlink_agent::pipeline::PipelineContext;
use printlink_core::protocol::{JobUpdate, HEARTBEAT_FRAME};
use printlink_core::types::DeviceJobId;
use printlink_device::{DeviceError, DeviceJobStatus, PrintDevice};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Simulated network latency for every fake fetch step.
pub const NETWORK_DELAY: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Payload source
// ---------------------------------------------------------------------------

/// One scripted response of [`FakeSource`].
#[derive(Clone)]
pub enum Fetch {
    Body(Vec<&'static str>),
    BadStatus(u16),
    Transport(&'static str),
}

/// Payload source that replays a script, then serves a default body.
pub struct FakeSource {
    script: Mutex<VecDeque<Fetch>>,
    chunk_delay: Duration,
    opened: Mutex<HashMap<String, usize>>,
}

impl FakeSource {
    pub fn new(script: Vec<Fetch>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            chunk_delay: NETWORK_DELAY,
            opened: Mutex::new(HashMap::new()),
        }
    }

    pub fn ok() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Number of fetch attempts made for `job_id`.
    pub fn opened(&self, job_id: &str) -> usize {
        self.opened.lock().unwrap().get(job_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PayloadSource for FakeSource {
    async fn open(&self, job_id: &str) -> Result<Box<dyn PayloadBody>, FetchError> {
        *self
            .opened
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default() += 1;

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Fetch::Body(vec!["%PDF-1.4", " payload"]));

        tokio::time::sleep(NETWORK_DELAY).await;
        match next {
            Fetch::Body(chunks) => Ok(Box::new(FakeBody {
                chunks: chunks
                    .into_iter()
                    .map(|c| Bytes::from_static(c.as_bytes()))
                    .collect(),
                delay: self.chunk_delay,
            })),
            Fetch::BadStatus(code) => Err(FetchError::BadStatus(code)),
            Fetch::Transport(detail) => Err(FetchError::Transport(detail.to_string())),
        }
    }
}

struct FakeBody {
    chunks: VecDeque<Bytes>,
    delay: Duration,
}

#[async_trait]
impl PayloadBody for FakeBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, FetchError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.chunks.pop_front())
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// In-memory print device.
///
/// Status queries replay a script and then keep returning its last entry.
/// When `cancel_completes` is set, a cancel request makes the job report
/// `CANCELLED` with a completion time.
pub struct FakeDevice {
    submit_failures: Mutex<u32>,
    statuses: Mutex<VecDeque<DeviceJobStatus>>,
    cancel_completes: bool,
    submitted: Mutex<Vec<(usize, String)>>,
    cancelled: Mutex<Vec<DeviceJobId>>,
    next_id: Mutex<DeviceJobId>,
}

impl FakeDevice {
    pub fn new(statuses: Vec<DeviceJobStatus>) -> Self {
        Self {
            submit_failures: Mutex::new(0),
            statuses: Mutex::new(statuses.into()),
            cancel_completes: true,
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    /// Device that prints every job on the second poll.
    pub fn printing_then_printed() -> Self {
        Self::new(vec![
            DeviceJobStatus::active("PRINTING"),
            DeviceJobStatus::completed("PRINTED", chrono::Utc::now()),
        ])
    }

    /// Device that never finishes a job on its own.
    pub fn always_printing() -> Self {
        Self::new(vec![DeviceJobStatus::active("PRINTING")])
    }

    pub fn with_submit_failures(self, failures: u32) -> Self {
        *self.submit_failures.lock().unwrap() = failures;
        self
    }

    pub fn without_cancel_completion(mut self) -> Self {
        self.cancel_completes = false;
        self
    }

    pub fn submitted(&self) -> Vec<(usize, String)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<DeviceJobId> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrintDevice for FakeDevice {
    async fn submit(
        &self,
        payload: Bytes,
        content_type: &str,
    ) -> Result<DeviceJobId, DeviceError> {
        {
            let mut failures = self.submit_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(DeviceError::UnexpectedOutput("printer offline".into()));
            }
        }
        self.submitted
            .lock()
            .unwrap()
            .push((payload.len(), content_type.to_string()));
        let mut next_id = self.next_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;
        Ok(id)
    }

    async fn status(&self, _job: DeviceJobId) -> Result<DeviceJobStatus, DeviceError> {
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        status.ok_or(DeviceError::UnexpectedOutput("no status".into()))
    }

    async fn cancel(&self, job: DeviceJobId) -> Result<(), DeviceError> {
        self.cancelled.lock().unwrap().push(job);
        if self.cancel_completes {
            let mut statuses = self.statuses.lock().unwrap();
            statuses.clear();
            statuses.push_back(DeviceJobStatus::completed("CANCELLED", chrono::Utc::now()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Agent harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub handle: AgentHandle,
    pub frames: mpsc::UnboundedReceiver<String>,
    pub source: Arc<FakeSource>,
    pub device: Arc<FakeDevice>,
    pub cancel: CancellationToken,
}

/// Start an agent with default timings and an open connection.
pub fn start_agent(source: FakeSource, device: FakeDevice) -> Harness {
    let mut harness = start_disconnected(source, device);
    let (tx, rx) = mpsc::unbounded_channel();
    harness.handle.connection_opened(tx);
    harness.frames = rx;
    harness
}

/// Start an agent with default timings and no connection.
pub fn start_disconnected(source: FakeSource, device: FakeDevice) -> Harness {
    let source = Arc::new(source);
    let device = Arc::new(device);
    let ctx = PipelineContext {
        source: source.clone(),
        device: device.clone(),
        content_type: "application/pdf".to_string(),
        timings: Timings::default(),
    };

    let agent = Agent::new(ctx);
    let handle = agent.handle();
    let cancel = CancellationToken::new();
    tokio::spawn(agent.run(cancel.clone()));

    let (_tx, frames) = mpsc::unbounded_channel();
    Harness {
        handle,
        frames,
        source,
        device,
        cancel,
    }
}

impl Harness {
    /// Next raw frame.
    pub async fn next_frame(&mut self) -> String {
        self.frames.recv().await.expect("frame channel closed")
    }

    /// Next job update, skipping heartbeats.
    pub async fn next_update(&mut self) -> JobUpdate {
        loop {
            let frame = self.next_frame().await;
            if frame == HEARTBEAT_FRAME {
                continue;
            }
            return serde_json::from_str(&frame).expect("job update frame");
        }
    }

    /// Collect updates for `id` up to and including the first finish frame.
    pub async fn updates_until_finish(&mut self, id: &str) -> Vec<JobUpdate> {
        let mut updates = Vec::new();
        loop {
            let update = self.next_update().await;
            if update.id != id {
                continue;
            }
            let finished = update.finish;
            updates.push(update);
            if finished {
                return updates;
            }
        }
    }

    pub async fn job_ids(&self) -> Vec<String> {
        self.handle.jobs().await.into_iter().map(|j| j.id).collect()
    }
}
