//! CUPS command-line device adapter.
//!
//! Submits with `lp`, inspects jobs with `lpstat -l` and cancels with
//! `cancel`. Job state reasons from the `Alerts:` lines of `lpstat -l`
//! are translated into the upper-case status tokens the agent's status
//! table understands.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use printlink_core::types::DeviceJobId;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{DeviceError, DeviceJobStatus, PrintDevice};

/// Default upper bound for a single CUPS tool invocation.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Print device backed by a CUPS destination.
pub struct CupsDevice {
    /// Destination name; empty means the system default destination.
    printer: String,
    command_timeout: Duration,
}

impl CupsDevice {
    pub fn new(printer: impl Into<String>) -> Self {
        Self {
            printer: printer.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Run a CUPS tool, optionally feeding `stdin`, and return its stdout.
    async fn run(
        &self,
        command: &'static str,
        args: &[String],
        stdin: Option<Bytes>,
    ) -> Result<String, DeviceError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(&data).await?;
            // Dropping the pipe closes it so the tool sees EOF.
            drop(pipe);
        }

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| DeviceError::Timeout(command))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(command, stderr = %stderr, "CUPS command failed");
            return Err(DeviceError::CommandFailed {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn lpstat_args(&self, which: &str) -> Vec<String> {
        let mut args = vec!["-l".to_string(), "-W".to_string(), which.to_string(), "-o".to_string()];
        if !self.printer.is_empty() {
            args.push(self.printer.clone());
        }
        args
    }
}

#[async_trait]
impl PrintDevice for CupsDevice {
    async fn submit(
        &self,
        payload: Bytes,
        content_type: &str,
    ) -> Result<DeviceJobId, DeviceError> {
        let mut args = Vec::new();
        if !self.printer.is_empty() {
            args.push("-d".to_string());
            args.push(self.printer.clone());
        }
        args.push("-o".to_string());
        args.push(format!("document-format={content_type}"));
        args.push("-".to_string());

        let stdout = self.run("lp", &args, Some(payload)).await?;
        let job = parse_request_id(&stdout)
            .ok_or_else(|| DeviceError::UnexpectedOutput(stdout.trim().to_string()))?;

        tracing::info!(printer = %self.printer, device_job = job, "Submitted job to CUPS");
        Ok(job)
    }

    async fn status(&self, job: DeviceJobId) -> Result<DeviceJobStatus, DeviceError> {
        let completed = self
            .run("lpstat", &self.lpstat_args("completed"), None)
            .await?;
        if let Some(reasons) = find_job_reasons(&completed, job) {
            // lpstat does not expose the completion time; the observation
            // time stands in for it.
            return Ok(DeviceJobStatus::completed(
                completed_status(&reasons),
                Utc::now(),
            ));
        }

        let active = self
            .run("lpstat", &self.lpstat_args("not-completed"), None)
            .await?;
        match find_job_reasons(&active, job) {
            Some(reasons) => Ok(DeviceJobStatus::active(active_status(&reasons))),
            None => Err(DeviceError::UnknownJob(job)),
        }
    }

    async fn cancel(&self, job: DeviceJobId) -> Result<(), DeviceError> {
        let target = if self.printer.is_empty() {
            job.to_string()
        } else {
            format!("{}-{job}", self.printer)
        };
        self.run("cancel", &[target], None).await?;
        tracing::info!(printer = %self.printer, device_job = job, "Cancel requested");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Extract the numeric job id from `lp` output such as
/// `request id is office-42 (1 file(s))`.
fn parse_request_id(stdout: &str) -> Option<DeviceJobId> {
    let rest = stdout.split("request id is ").nth(1)?;
    let request = rest.split_whitespace().next()?;
    let (_, number) = request.rsplit_once('-')?;
    number.parse().ok()
}

/// Header lines in `lpstat -o` output start with `<dest>-<id>`.
fn header_job_id(line: &str) -> Option<DeviceJobId> {
    if line.starts_with(char::is_whitespace) {
        return None;
    }
    let request = line.split_whitespace().next()?;
    let (_, number) = request.rsplit_once('-')?;
    number.parse().ok()
}

/// Find a job in `lpstat -l` output and return its lower-cased detail
/// lines (status and alerts), or `None` if the job is not listed.
fn find_job_reasons(output: &str, job: DeviceJobId) -> Option<String> {
    let mut lines = output.lines();
    lines.find(|line| header_job_id(line) == Some(job))?;
    let details: Vec<&str> = lines
        .take_while(|line| line.starts_with(char::is_whitespace))
        .map(str::trim)
        .collect();
    Some(details.join(" ").to_ascii_lowercase())
}

fn completed_status(reasons: &str) -> &'static str {
    if reasons.contains("canceled") || reasons.contains("cancelled") {
        "CANCELLED"
    } else if reasons.contains("aborted") {
        "ABORTED"
    } else {
        "PRINTED"
    }
}

fn active_status(reasons: &str) -> &'static str {
    if reasons.contains("job-printing") || reasons.contains("now printing") {
        "PRINTING"
    } else if reasons.contains("hold") || reasons.contains("stopped") {
        "PAUSED"
    } else {
        "PENDING"
    }
}
