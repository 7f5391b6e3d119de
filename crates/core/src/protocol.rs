//! Control-plane wire frames.
//!
//! Inbound frames are a JSON array holding the complete set of job ids the
//! agent should be running. Outbound frames are either a per-job update
//! object or the empty object `{}` used as a heartbeat.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job_state::JobState;
use crate::types::JobId;

/// Outbound heartbeat frame, sent when no job has anything to report.
pub const HEARTBEAT_FRAME: &str = "{}";

/// Per-job update sent to the control plane.
///
/// `state` and `message` are present only when a state update was pending;
/// `finish` is present (and `true`) only once the job has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub finish: bool,
}

impl JobUpdate {
    /// Serialize to a JSON text frame.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).expect("JobUpdate is always serialisable")
    }
}

/// Parse an inbound frame into the desired job id list.
pub fn parse_desired_jobs(text: &str) -> Result<Vec<JobId>, CoreError> {
    Ok(serde_json::from_str(text)?)
}

/// Validate that a control-plane base URL is non-empty and HTTP(S).
pub fn validate_base_url(url: &str) -> Result<(), CoreError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(
            "Base URL must not be empty".to_string(),
        ));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(CoreError::Validation(format!(
            "Base URL must start with http:// or https://, got: '{trimmed}'"
        )));
    }
    Ok(())
}

/// Derive the WebSocket endpoint from an HTTP(S) base URL.
///
/// `http` becomes `ws` and `https` becomes `wss`; the path gains
/// `/printer/socket`.
pub fn socket_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/printer/socket")
}

/// Payload URL for a job: `<base>/printer/<job-id>`.
pub fn payload_url(base_url: &str, job_id: &str) -> String {
    format!("{}/printer/{}", base_url.trim_end_matches('/'), job_id)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn full_update_frame() {
        let update = JobUpdate {
            id: "J1".into(),
            state: Some(JobState::Downloading),
            message: Some("Downloaded 10 bytes".into()),
            finish: false,
        };
        assert_eq!(
            update.to_frame(),
            r#"{"id":"J1","state":"downloading","message":"Downloaded 10 bytes"}"#
        );
    }

    #[test]
    fn finish_only_frame() {
        let update = JobUpdate {
            id: "J1".into(),
            state: None,
            message: None,
            finish: true,
        };
        assert_eq!(update.to_frame(), r#"{"id":"J1","finish":true}"#);
    }

    #[test]
    fn state_without_message_omits_message() {
        let update = JobUpdate {
            id: "J2".into(),
            state: Some(JobState::Downloading),
            message: None,
            finish: false,
        };
        assert_eq!(update.to_frame(), r#"{"id":"J2","state":"downloading"}"#);
    }

    #[test]
    fn parse_desired_list() {
        let ids = parse_desired_jobs(r#"["a","b"]"#).unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert!(parse_desired_jobs("[]").unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_malformed_frames() {
        assert_matches!(parse_desired_jobs("not json"), Err(CoreError::MalformedFrame(_)));
        assert_matches!(parse_desired_jobs(r#"{"id":"a"}"#), Err(CoreError::MalformedFrame(_)));
        assert_matches!(parse_desired_jobs("[1,2]"), Err(CoreError::MalformedFrame(_)));
    }

    #[test]
    fn base_url_validation() {
        assert!(validate_base_url("http://127.0.0.1:3000/aaa").is_ok());
        assert!(validate_base_url("https://example.com").is_ok());
        assert_matches!(validate_base_url(""), Err(CoreError::Validation(_)));
        assert_matches!(validate_base_url("ftp://host"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn derived_urls() {
        assert_eq!(
            socket_url("http://127.0.0.1:3000/aaa/"),
            "ws://127.0.0.1:3000/aaa/printer/socket"
        );
        assert_eq!(
            socket_url("https://cp.example.com"),
            "wss://cp.example.com/printer/socket"
        );
        assert_eq!(
            payload_url("http://127.0.0.1:3000/aaa/", "J1"),
            "http://127.0.0.1:3000/aaa/printer/J1"
        );
    }
}
