//! Shared types for the printlink print-job agent.
//!
//! Everything in this crate is pure: job states and the device status
//! table, the control-plane wire frames, timing defaults and the common
//! error type. Runtime code lives in `printlink-agent`.

pub mod error;
pub mod job_state;
pub mod protocol;
pub mod timing;
pub mod types;
