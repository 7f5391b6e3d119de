//! `printlink-agent` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod agent;
pub mod config;
pub mod connection;
pub mod fetcher;
pub mod job;
pub mod pipeline;
