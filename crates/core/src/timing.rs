//! Default timing constants.
//!
//! Every delay is tunable on its own. The defaults use one second for every
//! retry-like delay.

/// Delay before re-fetching after a non-success HTTP status, and before
/// re-submitting after a device submit failure.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Interval between device status queries for a submitted job.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Delay between a WebSocket close and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Period of the broadcaster loop (heartbeat cadence).
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 1000;

/// Window over which same-state progress messages are coalesced.
pub const DEFAULT_DEBOUNCE_MS: u64 = 5000;
