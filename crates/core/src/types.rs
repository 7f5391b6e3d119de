/// Job identifiers are opaque strings assigned by the control plane.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Native job handle assigned by the print device.
pub type DeviceJobId = u64;
