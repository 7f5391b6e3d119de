#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
}
