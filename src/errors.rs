#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    /// Rejected request payload: bad geometry, malformed data URL,
    /// unrecognized mode and friends. Maps to HTTP 400.
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("artwork {0} not found")]
    ArtworkNotFound(i64),

    /// The frame source could not produce a frame. Snapshot endpoints map
    /// this to HTTP 500; the scan loop just skips the tick.
    #[error("frame source unavailable: {0}")]
    BackendUnavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SentinelError {
    pub fn bad_input(msg: impl Into<String>) -> Self {
        SentinelError::BadInput(msg.into())
    }
}
