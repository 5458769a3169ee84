use std::{path::PathBuf, time::Duration};

/// Everything one run needs, built once at the binary edge and passed into
/// every operation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub workers: u32,
    pub difficulty: u32,
    /// Block payload the decimal nonce is appended to before hashing.
    pub payload: String,
    /// The nonce space swept is `[0, space)`.
    pub space: u64,
    /// `None` disables the run deadline.
    pub timeout: Option<Duration>,
    /// Ask cancelled workers to report their search position.
    pub collect_logs: bool,
    /// How long provisioned workers get to reach the ready state.
    pub ready_deadline: Duration,
    /// Worker executable staged before provisioning, when given.
    pub artifact: Option<PathBuf>,
}

impl RunConfig {
    pub fn new(workers: u32, difficulty: u32, payload: String, space: u64) -> Self {
        Self {
            workers,
            difficulty,
            payload,
            space,
            timeout: None,
            collect_logs: false,
            ready_deadline: Duration::from_secs(60),
            artifact: None,
        }
    }
}
