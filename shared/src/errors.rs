use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("worker count {workers} is invalid for a space of {space}")]
    InvalidWorkerCount { workers: u32, space: u64 },

    #[error("difficulty {0} exceeds the {width} bit digest width", width = crate::pow::DIGEST_BITS)]
    InvalidDifficulty(u32),

    #[error("provisioning failed: {0}")]
    ProvisioningFailure(String),

    #[error("channel `{name}` unavailable: {reason}")]
    ChannelUnavailable { name: String, reason: String },

    #[error("wire protocol violation: {0}")]
    Protocol(String),

    #[error(
        "no worker count meets target {target}s at difficulty {difficulty} \
         with confidence {confidence}"
    )]
    NoViableConfiguration { target: f64, difficulty: u32, confidence: f64 },

    #[error("teardown partially failed: {}", .0.join("; "))]
    PartialTeardownFailure(Vec<String>),

    #[error("no result arrived within {0}s")]
    RaceTimeout(u64),
}

pub type FleetResult<T> = Result<T, FleetError>;
