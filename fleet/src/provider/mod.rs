use std::{
    fmt::{Display, Formatter},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use shared::errors::FleetResult;

pub mod artifact;
pub mod channel;
pub mod compute;
pub mod telemetry;

/// Opaque handle to one provisioned compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerHandle(pub String);

impl Display for WorkerHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, count: u32) -> FleetResult<Vec<WorkerHandle>>;

    /// Blocks until every handle reports ready. Implementations poll at a
    /// fixed interval and fail once the deadline lapses, never spinning
    /// unbounded.
    async fn wait_ready(&self, handles: &[WorkerHandle], deadline: Duration) -> FleetResult<()>;

    async fn terminate(&self, handles: &[WorkerHandle]) -> FleetResult<()>;
}

/// Stages the worker executable ahead of provisioning. Not part of the run
/// protocol itself.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload(&self, name: &str, artifact: Bytes) -> FleetResult<()>;
}
