use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use shared::errors::FleetResult;
use tracing::info;

use super::ArtifactStore;

/// Records staged artifacts without shipping them anywhere. The local
/// fleet runs the worker in-process, so staging is bookkeeping only.
pub struct LocalArtifacts {
    staged: Mutex<HashMap<String, usize>>,
}

impl LocalArtifacts {
    pub fn new() -> Self {
        Self { staged: Mutex::new(HashMap::new()) }
    }

    pub fn staged_size(&self, name: &str) -> Option<usize> {
        self.staged.lock().unwrap().get(name).copied()
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifacts {
    async fn upload(&self, name: &str, artifact: Bytes) -> FleetResult<()> {
        info!("staged artifact `{name}` ({} bytes)", artifact.len());
        self.staged.lock().unwrap().insert(name.to_string(), artifact.len());
        Ok(())
    }
}
