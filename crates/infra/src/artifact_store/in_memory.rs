use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use siprems_ai::{ArtifactStore, ForecastError, ModelArtifact};
use siprems_core::TargetId;

/// Artifacts held in process memory, one per target.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    inner: RwLock<HashMap<TargetId, Arc<ModelArtifact>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, target_id: &TargetId) -> Result<bool, ForecastError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| ForecastError::artifact("artifact store lock poisoned"))?;
        Ok(guard.remove(target_id).is_some())
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn load(&self, target_id: &TargetId) -> Result<Option<ModelArtifact>, ForecastError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| ForecastError::artifact("artifact store lock poisoned"))?;
        Ok(guard.get(target_id).map(|a| (**a).clone()))
    }

    fn save(&self, artifact: &ModelArtifact) -> Result<(), ForecastError> {
        let value = Arc::new(artifact.clone());
        let mut guard = self
            .inner
            .write()
            .map_err(|_| ForecastError::artifact("artifact store lock poisoned"))?;
        guard.insert(artifact.target_id().clone(), value);
        Ok(())
    }
}
