use super::ModelSpec;
use crate::error::AnalysisError;
use crate::pipeline::classifier::{ClassifierSource, FrameClassifier, PantingClassifier};
use clap::ValueEnum;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModelPolicy {
    /// Read the weights from disk on every analysis.
    #[default]
    Reload,
    /// Load once on first use and share the read-only model across analyses.
    Shared,
}

/// Source of panting classifiers for the analyzer.
pub struct ModelStore {
    spec: ModelSpec,
    policy: ModelPolicy,
    shared: Mutex<Option<Arc<PantingClassifier>>>,
}

impl ModelStore {
    pub fn new(spec: ModelSpec, policy: ModelPolicy) -> Self {
        Self {
            spec,
            policy,
            shared: Mutex::new(None),
        }
    }

    fn load_shared(&self) -> Result<Arc<PantingClassifier>, AnalysisError> {
        // Held across the load: concurrent first callers wait for one load.
        let mut slot = self
            .shared
            .lock()
            .map_err(|_| AnalysisError::ModelLoad {
                path: self.spec.weights_path.clone(),
                reason: "model cache lock poisoned".to_string(),
            })?;

        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }

        let model = Arc::new(PantingClassifier::load(&self.spec)?);
        *slot = Some(model.clone());
        Ok(model)
    }
}

impl ClassifierSource for ModelStore {
    fn load(&self) -> Result<Arc<dyn FrameClassifier>, AnalysisError> {
        match self.policy {
            ModelPolicy::Reload => Ok(Arc::new(PantingClassifier::load(&self.spec)?)),
            ModelPolicy::Shared => Ok(self.load_shared()?),
        }
    }
}
