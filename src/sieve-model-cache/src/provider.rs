use std::{any::Any, collections::HashMap, sync::Arc};

use common_error::{SieveError, SieveResult};

use crate::{Device, ModelKey};

/// A loaded model or asset. Consumers downcast to the concrete type their provider produces.
pub type ModelObject = Arc<dyn Any + Send + Sync>;

/// Loads models for one provider name (e.g. `huggingface`, `builtin.tokenizer`).
///
/// `load` must be pure with respect to the key's parameters: equal keys have to
/// produce interchangeable objects, since the cache hands out one object per key.
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self, key: &ModelKey) -> SieveResult<ModelObject>;

    /// Moves a loaded object onto `device`. Providers without device placement return
    /// the object unchanged.
    fn to_device(
        &self,
        _key: &ModelKey,
        model: &ModelObject,
        _device: Device,
    ) -> SieveResult<ModelObject> {
        Ok(model.clone())
    }
}

/// Provider table, keyed by provider name.
#[derive(Default, Clone)]
pub struct ModelProviders {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ModelProviders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ModelProvider + 'static>(&mut self, provider: P) -> SieveResult<()> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(SieveError::DuplicateName { name });
        }
        self.providers.insert(name, Arc::new(provider));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ModelProvider>> {
        self.providers.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ModelProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelProviders")
            .field("providers", &self.names())
            .finish()
    }
}
