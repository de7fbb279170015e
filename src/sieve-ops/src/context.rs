use std::{any::Any, collections::HashMap, fmt::Display, sync::Arc};

use common_error::{SieveError, SieveResult};
use sieve_model_cache::{Device, ModelHandle, ModelKey, WorkerModels};

/// Names one intermediate value in a sample's context: a tag such as `words`,
/// optionally qualified by whatever normalization produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey(String);

impl ContextKey {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// `words` qualified by `builtin.tokenizer(pattern=\w+)` becomes
    /// `words-builtin.tokenizer(pattern=\w+)`.
    pub fn derived(tag: &str, qualifier: impl Display) -> Self {
        Self(format!("{tag}-{qualifier}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tag(&self) -> &str {
        self.0.split_once('-').map_or(self.0.as_str(), |(tag, _)| tag)
    }
}

impl Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-sample scratch space for intermediate values shared by the operators of one step.
#[derive(Default)]
pub struct Context {
    values: HashMap<ContextKey, Arc<dyn Any + Send + Sync>>,
    computed: usize,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &ContextKey) -> Option<Arc<T>> {
        self.values
            .get(key)
            .and_then(|value| value.clone().downcast::<T>().ok())
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: ContextKey, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.values.insert(key, value.clone());
        value
    }

    /// Returns the value stored under `key`, computing and storing it first if absent.
    pub fn get_or_try_insert_with<T, F>(&mut self, key: &ContextKey, f: F) -> SieveResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> SieveResult<T>,
    {
        if let Some(existing) = self.values.get(key) {
            return existing.clone().downcast::<T>().map_err(|_| {
                SieveError::InternalError(format!(
                    "Context value `{key}` is not a {}",
                    std::any::type_name::<T>()
                ))
            });
        }
        let value = f()?;
        self.computed += 1;
        Ok(self.insert(key.clone(), value))
    }

    pub fn contains(&self, key: &ContextKey) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// How many values were computed rather than reused since the last clear.
    pub fn computed(&self) -> usize {
        self.computed
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.computed = 0;
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&str> = self.values.keys().map(ContextKey::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("Context").field("keys", &keys).finish()
    }
}

/// Everything one worker slot brings to the operators it runs.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    pub worker_index: usize,
    pub gpu_rank: Option<usize>,
    models: Arc<WorkerModels>,
}

impl WorkerContext {
    pub fn new(worker_index: usize, gpu_rank: Option<usize>, models: Arc<WorkerModels>) -> Self {
        Self {
            worker_index,
            gpu_rank,
            models,
        }
    }

    pub fn device(&self) -> Device {
        Device::from_rank(self.gpu_rank)
    }

    pub fn models(&self) -> &Arc<WorkerModels> {
        &self.models
    }
}

/// Handed to operator methods: the worker's resources plus the current sample's context.
pub struct OpContext<'a> {
    worker: &'a WorkerContext,
    context: Context,
}

impl<'a> OpContext<'a> {
    pub fn new(worker: &'a WorkerContext) -> Self {
        Self {
            worker,
            context: Context::new(),
        }
    }

    pub fn worker(&self) -> &WorkerContext {
        self.worker
    }

    pub fn device(&self) -> Device {
        self.worker.device()
    }

    /// Fetches a model placed on this worker's device, loading it on first use in the process.
    pub fn load_model(&self, key: &ModelKey) -> SieveResult<ModelHandle> {
        self.worker.models.get_or_load(key, self.device())
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn get_or_compute<T, F>(&mut self, key: &ContextKey, f: F) -> SieveResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> SieveResult<T>,
    {
        self.context.get_or_try_insert_with(key, f)
    }

    /// Starts a new sample: drops every intermediate of the previous one.
    pub fn reset(&mut self) {
        self.context.clear();
    }
}
