use std::sync::Arc;

use common_error::SieveResult;
use common_resource_request::HostCapacity;
use common_runtime::{
    get_compute_runtime, get_or_init_compute_runtime_num_worker_threads,
    set_compute_runtime_num_worker_threads, RuntimeRef,
};
use common_sieve_config::SieveExecutionConfig;
use common_system_info::SystemInfo;
use parking_lot::Mutex;
use sieve_model_cache::{CacheStats, ModelCache, ModelProviders, WorkerModels};
use sieve_ops::{OperatorRegistry, WorkerContext};

/// Process-wide state of the executor: the operator registry, host capacity and
/// the model cache.
///
/// Every worker loads through the one cache, so a model is loaded once per process.
/// Worker slot `i` keeps its placement view for the whole process, so the device a
/// worker put a model on in one step is the device it finds in later steps.
pub struct ProcessContext {
    registry: Arc<OperatorRegistry>,
    providers: Arc<ModelProviders>,
    config: SieveExecutionConfig,
    host: HostCapacity,
    runtime: RuntimeRef,
    models: Arc<ModelCache>,
    workers: Mutex<Vec<Arc<WorkerModels>>>,
}

impl ProcessContext {
    /// Detects the host (honoring config overrides) and starts the compute runtime.
    pub fn init(
        registry: OperatorRegistry,
        providers: ModelProviders,
        config: SieveExecutionConfig,
    ) -> SieveResult<Arc<Self>> {
        let host = HostCapacity::from_system(&SystemInfo::new()).with_overrides(
            config.num_cpus,
            config.memory_gb,
            config.num_gpus,
        );
        Self::with_host(registry, providers, config, host)
    }

    pub fn with_host(
        registry: OperatorRegistry,
        providers: ModelProviders,
        config: SieveExecutionConfig,
        host: HostCapacity,
    ) -> SieveResult<Arc<Self>> {
        if let Some(threads) = config.compute_threads {
            if let Err(e) = set_compute_runtime_num_worker_threads(threads) {
                log::warn!("Ignoring compute_threads={}: {}", threads, e);
            }
        }
        let runtime = get_compute_runtime()?;
        log::debug!(
            "Compute runtime running {} worker threads",
            get_or_init_compute_runtime_num_worker_threads()
        );
        log::info!(
            "Initialized process context: {} operators, {} model providers, host {}",
            registry.len(),
            providers.names().len(),
            host
        );
        let providers = Arc::new(providers);
        Ok(Arc::new(Self {
            registry: Arc::new(registry),
            models: Arc::new(ModelCache::new(providers.clone())),
            providers,
            config,
            host,
            runtime,
            workers: Mutex::new(vec![]),
        }))
    }

    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SieveExecutionConfig {
        &self.config
    }

    pub fn host(&self) -> &HostCapacity {
        &self.host
    }

    pub(crate) fn runtime(&self) -> &RuntimeRef {
        &self.runtime
    }

    pub fn models(&self) -> &Arc<ModelCache> {
        &self.models
    }

    /// Resources for worker slot `worker_index`, creating its placement view on first use.
    pub fn worker_context(&self, worker_index: usize, gpu_rank: Option<usize>) -> WorkerContext {
        let mut workers = self.workers.lock();
        while workers.len() <= worker_index {
            workers.push(Arc::new(WorkerModels::new(self.models.clone())));
        }
        WorkerContext::new(worker_index, gpu_rank, workers[worker_index].clone())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.models.stats()
    }

    /// Drops every cached model. The context stays usable; later steps reload on demand.
    pub fn shutdown(&self) {
        let stats = self.models.stats();
        log::debug!(
            "Model cache: {} loads, {} hits, {} device moves",
            stats.loads,
            stats.hits,
            stats.moves
        );
        for worker in self.workers.lock().iter() {
            worker.clear();
        }
        self.models.clear();
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("registry", &self.registry)
            .field("providers", &self.providers)
            .field("config", &self.config)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}
