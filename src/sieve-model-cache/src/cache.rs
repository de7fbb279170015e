use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use common_error::{SieveError, SieveResult};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{Device, ModelKey, ModelObject, ModelProvider, ModelProviders};

/// A cached model together with where it currently lives. Cloning is cheap.
#[derive(Clone)]
pub struct ModelHandle {
    key: ModelKey,
    object: ModelObject,
    device: Device,
}

impl ModelHandle {
    pub fn key(&self) -> &ModelKey {
        &self.key
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn object(&self) -> &ModelObject {
        &self.object
    }

    /// Returns the loaded object as `T`, failing if the provider produced another type.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> SieveResult<Arc<T>> {
        self.object.clone().downcast::<T>().map_err(|_| {
            SieveError::TypeError(format!(
                "Model {} is not a {}",
                self.key,
                std::any::type_name::<T>()
            ))
        })
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModelHandle({} on {})", self.key, self.device)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Provider calls that produced an entry.
    pub loads: usize,
    /// Requests served from an existing entry.
    pub hits: usize,
    /// Device copies made with the provider's `to_device`.
    pub moves: usize,
    pub entries: usize,
}

/// A loaded model plus its copies on each device it was moved to.
struct Entry {
    object: ModelObject,
    placed: Mutex<HashMap<Device, Arc<OnceCell<ModelObject>>>>,
}

type Slot = Arc<OnceCell<Entry>>;

/// Process-wide cache of loaded models, shared by every worker.
///
/// The first `get_or_load` for a key calls the provider; concurrent first calls for
/// the same key wait on that single load. A failed load leaves nothing behind, so
/// the next request tries again. Each device gets one copy of a model, made by the
/// provider's `to_device` on first request. Entries live until [`ModelCache::clear`].
///
/// The cache itself never refuses a device. Which device a worker's operators agree
/// on is tracked per worker by [`crate::WorkerModels`].
pub struct ModelCache {
    providers: Arc<ModelProviders>,
    entries: Mutex<HashMap<ModelKey, Slot>>,
    loads: AtomicUsize,
    hits: AtomicUsize,
    moves: AtomicUsize,
}

impl ModelCache {
    pub fn new(providers: Arc<ModelProviders>) -> Self {
        Self {
            providers,
            entries: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            moves: AtomicUsize::new(0),
        }
    }

    /// Returns the model for `key` on `device`, loading it on first use.
    pub fn get_or_load(&self, key: &ModelKey, device: Device) -> SieveResult<ModelHandle> {
        let slot = self.entries.lock().entry(key.clone()).or_default().clone();

        let mut loaded = false;
        let result = slot.get_or_try_init(|| {
            let object = self.load(key)?;
            loaded = true;
            Ok(Entry {
                object,
                placed: Mutex::new(HashMap::new()),
            })
        });

        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                self.forget_failed(key, &slot);
                return Err(e);
            }
        };
        if loaded {
            self.loads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        self.place(key, entry, device)
    }

    pub fn contains(&self, key: &ModelKey) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|slot| slot.get().is_some())
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .entries
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count();
        CacheStats {
            loads: self.loads.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            moves: self.moves.load(Ordering::Relaxed),
            entries,
        }
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            log::debug!("Dropping {} cached models", entries.len());
        }
        entries.clear();
    }

    fn load(&self, key: &ModelKey) -> SieveResult<ModelObject> {
        let object = self
            .provider(key)?
            .load(key)
            .map_err(|e| SieveError::ModelLoad {
                key: key.to_string(),
                source: Box::new(e),
            })?;
        log::info!("Loaded model {}", key);
        Ok(object)
    }

    fn place(&self, key: &ModelKey, entry: &Entry, device: Device) -> SieveResult<ModelHandle> {
        if device == Device::Cpu {
            return Ok(ModelHandle {
                key: key.clone(),
                object: entry.object.clone(),
                device,
            });
        }
        let cell = entry.placed.lock().entry(device).or_default().clone();
        let object = cell
            .get_or_try_init(|| {
                let moved = self.provider(key)?.to_device(key, &entry.object, device)?;
                self.moves.fetch_add(1, Ordering::Relaxed);
                log::debug!("Placed model {} on {}", key, device);
                Ok::<_, SieveError>(moved)
            })?
            .clone();
        Ok(ModelHandle {
            key: key.clone(),
            object,
            device,
        })
    }

    fn provider(&self, key: &ModelKey) -> SieveResult<&Arc<dyn ModelProvider>> {
        self.providers
            .get(&key.provider)
            .ok_or_else(|| SieveError::ModelLoad {
                key: key.to_string(),
                source: format!("no provider registered under `{}`", key.provider).into(),
            })
    }

    fn forget_failed(&self, key: &ModelKey, slot: &Slot) {
        let mut entries = self.entries.lock();
        if let Some(current) = entries.get(key) {
            if Arc::ptr_eq(current, slot) && current.get().is_none() {
                entries.remove(key);
            }
        }
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("providers", &self.providers)
            .field("stats", &self.stats())
            .finish()
    }
}
