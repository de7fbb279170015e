use std::{collections::HashMap, sync::Arc};

use common_error::{SieveError, SieveResult};
use parking_lot::Mutex;

use crate::{Device, ModelCache, ModelHandle, ModelKey};

/// One worker slot's view of the process cache.
///
/// Loads go through the shared [`ModelCache`], so equal keys load once per process.
/// The view remembers which device each model was placed on for this worker: a CPU
/// request never moves a model, a CUDA request places a CPU-resident model, and a
/// request for a different rank fails with `PlacementConflict` until the caller
/// moves it with [`WorkerModels::relocate`].
pub struct WorkerModels {
    cache: Arc<ModelCache>,
    placements: Mutex<HashMap<ModelKey, Device>>,
}

impl WorkerModels {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self {
            cache,
            placements: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Where this worker last placed `key`, if it used it at all.
    pub fn device_of(&self, key: &ModelKey) -> Option<Device> {
        self.placements.lock().get(key).copied()
    }

    pub fn get_or_load(&self, key: &ModelKey, device: Device) -> SieveResult<ModelHandle> {
        let mut placements = self.placements.lock();
        let current = placements.get(key).copied();
        let target = match (current, device) {
            (Some(current), Device::Cpu) => current,
            (Some(Device::Cuda(current)), Device::Cuda(rank)) if current != rank => {
                return Err(SieveError::PlacementConflict {
                    key: key.to_string(),
                    current: Device::Cuda(current).to_string(),
                    requested: device.to_string(),
                })
            }
            _ => device,
        };
        let handle = self.cache.get_or_load(key, target)?;
        placements.insert(key.clone(), target);
        Ok(handle)
    }

    /// Moves this worker's copy of `key` to `device`, whatever device it is on now.
    pub fn relocate(&self, key: &ModelKey, device: Device) -> SieveResult<ModelHandle> {
        let mut placements = self.placements.lock();
        let Some(current) = placements.get(key).copied() else {
            return Err(SieveError::ValueError(format!(
                "Cannot relocate model {key}: it is not loaded"
            )));
        };
        if current != device {
            log::info!("Relocating model {} from {} to {}", key, current, device);
        }
        let handle = self.cache.get_or_load(key, device)?;
        placements.insert(key.clone(), device);
        Ok(handle)
    }

    /// Forgets this worker's placements. The shared cache keeps its entries.
    pub fn clear(&self) {
        self.placements.lock().clear();
    }
}

impl std::fmt::Debug for WorkerModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerModels")
            .field("placements", &self.placements.lock().len())
            .finish_non_exhaustive()
    }
}
