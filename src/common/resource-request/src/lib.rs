use std::hash::{Hash, Hasher};

use common_error::{SieveError, SieveResult};
use common_hashable_float_wrapper::FloatWrapper;
use common_system_info::SystemInfo;
use serde::{Deserialize, Serialize};

/// Smallest per-worker CPU share considered when deriving a worker count.
pub const CPU_EPSILON: f64 = 1e-6;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Resources one worker of an operator asks for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub wants_gpu: bool,
    /// Upper bound on the worker count; `None` lets the allocator derive one from CPU.
    pub declared_num_proc: Option<usize>,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            cpu_cores: 1.0,
            memory_gb: 0.0,
            wants_gpu: false,
            declared_num_proc: None,
        }
    }
}

impl ResourceRequest {
    pub fn new_internal(
        cpu_cores: f64,
        memory_gb: f64,
        wants_gpu: bool,
        declared_num_proc: Option<usize>,
    ) -> Self {
        Self {
            cpu_cores,
            memory_gb,
            wants_gpu,
            declared_num_proc: declared_num_proc.filter(|n| *n > 0),
        }
    }

    #[must_use]
    pub fn with_cpu_cores(&self, cpu_cores: f64) -> Self {
        Self {
            cpu_cores,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_memory_gb(&self, memory_gb: f64) -> Self {
        Self {
            memory_gb,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_gpu(&self, wants_gpu: bool) -> Self {
        Self {
            wants_gpu,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_num_proc(&self, num_proc: Option<usize>) -> Self {
        Self {
            declared_num_proc: num_proc.filter(|n| *n > 0),
            ..self.clone()
        }
    }

    /// Falls back to a recipe-wide worker count when none was declared.
    #[must_use]
    pub fn or_num_proc(&self, num_proc: Option<usize>) -> Self {
        Self {
            declared_num_proc: self.declared_num_proc.or(num_proc.filter(|n| *n > 0)),
            ..self.clone()
        }
    }

    /// Field-wise max, for running several operators in one worker. A declared
    /// worker count is an upper bound, so the tighter one wins.
    #[must_use]
    pub fn max(&self, other: &Self) -> Self {
        let declared_num_proc = match (self.declared_num_proc, other.declared_num_proc) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            cpu_cores: self.cpu_cores.max(other.cpu_cores),
            memory_gb: self.memory_gb.max(other.memory_gb),
            wants_gpu: self.wants_gpu || other.wants_gpu,
            declared_num_proc,
        }
    }

    pub fn max_all(resource_requests: &[&Self]) -> Self {
        match resource_requests.split_first() {
            Some((first, rest)) => rest.iter().fold((*first).clone(), |acc, e| acc.max(e)),
            None => Self::default(),
        }
    }

    pub fn multiline_display(&self) -> Vec<String> {
        let mut requests = vec![format!("cpu_cores = {}", self.cpu_cores)];
        if self.memory_gb > 0.0 {
            requests.push(format!("memory_gb = {}", self.memory_gb));
        }
        if self.wants_gpu {
            requests.push("accelerator = cuda".to_string());
        }
        if let Some(num_proc) = self.declared_num_proc {
            requests.push(format!("num_proc = {}", num_proc));
        }
        requests
    }
}

impl Eq for ResourceRequest {}

impl Hash for ResourceRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        FloatWrapper(self.cpu_cores).hash(state);
        FloatWrapper(self.memory_gb).hash(state);
        self.wants_gpu.hash(state);
        self.declared_num_proc.hash(state);
    }
}

/// What the host offers to a single step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostCapacity {
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub gpu_count: usize,
}

impl HostCapacity {
    pub fn new(cpu_cores: f64, memory_gb: f64, gpu_count: usize) -> Self {
        Self {
            cpu_cores,
            memory_gb,
            gpu_count,
        }
    }

    /// Inspects the machine this process is running on.
    pub fn from_system(system: &SystemInfo) -> Self {
        Self {
            cpu_cores: system.cpu_count() as f64,
            memory_gb: system.total_memory() as f64 / BYTES_PER_GB,
            gpu_count: system.gpu_count(),
        }
    }

    /// Replaces any detected value for which an override is given.
    #[must_use]
    pub fn with_overrides(
        &self,
        cpu_cores: Option<f64>,
        memory_gb: Option<f64>,
        gpu_count: Option<usize>,
    ) -> Self {
        Self {
            cpu_cores: cpu_cores.unwrap_or(self.cpu_cores),
            memory_gb: memory_gb.unwrap_or(self.memory_gb),
            gpu_count: gpu_count.unwrap_or(self.gpu_count),
        }
    }
}

impl std::fmt::Display for HostCapacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cpu, {:.2} GB, {} gpu",
            self.cpu_cores, self.memory_gb, self.gpu_count
        )
    }
}

/// Concrete worker plan for one step.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Allocation {
    pub worker_count: usize,
    /// GPU rank per worker, empty when the step runs on CPU only.
    pub gpu_ranks: Vec<usize>,
}

impl Allocation {
    pub fn single() -> Self {
        Self {
            worker_count: 1,
            gpu_ranks: vec![],
        }
    }

    pub fn gpu_rank_for(&self, worker: usize) -> Option<usize> {
        self.gpu_ranks.get(worker).copied()
    }

    pub fn uses_gpu(&self) -> bool {
        !self.gpu_ranks.is_empty()
    }

    pub fn multiline_display(&self) -> Vec<String> {
        let mut res = vec![format!("workers = {}", self.worker_count)];
        if self.uses_gpu() {
            res.push(format!("gpu_ranks = {:?}", self.gpu_ranks));
        }
        res
    }
}

/// Derives how many workers `op_name` runs with and which GPU each one gets.
///
/// The worker count starts at `floor(host.cpu_cores / request.cpu_cores)`, is capped by
/// a declared `num_proc` (and by the GPU count for accelerated operators that declare
/// one), then lowered until the summed memory request fits.
pub fn allocate(
    op_name: &str,
    request: &ResourceRequest,
    host: &HostCapacity,
) -> SieveResult<Allocation> {
    if request.wants_gpu && host.gpu_count == 0 {
        return Err(SieveError::NoAcceleratorAvailable {
            op_name: op_name.to_string(),
        });
    }
    if request.cpu_cores > host.cpu_cores {
        return Err(SieveError::InsufficientResources {
            op_name: op_name.to_string(),
            requested: format!("{} CPUs", request.cpu_cores),
            available: format!("{} CPUs", host.cpu_cores),
        });
    }

    let cpu_per_worker = request.cpu_cores.max(CPU_EPSILON);
    let cpu_bound = ((host.cpu_cores / cpu_per_worker).floor() as usize).max(1);

    let mut worker_count = match request.declared_num_proc.filter(|n| *n > 0) {
        Some(declared) => {
            let mut bounded = declared.min(cpu_bound);
            if request.wants_gpu {
                bounded = bounded.min(host.gpu_count);
            }
            if bounded < declared {
                log::debug!(
                    "`{}` declared num_proc = {} but the host fits only {}",
                    op_name,
                    declared,
                    bounded
                );
            }
            bounded
        }
        None => cpu_bound,
    };

    if request.memory_gb > 0.0 && request.memory_gb * worker_count as f64 > host.memory_gb {
        let fits = (host.memory_gb / request.memory_gb).floor() as usize;
        if fits == 0 {
            log::warn!(
                "`{}` requested {} GB per worker but the host only has {:.2} GB; running a single worker",
                op_name,
                request.memory_gb,
                host.memory_gb
            );
        }
        worker_count = worker_count.min(fits.max(1));
    }

    let gpu_ranks = if request.wants_gpu {
        (0..worker_count).map(|i| i % host.gpu_count).collect()
    } else {
        vec![]
    };

    Ok(Allocation {
        worker_count,
        gpu_ranks,
    })
}
