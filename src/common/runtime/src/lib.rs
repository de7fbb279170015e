use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, LazyLock, OnceLock,
    },
    task::{Context, Poll},
};

use common_error::{SieveError, SieveResult};
use tokio::task::JoinSet;

static NUM_CPUS: LazyLock<usize> = LazyLock::new(|| {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
});
static COMPUTE_RUNTIME_NUM_WORKER_THREADS: OnceLock<usize> = OnceLock::new();

pub fn get_or_init_compute_runtime_num_worker_threads() -> usize {
    *COMPUTE_RUNTIME_NUM_WORKER_THREADS.get_or_init(|| *NUM_CPUS)
}

/// Sizes the compute runtime. Only possible before the runtime is first used.
pub fn set_compute_runtime_num_worker_threads(num_threads: usize) -> SieveResult<()> {
    if COMPUTE_RUNTIME.get().is_some() {
        return Err(SieveError::InternalError(format!(
            "Compute runtime already started with {} worker threads",
            get_or_init_compute_runtime_num_worker_threads()
        )));
    }
    COMPUTE_RUNTIME_NUM_WORKER_THREADS
        .set(num_threads.max(1))
        .map_err(|_| {
            SieveError::InternalError("Compute runtime num worker threads already set".to_string())
        })
}

static COMPUTE_RUNTIME: OnceLock<RuntimeRef> = OnceLock::new();
static IO_RUNTIME: OnceLock<RuntimeRef> = OnceLock::new();

pub type RuntimeRef = Arc<Runtime>;

#[derive(Clone, Debug)]
pub enum PoolType {
    Compute,
    IO,
}

// A spawned task on a Runtime that can be awaited
// This is a wrapper around a JoinSet that allows us to cancel the task by dropping it
pub struct RuntimeTask<T> {
    joinset: JoinSet<T>,
    pool_type: PoolType,
}

impl<T> RuntimeTask<T> {
    pub fn new<F>(handle: &tokio::runtime::Handle, future: F, pool_type: PoolType) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut joinset = JoinSet::new();
        joinset.spawn_on(future, handle);
        Self { joinset, pool_type }
    }
}

impl<T: Send + 'static> Future for RuntimeTask<T> {
    type Output = SieveResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pool_type = self.pool_type.clone();
        match self.joinset.poll_join_next(cx) {
            Poll::Ready(Some(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Some(Err(e))) if e.is_panic() => {
                let payload = e.into_panic();
                let msg = if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else {
                    "unknown internal error".to_string()
                };
                Poll::Ready(Err(SieveError::ComputeError(format!(
                    "Caught panic in task on the {:?} runtime: {}",
                    pool_type, msg
                ))))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Err(SieveError::External(e.into()))),
            Poll::Ready(None) => Poll::Ready(Err(SieveError::InternalError(
                "RuntimeTask polled after completion".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for RuntimeTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RuntimeTask(num_inflight_tasks={})", self.joinset.len())
    }
}

#[cfg_attr(debug_assertions, derive(Debug))]
pub struct Runtime {
    pub runtime: Arc<tokio::runtime::Runtime>,
    pool_type: PoolType,
}

impl Runtime {
    pub fn new(runtime: tokio::runtime::Runtime, pool_type: PoolType) -> RuntimeRef {
        Arc::new(Self {
            runtime: Arc::new(runtime),
            pool_type,
        })
    }

    /// Blocks current thread to compute future. Fails instead of blocking when called
    /// from inside a tokio runtime, where tokio would panic.
    pub fn block_on_current_thread<F: Future>(&self, future: F) -> SieveResult<F::Output> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(SieveError::InternalError(format!(
                "Cannot block on the {:?} runtime from inside an async context",
                self.pool_type
            )));
        }
        Ok(self.runtime.block_on(future))
    }

    // Spawn a task on the runtime
    pub fn spawn<F>(&self, future: F) -> RuntimeTask<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        RuntimeTask::new(self.runtime.handle(), future, self.pool_type.clone())
    }
}

fn build_runtime(
    pool_type: PoolType,
    num_worker_threads: usize,
    prefix: &'static str,
) -> SieveResult<RuntimeRef> {
    let thread_counter = Arc::new(AtomicUsize::new(0));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_worker_threads)
        .enable_all()
        .thread_name_fn(move || {
            let id = thread_counter.fetch_add(1, Ordering::SeqCst);
            format!("{prefix}-{id}")
        })
        .build()?;
    Ok(Runtime::new(runtime, pool_type))
}

fn init_runtime(
    cell: &'static OnceLock<RuntimeRef>,
    pool_type: PoolType,
    num_worker_threads: usize,
    prefix: &'static str,
) -> SieveResult<RuntimeRef> {
    if let Some(runtime) = cell.get() {
        return Ok(runtime.clone());
    }
    // Built on a separate thread so this can be called from inside another runtime.
    let runtime = std::thread::spawn(move || build_runtime(pool_type, num_worker_threads, prefix))
        .join()
        .map_err(|_| SieveError::InternalError("Runtime builder thread panicked".to_string()))??;
    Ok(cell.get_or_init(|| runtime).clone())
}

pub fn get_compute_runtime() -> SieveResult<RuntimeRef> {
    init_runtime(
        &COMPUTE_RUNTIME,
        PoolType::Compute,
        get_or_init_compute_runtime_num_worker_threads(),
        "SIEVECPU",
    )
}

pub fn get_io_runtime() -> SieveResult<RuntimeRef> {
    init_runtime(&IO_RUNTIME, PoolType::IO, 1, "SIEVEIO")
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use common_error::{SieveError, SieveResult};

    use super::{get_compute_runtime, set_compute_runtime_num_worker_threads};

    #[test]
    fn spawned_tasks_resolve_in_submission_order() -> SieveResult<()> {
        let runtime = get_compute_runtime()?;
        let tasks = (0..8usize)
            .map(|i| runtime.spawn(async move { i * 2 }))
            .collect::<Vec<_>>();
        let results = runtime.block_on_current_thread(async move {
            let mut out = Vec::new();
            for task in tasks {
                out.push(task.await?);
            }
            SieveResult::Ok(out)
        })??;
        assert_eq!(results, vec![0, 2, 4, 6, 8, 10, 12, 14]);
        Ok(())
    }

    #[test]
    fn panics_become_compute_errors() -> SieveResult<()> {
        let runtime = get_compute_runtime()?;
        let task = runtime.spawn(async { panic!("operator exploded") });
        let result: SieveResult<()> = runtime.block_on_current_thread(task)?;
        match result {
            Err(SieveError::ComputeError(msg)) => assert!(msg.contains("operator exploded")),
            other => panic!("expected a compute error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn spawned_task_cancelled_when_dropped() -> SieveResult<()> {
        let runtime = get_compute_runtime()?;
        let ptr = Arc::new(AtomicUsize::new(0));
        let ptr_clone = ptr.clone();

        let task = runtime.spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                ptr_clone.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(Arc::strong_count(&ptr), 2);
        drop(task);

        std::thread::sleep(std::time::Duration::from_millis(300));
        assert_eq!(Arc::strong_count(&ptr), 1);
        Ok(())
    }

    #[test]
    fn blocking_inside_a_runtime_is_an_error() -> SieveResult<()> {
        let runtime = get_compute_runtime()?;
        let inner = runtime.clone();
        let nested = runtime.block_on_current_thread(async move {
            inner.block_on_current_thread(async { 1 })
        })?;
        assert!(matches!(nested, Err(SieveError::InternalError(_))));
        Ok(())
    }

    #[test]
    fn thread_count_is_fixed_once_the_runtime_runs() -> SieveResult<()> {
        get_compute_runtime()?;
        assert!(matches!(
            set_compute_runtime_num_worker_threads(2),
            Err(SieveError::InternalError(_))
        ));
        Ok(())
    }
}
