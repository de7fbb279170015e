use std::{
    fmt::{self, Write},
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use serde::Serialize;
use sieve_ops::OperatorKind;

/// Time spent by the workers of one step.
#[derive(Default)]
pub(crate) struct StepStatsContext {
    cpu_us: AtomicU64,
}

impl StepStatsContext {
    /// Runs `f`, charging its wall time to this step.
    pub(crate) fn timed<T>(&self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.cpu_us
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        result
    }

    pub(crate) fn cpu_us(&self) -> u64 {
        self.cpu_us.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepStats {
    pub step_index: usize,
    pub name: String,
    pub kind: OperatorKind,
    /// Number of recipe operators this step ran.
    pub num_ops: usize,
    pub rows_in: u64,
    pub rows_out: u64,
    pub workers: usize,
    pub gpu_ranks: Vec<usize>,
    pub cpu_us: u64,
}

impl StepStats {
    pub(crate) fn display<W: Write>(&self, w: &mut W) -> Result<(), fmt::Error> {
        write!(
            w,
            "{:>3}  {:<48} {:>10} -> {:<10} workers={}",
            self.step_index, self.name, self.rows_in, self.rows_out, self.workers
        )?;
        if !self.gpu_ranks.is_empty() {
            write!(w, " gpus={:?}", self.gpu_ranks)?;
        }
        writeln!(w, " cpu={}ms", self.cpu_us / 1000)
    }
}

/// Summary of one pipeline run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub rows_ingested: u64,
    pub steps: Vec<StepStats>,
    pub rows_exported: Option<u64>,
    pub export_location: Option<String>,
}

impl RunReport {
    pub fn rows_out(&self) -> u64 {
        self.steps
            .last()
            .map_or(self.rows_ingested, |step| step.rows_out)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rows ingested = {}", self.rows_ingested)?;
        for step in &self.steps {
            step.display(f)?;
        }
        match (&self.export_location, self.rows_exported) {
            (Some(location), Some(rows)) => write!(f, "Rows exported = {rows} to {location}"),
            _ => write!(f, "Not exported"),
        }
    }
}
