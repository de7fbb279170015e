//! Everything needed to read and write rows, for `use sieve_core::prelude::*`.

pub use crate::{Dataset, ParamValue, Params, Sample, STATS_FIELD};
