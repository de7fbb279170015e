mod dataset;
mod param;
mod sample;

pub mod prelude;

pub use dataset::Dataset;
pub use param::{ParamValue, Params};
pub use sample::{Sample, STATS_FIELD};
