mod cache;
mod key;
mod placement;
mod provider;

pub use cache::{CacheStats, ModelCache, ModelHandle};
pub use key::{Device, ModelKey};
pub use placement::WorkerModels;
pub use provider::{ModelObject, ModelProvider, ModelProviders};
