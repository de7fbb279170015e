mod error;
mod macros;

pub use error::{GenericError, SieveError, SieveResult};
