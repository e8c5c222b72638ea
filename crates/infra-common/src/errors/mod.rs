pub mod context;
pub mod types;

pub use context::{ErrorContext, ErrorExt, ResultExt};
pub use types::{Error, Result};
