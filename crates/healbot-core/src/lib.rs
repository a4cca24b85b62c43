pub mod config;
pub mod error;
pub mod types;

pub use config::HealbotConfig;
pub use error::{HealbotError, Result};
pub use types::*;
