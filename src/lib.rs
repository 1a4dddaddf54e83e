pub mod config;
pub mod cooldown;
pub mod enricher;
pub mod fetch;
pub mod filters;
pub mod models;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod sinks;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use utils::error::{AppError, Result};
