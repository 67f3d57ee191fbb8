pub mod config;
pub mod error;
pub mod logging;
pub mod update;

pub use config::{Config, RecordPolicy};
pub use error::{Result, UpdateError};
pub use update::{UpdateOutcome, Updater};
