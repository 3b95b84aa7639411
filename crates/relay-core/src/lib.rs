pub mod artifact;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod io;
pub mod paths;
pub mod profile;
pub mod prompt;
pub mod sequencer;
pub mod skill;
pub mod store;
pub mod task;
pub mod types;

pub use error::{ConfigError, RelayError, Result};
