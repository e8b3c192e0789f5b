//! runnerscale-core: configuration shared by the runnerscale crates.

pub mod config;
pub mod duration;
pub mod error;

pub use config::{ControllerSettings, RunnerscaleConfig};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
