//! Configuration for Junction runtimes.
//!
//! Settings are loaded with [`ConfigLoader`] from layered sources (defaults,
//! profile file, main file, `JUNCTION_*` environment variables) and checked
//! with [`validate_config`] before a runtime is built from them.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AggregatorConfig, JunctionConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    ReaperConfig, ScatterGatherConfig, SpanEventConfig, StoreConfig, StoreKind,
};
pub use validation::validate_config;
