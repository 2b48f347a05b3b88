//! Junction Runtime - configuration, logging and lifecycle for Junction applications.
//!
//! This crate provides:
//! - Layered configuration loading and validation ([`ConfigLoader`], [`JunctionConfig`])
//! - Logging setup on `tracing-subscriber` ([`LoggingBuilder`], [`SpanEvents`])
//! - Runtime orchestration ([`IntegrationRuntime`]): the shared message-group
//!   store, builders preconfigured from configuration, an optional reaper,
//!   and start/stop of registered components
//!
//! ```ignore
//! use junction_runtime::IntegrationRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = IntegrationRuntime::builder().build().await?;
//!
//!     let gatherer = runtime.aggregator().build();
//!     let auction = runtime.scatter_gather(scatter, gatherer).build()?;
//!     runtime.register("auction", auction)?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, JunctionConfig, LoggingConfig, Profile, load_config,
    load_config_from_file, validate_config,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents, init_from_config};
pub use runtime::{IntegrationRuntime, REAPER_COMPONENT, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and span helpers.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
