//! # Junction
//!
//! Message aggregation, correlation and scatter-gather for async Rust.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   ┌────────────────────────────┐   ┌───────────────────────┐
//! │   junction-runtime   │──▶│     junction-framework     │──▶│     junction-core     │
//! │ config, logging,     │   │ aggregator, group stores,  │   │ messages, channels,   │
//! │ component lifecycle  │   │ router, scatter-gather     │   │ dispatchers, endpoints│
//! └──────────────────────┘   └────────────────────────────┘   └───────────────────────┘
//! ```
//!
//! - **Messages** carry a payload and headers (correlation id, sequence
//!   number and size, reply and error channels).
//! - **Channels** move messages: queues, direct and publish-subscribe
//!   channels, broadcast streams.
//! - **The aggregator** correlates messages into groups held in a
//!   message-group store and releases each complete group as one message.
//! - **Scatter-gather** sends one request to many recipients and waits for
//!   the aggregated reply.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use junction::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = IntegrationRuntime::builder().build().await?;
//!
//!     let suppliers = Arc::new(PublishSubscribeChannel::new("suppliers").with_apply_sequence(true));
//!     suppliers.subscribe(Arc::new(ServiceActivatingHandler::new("acme", |_req: Message| async {
//!         Ok(Some(Payload::from(42_i64)))
//!     })));
//!
//!     let auction = runtime
//!         .scatter_gather(Scatter::Channel(suppliers), runtime.aggregator().build())
//!         .build()?;
//!     runtime.register("auction", auction.clone())?;
//!     runtime.start();
//!
//!     let best = auction.handle_request_message(&Message::new("quote")).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use junction_core as core;
pub use junction_framework as framework;
pub use junction_runtime as runtime;

/// Commonly used types for building integration flows.
///
/// ```rust,ignore
/// use junction::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime
    pub use junction_runtime::{IntegrationRuntime, JunctionConfig, LoggingBuilder};

    // Messages, channels and handlers
    pub use junction_core::prelude::*;
    pub use junction_core::{FixedSubscriberChannel, ServiceActivatingHandler};

    // Correlation and scatter-gather
    pub use junction_framework::{
        AggregatingMessageHandler, CorrelationKey, DefaultAggregatingProcessor, FnGroupProcessor,
        GatherChannel, MessageCountReleaseStrategy, MessageGroup, MessageGroupStore,
        RecipientListRouter, Scatter, ScatterGatherHandler, SequenceSizeReleaseStrategy,
    };

    pub use junction_core::async_trait;
}
