//! Runtime orchestration: shared store, preconfigured builders and component lifecycles.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use junction_runtime::IntegrationRuntime;
//!
//! let runtime = IntegrationRuntime::builder()
//!     .config_file("config/junction.toml")
//!     .build()
//!     .await?;
//!
//! let gatherer = runtime.aggregator().build();
//! let auction = runtime.scatter_gather(Scatter::Channel(channel), gatherer).build()?;
//! runtime.register("auction", auction.clone())?;
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use junction_core::Lifecycle;
use junction_framework::{
    AggregatorBuilder, FileBackend, Gatherer, MessageGroupStoreReaper, PersistentMessageGroupStore,
    Scatter, ScatterGatherBuilder, ScatterGatherHandler, SharedStore, SimpleMessageStore,
};
use parking_lot::RwLock;
use tokio::signal;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoader, JunctionConfig, StoreConfig, StoreKind, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Name under which the configured reaper is registered.
pub const REAPER_COMPONENT: &str = "reaper";

struct Component {
    name: String,
    lifecycle: Arc<dyn Lifecycle>,
}

/// Owns the shared message-group store and the lifecycle of registered components.
///
/// Components start in registration order and stop in reverse order. A
/// component registered while the runtime is running is started right away.
pub struct IntegrationRuntime {
    config: JunctionConfig,
    store: SharedStore,
    components: RwLock<Vec<Component>>,
    running: AtomicBool,
}

impl IntegrationRuntime {
    /// Creates a runtime builder that loads configuration from the default locations.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from a loaded configuration.
    ///
    /// Validates the configuration, initializes logging, opens the store and
    /// registers a reaper when one is enabled.
    pub async fn from_config(config: JunctionConfig) -> RuntimeResult<Self> {
        validate_config(&config)?;
        logging::init_from_config(&config.logging);

        let store = Self::open_store(&config.store).await?;
        let runtime = Self {
            config,
            store,
            components: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
        };

        if runtime.config.reaper.enabled {
            let reaper = MessageGroupStoreReaper::new(runtime.store.clone())
                .with_interval(runtime.config.reaper.interval())
                .with_timeout(runtime.config.reaper.timeout());
            runtime.register(REAPER_COMPONENT, Arc::new(reaper))?;
        }

        info!(
            log_level = %runtime.config.logging.level,
            store = ?runtime.config.store.kind,
            reaper = runtime.config.reaper.enabled,
            "Runtime initialized from configuration"
        );
        Ok(runtime)
    }

    async fn open_store(config: &StoreConfig) -> RuntimeResult<SharedStore> {
        let store: SharedStore = match (config.kind, &config.directory) {
            (StoreKind::Memory, _) => {
                let mut store = SimpleMessageStore::new().with_timeout_on_idle(config.timeout_on_idle);
                if let Some(capacity) = config.group_capacity {
                    store = store.with_group_capacity(capacity);
                }
                Arc::new(store)
            }
            (StoreKind::File, Some(directory)) => {
                let backend = FileBackend::open(directory).await?;
                debug!(directory = %directory.display(), "Opened file message store");
                Arc::new(PersistentMessageGroupStore::new(backend).with_timeout_on_idle(config.timeout_on_idle))
            }
            (StoreKind::File, None) => {
                return Err(crate::config::ConfigError::missing_field("store.directory").into());
            }
        };
        Ok(store)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &JunctionConfig {
        &self.config
    }

    /// Returns the shared message-group store.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Returns an aggregator builder using the shared store and the configured defaults.
    pub fn aggregator(&self) -> AggregatorBuilder {
        let defaults = &self.config.aggregator;
        let mut builder = AggregatorBuilder::default()
            .with_store(self.store.clone())
            .with_expire_groups_upon_completion(defaults.expire_groups_upon_completion)
            .with_send_partial_result_on_expiry(defaults.send_partial_result_on_expiry)
            .with_expire_groups_upon_timeout(defaults.expire_groups_upon_timeout);
        if let Some(timeout) = defaults.group_timeout() {
            builder = builder.with_group_timeout(timeout);
        }
        if let Some(timeout) = defaults.send_timeout() {
            builder = builder.with_send_timeout(timeout);
        }
        builder
    }

    /// Returns a scatter-gather builder with the configured defaults.
    ///
    /// Auto-startup is off: [`register`](Self::register) the built handler so
    /// the runtime starts its gather endpoint.
    pub fn scatter_gather(&self, scatter: Scatter, gatherer: Arc<dyn Gatherer>) -> ScatterGatherBuilder {
        let defaults = &self.config.scatter_gather;
        ScatterGatherHandler::builder(scatter, gatherer)
            .with_gather_timeout(defaults.gather_timeout())
            .with_requires_reply(defaults.requires_reply)
            .with_auto_startup(false)
    }

    /// Registers a component under a unique name.
    pub fn register(&self, name: impl Into<String>, component: Arc<dyn Lifecycle>) -> RuntimeResult<()> {
        let name = name.into();
        let mut components = self.components.write();
        if components.iter().any(|c| c.name == name) {
            return Err(RuntimeError::ComponentExists(name));
        }
        if self.is_running() {
            component.start();
            debug!(component = %name, "Started component registered while running");
        }
        components.push(Component {
            name,
            lifecycle: component,
        });
        Ok(())
    }

    /// Looks up a registered component.
    pub fn component(&self, name: &str) -> Option<Arc<dyn Lifecycle>> {
        self.components
            .read()
            .iter()
            .find(|c| c.name == name)
            .map(|c| Arc::clone(&c.lifecycle))
    }

    /// Returns the names of registered components in start order.
    pub fn component_names(&self) -> Vec<String> {
        self.components.read().iter().map(|c| c.name.clone()).collect()
    }

    /// Returns whether the runtime is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts all registered components.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Runtime is already running");
            return;
        }
        for component in self.components.read().iter() {
            component.lifecycle.start();
            debug!(component = %component.name, "Component started");
        }
        info!("Runtime started");
    }

    /// Stops all registered components in reverse order.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            warn!("Runtime is not running");
            return;
        }
        for component in self.components.read().iter().rev() {
            component.lifecycle.stop();
            debug!(component = %component.name, "Component stopped");
        }
        info!("Runtime stopped");
    }

    /// Runs until Ctrl+C (or SIGTERM on unix).
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start();
        info!("Junction runtime is now running. Press Ctrl+C to stop.");
        let result = Self::wait_for_shutdown().await;
        self.stop();
        result
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.start();
        shutdown.await;
        self.stop();
    }

    async fn wait_for_shutdown() -> RuntimeResult<()> {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .map_err(RuntimeError::Signal)?;
            tokio::select! {
                result = signal::ctrl_c() => {
                    result.map_err(RuntimeError::Signal)?;
                    info!("Received Ctrl+C, shutting down");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
            info!("Received Ctrl+C, shutting down");
        }
        Ok(())
    }
}

impl std::fmt::Debug for IntegrationRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationRuntime")
            .field("components", &self.component_names())
            .field("running", &self.is_running())
            .finish()
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating an [`IntegrationRuntime`] with custom configuration loading.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Creates a builder searching the current directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables loading environment variables (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: JunctionConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads the configuration and builds the runtime.
    pub async fn build(self) -> RuntimeResult<IntegrationRuntime> {
        let config = self.config_loader.load()?;
        IntegrationRuntime::from_config(config).await
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_core::{
        Message, Payload, PublishSubscribeChannel, ServiceActivatingHandler, SubscribableChannel,
    };
    use junction_framework::MessageGroupStore;
    use std::time::Duration;

    fn auction_channel() -> Arc<PublishSubscribeChannel> {
        let channel = Arc::new(PublishSubscribeChannel::new("auction").with_apply_sequence(true));
        for (name, price) in [("a", 10_i64), ("b", 12_i64)] {
            channel.subscribe(Arc::new(ServiceActivatingHandler::new(
                name,
                move |_request: Message| async move { Ok(Some(Payload::from(price))) },
            )));
        }
        channel
    }

    #[tokio::test]
    async fn test_registered_scatter_gather_follows_runtime_lifecycle() {
        let mut config = JunctionConfig::default();
        config.aggregator.expire_groups_upon_completion = true;
        config.scatter_gather.gather_timeout_ms = 2_000;
        let runtime = IntegrationRuntime::from_config(config).await.unwrap();

        let gatherer = runtime.aggregator().build();
        let handler = runtime
            .scatter_gather(Scatter::Channel(auction_channel()), gatherer)
            .build()
            .unwrap();
        assert_eq!(handler.gather_timeout(), Duration::from_secs(2));
        runtime.register("auction", handler.clone()).unwrap();

        runtime.start();
        assert!(runtime.is_running());
        let reply = handler
            .handle_request_message(&Message::new("quote"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload().as_collection().map(<[Payload]>::len), Some(2));
        assert_eq!(runtime.store().message_group_count().await.unwrap(), 0);

        runtime.stop();
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_enabled_reaper_is_registered_and_started() {
        let mut config = JunctionConfig::default();
        config.reaper.enabled = true;
        config.reaper.interval_ms = 50;
        let runtime = IntegrationRuntime::from_config(config).await.unwrap();
        assert_eq!(runtime.component_names(), vec![REAPER_COMPONENT.to_string()]);

        let reaper = runtime.component(REAPER_COMPONENT).unwrap();
        assert!(!reaper.is_running());
        runtime.start();
        assert!(reaper.is_running());
        runtime.stop();
        assert!(!reaper.is_running());
    }

    #[tokio::test]
    async fn test_duplicate_component_names_are_rejected() {
        let runtime = IntegrationRuntime::from_config(JunctionConfig::default()).await.unwrap();
        let reaper = Arc::new(MessageGroupStoreReaper::new(runtime.store().clone()));
        runtime.register("sweeper", reaper.clone()).unwrap();
        let err = runtime.register("sweeper", reaper).unwrap_err();
        assert!(matches!(err, RuntimeError::ComponentExists(name) if name == "sweeper"));
    }

    #[tokio::test]
    async fn test_file_store_is_shared_across_runtimes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = JunctionConfig::default();
        config.store.kind = StoreKind::File;
        config.store.directory = Some(dir.path().to_path_buf());

        let first = IntegrationRuntime::from_config(config.clone()).await.unwrap();
        first
            .store()
            .add_message_to_group(&"order-1".into(), Message::new("part"))
            .await
            .unwrap();

        let second = IntegrationRuntime::from_config(config).await.unwrap();
        assert_eq!(second.store().message_count_for_all_groups().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = JunctionConfig::default();
        config.reaper.timeout_ms = 0;
        let err = IntegrationRuntime::from_config(config).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }
}
