//! # Junction Framework
//!
//! Stateful correlation components built on `junction-core`.
//!
//! This layer provides:
//! - Correlation and release strategies ([`CorrelationStrategy`], [`ReleaseStrategy`])
//! - Message groups and their stores ([`MessageGroupStore`], [`SimpleMessageStore`],
//!   [`PersistentMessageGroupStore`]) with per-key locking ([`LockRegistry`])
//! - The aggregator ([`AggregatingMessageHandler`]) and its group processors
//! - The recipient-list router ([`RecipientListRouter`])
//! - Scatter-gather ([`ScatterGatherHandler`]) composing a [`Scatterer`] and a [`Gatherer`]
//! - Background expiry ([`MessageGroupStoreReaper`])
//!
//! ## Locking discipline
//!
//! All mutations of one group happen under the lock for its key. The
//! aggregator holds that lock from adding a message until the released group
//! has been removed; store expiry only try-locks. Releasing and expiring the
//! same group therefore never overlap, while unrelated keys proceed
//! concurrently.

pub mod aggregator;
pub mod correlation;
pub mod error;
pub mod group;
pub mod lock;
pub mod processor;
pub mod reaper;
pub mod release;
pub mod roles;
pub mod router;
pub mod scatter_gather;
pub mod store;

pub use aggregator::{AggregatingMessageHandler, AggregatorBuilder, NULL_CORRELATION};
pub use correlation::{
    CorrelationKey, CorrelationStrategy, FnCorrelationStrategy, HeaderAttributeCorrelationStrategy,
};
pub use error::{StoreError, StoreResult};
pub use group::MessageGroup;
pub use lock::{GroupLock, LockRegistry};
pub use processor::{
    DefaultAggregatingProcessor, FnGroupProcessor, MessageGroupProcessor, aggregate_headers,
};
pub use reaper::MessageGroupStoreReaper;
pub use release::{
    FnReleaseStrategy, MessageCountReleaseStrategy, ReleaseStrategy, SequenceSizeReleaseStrategy,
};
pub use roles::{Gatherer, Scatterer};
pub use router::{Recipient, RecipientListRouter};
pub use scatter_gather::{
    DEFAULT_GATHER_TIMEOUT, GATHER_RESULT_CHANNEL, GatherChannel, ORIGINAL_ERROR_CHANNEL,
    ORIGINAL_REPLY_CHANNEL, Scatter, ScatterGatherBuilder, ScatterGatherHandler,
};
pub use store::{
    ExpiryCallback, FileBackend, InMemoryBackend, MessageGroupStore, PersistentMessageGroupStore,
    SharedStore, SimpleMessageStore, StoreBackend,
};
