//! Roles a component can play inside a scatter-gather composition.
//!
//! Implementing a role is what lets [`ScatterGatherHandler`](crate::ScatterGatherHandler)
//! accept a component; there is no runtime type inspection.

use std::sync::Arc;

use junction_core::{BoxedHandler, ChannelRef};

/// Distributes a request to several recipients.
pub trait Scatterer: Send + Sync {
    /// Returns this scatterer as a message handler.
    fn as_handler(self: Arc<Self>) -> BoxedHandler;
}

/// Collects recipient replies into one result.
pub trait Gatherer: Send + Sync {
    /// Returns the channel results are sent to, if set.
    fn output_channel(&self) -> Option<ChannelRef>;

    /// Sets the channel results are sent to.
    fn set_output_channel(&self, channel: ChannelRef);

    /// Returns this gatherer as a message handler.
    fn as_handler(self: Arc<Self>) -> BoxedHandler;
}
