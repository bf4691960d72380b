use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{ChangeBinding, ChannelState, RawChange, Result};

/// Callback invoked for every raw change that matches a binding.
///
/// Listeners run synchronously on the thread that delivers the change and
/// must not block.
pub type ChangeListener = Arc<dyn Fn(&RawChange) + Send + Sync>;

/// Identifies a listener attached to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// A physical backend channel multiplexing change listeners.
#[async_trait]
pub trait RealtimeChannel: Send + Sync + Debug {
    /// Name the channel was opened with.
    fn name(&self) -> &str;

    /// Attaches a listener scoped to `binding`.
    fn listen(&self, binding: ChangeBinding, listener: ChangeListener) -> ListenerId;

    /// Detaches a listener. Returns true if it was attached.
    fn unlisten(&self, id: ListenerId) -> bool;

    /// Number of attached listeners.
    fn listener_count(&self) -> usize;

    /// Watches the channel lifecycle state.
    fn state(&self) -> watch::Receiver<ChannelState>;

    /// Joins the channel and waits until it is subscribed.
    ///
    /// Returns immediately if already subscribed.
    async fn subscribe(&self) -> Result<()>;

    /// Leaves the channel. Listeners stay attached but receive nothing.
    async fn unsubscribe(&self);
}

/// Factory for physical channels.
pub trait RealtimeClient: Send + Sync {
    /// Opens a new channel handle named `name`.
    fn channel(&self, name: &str) -> Arc<dyn RealtimeChannel>;

    /// Tears down a channel and releases its backend resources.
    fn remove_channel(&self, channel: &Arc<dyn RealtimeChannel>);
}
