use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::dispatcher::DispatcherInner;

/// Identifies a tracked subscription within a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(super) u64);

/// Handle to a logical subscription opened through the dispatcher.
///
/// Clones refer to the same subscription. Dropping a handle does not
/// unsubscribe; call [`Subscription::cleanup`].
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    channel_name: String,
    dispatcher: Weak<DispatcherInner>,
    cleaned: Arc<AtomicBool>,
}

impl Subscription {
    pub(super) fn new(id: SubscriptionId, channel_name: &str, dispatcher: Weak<DispatcherInner>) -> Self {
        Self {
            id,
            channel_name: channel_name.to_string(),
            dispatcher,
            cleaned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// True while events are flowing: tracked, attached to a pooled channel,
    /// and not cleaned up.
    pub fn is_active(&self) -> bool {
        if self.cleaned.load(Ordering::SeqCst) {
            return false;
        }
        self.dispatcher
            .upgrade()
            .is_some_and(|inner| inner.is_attached(self.id))
    }

    /// Detaches the listener and releases the pooled channel reference.
    ///
    /// The channel itself stays open until the pool reclaims it. Safe to call
    /// repeatedly.
    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.forget(self.id);
        }
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel_name)
            .field("cleaned", &self.is_cleaned_up())
            .finish()
    }
}
