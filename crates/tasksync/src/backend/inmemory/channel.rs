//! In-memory realtime channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use tasksync_core::realtime::{
    ChangeBinding, ChangeListener, ChannelState, ListenerId, RawChange, RealtimeChannel,
    RealtimeError, Result,
};

/// Scripted subscribe outcomes keyed by channel name, consumed once.
pub(super) type SubscribeFailures = Arc<Mutex<HashMap<String, ChannelState>>>;

/// A channel handle delivering changes written to an [`super::InMemoryBackend`].
pub struct InMemoryChannel {
    name: String,
    next_listener: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, ChangeBinding, ChangeListener)>>,
    state: watch::Sender<ChannelState>,
    failures: SubscribeFailures,
}

impl InMemoryChannel {
    pub(super) fn new(name: &str, failures: SubscribeFailures) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        Self {
            name: name.to_string(),
            next_listener: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
            state,
            failures,
        }
    }

    /// Current lifecycle state.
    pub fn current_state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Forces the lifecycle state, as a dropped connection would.
    pub fn force_state(&self, state: ChannelState) {
        tracing::debug!(channel = %self.name, ?state, "Forcing channel state");
        self.state.send_replace(state);
    }

    /// Delivers a change to matching listeners. Returns how many were called.
    ///
    /// Nothing is delivered unless the channel is subscribed.
    pub(super) fn deliver(&self, change: &RawChange) -> usize {
        if *self.state.borrow() != ChannelState::Subscribed {
            return 0;
        }

        let matching: Vec<ChangeListener> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, binding, _)| binding.matches(change))
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in &matching {
            listener(change);
        }
        matching.len()
    }
}

impl fmt::Debug for InMemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryChannel")
            .field("name", &self.name)
            .field("state", &*self.state.borrow())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[async_trait]
impl RealtimeChannel for InMemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn listen(&self, binding: ChangeBinding, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, binding, listener));
        id
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _, _)| *listener_id != id);
        listeners.len() != before
    }

    fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    async fn subscribe(&self) -> Result<()> {
        if *self.state.borrow() == ChannelState::Subscribed {
            return Ok(());
        }

        self.state.send_replace(ChannelState::Joining);
        tokio::task::yield_now().await;

        let scripted = self.failures.lock().remove(&self.name);
        match scripted {
            None | Some(ChannelState::Subscribed) => {
                self.state.send_replace(ChannelState::Subscribed);
                Ok(())
            }
            Some(state) => {
                self.state.send_replace(state.clone());
                Err(match state {
                    ChannelState::TimedOut => RealtimeError::SubscribeTimeout(self.name.clone()),
                    ChannelState::Errored(reason) => RealtimeError::SubscribeFailed {
                        channel: self.name.clone(),
                        reason,
                    },
                    _ => RealtimeError::ChannelClosed(self.name.clone()),
                })
            }
        }
    }

    async fn unsubscribe(&self) {
        self.state.send_replace(ChannelState::Closed);
    }
}
