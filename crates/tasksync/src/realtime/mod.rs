//! Realtime plumbing: the channel pool and the change dispatcher built on it.

mod dispatcher;
mod pool;
mod subscription;

pub use dispatcher::RealtimeDispatcher;
pub use pool::{ChannelPool, PoolConfig, PoolStats, PooledChannelStats};
pub use subscription::{Subscription, SubscriptionId};
