mod error;
mod normalize;
mod traits;
mod types;

pub use error::{NormalizeError, RealtimeError, Result};
pub use normalize::normalize;
pub use traits::{ChangeListener, ListenerId, RealtimeChannel, RealtimeClient};
pub use types::{
    has_image, ChangeBinding, ChangeEvent, ChangeKind, ChannelState, ConnectionStatus, RawChange,
    RawEventType,
};
