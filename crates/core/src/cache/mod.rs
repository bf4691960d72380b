mod entry;
mod error;
mod keys;
mod serialization;
mod traits;

pub use entry::{CacheEntry, CacheStats, EntryStats, DEFAULT_TTL};
pub use error::{CacheError, Result};
pub use keys::{
    projects_channel, submissions_channel, task_board_key, task_board_pattern, task_channel,
    tasks_channel,
};
pub use serialization::{deserialize_value, serialize_value, SerializationError};
pub use traits::{Cache, CacheExt};
