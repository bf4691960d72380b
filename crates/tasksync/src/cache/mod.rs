//! Cache implementations of `tasksync_core::cache::Cache`.

mod memory;

pub use memory::MemoryCache;
