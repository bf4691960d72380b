//! Backend implementations of `QueryBackend` and `RealtimeClient`.

pub mod inmemory;

pub use inmemory::InMemoryBackend;
