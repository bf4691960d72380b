//! Functional core for tasksync.
//!
//! Pure data types and functions shared by the realtime cache shell:
//! cache entries and keys, the backend query model, change events and their
//! normalization, the task-board domain and its patch operations, and the
//! observer registry used for fan-out. Nothing in this crate performs I/O.

pub mod backend;
pub mod cache;
pub mod observer;
pub mod realtime;
pub mod tasks;
