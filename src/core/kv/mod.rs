//! Key/value store implementations
//!
//! - **MemoryStore**: `DashMap`-backed, shared across tasks, not durable
//! - **JsonFileStore**: one JSON document on disk, durable across restarts
//!
//! Both implement [`KeyValueStore`](crate::core::traits::KeyValueStore) and
//! are interchangeable under the queue store.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
