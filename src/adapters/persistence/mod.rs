//! Persistence Adapters - Key/Value Cursor Storage
//!
//! Implements the `KeyValueStore` port with an atomic JSON file for
//! production and an in-memory map for embedding and tests.
//! No database dependency; a crash leaves the last complete write.

pub mod file_store;
pub mod memory_store;

pub use file_store::JsonFileStore;
pub use memory_store::MemoryStore;
