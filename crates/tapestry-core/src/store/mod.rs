//! Reference `Store` implementations (spec §4.8): `InMemoryStore` for fast
//! unit/integration tests, and `FileStore`, a JSON-snapshot-backed
//! implementation guarded by the teacher's `FileLock`.
//!
//! Both wrap the same pure algorithm in `state::StoreState`.

mod state;

mod file_store;
mod in_memory_store;

pub use file_store::FileStore;
pub use in_memory_store::InMemoryStore;
