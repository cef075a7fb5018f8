//! Per-category batch managers (spec §4.5–§4.7): each implements
//! `batch_manager::Transition` for its category's state enum and wraps
//! itself as a `batch_manager::BatchManager` via the generic `advance`
//! driver, so `runner.rs` can hold a `Vec<Box<dyn BatchManager>>` spanning
//! every category.
//!
//! Grounded on `context_use/memories/manager.py`,
//! `context_use/memories/refinement/manager.py`, and
//! `context_use/pipelines/memory_candidates/manager.py`.

mod candidates;
mod memories;
mod refinement;

pub use candidates::MemoryCandidatesManager;
pub use memories::MemoriesManager;
pub use refinement::RefinementManager;
