//! Batch orchestration core: grouper, batch factory, state catalog,
//! per-category managers, runner/scheduler, discovery, and reference
//! `Store`/`LlmJobClient` implementations.

pub mod batch_factory;
pub mod batch_manager;
pub mod config;
pub mod discovery;
pub mod error;
pub mod facade;
pub mod file_lock;
pub mod grouper;
pub mod llm;
pub mod managers;
pub mod runner;
pub mod state_catalog;
pub mod store;

pub use batch_factory::BatchFactory;
pub use config::CoreConfig;
pub use error::OrchestratorError;
pub use facade::Facade;
pub use grouper::{CollectionGrouper, Grouper, WindowGrouper};
pub use llm::{EagerLlmClient, EagerLlmConfig};
pub use managers::{MemoriesManager, MemoryCandidatesManager, RefinementManager};
pub use runner::{run_batch, run_batches, run_pipeline, ImmediateRunPolicy, RunPolicy};
pub use store::{FileStore, InMemoryStore};
