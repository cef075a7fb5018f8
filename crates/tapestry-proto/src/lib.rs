//! Shared domain types and contracts for the tapestry batch orchestrator.
//!
//! This crate is the dependency-free leaf of the workspace: every other
//! crate depends on it, it depends on nothing workspace-internal. It
//! defines the data model (§3), the state algebra (§4.3), and the
//! `Store`/`LlmJobClient`/`Pipe` contracts that the orchestration core in
//! `tapestry-core` is built against.

pub mod archive;
pub mod batch;
pub mod error;
pub mod etl_task;
pub mod ids;
pub mod llm;
pub mod memory;
pub mod pipe;
pub mod state;
pub mod store;
pub mod thread;

pub use archive::{Archive, ArchiveStatus};
pub use batch::{Batch, BatchCategory, BatchThread};
pub use error::ProtoError;
pub use etl_task::{EtlTask, EtlTaskStatus};
pub use llm::{EmbedItem, LlmJobClient, PromptItem};
pub use memory::{
    EMBEDDING_DIMENSIONS, MemorySearchResult, MemoryStatus, TapestryMemory, TapestryProfile,
};
pub use pipe::{Pipe, PipelineResult, Record};
pub use state::{ScheduleInstruction, State, StateKind};
pub use store::Store;
pub use thread::{Thread, ThreadGroup, ThreadRow};
