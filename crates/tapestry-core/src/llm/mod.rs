//! Reference `LlmJobClient` implementation (spec §4.9).

mod eager_client;

pub use eager_client::{EagerLlmClient, EagerLlmConfig};
