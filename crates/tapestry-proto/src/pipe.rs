//! The `Pipe` contract (spec §6): an external collaborator out of scope
//! except by the interface it exposes. Archive unzipping, file discovery,
//! and provider-specific record parsing live behind this trait.

use serde_json::Value;

use crate::thread::ThreadRow;

/// One raw record extracted from an archive file, not yet normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub uri: String,
    pub payload: Value,
}

/// The outcome of running one pipe's `transform` step over a batch of
/// extracted records: rows ready for `Store::insert_threads`, plus any
/// records the pipe declined to transform.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub rows: Vec<ThreadRow>,
    pub skipped: u64,
}

/// Turns provider-specific archive files into uniform thread rows.
///
/// A concrete pipe declares its tags (`provider`, `interaction_type`,
/// `archive_version`, `archive_path_pattern`) as associated constants and
/// implements extraction/transformation. Implementations live outside this
/// crate; only the contract is specified here.
pub trait Pipe {
    /// Provider tag, e.g. `"chatgpt"`.
    fn provider(&self) -> &'static str;

    /// Interaction type tag, e.g. `"chat_message"`.
    fn interaction_type(&self) -> &'static str;

    /// Archive format version this pipe understands.
    fn archive_version(&self) -> &'static str;

    /// Glob pattern matching files this pipe can extract from an archive.
    fn archive_path_pattern(&self) -> &'static str;

    /// Extracts raw records from one archive file.
    fn extract_file(&self, uri: &str) -> Result<Vec<Record>, crate::error::ProtoError>;

    /// Normalizes one extracted record into a thread row, or `None` if the
    /// record does not produce a thread (e.g. a non-message system event).
    fn transform(&self, record: &Record, task_id: &str) -> Option<ThreadRow>;
}
