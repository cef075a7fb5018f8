//! Thin orchestration wiring pipes → store → factories → runner for the
//! end-user operations spec §2 names (out of scope for the core per spec
//! §1, specified here only as the glue the core's own pieces compose
//! into).
//!
//! Grounded on `context_use/facade/core.py`'s `ContextUse.process_archive`/
//! `generate_memories`/`refine_memories` two-to-three-phase pattern: a
//! short phase that creates rows and discovers work, followed by a phase
//! that runs the pipeline, so a crash during discovery never leaves a
//! partially-run batch behind.

use std::sync::Arc;

use tapestry_proto::{
    Archive, ArchiveStatus, BatchCategory, EtlTask, EtlTaskStatus, LlmJobClient, Pipe, Store,
};
use tracing::{error, info, warn};

use crate::batch_factory::BatchFactory;
use crate::batch_manager::BatchManager;
use crate::config::CoreConfig;
use crate::error::OrchestratorError;
use crate::grouper::Grouper;
use crate::managers::{MemoriesManager, RefinementManager};
use crate::runner::{run_pipeline, ImmediateRunPolicy, RunPolicy};
use crate::state_catalog::RefinementState;

/// Aggregated result of one `process_archive` call (spec §7's user-visible
/// aggregate shape).
#[derive(Debug, Clone, Default)]
pub struct IngestResult {
    pub archive_id: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub threads_created: u64,
    pub errors: Vec<String>,
}

/// Aggregated result of one `generate_memories` call.
#[derive(Debug, Clone, Default)]
pub struct MemoriesResult {
    pub tasks_processed: u64,
    pub batches_created: u64,
}

/// Aggregated result of one `refine_memories` call.
#[derive(Debug, Clone, Default)]
pub struct RefinementResult {
    pub seed_count: u64,
    pub batches_created: u64,
}

/// Wires a `Pipe` against one ETL task: extracts every source URI, runs
/// `transform`, and inserts the resulting rows.
async fn run_pipe(
    pipe: &dyn Pipe,
    task: &EtlTask,
    store: &dyn Store,
) -> Result<u64, OrchestratorError> {
    let mut rows = Vec::new();
    for uri in &task.source_uris {
        let records = pipe
            .extract_file(uri)
            .map_err(OrchestratorError::from)?;
        for record in &records {
            if let Some(row) = pipe.transform(record, &task.id) {
                rows.push(row);
            }
        }
    }

    let inserted = store.insert_threads(rows, &task.id).await?;
    Ok(inserted)
}

/// Orchestration facade: wires pipes → store → batch factories → runner.
///
/// Owns no state beyond its collaborators; every operation re-reads
/// whatever it needs from the store, so a facade instance is cheap to
/// construct per call and safe to share behind an `Arc`.
pub struct Facade {
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmJobClient>,
    config: CoreConfig,
}

impl Facade {
    pub fn new(store: Arc<dyn Store>, llm: Arc<dyn LlmJobClient>, config: CoreConfig) -> Self {
        Self { store, llm, config }
    }

    /// Phase 1: creates the archive row. Phase 2: runs every pipe against
    /// its task, each task's failure isolated from its siblings. Phase 3:
    /// marks the archive `Completed` or `Failed` depending on whether any
    /// task failed.
    pub async fn process_archive(
        &self,
        provider: &str,
        tasks: Vec<(String, String, Vec<String>)>,
        pipes: &[(&'static str, &'static str, &dyn Pipe)],
    ) -> Result<IngestResult, OrchestratorError> {
        let archive = self.store.create_archive(Archive::new(provider, Vec::new())).await?;
        let mut result = IngestResult { archive_id: archive.id.clone(), ..Default::default() };

        if tasks.is_empty() {
            warn!(archive_id = %archive.id, "no tasks discovered for archive");
        }

        let mut any_failed = false;
        for (interaction_type, _version, source_uris) in tasks {
            let task = self
                .store
                .create_task(EtlTask::new(&archive.id, provider, &interaction_type, source_uris))
                .await?;

            let Some((_, _, pipe)) = pipes
                .iter()
                .find(|(p, it, _)| *p == provider && *it == interaction_type)
            else {
                warn!(archive_id = %archive.id, interaction_type, "no pipe registered, skipping task");
                continue;
            };

            let mut task = task;
            match run_pipe(*pipe, &task, self.store.as_ref()).await {
                Ok(count) => {
                    task.status = EtlTaskStatus::Completed;
                    task.extracted_count = count;
                    task.transformed_count = count;
                    task.uploaded_count = count;
                    self.store.update_task(task).await?;
                    result.tasks_completed += 1;
                    result.threads_created += count;
                }
                Err(err) => {
                    error!(archive_id = %archive.id, interaction_type, %err, "etl task failed");
                    task.status = EtlTaskStatus::Failed;
                    self.store.update_task(task).await?;
                    result.tasks_failed += 1;
                    result.errors.push(err.message());
                    any_failed = true;
                }
            }
        }

        let mut archive = archive;
        archive.status = if any_failed { ArchiveStatus::Failed } else { ArchiveStatus::Completed };
        self.store.update_archive(archive).await?;

        Ok(result)
    }

    /// Phase 1: groups each archive's threads and bin-packs them into
    /// `memories` batches. Phase 2: runs the resulting batches to
    /// completion under the default admission policy.
    pub async fn generate_memories(
        &self,
        archive_ids: &[String],
        grouper: &dyn Grouper,
    ) -> Result<MemoriesResult, OrchestratorError> {
        let tasks = self.store.get_tasks_by_archive(archive_ids).await?;
        let task_ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let threads = self.store.get_threads_by_task(&task_ids).await?;

        let mut result = MemoriesResult { tasks_processed: tasks.len() as u64, ..Default::default() };

        let groups = grouper.group(threads)?;
        let factory = BatchFactory::new(vec![BatchCategory::Memories], self.config.batch.max_groups_per_batch);
        let batches = factory.create_batches(groups, self.store.as_ref()).await?;
        result.batches_created = batches.len() as u64;

        if !batches.is_empty() {
            let managers: Vec<Box<dyn BatchManager>> = batches
                .into_iter()
                .map(|b| {
                    Box::new(MemoriesManager::new(
                        b.id,
                        self.store.clone(),
                        self.llm.clone(),
                        self.config.batch.clone(),
                        self.config.memories.clone(),
                    )) as Box<dyn BatchManager>
                })
                .collect();
            run_pipeline(managers, &ImmediateRunPolicy).await;
        }

        Ok(result)
    }

    /// Phase 1: fetches refinable seed ids and creates a single refinement
    /// batch covering all of them (spec §9's Open Question: fixed
    /// `batch_number = 1`, no bin-packing). Phase 2: runs it to completion.
    pub async fn refine_memories(&self) -> Result<RefinementResult, OrchestratorError> {
        let seed_ids = self.store.get_refinable_memory_ids().await?;
        let mut result = RefinementResult { seed_count: seed_ids.len() as u64, ..Default::default() };

        if seed_ids.is_empty() {
            info!("no seed memories for refinement");
            return Ok(result);
        }

        let initial_state = RefinementState::refinement_created(seed_ids.clone()).to_value();
        let batch = tapestry_proto::Batch::new(1, BatchCategory::Refinement, initial_state);
        let batch = self.store.create_batch(batch, &[]).await?;
        info!(batch_id = %batch.id, seeds = seed_ids.len(), "created refinement batch");
        result.batches_created = 1;

        let manager: Box<dyn BatchManager> = Box::new(RefinementManager::new(
            batch.id,
            self.store.clone(),
            self.llm.clone(),
            self.config.batch.clone(),
            self.config.refinement.clone(),
            self.config.discovery.clone(),
        ));
        run_pipeline(vec![manager], &ImmediateRunPolicy).await;

        Ok(result)
    }

    /// Runs `generate_memories` followed by `refine_memories` under a
    /// caller-supplied admission policy, matching spec §4.6's
    /// `run_pipeline(batches, policy)` entry point for callers that need a
    /// stricter (e.g. store-backed advisory-lock) policy than the default.
    pub async fn run_pipeline_with_policy(
        &self,
        archive_ids: &[String],
        grouper: &dyn Grouper,
        policy: &dyn RunPolicy,
    ) -> Result<(MemoriesResult, RefinementResult), OrchestratorError> {
        let Some(run_id) = policy.acquire().await else {
            info!("pipeline run rejected by policy, skipping");
            return Ok((MemoriesResult::default(), RefinementResult::default()));
        };

        let outcome = async {
            let memories = self.generate_memories(archive_ids, grouper).await?;
            let refinement = self.refine_memories().await?;
            Ok::<_, OrchestratorError>((memories, refinement))
        }
        .await;

        policy.release(&run_id, outcome.is_ok()).await;
        outcome
    }
}
