//! Batch factory (spec §4.2): bin-packs groups into batches, one batch per
//! chunk × registered category.
//!
//! Grounded on `context_use/batch/factory.py`'s `BaseBatchFactory`.

use serde_json::json;
use tapestry_proto::{Batch, BatchCategory, ProtoError, Store, ThreadGroup};
use tracing::info;

/// Bin-packs pre-grouped threads into batches and persists them.
///
/// `categories` plays the role of the original's class-level
/// `BATCH_CATEGORIES`: groups from different interaction types can coexist
/// in the same factory invocation, and each chunk produces one batch per
/// category.
pub struct BatchFactory {
    categories: Vec<BatchCategory>,
    max_groups_per_batch: usize,
}

impl BatchFactory {
    pub fn new(categories: Vec<BatchCategory>, max_groups_per_batch: usize) -> Self {
        Self {
            categories,
            max_groups_per_batch,
        }
    }

    fn bin_pack<'a>(&self, groups: &'a [ThreadGroup]) -> Vec<&'a [ThreadGroup]> {
        groups.chunks(self.max_groups_per_batch.max(1)).collect()
    }

    /// Bin-packs `groups` and persists the resulting batches, one per chunk
    /// × registered category, each starting in the category's `CREATED`
    /// state.
    pub async fn create_batches(
        &self,
        groups: Vec<ThreadGroup>,
        store: &dyn Store,
    ) -> Result<Vec<Batch>, ProtoError> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let thread_count: usize = groups.iter().map(|g| g.threads.len()).sum();
        let packed = self.bin_pack(&groups);

        info!(
            batches = packed.len(),
            categories = self.categories.len(),
            threads = thread_count,
            groups = groups.len(),
            "creating batches"
        );

        let mut created = Vec::new();
        for (index, chunk) in packed.into_iter().enumerate() {
            let batch_number = (index + 1) as u32;
            for category in &self.categories {
                let initial_state = json!({
                    "status": "CREATED",
                    "timestamp": chrono::Utc::now(),
                });
                let batch = Batch::new(batch_number, *category, initial_state);
                let batch = store.create_batch(batch, chunk).await?;
                created.push(batch);
            }
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_packs_into_chunks_of_max_size() {
        let factory = BatchFactory::new(vec![BatchCategory::Memories], 2);
        let groups: Vec<ThreadGroup> = (0..5)
            .map(|i| ThreadGroup {
                group_id: format!("g{i}"),
                threads: Vec::new(),
            })
            .collect();
        let chunks = factory.bin_pack(&groups);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 2);
        assert_eq!(chunks[2].len(), 1);
    }
}
