//! End-to-end scenario tests, one per concrete example named in spec §8.
//! Unit/invariant/round-trip tests live inline next to the code they
//! cover; these exercise the public API the way a caller would.

use chrono::{NaiveDate, TimeZone, Utc};
use tapestry_core::batch_manager::advance;
use tapestry_core::config::{BatchConfig, CountdownConfig, DiscoveryConfig};
use tapestry_core::discovery::discover_refinement_clusters;
use tapestry_core::state_catalog::MemoriesState;
use tapestry_core::store::InMemoryStore;
use tapestry_core::{Grouper, WindowGrouper};
use tapestry_proto::{Batch, BatchCategory, MemoryStatus, Store, TapestryMemory, Thread};

fn thread_at(y: i32, m: u32, d: u32) -> Thread {
    Thread {
        id: tapestry_proto::ids::generate_id(),
        unique_key: format!("k-{}", tapestry_proto::ids::generate_id()),
        etl_task_id: "task-1".into(),
        provider: "chatgpt".into(),
        interaction_type: "chat_message".into(),
        preview: "hi".into(),
        payload: serde_json::json!({}),
        version: "v1".into(),
        asat: Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(),
        asset_uri: None,
        source: None,
        tapestry_id: None,
    }
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// A full-dimension embedding with a couple of non-zero components so
/// cosine similarity between two calls with the same args is 1.0.
fn embedding() -> Vec<f32> {
    let mut v = vec![0.0; tapestry_proto::EMBEDDING_DIMENSIONS];
    v[0] = 1.0;
    v[1] = 0.2;
    v
}

/// Scenario 1: threads at {01-01, 01-03, 01-05}, window_days=5,
/// overlap_days=1 -> one group "2024-01-01/2024-01-05" with all three.
#[test]
fn scenario_single_window() {
    let threads = vec![thread_at(2024, 1, 1), thread_at(2024, 1, 3), thread_at(2024, 1, 5)];
    let grouper = WindowGrouper::new(5, 1).unwrap();
    let groups = grouper.group(threads).unwrap();

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].group_id, "2024-01-01/2024-01-05");
    assert_eq!(groups[0].threads.len(), 3);
}

/// Scenario 2: threads at {01-01, 01-05, 01-06, 01-09}, window_days=5,
/// overlap_days=1 -> two overlapping groups, the 01-05 thread in both.
#[test]
fn scenario_two_overlapping_windows() {
    let threads = vec![
        thread_at(2024, 1, 1),
        thread_at(2024, 1, 5),
        thread_at(2024, 1, 6),
        thread_at(2024, 1, 9),
    ];
    let grouper = WindowGrouper::new(5, 1).unwrap();
    let groups = grouper.group(threads).unwrap();

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].group_id, "2024-01-01/2024-01-05");
    assert_eq!(groups[0].threads.len(), 2);
    assert_eq!(groups[1].group_id, "2024-01-05/2024-01-09");
    assert_eq!(groups[1].threads.len(), 3);

    let shared_id = &groups[0].threads[1].id;
    assert!(groups[1].threads.iter().any(|t| &t.id == shared_id));
}

struct StillPolling;

#[async_trait::async_trait]
impl tapestry_core::batch_manager::Transition<MemoriesState> for StillPolling {
    async fn transition(
        &self,
        current: &MemoriesState,
    ) -> Result<Option<MemoriesState>, tapestry_core::OrchestratorError> {
        Ok(Some(current.clone()))
    }
}

/// Scenario 3: a batch in MEMORY_GENERATE_PENDING with poll_count=3 where
/// the manager reports no new result yields poll_count=4 at the same
/// stack position, no new entry pushed.
#[tokio::test]
async fn scenario_poll_bump() {
    let store = InMemoryStore::new();
    let mut pending = MemoriesState::generate_pending("job-1".to_string());
    for _ in 0..3 {
        pending = bump(pending);
    }
    let batch = Batch::new(1, BatchCategory::Memories, pending.to_value());
    let batch = store.create_batch(batch, &[]).await.unwrap();

    advance::<MemoriesState, _>(&batch.id, &store, &BatchConfig::default(), &CountdownConfig::default(), &StillPolling)
        .await
        .unwrap();

    let reloaded = store.get_batch(&batch.id).await.unwrap().unwrap();
    assert_eq!(reloaded.states.len(), 1);
    assert_eq!(reloaded.states[0]["poll_count"], 4);
}

fn bump(state: MemoriesState) -> MemoriesState {
    match state {
        MemoriesState::GeneratePending { job_key, poll_count, submitted_at } => {
            MemoriesState::GeneratePending { job_key, poll_count: poll_count + 1, submitted_at }
        }
        other => other,
    }
}

struct AlwaysSubmits;

#[async_trait::async_trait]
impl tapestry_core::batch_manager::Transition<MemoriesState> for AlwaysSubmits {
    async fn transition(
        &self,
        current: &MemoriesState,
    ) -> Result<Option<MemoriesState>, tapestry_core::OrchestratorError> {
        match current {
            MemoriesState::Created { .. } => {
                Ok(Some(MemoriesState::generate_pending("job-1".to_string())))
            }
            _ => Ok(None),
        }
    }
}

/// Scenario 4: from CREATED, a successful submit transitions to
/// MEMORY_GENERATE_PENDING, pushed onto the stack above CREATED.
#[tokio::test]
async fn scenario_transition_push() {
    let store = InMemoryStore::new();
    let batch = Batch::new(1, BatchCategory::Memories, MemoriesState::created().to_value());
    let batch = store.create_batch(batch, &[]).await.unwrap();

    advance::<MemoriesState, _>(&batch.id, &store, &BatchConfig::default(), &CountdownConfig::default(), &AlwaysSubmits)
        .await
        .unwrap();

    let reloaded = store.get_batch(&batch.id).await.unwrap().unwrap();
    assert_eq!(reloaded.states.len(), 2);
    assert_eq!(reloaded.states[0]["status"], "MEMORY_GENERATE_PENDING");
    assert_eq!(reloaded.states[1]["status"], "CREATED");
}

/// Scenario 5: two overlapping, embedded memories about the same person
/// refined into one; both sources end up superseded by the new row.
#[tokio::test]
async fn scenario_supersession() {
    let store = InMemoryStore::new();

    let mut m1 = TapestryMemory::new("coffee with Alice", date("2024-01-01"), date("2024-01-05"), "g1");
    m1.embedding = Some(embedding());
    let m1 = store.create_memory(m1).await.unwrap();

    let mut m2 = TapestryMemory::new("lunch with Alice", date("2024-01-03"), date("2024-01-07"), "g1");
    m2.embedding = Some(embedding());
    let m2 = store.create_memory(m2).await.unwrap();

    let mut m3 = TapestryMemory::new(
        "Alice hangouts in early January",
        date("2024-01-01"),
        date("2024-01-07"),
        "g1",
    );
    m3.source_memory_ids = Some(vec![m1.id.clone(), m2.id.clone()]);
    let m3 = store.create_memory(m3).await.unwrap();

    for source_id in [&m1.id, &m2.id] {
        let mut source = store.get_memories(std::slice::from_ref(source_id)).await.unwrap().remove(0);
        source.status = MemoryStatus::Superseded;
        source.superseded_by = Some(m3.id.clone());
        store.update_memory(source).await.unwrap();
    }

    let reloaded_m1 = store.get_memories(&[m1.id.clone()]).await.unwrap().remove(0);
    assert_eq!(reloaded_m1.status, MemoryStatus::Superseded);
    assert_eq!(reloaded_m1.superseded_by, Some(m3.id.clone()));

    let reloaded_m2 = store.get_memories(&[m2.id.clone()]).await.unwrap().remove(0);
    assert_eq!(reloaded_m2.status, MemoryStatus::Superseded);
    assert_eq!(reloaded_m2.superseded_by, Some(m3.id.clone()));

    let reloaded_m3 = store.get_memories(&[m3.id.clone()]).await.unwrap().remove(0);
    assert_eq!(reloaded_m3.status, MemoryStatus::Active);
    assert_eq!(reloaded_m3.source_memory_ids, Some(vec![m1.id, m2.id]));
}

/// Scenario 6: seed at 01-01..05, candidate at 06-01..05,
/// date_proximity_days=7 -> candidate excluded regardless of similarity.
#[tokio::test]
async fn scenario_discovery_proximity_cutoff() {
    let store = InMemoryStore::new();

    let mut seed = TapestryMemory::new("seed", date("2024-01-01"), date("2024-01-05"), "g1");
    seed.embedding = Some(embedding());
    let seed = store.create_memory(seed).await.unwrap();

    let mut far = TapestryMemory::new("far but identical vector", date("2024-06-01"), date("2024-06-05"), "g2");
    far.embedding = Some(embedding());
    store.create_memory(far).await.unwrap();

    let clusters = discover_refinement_clusters(&[seed.id.clone()], &store, &DiscoveryConfig::default())
        .await
        .unwrap();

    assert!(clusters.is_empty(), "proximity cutoff must exclude the distant candidate");
}
