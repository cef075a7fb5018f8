//! Grouper strategies (spec §4.1): pure, deterministic partitioning of a
//! thread list into atomic processing units.
//!
//! Grounded on `context_use/batch/grouper.py`'s `WindowGrouper`
//! (`WindowConfig`/`step_days`) and spec §4.1's `CollectionGrouper`
//! description (not present as a standalone class in the original source,
//! only referenced from `memories/providers.py`).

use chrono::{Duration, NaiveDate};
use tapestry_proto::{Thread, ThreadGroup};

use crate::error::OrchestratorError;

/// Strategy for partitioning threads into atomic groups. Implementations
/// are pure: the same input list always yields the same output, with
/// groups ordered by their earliest member's `asat`.
pub trait Grouper {
    fn group(&self, threads: Vec<Thread>) -> Result<Vec<ThreadGroup>, OrchestratorError>;
}

/// Sliding time-window grouper. `step_days = window_days - overlap_days`;
/// a thread may land in more than one window when `overlap_days > 0`.
#[derive(Debug, Clone)]
pub struct WindowGrouper {
    window_days: i64,
    overlap_days: i64,
    min_memories: Option<usize>,
    max_memories: Option<usize>,
}

impl WindowGrouper {
    pub fn new(window_days: i64, overlap_days: i64) -> Result<Self, OrchestratorError> {
        Self::with_bounds(window_days, overlap_days, None, None)
    }

    pub fn with_bounds(
        window_days: i64,
        overlap_days: i64,
        min_memories: Option<usize>,
        max_memories: Option<usize>,
    ) -> Result<Self, OrchestratorError> {
        if window_days < 1 {
            return Err(OrchestratorError::Precondition(
                "window_days must be >= 1".into(),
            ));
        }
        if overlap_days >= window_days {
            return Err(OrchestratorError::Precondition(
                "overlap_days must be smaller than window_days".into(),
            ));
        }
        Ok(Self {
            window_days,
            overlap_days,
            min_memories,
            max_memories,
        })
    }

    fn step_days(&self) -> i64 {
        self.window_days - self.overlap_days
    }

    /// `min_memories`, defaulting to `max(1, window_days)` as the original
    /// `WindowConfig.effective_min_memories` does.
    pub fn effective_min_memories(&self) -> usize {
        self.min_memories.unwrap_or((self.window_days as usize).max(1))
    }

    /// `max_memories`, defaulting to `max(5, window_days * 3)` as the
    /// original `WindowConfig.effective_max_memories` does.
    pub fn effective_max_memories(&self) -> usize {
        self.max_memories
            .unwrap_or(((self.window_days * 3) as usize).max(5))
    }
}

impl Grouper for WindowGrouper {
    fn group(&self, mut threads: Vec<Thread>) -> Result<Vec<ThreadGroup>, OrchestratorError> {
        if threads.is_empty() {
            return Ok(Vec::new());
        }
        threads.sort_by_key(|t| t.asat);

        let min_date = threads.first().expect("non-empty").asat.date_naive();
        let max_date = threads.last().expect("non-empty").asat.date_naive();

        let mut groups: Vec<ThreadGroup> = Vec::new();
        let mut window_start = min_date;
        let step = Duration::days(self.step_days());
        let span = Duration::days(self.window_days - 1);

        while window_start <= max_date {
            let window_end = window_start + span;
            let window_threads: Vec<Thread> = threads
                .iter()
                .filter(|t| {
                    let d = t.asat.date_naive();
                    d >= window_start && d <= window_end
                })
                .cloned()
                .collect();

            if !window_threads.is_empty() {
                // A trailing window whose threads are already entirely covered
                // by the previous window (e.g. one starting on the last
                // thread's date) adds no new members and is suppressed.
                let already_covered = groups.last().is_some_and(|prev| {
                    window_threads.iter().all(|t| prev.threads.iter().any(|p| p.id == t.id))
                });
                if !already_covered {
                    groups.push(ThreadGroup {
                        group_id: encode_window_key(window_start, window_end),
                        threads: window_threads,
                    });
                }
            }
            window_start += step;
        }

        Ok(groups)
    }
}

fn encode_window_key(from: NaiveDate, to: NaiveDate) -> String {
    format!("{}/{}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d"))
}

/// Partitions threads by their payload's collection id (e.g. a conversation
/// id). Threads without one form singleton groups keyed by the thread id.
#[derive(Debug, Clone, Default)]
pub struct CollectionGrouper {
    collection_key: String,
}

impl CollectionGrouper {
    /// `collection_key` names the JSON field in `Thread::payload` that
    /// carries the collection id (e.g. `"conversation_id"`).
    pub fn new(collection_key: impl Into<String>) -> Self {
        Self {
            collection_key: collection_key.into(),
        }
    }
}

impl Grouper for CollectionGrouper {
    fn group(&self, mut threads: Vec<Thread>) -> Result<Vec<ThreadGroup>, OrchestratorError> {
        use std::collections::BTreeMap;

        threads.sort_by_key(|t| t.asat);

        let mut buckets: BTreeMap<String, Vec<Thread>> = BTreeMap::new();
        for thread in threads {
            let key = thread
                .payload
                .get(&self.collection_key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| thread.id.clone());
            buckets.entry(key).or_default().push(thread);
        }

        let mut groups: Vec<ThreadGroup> = buckets
            .into_iter()
            .map(|(group_id, threads)| ThreadGroup { group_id, threads })
            .collect();

        groups.sort_by_key(|g| g.earliest_asat());
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn thread_at(date: &str) -> Thread {
        let asat = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        Thread {
            id: format!("t-{date}"),
            unique_key: format!("chat:{date}"),
            etl_task_id: "task-1".into(),
            provider: "chatgpt".into(),
            interaction_type: "chat_message".into(),
            preview: String::new(),
            payload: json!({}),
            version: "1".into(),
            asat,
            asset_uri: None,
            source: None,
            tapestry_id: None,
        }
    }

    #[test]
    fn rejects_overlap_equal_to_window() {
        assert!(WindowGrouper::new(5, 5).is_err());
    }

    #[test]
    fn empty_thread_list_yields_empty_groups() {
        let g = WindowGrouper::new(5, 1).unwrap();
        assert_eq!(g.group(Vec::new()).unwrap(), Vec::new());
    }

    #[test]
    fn single_window_scenario() {
        let g = WindowGrouper::new(5, 1).unwrap();
        let threads = vec![
            thread_at("2024-01-01"),
            thread_at("2024-01-03"),
            thread_at("2024-01-05"),
        ];
        let groups = g.group(threads).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_id, "2024-01-01/2024-01-05");
        assert_eq!(groups[0].threads.len(), 3);
    }

    #[test]
    fn two_overlapping_windows_scenario() {
        let g = WindowGrouper::new(5, 1).unwrap();
        let threads = vec![
            thread_at("2024-01-01"),
            thread_at("2024-01-05"),
            thread_at("2024-01-06"),
            thread_at("2024-01-09"),
        ];
        let groups = g.group(threads).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_id, "2024-01-01/2024-01-05");
        assert_eq!(groups[0].threads.len(), 2);
        assert_eq!(groups[1].group_id, "2024-01-05/2024-01-09");
        assert_eq!(groups[1].threads.len(), 3);
    }

    #[test]
    fn grouping_is_deterministic() {
        let g = WindowGrouper::new(5, 1).unwrap();
        let threads = vec![thread_at("2024-01-01"), thread_at("2024-01-03")];
        let a = g.group(threads.clone()).unwrap();
        let b = g.group(threads).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn collection_grouper_partitions_by_payload_key() {
        let g = CollectionGrouper::new("conversation_id");
        let mut t1 = thread_at("2024-01-01");
        t1.payload = json!({"conversation_id": "c1"});
        let mut t2 = thread_at("2024-01-02");
        t2.payload = json!({"conversation_id": "c1"});
        let t3 = thread_at("2024-01-03");

        let groups = g.group(vec![t1, t2, t3]).unwrap();
        assert_eq!(groups.len(), 2);
        let singleton = groups.iter().find(|grp| grp.threads.len() == 1).unwrap();
        assert_eq!(singleton.group_id, singleton.threads[0].id);
    }
}
