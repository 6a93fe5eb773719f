//! Deduplication & Persistence Gate.
//!
//! Two checks against the processed-message journal:
//! - before extraction, [`DedupGate::filter_unprocessed`] drops messages whose
//!   message-level key was already journaled, so they never cost an LLM call;
//! - at persistence, [`DedupGate::admit`] stores a candidate only when its
//!   task-level identifier is new. Check and write share one transaction.

use crate::core::types::{RawMessage, TaskCandidate};
use crate::db::Database;
use anyhow::Result;
use std::collections::HashSet;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// Persisted; carries the new task row id.
    Stored(i64),
    Skipped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdmitSummary {
    pub stored: usize,
    pub skipped: usize,
}

#[derive(Clone, Debug)]
pub struct DedupGate {
    db: Database,
}

impl DedupGate {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Messages not yet journaled, in input order. Repeats within the input
    /// collapse to their first occurrence.
    pub async fn filter_unprocessed(&self, messages: Vec<RawMessage>) -> Result<Vec<RawMessage>> {
        let keys: Vec<String> = messages.iter().map(RawMessage::message_key).collect();
        let processed = self.db.processed_message_keys(keys.clone()).await?;

        let mut seen = HashSet::new();
        let before = messages.len();
        let fresh: Vec<RawMessage> = messages
            .into_iter()
            .zip(keys)
            .filter(|(_, key)| !processed.contains(key) && seen.insert(key.clone()))
            .map(|(m, _)| m)
            .collect();

        debug!(
            "dedup_gate: {} of {} messages are new",
            fresh.len(),
            before
        );
        Ok(fresh)
    }

    pub async fn admit(&self, candidate: &TaskCandidate) -> Result<AdmitOutcome> {
        match self.db.insert_if_unprocessed(candidate).await? {
            Some(id) => {
                debug!(
                    "dedup_gate: stored task {} from {} in '{}'",
                    id, candidate.source.sender, candidate.source.group_name
                );
                Ok(AdmitOutcome::Stored(id))
            }
            None => Ok(AdmitOutcome::Skipped),
        }
    }

    /// Admit every candidate in order. The first persistence error aborts
    /// the rest; earlier admissions stay committed.
    pub async fn admit_all(&self, candidates: &[TaskCandidate]) -> Result<AdmitSummary> {
        let mut summary = AdmitSummary::default();
        for c in candidates {
            match self.admit(c).await? {
                AdmitOutcome::Stored(_) => summary.stored += 1,
                AdmitOutcome::Skipped => summary.skipped += 1,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Priority;
    use chrono::Utc;

    fn gate() -> (tempfile::TempDir, DedupGate) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("t.db")).unwrap();
        (dir, DedupGate::new(db))
    }

    fn msg(text: &str) -> RawMessage {
        RawMessage::new("Home", "Eve", text, Utc::now())
    }

    #[tokio::test]
    async fn test_admit_twice_stores_once() {
        let (_dir, gate) = gate();
        let c = TaskCandidate::new(msg("please water the plants tonight"), "water the plants", Priority::Medium);
        assert!(matches!(gate.admit(&c).await.unwrap(), AdmitOutcome::Stored(_)));
        assert_eq!(gate.admit(&c).await.unwrap(), AdmitOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_store_once() {
        let (_dir, gate) = gate();
        let c = TaskCandidate::new(msg("please water the plants tonight"), "water the plants", Priority::Medium);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let c = c.clone();
                tokio::spawn(async move { gate.admit(&c).await.unwrap() })
            })
            .collect();
        let mut stored = 0;
        for h in handles {
            if matches!(h.await.unwrap(), AdmitOutcome::Stored(_)) {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn test_filter_drops_journaled_and_repeated_messages() {
        let (_dir, gate) = gate();
        let old = msg("please water the plants tonight");
        let c = TaskCandidate::new(old.clone(), "water the plants", Priority::Medium);
        gate.admit(&c).await.unwrap();

        let fresh = msg("could you feed the cat tomorrow morning");
        let out = gate
            .filter_unprocessed(vec![old, fresh.clone(), fresh.clone()])
            .await
            .unwrap();
        assert_eq!(out, vec![fresh]);
    }
}
