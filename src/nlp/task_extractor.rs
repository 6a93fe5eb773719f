//! Task Extraction Engine: messages in, task candidates out.
//!
//! Messages under `min_words` never get past the pre-filter. The survivors go
//! to the LLM in bounded batches when a client is configured; any transport,
//! status or parse failure sends that batch through [`cue_rules`] instead, so
//! an LLM outage never fails a scan.

use super::cue_rules;
use super::llm_client::LlmClient;
use crate::core::types::{Priority, RawMessage, TaskCandidate};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hard cap on messages per LLM call.
pub const MAX_BATCH: usize = 10;

/// Sentinel the model uses for "this message holds no task".
pub const NO_TASK_SENTINEL: &str = "NONE";

/// How one batch was handled; surfaced in scan reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionMethod {
    Llm,
    Rules,
    /// The LLM call or its parse failed and the rules took over.
    RulesAfterLlmFailure,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub candidates: Vec<TaskCandidate>,
    /// Messages dropped by the word-count pre-filter.
    pub filtered_short: usize,
    pub llm_failures: usize,
}

pub struct TaskExtractor {
    min_words: usize,
    batch_size: usize,
    llm: Option<Arc<dyn LlmClient>>,
}

impl TaskExtractor {
    /// Rule-based only.
    pub fn new(min_words: usize) -> Self {
        Self {
            min_words,
            batch_size: MAX_BATCH,
            llm: None,
        }
    }

    pub fn with_llm(mut self, client: Arc<dyn LlmClient>, batch_size: usize) -> Self {
        self.llm = Some(client);
        self.batch_size = batch_size.clamp(1, MAX_BATCH);
        self
    }

    pub fn api_available(&self) -> bool {
        self.llm.is_some()
    }

    pub fn passes_word_filter(&self, message: &RawMessage) -> bool {
        message.word_count() >= self.min_words
    }

    pub async fn extract(&self, messages: &[RawMessage]) -> Extraction {
        let mut out = Extraction::default();

        let kept: Vec<&RawMessage> = messages
            .iter()
            .filter(|m| self.passes_word_filter(m))
            .collect();
        out.filtered_short = messages.len() - kept.len();
        if kept.is_empty() {
            return out;
        }

        for batch in kept.chunks(self.batch_size) {
            let (mut tasks, method) = self.extract_batch(batch).await;
            if method == ExtractionMethod::RulesAfterLlmFailure {
                out.llm_failures += 1;
            }
            debug!(
                "task_extractor: batch of {} → {} tasks via {:?}",
                batch.len(),
                tasks.len(),
                method
            );
            out.candidates.append(&mut tasks);
        }

        info!(
            "task_extractor: {} messages ({} too short) → {} tasks",
            messages.len(),
            out.filtered_short,
            out.candidates.len()
        );
        out
    }

    async fn extract_batch(&self, batch: &[&RawMessage]) -> (Vec<TaskCandidate>, ExtractionMethod) {
        let Some(llm) = &self.llm else {
            return (rule_based(batch), ExtractionMethod::Rules);
        };

        let prompt = build_prompt(batch);
        match llm.complete(&prompt).await {
            Ok(reply) => match parse_reply(&reply, batch) {
                Some(tasks) => (tasks, ExtractionMethod::Llm),
                None => {
                    warn!("task_extractor: unparsable llm reply; using rule-based fallback");
                    (rule_based(batch), ExtractionMethod::RulesAfterLlmFailure)
                }
            },
            Err(e) => {
                warn!("task_extractor: llm unavailable ({}); using rule-based fallback", e);
                (rule_based(batch), ExtractionMethod::RulesAfterLlmFailure)
            }
        }
    }
}

fn rule_based(batch: &[&RawMessage]) -> Vec<TaskCandidate> {
    batch
        .iter()
        .filter_map(|m| {
            let hit = cue_rules::extract_task(&m.text)?;
            Some(TaskCandidate::new((*m).clone(), hit.description, hit.priority))
        })
        .collect()
}

/// One prompt per batch. Messages are numbered from 1; the model echoes the
/// number back as `message_id`.
pub fn build_prompt(batch: &[&RawMessage]) -> String {
    let mut listing = String::new();
    for (i, m) in batch.iter().enumerate() {
        listing.push_str(&format!(
            "message_id: {}\nconversation: {}\nsender: {}\ntext: {}\n\n",
            i + 1,
            m.group_name,
            m.sender,
            m.text.replace('\n', " ")
        ));
    }

    format!(
        "Decide which of the following chat messages contain an actionable task or request.\n\
         For each message return an object {{\"message_id\": <id>, \"task\": <short imperative sentence>, \"priority\": \"high\"|\"medium\"|\"low\"}}.\n\
         Use \"task\": \"{sentinel}\" for messages without a task.\n\
         Reply with a single JSON array and nothing else.\n\n\
         Messages:\n{listing}",
        sentinel = NO_TASK_SENTINEL,
        listing = listing
    )
}

#[derive(Deserialize)]
struct ReplyItem {
    message_id: serde_json::Value,
    #[serde(default)]
    task: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

/// Parse the slice between the first `[` and the last `]`. `None` on any
/// structural problem; the caller falls back to rules.
pub fn parse_reply(reply: &str, batch: &[&RawMessage]) -> Option<Vec<TaskCandidate>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end < start {
        return None;
    }
    let items: Vec<ReplyItem> = serde_json::from_str(&reply[start..=end]).ok()?;

    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for item in items {
        let Some(idx) = reply_index(&item.message_id) else {
            debug!("task_extractor: ignoring reply item with id {}", item.message_id);
            continue;
        };
        let Some(source) = idx.checked_sub(1).and_then(|i| batch.get(i)) else {
            continue;
        };
        let task = item.task.as_deref().map(str::trim).unwrap_or_default();
        if task.is_empty() || task.eq_ignore_ascii_case(NO_TASK_SENTINEL) {
            continue;
        }
        // One message, one task.
        if !seen.insert(idx) {
            continue;
        }
        let priority = item
            .priority
            .as_deref()
            .map(Priority::parse_lenient)
            .unwrap_or_default();
        out.push(TaskCandidate::new((*source).clone(), task, priority));
    }
    Some(out)
}

fn reply_index(id: &serde_json::Value) -> Option<usize> {
    match id {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
        serde_json::Value::String(s) => s.trim().trim_start_matches(['m', 'M', '#']).parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::llm_client::LlmError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(text: &str) -> RawMessage {
        RawMessage::new("Team", "Alice", text, Utc::now())
    }

    struct Scripted {
        reply: Result<String, ()>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .map_err(|_| LlmError::Status { status: 500, body: "boom".into() })
        }
    }

    fn scripted(reply: Result<&str, ()>) -> Arc<Scripted> {
        Arc::new(Scripted {
            reply: reply.map(str::to_string),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_short_message_never_reaches_extraction() {
        let llm = scripted(Ok("[]"));
        let ex = TaskExtractor::new(5).with_llm(llm.clone(), 10);
        let out = ex.extract(&[msg("ok")]).await;
        assert!(out.candidates.is_empty());
        assert_eq!(out.filtered_short, 1);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rules_without_api() {
        let ex = TaskExtractor::new(5);
        let out = ex
            .extract(&[msg("Please send the updated proposal to marketing by EOD")])
            .await;
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(
            out.candidates[0].description,
            "Please send the updated proposal to marketing by EOD"
        );
        assert_eq!(out.candidates[0].priority, Priority::Medium);
    }

    #[tokio::test]
    async fn test_llm_reply_wrapped_in_prose() {
        let llm = scripted(Ok(
            "Sure! Here you go:\n[{\"message_id\": 1, \"task\": \"Book the venue\", \"priority\": \"high\"}, {\"message_id\": \"2\", \"task\": \"NONE\"}]\nHope that helps.",
        ));
        let ex = TaskExtractor::new(3).with_llm(llm, 10);
        let out = ex
            .extract(&[
                msg("could someone book the venue for friday"),
                msg("what a lovely day it was today"),
            ])
            .await;
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].description, "Book the venue");
        assert_eq!(out.candidates[0].priority, Priority::High);
        assert_eq!(out.llm_failures, 0);
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_rules() {
        let llm = scripted(Err(()));
        let ex = TaskExtractor::new(5).with_llm(llm, 10);
        let out = ex
            .extract(&[msg("Please send the updated proposal to marketing by EOD")])
            .await;
        assert_eq!(out.llm_failures, 1);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].priority, Priority::Medium);
    }

    #[tokio::test]
    async fn test_garbage_reply_falls_back_to_rules() {
        let llm = scripted(Ok("I cannot help with that"));
        let ex = TaskExtractor::new(5).with_llm(llm, 10);
        let out = ex.extract(&[msg("TODO: renew the team calendar subscription")]).await;
        assert_eq!(out.llm_failures, 1);
        assert_eq!(out.candidates[0].description, "renew the team calendar subscription");
    }

    #[tokio::test]
    async fn test_batches_are_bounded() {
        let llm = scripted(Ok("[]"));
        let ex = TaskExtractor::new(1).with_llm(llm.clone(), 50);
        let msgs: Vec<RawMessage> = (0..23).map(|i| msg(&format!("message number {i}"))).collect();
        ex.extract(&msgs).await;
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_parse_reply_ignores_out_of_range_ids() {
        let m = msg("some message text here");
        let batch = vec![&m];
        let tasks = parse_reply(r#"[{"message_id": 7, "task": "x"}, {"message_id": "m1", "task": "do it"}]"#, &batch)
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, "do it");
    }

    #[test]
    fn test_prompt_mentions_sentinel_and_ids() {
        let m = msg("line one\nline two");
        let p = build_prompt(&[&m]);
        assert!(p.contains(NO_TASK_SENTINEL));
        assert!(p.contains("message_id: 1"));
        assert!(p.contains("text: line one line two"));
    }
}
