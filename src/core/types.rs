use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Sender sentinel used when the author of a message cannot be decoded.
pub const UNKNOWN_SENDER: &str = "Unknown";
/// Sender sentinel for outgoing messages.
pub const SELF_SENDER: &str = "You";

// Unit separator keeps "ab"+"c" and "a"+"bc" from hashing to the same id.
const ID_FIELD_SEPARATOR: &[u8] = b"\x1f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Lenient parse used on LLM output: anything unrecognized becomes `Medium`.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(anyhow::anyhow!("unknown priority '{other}'")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
    Converted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Converted => "converted",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            "converted" => Ok(TaskStatus::Converted),
            other => Err(anyhow::anyhow!("unknown task status '{other}'")),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Where a task came from. Demo tasks are synthesized and must never be
/// mistaken for captured ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskOrigin {
    #[default]
    Live,
    Export,
    Demo,
}

impl TaskOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOrigin::Live => "live",
            TaskOrigin::Export => "export",
            TaskOrigin::Demo => "demo",
        }
    }
}

impl FromStr for TaskOrigin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(TaskOrigin::Live),
            "export" => Ok(TaskOrigin::Export),
            "demo" => Ok(TaskOrigin::Demo),
            other => Err(anyhow::anyhow!("unknown task origin '{other}'")),
        }
    }
}

impl fmt::Display for TaskOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One decoded chat message. Built fresh on every scan pass and dropped after
/// task extraction; the browser element it came from is not kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub group_name: String,
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(
        group_name: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            sender: sender.into(),
            text: text.into(),
            timestamp,
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Identity of the message alone, used to skip already-processed
    /// messages before they reach task extraction.
    pub fn message_key(&self) -> String {
        stable_id(&[&self.group_name, &self.sender, &self.text])
    }
}

/// A not-yet-persisted task derived from exactly one [`RawMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCandidate {
    pub description: String,
    pub priority: Priority,
    pub source: RawMessage,
    pub origin: TaskOrigin,
}

impl TaskCandidate {
    pub fn new(source: RawMessage, description: impl Into<String>, priority: Priority) -> Self {
        Self {
            description: description.into(),
            priority,
            source,
            origin: TaskOrigin::Live,
        }
    }

    pub fn with_origin(mut self, origin: TaskOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Deterministic identifier shared with the processed-message journal.
    /// Re-scanning the same message yields the same id only when the
    /// extracted task text also matches.
    pub fn message_id(&self) -> String {
        stable_id(&[
            &self.source.group_name,
            &self.source.sender,
            &self.source.text,
            &self.description,
        ])
    }
}

/// A persisted row of `whatsapp_tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTask {
    pub id: i64,
    pub problem_id: Option<i64>,
    pub group_name: String,
    pub sender: String,
    pub message: String,
    pub task_description: String,
    pub timestamp: DateTime<Utc>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub message_id: String,
    pub origin: TaskOrigin,
}

/// A row of the append-only `whatsapp_processed_messages` journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMessageRecord {
    pub message_id: String,
    pub message_key: String,
    pub group_name: String,
    pub sender: String,
    pub processed_date: DateTime<Utc>,
}

/// SHA-256 over the given fields joined by a unit separator, lowercase hex.
pub fn stable_id(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update(ID_FIELD_SEPARATOR);
        }
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(text: &str) -> RawMessage {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        RawMessage::new("Team", "Alice", text, ts)
    }

    #[test]
    fn test_message_id_is_stable_across_calls() {
        let a = TaskCandidate::new(msg("Send the deck"), "Send the deck", Priority::Medium);
        let b = TaskCandidate::new(msg("Send the deck"), "Send the deck", Priority::High);
        assert_eq!(a.message_id(), b.message_id());
        assert_eq!(a.message_id().len(), 64);
    }

    #[test]
    fn test_message_id_depends_on_task_text() {
        let a = TaskCandidate::new(msg("Send the deck"), "Send the deck", Priority::Medium);
        let b = TaskCandidate::new(msg("Send the deck"), "Send deck", Priority::Medium);
        assert_ne!(a.message_id(), b.message_id());
    }

    #[test]
    fn test_stable_id_field_boundaries_matter() {
        assert_ne!(stable_id(&["ab", "c"]), stable_id(&["a", "bc"]));
    }

    #[test]
    fn test_known_digest() {
        // sha256("abc")
        assert_eq!(
            stable_id(&["abc"]),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_priority_parse_lenient_defaults_to_medium() {
        assert_eq!(Priority::parse_lenient("HIGH"), Priority::High);
        assert_eq!(Priority::parse_lenient(" low "), Priority::Low);
        assert_eq!(Priority::parse_lenient("urgent!!"), Priority::Medium);
    }

    #[test]
    fn test_word_count() {
        assert_eq!(msg("ok").word_count(), 1);
        assert_eq!(msg("  please   send it  ").word_count(), 3);
    }
}
