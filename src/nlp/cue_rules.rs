//! Deterministic task cues, used whenever the LLM path is unavailable.
//!
//! A message is split into units (lines, then sentences). Cues are tried in a
//! fixed order; for each cue the units are scanned top to bottom and the first
//! hit becomes the task, stripped of its marker. No randomness anywhere, so the
//! same message always yields the same task and priority.

use crate::core::types::Priority;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cue {
    Bullet,
    TodoPrefix,
    Numbered,
    Politeness,
    ActionVerb,
}

const CUE_ORDER: [Cue; 5] = [
    Cue::Bullet,
    Cue::TodoPrefix,
    Cue::Numbered,
    Cue::Politeness,
    Cue::ActionVerb,
];

const POLITENESS_MARKERS: &[&str] = &[
    "please",
    "pls",
    "plz",
    "kindly",
    "can you",
    "could you",
    "would you",
    "can someone",
    "could someone",
    "will you",
];

const ACTION_VERBS: &[&str] = &[
    "send", "review", "call", "schedule", "prepare", "update", "finish", "complete", "submit",
    "check", "fix", "create", "write", "book", "follow up", "remind", "organize", "organise",
    "share", "confirm", "email", "buy", "pay", "order", "draft", "set up", "arrange", "contact",
    "deliver", "upload", "sign", "approve", "plan", "find", "bring", "pick up", "make sure",
    "don't forget", "remember to",
];

const HIGH_PRIORITY_CUES: &[&str] = &["urgent", "asap", "immediately", "critical", "emergency", "right now"];

const LOW_PRIORITY_CUES: &[&str] = &[
    "no rush",
    "whenever",
    "low priority",
    "when you get a chance",
    "when you have time",
    "no hurry",
];

const MAX_TASK_CHARS: usize = 240;

/// A task found by the rules: description plus which cue fired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CueMatch {
    pub description: String,
    pub cue: Cue,
    pub priority: Priority,
}

/// Run the cue cascade over one message. `None` when nothing matches.
pub fn extract_task(text: &str) -> Option<CueMatch> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }

    for cue in CUE_ORDER {
        let hit = match cue {
            // Marker cues work on whole lines.
            Cue::Bullet => lines.iter().find_map(|l| strip_bullet(l)),
            Cue::TodoPrefix => lines.iter().find_map(|l| strip_todo_prefix(l)),
            Cue::Numbered => lines.iter().find_map(|l| strip_numbered(l)),
            // Linguistic cues work on sentences.
            Cue::Politeness => sentences(&lines).into_iter().find(|s| has_politeness(s)),
            Cue::ActionVerb => sentences(&lines).into_iter().find(|s| starts_with_action_verb(s)),
        };
        if let Some(found) = hit {
            let description = clip(found.trim());
            if description.is_empty() {
                continue;
            }
            return Some(CueMatch {
                description,
                cue,
                priority: priority_for(text),
            });
        }
    }
    None
}

/// Priority from the whole message text: explicit urgency → high, explicit
/// lack of it → low, otherwise medium.
pub fn priority_for(text: &str) -> Priority {
    let lower = text.to_lowercase();
    if HIGH_PRIORITY_CUES.iter().any(|c| contains_phrase(&lower, c)) {
        Priority::High
    } else if LOW_PRIORITY_CUES.iter().any(|c| contains_phrase(&lower, c)) {
        Priority::Low
    } else {
        Priority::Medium
    }
}

fn strip_bullet(line: &str) -> Option<String> {
    let rest = line.strip_prefix(['-', '*', '•', '–', '▪', '◦'])?;
    // "-5 degrees" or "**bold**" are not bullets.
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = strip_checkbox(rest.trim_start());
    non_empty(rest)
}

fn strip_checkbox(s: &str) -> &str {
    for box_ in ["[ ]", "[x]", "[X]", "☐", "☑"] {
        if let Some(rest) = s.strip_prefix(box_) {
            return rest.trim_start();
        }
    }
    s
}

fn todo_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:to\s*-?\s*do|task|action(?:\s+item)?)\s*[:\-]\s*(.+)$").ok())
        .as_ref()
}

fn numbered_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\(?\d{1,3}[.)]\s+(.+)$").ok())
        .as_ref()
}

fn sentence_split_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+\s+").ok()).as_ref()
}

fn strip_todo_prefix(line: &str) -> Option<String> {
    let caps = todo_regex()?.captures(line)?;
    non_empty(caps.get(1)?.as_str())
}

fn strip_numbered(line: &str) -> Option<String> {
    let caps = numbered_regex()?.captures(line)?;
    non_empty(caps.get(1)?.as_str())
}

/// Sentences of every line, terminators kept on all but the split point.
fn sentences(lines: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    for line in lines {
        match sentence_split_regex() {
            Some(re) => {
                let mut last = 0;
                for m in re.find_iter(line) {
                    let piece = line[last..m.start() + m.as_str().trim_end().len()].trim();
                    if !piece.is_empty() {
                        out.push(piece.to_string());
                    }
                    last = m.end();
                }
                let tail = line[last..].trim();
                if !tail.is_empty() {
                    out.push(tail.to_string());
                }
            }
            None => out.push(line.to_string()),
        }
    }
    out
}

fn has_politeness(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    POLITENESS_MARKERS.iter().any(|m| contains_phrase(&lower, m))
}

fn starts_with_action_verb(sentence: &str) -> bool {
    let lower = sentence
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    ACTION_VERBS.iter().any(|verb| {
        lower.strip_prefix(verb).is_some_and(|rest| {
            rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == ',' || c == ':')
        })
    })
}

/// Whole-word / whole-phrase containment on lowercase text.
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(phrase) {
        let begin = start + pos;
        let end = begin + phrase.len();
        let before_ok = haystack[..begin]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn clip(s: &str) -> String {
    if s.chars().count() <= MAX_TASK_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_TASK_CHARS - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polite_request_yields_whole_message() {
        let m = extract_task("Please send the updated proposal to marketing by EOD").unwrap();
        assert_eq!(m.description, "Please send the updated proposal to marketing by EOD");
        assert_eq!(m.cue, Cue::Politeness);
        assert_eq!(m.priority, Priority::Medium);
    }

    #[test]
    fn test_bullet_marker_is_stripped() {
        let m = extract_task("Notes from today\n- book the venue for Friday").unwrap();
        assert_eq!(m.description, "book the venue for Friday");
        assert_eq!(m.cue, Cue::Bullet);
    }

    #[test]
    fn test_checkbox_bullet() {
        let m = extract_task("* [ ] renew the domain").unwrap();
        assert_eq!(m.description, "renew the domain");
    }

    #[test]
    fn test_negative_number_is_not_bullet() {
        assert!(extract_task("-5 degrees outside today, stay warm").is_none());
    }

    #[test]
    fn test_todo_prefix() {
        let m = extract_task("TODO: migrate the billing cron to the new box").unwrap();
        assert_eq!(m.description, "migrate the billing cron to the new box");
        assert_eq!(m.cue, Cue::TodoPrefix);

        let m = extract_task("Action item - collect receipts from everyone").unwrap();
        assert_eq!(m.description, "collect receipts from everyone");
    }

    #[test]
    fn test_numbered_line() {
        let m = extract_task("Plan for tomorrow:\n1. Call the plumber about the leak").unwrap();
        assert_eq!(m.description, "Call the plumber about the leak");
        assert_eq!(m.cue, Cue::Numbered);
    }

    #[test]
    fn test_bullet_beats_politeness() {
        let m = extract_task("Can you look at this?\n- renew passport photos").unwrap();
        assert_eq!(m.cue, Cue::Bullet);
    }

    #[test]
    fn test_politeness_picks_the_right_sentence() {
        let m = extract_task("Great meeting today. Could you share the slides with the team? Thanks!").unwrap();
        assert_eq!(m.description, "Could you share the slides with the team?");
    }

    #[test]
    fn test_action_verb_at_sentence_start() {
        let m = extract_task("Weekend is close. Review the contract before Monday morning.").unwrap();
        assert_eq!(m.description, "Review the contract before Monday morning.");
        assert_eq!(m.cue, Cue::ActionVerb);
    }

    #[test]
    fn test_action_verb_requires_word_boundary() {
        // "Sendai" starts with "send" but is not the verb.
        assert!(extract_task("Sendai was lovely this time of the year").is_none());
    }

    #[test]
    fn test_chatter_yields_nothing() {
        assert!(extract_task("haha that was such a fun evening with everyone").is_none());
        assert!(extract_task("").is_none());
    }

    #[test]
    fn test_priority_cues() {
        assert_eq!(priority_for("URGENT: server is down"), Priority::High);
        assert_eq!(priority_for("please fix it asap"), Priority::High);
        assert_eq!(priority_for("no rush, whenever works"), Priority::Low);
        assert_eq!(priority_for("send it by EOD"), Priority::Medium);
        // "pleasant" must not trip "please", "asap" not inside words.
        assert_eq!(priority_for("the casapiña menu"), Priority::Medium);
    }

    #[test]
    fn test_repeatable() {
        let text = "Kindly update the roster for next week, it's urgent";
        let a = extract_task(text);
        for _ in 0..5 {
            assert_eq!(extract_task(text), a);
        }
        assert_eq!(a.unwrap().priority, Priority::High);
    }
}
