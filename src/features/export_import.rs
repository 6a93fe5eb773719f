//! WhatsApp "Export chat" text files as an alternate message source.
//!
//! Two line shapes are recognized:
//!
//! ```text
//! [18/10/2026, 14:05:12] Alice: message        (iOS)
//! 18/10/2026, 14:05 - Alice: message           (Android)
//! ```
//!
//! Lines that match neither continue the previous message. Header lines
//! without a `sender: ` part are system notices and are skipped. Output is the
//! same [`RawMessage`] shape the live extractor produces.

use crate::core::chat_time::parse_chat_datetime;
use crate::core::types::RawMessage;
use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

const EXPORT_FILE_PREFIX: &str = "WhatsApp Chat with ";
const EXPORT_FILE_PREFIX_ALT: &str = "WhatsApp Chat - ";
const MAX_SENDER_CHARS: usize = 80;

const MEDIA_PLACEHOLDERS: &[&str] = &[
    "<media omitted>",
    "image omitted",
    "video omitted",
    "audio omitted",
    "sticker omitted",
    "gif omitted",
    "document omitted",
    "this message was deleted",
    "you deleted this message",
];

fn bracketed_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[(?P<date>[^,\]]+),\s*(?P<time>[^\]]+)\]\s+(?P<rest>.*)$").ok())
        .as_ref()
}

fn dashed_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<date>\d{1,4}[./-]\d{1,2}[./-]\d{1,4}),?\s+(?P<time>\d{1,2}:\d{2}(?::\d{2})?(?:[\s\u{202f}]?[AaPp]\.?\s?[Mm]\.?)?)\s+[-–]\s+(?P<rest>.*)$",
        )
        .ok()
    })
    .as_ref()
}

/// A recognized message header: date, time and the remainder of the line.
struct Header<'a> {
    date: &'a str,
    time: &'a str,
    rest: &'a str,
}

fn parse_header(line: &str) -> Option<Header<'_>> {
    for re in [bracketed_regex(), dashed_regex()].into_iter().flatten() {
        if let Some(caps) = re.captures(line) {
            return Some(Header {
                date: caps.name("date")?.as_str(),
                time: caps.name("time")?.as_str(),
                rest: caps.name("rest")?.as_str(),
            });
        }
    }
    None
}

fn split_sender(rest: &str) -> Option<(&str, &str)> {
    let (sender, text) = rest.split_once(": ")?;
    let sender = sender.trim();
    if sender.is_empty() || sender.chars().count() > MAX_SENDER_CHARS {
        return None;
    }
    Some((sender, text))
}

fn is_media_placeholder(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    MEDIA_PLACEHOLDERS.iter().any(|p| t == *p)
}

/// Parse the full text of one export into messages, oldest first.
pub fn parse_export(content: &str, group_name: &str) -> Vec<RawMessage> {
    let mut out: Vec<RawMessage> = Vec::new();
    // Continuation lines only attach to a message, never to a skipped notice.
    let mut open = false;

    for raw_line in content.lines() {
        let line = raw_line
            .trim_start_matches(['\u{feff}', '\u{200e}', '\u{200f}'])
            .trim_end_matches('\r');

        match parse_header(line) {
            Some(header) => {
                let Some((sender, text)) = split_sender(header.rest) else {
                    debug!("export_import: skipping system line: {}", header.rest);
                    open = false;
                    continue;
                };
                let timestamp =
                    parse_chat_datetime(header.date, header.time).unwrap_or_else(Utc::now);
                out.push(RawMessage::new(
                    group_name,
                    sender,
                    text.trim_start_matches('\u{200e}'),
                    timestamp,
                ));
                open = true;
            }
            None if open => {
                if let Some(last) = out.last_mut() {
                    last.text.push('\n');
                    last.text.push_str(line);
                }
            }
            None => {}
        }
    }

    out.into_iter()
        .filter_map(|mut m| {
            m.text = m.text.trim().to_string();
            if m.text.is_empty() || is_media_placeholder(&m.text) {
                None
            } else {
                Some(m)
            }
        })
        .collect()
}

/// Conversation name for an export file: its stem without the
/// "WhatsApp Chat with " prefix.
pub fn group_name_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    stem.strip_prefix(EXPORT_FILE_PREFIX)
        .or_else(|| stem.strip_prefix(EXPORT_FILE_PREFIX_ALT))
        .unwrap_or(&stem)
        .trim()
        .to_string()
}

pub fn parse_export_file(path: &Path) -> Result<Vec<RawMessage>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read export {}", path.display()))?;
    let content = String::from_utf8_lossy(&bytes);
    let group = group_name_from_path(path);
    let messages = parse_export(&content, &group);
    info!(
        "export_import: {} → {} messages for '{}'",
        path.display(),
        messages.len(),
        group
    );
    Ok(messages)
}

/// Export files at `location`: the file itself, or every `.txt` in the
/// directory (not recursive), sorted by name.
pub fn export_files(location: &Path) -> Result<Vec<PathBuf>> {
    if location.is_file() {
        return Ok(vec![location.to_path_buf()]);
    }
    let entries = std::fs::read_dir(location)
        .with_context(|| format!("failed to read export directory {}", location.display()))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("txt"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Restrict export files to monitored conversations (case-insensitive).
/// An empty monitor list keeps everything.
pub fn select_monitored(files: Vec<PathBuf>, monitored: &[String]) -> Vec<PathBuf> {
    if monitored.is_empty() {
        return files;
    }
    files
        .into_iter()
        .filter(|f| {
            let group = group_name_from_path(f).to_lowercase();
            monitored.iter().any(|m| m.trim().to_lowercase() == group)
        })
        .collect()
}
