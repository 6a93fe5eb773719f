//! Sample conversation used when no capture path exists and `demo_fallback`
//! is on. The messages go through the normal extraction pipeline; every task
//! they produce is stored with `origin = demo`.

use crate::core::types::RawMessage;
use chrono::{Duration, Utc};

pub const DEMO_SENDER: &str = "Demo";

const DEMO_MESSAGES: &[&str] = &[
    "Please send the updated proposal to marketing by EOD",
    "Can you review the Q3 budget spreadsheet before Friday's meeting?",
    "URGENT: the client demo environment is down, fix it asap",
    "- book a meeting room for the design review next week",
    "No rush, but could you update the onboarding checklist when you get a chance",
];

/// One sample message per entry, attributed to `group` (or "Demo" when the
/// monitor list is empty). Timestamps step back a minute each, newest last.
pub fn demo_messages(groups: &[String]) -> Vec<RawMessage> {
    let default_group = [DEMO_SENDER.to_string()];
    let groups = if groups.is_empty() { &default_group[..] } else { groups };

    let now = Utc::now();
    let total = DEMO_MESSAGES.len() * groups.len();
    let mut out = Vec::with_capacity(total);
    for (gi, group) in groups.iter().enumerate() {
        for (mi, text) in DEMO_MESSAGES.iter().enumerate() {
            let age = (total - (gi * DEMO_MESSAGES.len() + mi)) as i64;
            out.push(RawMessage::new(
                group.as_str(),
                DEMO_SENDER,
                *text,
                now - Duration::minutes(age),
            ));
        }
    }
    out
}
