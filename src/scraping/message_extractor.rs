//! Message Extractor: harvest the most recent message bubbles of the open
//! conversation and decode each into a [`RawMessage`].

use super::driver::{ElementHandle, PageDriver, Query};
use super::selectors::{Resolution, ResolveOptions, Resolver, SelectorKey};
use crate::core::chat_time::{parse_chat_datetime, parse_clock_time};
use crate::core::types::{RawMessage, SELF_SENDER, UNKNOWN_SENDER};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, info};

const WRAPPER_ANCESTOR_DEPTH: usize = 10;

/// Which candidate strategy produced the message elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateStrategy {
    Direct,
    Ranked,
    Reconstructed,
}

pub struct MessageExtractor<'a> {
    resolver: &'a Resolver,
}

impl<'a> MessageExtractor<'a> {
    pub fn new(resolver: &'a Resolver) -> Self {
        Self { resolver }
    }

    /// At most `max_count` of the most recent messages, oldest first.
    pub async fn extract_messages<P: PageDriver>(
        &self,
        page: &P,
        group_name: &str,
        max_count: usize,
    ) -> Vec<RawMessage> {
        if max_count == 0 {
            return Vec::new();
        }

        let container = self
            .resolver
            .resolve(page, SelectorKey::MessageContainer, &[])
            .await
            .found();
        if container.is_none() {
            debug!("message_extractor: no message container; searching whole page");
        }

        let Some((strategy, candidates)) = self.candidates(page, container.as_ref()).await else {
            info!("message_extractor: no message elements in '{}'", group_name);
            return Vec::new();
        };

        // Scrollback renders oldest-first; keep the tail.
        let skip = candidates.len().saturating_sub(max_count);
        let total = candidates.len();

        let mut out = Vec::with_capacity(total - skip);
        for el in candidates.into_iter().skip(skip) {
            if let Some(msg) = self.decode(page, &el, group_name).await {
                out.push(msg);
            }
        }

        info!(
            "message_extractor: '{}' → {} messages ({} candidates via {:?}, kept last {})",
            group_name,
            out.len(),
            total,
            strategy,
            total - skip
        );
        out
    }

    /// Three escalating strategies: the most specific direct match, the
    /// ranked `message` alternatives, then reconstruction from leaf text.
    async fn candidates<P: PageDriver>(
        &self,
        page: &P,
        scope: Option<&P::Element>,
    ) -> Option<(CandidateStrategy, Vec<P::Element>)> {
        let opts = ResolveOptions::immediate();

        if let Resolution::Found(els) = self
            .resolver
            .resolve_all(page, scope, SelectorKey::MessageDirect, &[], opts)
            .await
        {
            return Some((CandidateStrategy::Direct, els));
        }

        if let Resolution::Found(els) = self
            .resolver
            .resolve_all(page, scope, SelectorKey::Message, &[], opts)
            .await
        {
            return Some((CandidateStrategy::Ranked, els));
        }

        let rebuilt = self.reconstruct(page, scope).await;
        if rebuilt.is_empty() {
            None
        } else {
            Some((CandidateStrategy::Reconstructed, rebuilt))
        }
    }

    async fn reconstruct<P: PageDriver>(&self, page: &P, scope: Option<&P::Element>) -> Vec<P::Element> {
        let Resolution::Found(leaves) = self
            .resolver
            .resolve_all(page, scope, SelectorKey::MessageLeafText, &[], ResolveOptions::immediate())
            .await
        else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut wrappers = Vec::new();
        for leaf in leaves {
            let Some(wrapper) = message_wrapper_ancestor(page, &leaf).await else {
                continue;
            };
            // Several leaves share one bubble.
            if seen.insert(wrapper.node_key()) {
                wrappers.push(wrapper);
            }
        }
        wrappers
    }

    async fn decode<P: PageDriver>(&self, page: &P, el: &P::Element, group_name: &str) -> Option<RawMessage> {
        let opts = ResolveOptions::immediate();

        let outgoing = el
            .attribute("class")
            .await
            .ok()
            .flatten()
            .map(|c| c.contains("message-out"))
            .unwrap_or(false);

        let meta = match self
            .resolver
            .resolve_in(page, el, SelectorKey::MessageMeta, &[], opts)
            .await
        {
            Resolution::Found(m) => m
                .attribute("data-pre-plain-text")
                .await
                .ok()
                .flatten()
                .and_then(|raw| parse_pre_plain_text(&raw)),
            Resolution::NotFound => None,
        };

        let text = match self
            .resolver
            .resolve_in(page, el, SelectorKey::MessageText, &[], opts)
            .await
        {
            Resolution::Found(t) => t.text().await.unwrap_or_default(),
            Resolution::NotFound => String::new(),
        };
        let text = if text.trim().is_empty() {
            el.text().await.unwrap_or_default()
        } else {
            text
        };
        let text = text.trim().to_string();
        if text.is_empty() {
            return None;
        }

        let sender = if outgoing {
            SELF_SENDER.to_string()
        } else if let Some(s) = meta.as_ref().and_then(|m| m.sender.clone()) {
            s
        } else {
            self.text_of(page, el, SelectorKey::MessageSender)
                .await
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string())
        };

        let timestamp = match meta.as_ref().and_then(|m| m.timestamp) {
            Some(ts) => ts,
            None => self
                .text_of(page, el, SelectorKey::MessageTime)
                .await
                .and_then(|t| parse_clock_time(&t))
                .unwrap_or_else(Utc::now),
        };

        Some(RawMessage::new(group_name, sender, text, timestamp))
    }

    async fn text_of<P: PageDriver>(&self, page: &P, el: &P::Element, key: SelectorKey) -> Option<String> {
        let found = self
            .resolver
            .resolve_in(page, el, key, &[], ResolveOptions::immediate())
            .await
            .found()?;
        let text = found.text().await.ok()?;
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

async fn message_wrapper_ancestor<P: PageDriver>(page: &P, leaf: &P::Element) -> Option<P::Element> {
    let mut current = leaf.clone();
    for _ in 0..WRAPPER_ANCESTOR_DEPTH {
        let parent = page
            .find_all(Some(&current), &Query::parent())
            .await
            .ok()?
            .into_iter()
            .next()?;
        if looks_like_message_wrapper(&parent).await {
            return Some(parent);
        }
        current = parent;
    }
    None
}

async fn looks_like_message_wrapper<E: ElementHandle>(el: &E) -> bool {
    if let Ok(Some(class)) = el.attribute("class").await {
        if class.contains("message-in") || class.contains("message-out") || class.contains("focusable-list-item") {
            return true;
        }
    }
    matches!(el.attribute("data-id").await, Ok(Some(_)))
}

/// Decoded `data-pre-plain-text` (`"[14:05, 18/10/2026] Alice: "`).
#[derive(Debug, Clone, PartialEq)]
pub struct PrePlainText {
    pub timestamp: Option<DateTime<Utc>>,
    pub sender: Option<String>,
}

fn pre_plain_text_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\[(?P<time>[^,\]]+),\s*(?P<date>[^\]]+)\]\s*(?P<sender>.*?):?\s*$").ok()
    })
    .as_ref()
}

pub fn parse_pre_plain_text(raw: &str) -> Option<PrePlainText> {
    let caps = pre_plain_text_regex()?.captures(raw)?;
    let timestamp = parse_chat_datetime(&caps["date"], &caps["time"]);
    let sender = caps
        .name("sender")
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    Some(PrePlainText { timestamp, sender })
}
