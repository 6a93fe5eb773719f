//! Selector Resolution Engine.
//!
//! WhatsApp Web's markup is not a contract. Every element the scraper needs is
//! addressed through a semantic [`SelectorKey`] that maps to an ordered list of
//! structural queries; resolution walks that list strictly in order and stops
//! at the first hit. All markup churn lives in [`SelectorTable::whatsapp_web`].

use super::driver::{PageDriver, Query};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SelectorKey {
    /// QR pairing screen shown while logged out.
    LandingQr,
    /// Conversation list; its presence means the session is authenticated.
    ChatList,
    SearchInput,
    /// Search result for a conversation, templated with `{name}`.
    ContactByName,
    /// Generic rows of the conversation list.
    ChatRow,
    BackButton,
    MessageContainer,
    /// Most specific message wrapper match.
    MessageDirect,
    Message,
    /// Leaf text spans used to rebuild message wrappers bottom-up.
    MessageLeafText,
    /// Element carrying `data-pre-plain-text="[time, date] sender: "`.
    MessageMeta,
    MessageSender,
    MessageText,
    MessageTime,
}

impl SelectorKey {
    pub const ALL: [SelectorKey; 14] = [
        SelectorKey::LandingQr,
        SelectorKey::ChatList,
        SelectorKey::SearchInput,
        SelectorKey::ContactByName,
        SelectorKey::ChatRow,
        SelectorKey::BackButton,
        SelectorKey::MessageContainer,
        SelectorKey::MessageDirect,
        SelectorKey::Message,
        SelectorKey::MessageLeafText,
        SelectorKey::MessageMeta,
        SelectorKey::MessageSender,
        SelectorKey::MessageText,
        SelectorKey::MessageTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorKey::LandingQr => "landing_qr",
            SelectorKey::ChatList => "chat_list",
            SelectorKey::SearchInput => "chat_search",
            SelectorKey::ContactByName => "contact_by_name",
            SelectorKey::ChatRow => "chat_row",
            SelectorKey::BackButton => "back_button",
            SelectorKey::MessageContainer => "message_container",
            SelectorKey::MessageDirect => "message_direct",
            SelectorKey::Message => "message",
            SelectorKey::MessageLeafText => "message_leaf_text",
            SelectorKey::MessageMeta => "message_meta",
            SelectorKey::MessageSender => "message_sender",
            SelectorKey::MessageText => "message_text",
            SelectorKey::MessageTime => "message_time",
        }
    }
}

/// Outcome of a lookup. `NotFound` is an expected, frequent result and is
/// handled by the caller, never raised.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Found(T),
    NotFound,
}

impl<T> Resolution<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Resolution::Found(v) => Some(v),
            Resolution::NotFound => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Table
// ─────────────────────────────────────────────────────────────────────────────

/// A query whose text may contain `{arg}` placeholders. XPath placeholders are
/// substituted as complete, quoted XPath string literals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryTemplate {
    query: Query,
}

impl QueryTemplate {
    pub fn css(s: &str) -> Self {
        Self {
            query: Query::css(s),
        }
    }

    pub fn xpath(s: &str) -> Self {
        Self {
            query: Query::xpath(s),
        }
    }

    pub fn render(&self, args: &[(&str, &str)]) -> Query {
        if args.is_empty() {
            return self.query.clone();
        }
        match &self.query {
            Query::XPath(s) => {
                let mut out = s.clone();
                for (k, v) in args {
                    out = out.replace(&format!("{{{k}}}"), &xpath_literal(v));
                }
                Query::XPath(out)
            }
            Query::Css(s) => {
                let mut out = s.clone();
                for (k, v) in args {
                    out = out.replace(&format!("{{{k}}}"), &css_string(v));
                }
                Query::Css(out)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct SelectorTable {
    entries: HashMap<SelectorKey, Vec<QueryTemplate>>,
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self::whatsapp_web()
    }
}

impl SelectorTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Ranked alternatives for the current WhatsApp Web markup, most specific
    /// first. Markup changes often; keep older variants at the tail.
    pub fn whatsapp_web() -> Self {
        use QueryTemplate as T;
        let mut t = Self::empty();

        t.set(
            SelectorKey::LandingQr,
            vec![
                T::css("div.landing-wrapper"),
                T::css("canvas[aria-label*='Scan']"),
                T::css("div[data-ref] canvas"),
                T::xpath(r#"//div[contains(@class,"landing-wrapper")]"#),
            ],
        );
        t.set(
            SelectorKey::ChatList,
            vec![
                T::css("#pane-side"),
                T::css("div[aria-label='Chat list']"),
                T::xpath(r#"//div[contains(@class,"_2AOIt")]"#),
                T::xpath(r#"//div[contains(@class,"chat-list")]"#),
                T::xpath(r#"//div[contains(@id,"pane-side")]"#),
            ],
        );
        t.set(
            SelectorKey::SearchInput,
            vec![
                T::css("#side div[contenteditable='true'][data-tab='3']"),
                T::xpath(
                    r#"//div[contains(@class,"lexical-rich-text-input")]//div[@contenteditable="true"]"#,
                ),
                T::xpath(r#"//div[contains(@class,"copyable-text") and @contenteditable="true"]"#),
                T::xpath(r#"//div[contains(@title,"Search")]"#),
                T::xpath(r#"//div[@contenteditable="true"]"#),
            ],
        );
        t.set(
            SelectorKey::ContactByName,
            vec![
                T::xpath("//span[@title={name}]"),
                T::xpath("//span[text()={name}]"),
                T::xpath("//span[contains(text(),{name})]"),
            ],
        );
        t.set(
            SelectorKey::ChatRow,
            vec![
                T::css("#pane-side div[role='listitem']"),
                T::css("#pane-side div[role='row']"),
                T::xpath(r#"//div[@id="pane-side"]//div[@tabindex="-1"]"#),
            ],
        );
        t.set(
            SelectorKey::BackButton,
            vec![
                T::css("div[aria-label='Back']"),
                T::css("button[aria-label='Back']"),
                T::css("span[data-icon='back']"),
                T::css("span[data-icon='x-alt']"),
                T::xpath(r#"//div[@role="button" and @title="Back"]"#),
            ],
        );
        t.set(
            SelectorKey::MessageContainer,
            vec![
                T::css("div[data-testid='conversation-panel-messages']"),
                T::css("#main div[role='application']"),
                T::xpath(r#"//div[contains(@class,"copyable-area")]"#),
                T::css("#main"),
            ],
        );
        t.set(
            SelectorKey::MessageDirect,
            vec![T::css("div.message-in, div.message-out")],
        );
        t.set(
            SelectorKey::Message,
            vec![
                T::xpath(r#".//div[contains(@class,"_21Ahp")]"#),
                T::xpath(r#".//div[contains(@class,"message-in")]"#),
                T::xpath(r#".//div[contains(@class,"FTBzM")]"#),
                T::xpath(r#".//div[@data-id]"#),
                T::xpath(r#".//div[contains(@class,"message")]"#),
                T::xpath(r#".//div[contains(@class,"copyable-text")]"#),
            ],
        );
        t.set(
            SelectorKey::MessageLeafText,
            vec![
                T::xpath(r#".//span[contains(@class,"selectable-text")]"#),
                T::xpath(r#".//span[@dir="ltr"]"#),
                T::xpath(r#".//span[@dir="auto"]"#),
            ],
        );
        t.set(
            SelectorKey::MessageMeta,
            vec![T::xpath("descendant-or-self::*[@data-pre-plain-text]")],
        );
        t.set(
            SelectorKey::MessageSender,
            vec![
                T::xpath(r#".//span[@data-testid="author"]"#),
                T::xpath(r#".//span[contains(@class,"_ahxt")]"#),
                T::xpath(r#".//span[@aria-label and contains(@class,"copyable-text")]"#),
            ],
        );
        t.set(
            SelectorKey::MessageText,
            vec![
                T::xpath(r#".//span[contains(@class,"selectable-text")]"#),
                T::xpath(r#".//div[contains(@class,"copyable-text")]//span[@dir="ltr"]"#),
                T::xpath(r#".//span[@dir="ltr"]"#),
            ],
        );
        t.set(
            SelectorKey::MessageTime,
            vec![
                T::xpath(r#".//div[@data-testid="msg-meta"]//span"#),
                T::xpath(r#".//span[contains(@class,"_ahif")]"#),
                T::xpath(
                    r#".//div[contains(@class,"copyable-text")]/following-sibling::div//span[@dir="auto"]"#,
                ),
            ],
        );
        t
    }

    pub fn set(&mut self, key: SelectorKey, alternatives: Vec<QueryTemplate>) {
        self.entries.insert(key, alternatives);
    }

    pub fn alternatives(&self, key: SelectorKey) -> &[QueryTemplate] {
        self.entries.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Wait budget for one key. Each alternative is polled for at most
/// `per_entry`; the whole list never waits longer than `ceiling`. Once the
/// ceiling is spent, remaining alternatives still get a single probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolveOptions {
    pub per_entry: Duration,
    pub ceiling: Duration,
    pub poll: Duration,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            per_entry: Duration::from_secs(3),
            ceiling: Duration::from_secs(10),
            poll: Duration::from_millis(250),
        }
    }
}

impl ResolveOptions {
    /// Single probe per alternative, no waiting. For decoding already-rendered
    /// message elements.
    pub fn immediate() -> Self {
        Self {
            per_entry: Duration::ZERO,
            ceiling: Duration::ZERO,
            poll: Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Resolver {
    table: SelectorTable,
    opts: ResolveOptions,
}

impl Resolver {
    pub fn new(table: SelectorTable, opts: ResolveOptions) -> Self {
        Self { table, opts }
    }

    pub fn options(&self) -> ResolveOptions {
        self.opts
    }

    pub fn table(&self) -> &SelectorTable {
        &self.table
    }

    /// First element matched by the first succeeding alternative.
    pub async fn resolve<P: PageDriver>(
        &self,
        page: &P,
        key: SelectorKey,
        args: &[(&str, &str)],
    ) -> Resolution<P::Element> {
        match self.first_match(page, None, key, args, self.opts).await {
            Some((_, mut hits)) => Resolution::Found(hits.remove(0)),
            None => Resolution::NotFound,
        }
    }

    /// Like [`Resolver::resolve`] but relative to `scope`, with an explicit
    /// wait budget.
    pub async fn resolve_in<P: PageDriver>(
        &self,
        page: &P,
        scope: &P::Element,
        key: SelectorKey,
        args: &[(&str, &str)],
        opts: ResolveOptions,
    ) -> Resolution<P::Element> {
        match self.first_match(page, Some(scope), key, args, opts).await {
            Some((_, mut hits)) => Resolution::Found(hits.remove(0)),
            None => Resolution::NotFound,
        }
    }

    /// Every element matched by the first succeeding alternative.
    pub async fn resolve_all<P: PageDriver>(
        &self,
        page: &P,
        scope: Option<&P::Element>,
        key: SelectorKey,
        args: &[(&str, &str)],
        opts: ResolveOptions,
    ) -> Resolution<Vec<P::Element>> {
        match self.first_match(page, scope, key, args, opts).await {
            Some((_, hits)) => Resolution::Found(hits),
            None => Resolution::NotFound,
        }
    }

    /// Index of the alternative that matches, for diagnostics.
    pub async fn probe<P: PageDriver>(
        &self,
        page: &P,
        key: SelectorKey,
        args: &[(&str, &str)],
    ) -> Option<usize> {
        self.first_match(page, None, key, args, ResolveOptions::immediate())
            .await
            .map(|(i, _)| i)
    }

    async fn first_match<P: PageDriver>(
        &self,
        page: &P,
        scope: Option<&P::Element>,
        key: SelectorKey,
        args: &[(&str, &str)],
        opts: ResolveOptions,
    ) -> Option<(usize, Vec<P::Element>)> {
        let started = Instant::now();
        let ceiling_at = started + opts.ceiling;

        for (idx, template) in self.table.alternatives(key).iter().enumerate() {
            let query = template.render(args);
            let entry_deadline = (Instant::now() + opts.per_entry).min(ceiling_at);

            loop {
                match page.find_all(scope, &query).await {
                    Ok(hits) if !hits.is_empty() => {
                        debug!(
                            "selectors: {} matched alternative #{} ({})",
                            key.as_str(),
                            idx,
                            query
                        );
                        return Some((idx, hits));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(
                            "selectors: {} alternative #{} ({}) errored: {}",
                            key.as_str(),
                            idx,
                            query,
                            e
                        );
                    }
                }
                if opts.poll.is_zero() || Instant::now() + opts.poll > entry_deadline {
                    break;
                }
                tokio::time::sleep(opts.poll).await;
            }
        }

        debug!(
            "selectors: {} not found after {}ms",
            key.as_str(),
            started.elapsed().as_millis()
        );
        None
    }
}

/// Quote `s` as an XPath 1.0 string literal. XPath has no escape sequences,
/// so strings holding both quote kinds are built with `concat()`.
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('"') {
        return format!("\"{s}\"");
    }
    if !s.contains('\'') {
        return format!("'{s}'");
    }
    let parts: Vec<String> = s
        .split('"')
        .map(|p| format!("\"{p}\""))
        .collect();
    format!("concat({})", parts.join(", '\"', "))
}

fn css_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
