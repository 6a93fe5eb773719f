//! In-memory page driver shared by the integration tests.
//!
//! The fake does not evaluate CSS or XPath. Each test registers which nodes a
//! given query string returns (optionally relative to a scope node), and the
//! fake answers from that table. `..` is answered from parent links.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use task_scout::scraping::driver::{ElementHandle, PageDriver, Query};
use task_scout::scraping::selectors::{ResolveOptions, Resolver, SelectorKey, SelectorTable};

pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Resolver over the real table that never waits.
pub fn immediate_resolver() -> Resolver {
    Resolver::new(SelectorTable::whatsapp_web(), ResolveOptions::immediate())
}

/// Rendered text of alternative `idx` of `key`, as the resolver will issue it.
pub fn alt(key: SelectorKey, idx: usize, args: &[(&str, &str)]) -> String {
    SelectorTable::whatsapp_web().alternatives(key)[idx]
        .render(args)
        .as_str()
        .to_string()
}

#[derive(Default)]
struct Node {
    text: String,
    attrs: HashMap<String, String>,
    parent: Option<usize>,
}

#[derive(Default)]
struct Dom {
    nodes: Vec<Node>,
    matches: HashMap<(Option<usize>, String), Vec<usize>>,
    failing: HashSet<String>,
    stale: HashSet<usize>,
    queries: Vec<String>,
    clicks: Vec<usize>,
    typed: Vec<String>,
    navigations: Vec<String>,
    screenshots: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakePage {
    dom: Arc<Mutex<Dom>>,
}

#[derive(Clone)]
pub struct FakeElement {
    id: usize,
    dom: Arc<Mutex<Dom>>,
}

impl FakeElement {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, text: &str, attrs: &[(&str, &str)], parent: Option<usize>) -> usize {
        let mut dom = self.dom.lock().unwrap();
        dom.nodes.push(Node {
            text: text.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            parent,
        });
        dom.nodes.len() - 1
    }

    /// Answer `query` (evaluated under `scope`) with `ids`.
    pub fn on(&self, scope: Option<usize>, query: &str, ids: &[usize]) {
        self.dom
            .lock()
            .unwrap()
            .matches
            .insert((scope, query.to_string()), ids.to_vec());
    }

    /// Make `query` fail with a transport error wherever it is issued.
    pub fn fail(&self, query: &str) {
        self.dom.lock().unwrap().failing.insert(query.to_string());
    }

    /// Clicking or typing into `id` fails, as for a detached element.
    pub fn make_stale(&self, id: usize) {
        self.dom.lock().unwrap().stale.insert(id);
    }

    pub fn queries(&self) -> Vec<String> {
        self.dom.lock().unwrap().queries.clone()
    }

    pub fn clicks(&self) -> Vec<usize> {
        self.dom.lock().unwrap().clicks.clone()
    }

    pub fn typed(&self) -> Vec<String> {
        self.dom.lock().unwrap().typed.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.dom.lock().unwrap().navigations.clone()
    }

    pub fn screenshots(&self) -> Vec<String> {
        self.dom.lock().unwrap().screenshots.clone()
    }

    /// Handle for node `id`.
    pub fn handle(&self, id: usize) -> FakeElement {
        FakeElement {
            id,
            dom: Arc::clone(&self.dom),
        }
    }
}

#[async_trait]
impl ElementHandle for FakeElement {
    fn node_key(&self) -> i64 {
        self.id as i64
    }

    async fn text(&self) -> Result<String> {
        let dom = self.dom.lock().unwrap();
        Ok(dom.nodes[self.id].text.clone())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        let dom = self.dom.lock().unwrap();
        Ok(dom.nodes[self.id].attrs.get(name).cloned())
    }

    async fn click(&self) -> Result<()> {
        let mut dom = self.dom.lock().unwrap();
        if dom.stale.contains(&self.id) {
            return Err(anyhow!("node {} is detached", self.id));
        }
        dom.clicks.push(self.id);
        Ok(())
    }

    async fn clear_and_type(&self, text: &str) -> Result<()> {
        let mut dom = self.dom.lock().unwrap();
        if dom.stale.contains(&self.id) {
            return Err(anyhow!("node {} is detached", self.id));
        }
        dom.typed.push(text.to_string());
        Ok(())
    }
}

#[async_trait]
impl PageDriver for FakePage {
    type Element = FakeElement;

    async fn find_all(
        &self,
        scope: Option<&FakeElement>,
        query: &Query,
    ) -> Result<Vec<FakeElement>> {
        let ids = {
            let mut dom = self.dom.lock().unwrap();
            let text = query.as_str().to_string();
            dom.queries.push(text.clone());
            if dom.failing.contains(&text) {
                return Err(anyhow!("query failed: {}", text));
            }
            let scope_id = scope.map(FakeElement::id);
            if text == ".." {
                scope_id
                    .and_then(|id| dom.nodes[id].parent)
                    .into_iter()
                    .collect::<Vec<_>>()
            } else {
                dom.matches
                    .get(&(scope_id, text))
                    .cloned()
                    .unwrap_or_default()
            }
        };
        Ok(ids.into_iter().map(|id| self.handle(id)).collect())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.dom.lock().unwrap().navigations.push(url.to_string());
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.dom
            .lock()
            .unwrap()
            .screenshots
            .push(path.display().to_string());
        Ok(())
    }
}

/// A logged-in page with a chat list, a search box, one reachable
/// conversation named `group` and its message bubbles.
///
/// Each message is `(pre_plain_text, text, outgoing)`; `None` meta means the
/// bubble carries no `data-pre-plain-text`.
pub struct ChatFixture {
    pub page: FakePage,
    pub search_box: usize,
    pub contact: usize,
    pub back: usize,
    pub bubbles: Vec<usize>,
}

pub fn chat_fixture(group: &str, messages: &[(Option<&str>, &str, bool)]) -> ChatFixture {
    let page = FakePage::new();

    let chat_list = page.node("", &[("id", "pane-side")], None);
    page.on(None, &alt(SelectorKey::ChatList, 0, &[]), &[chat_list]);

    let search_box = page.node("", &[("contenteditable", "true")], None);
    page.on(None, &alt(SelectorKey::SearchInput, 0, &[]), &[search_box]);

    let contact = page.node(group, &[("title", group)], Some(chat_list));
    page.on(
        None,
        &alt(SelectorKey::ContactByName, 0, &[("name", group)]),
        &[contact],
    );

    let back = page.node("", &[("aria-label", "Back")], None);
    page.on(None, &alt(SelectorKey::BackButton, 0, &[]), &[back]);

    let container = page.node("", &[], None);
    page.on(None, &alt(SelectorKey::MessageContainer, 0, &[]), &[container]);

    let mut bubbles = Vec::new();
    for (meta, text, outgoing) in messages {
        let class = if *outgoing { "message-out" } else { "message-in" };
        let bubble = page.node(text, &[("class", class)], Some(container));
        if let Some(meta) = meta {
            let meta_node =
                page.node(text, &[("data-pre-plain-text", meta)], Some(bubble));
            page.on(Some(bubble), &alt(SelectorKey::MessageMeta, 0, &[]), &[meta_node]);
        }
        if !text.is_empty() {
            let span = page.node(text, &[("class", "selectable-text")], Some(bubble));
            page.on(Some(bubble), &alt(SelectorKey::MessageText, 0, &[]), &[span]);
        }
        bubbles.push(bubble);
    }
    page.on(
        Some(container),
        &alt(SelectorKey::MessageDirect, 0, &[]),
        &bubbles,
    );

    ChatFixture {
        page,
        search_box,
        contact,
        back,
        bubbles,
    }
}

/// App state rooted in `dir`: rule-based extraction only and no browser, so
/// every scan goes through the export or demo paths.
pub fn offline_state(dir: &Path) -> task_scout::AppState {
    use task_scout::core::app_state::LlmMode;
    use task_scout::core::config::{AppPaths, BrowserFamily};
    use task_scout::scraping::browser_manager::BrowserCapability;

    task_scout::AppState::new(reqwest::Client::new(), AppPaths::under(dir))
        .unwrap()
        .with_llm(LlmMode::Disabled)
        .with_capability(BrowserCapability::unavailable(
            BrowserFamily::Chrome,
            "no browser in tests",
        ))
}

pub fn write_config(
    state: &task_scout::AppState,
    edit: impl FnOnce(&mut task_scout::core::config::ScraperConfig),
) {
    let mut cfg = state.load_config();
    edit(&mut cfg);
    state.save_config(&cfg).unwrap();
}
