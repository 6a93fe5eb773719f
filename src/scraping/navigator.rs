//! Conversation Navigator: search a conversation by name, open it, and get
//! back to the conversation list afterwards.
//!
//! Elements can vanish between resolution and use (WhatsApp re-renders the
//! list while typing), so every step re-resolves and retries instead of
//! treating a failed click as fatal.

use super::browser_session::WHATSAPP_WEB_URL;
use super::driver::{ElementHandle, PageDriver, Query};
use super::selectors::{Resolution, ResolveOptions, Resolver, SelectorKey};
use std::time::Duration;
use tracing::{debug, info, warn};

const STEP_ATTEMPTS: usize = 2;
const ROW_ANCESTOR_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug)]
pub struct NavigatorTimings {
    /// Pause after typing the search text, for results to render.
    pub search_settle: Duration,
    /// Pause after activating a conversation, for messages to render.
    pub open_settle: Duration,
}

impl Default for NavigatorTimings {
    fn default() -> Self {
        Self {
            search_settle: Duration::from_secs(3),
            open_settle: Duration::from_secs(2),
        }
    }
}

impl NavigatorTimings {
    pub fn none() -> Self {
        Self {
            search_settle: Duration::ZERO,
            open_settle: Duration::ZERO,
        }
    }
}

pub struct ConversationNavigator<'a> {
    resolver: &'a Resolver,
    timings: NavigatorTimings,
}

impl<'a> ConversationNavigator<'a> {
    pub fn new(resolver: &'a Resolver, timings: NavigatorTimings) -> Self {
        Self { resolver, timings }
    }

    /// Search for `name` and open it. `false` means the conversation could not
    /// be reached; the caller skips it.
    pub async fn open_conversation<P: PageDriver>(&self, page: &P, name: &str) -> bool {
        if !self.type_search(page, name).await {
            warn!("navigator: search box not found; cannot open '{}'", name);
            return false;
        }
        pause(self.timings.search_settle).await;

        if self.click_search_result(page, name).await || self.click_matching_row(page, name).await
        {
            info!("navigator: opened '{}'", name);
            pause(self.timings.open_settle).await;
            return true;
        }

        warn!("navigator: no row matches '{}'", name);
        false
    }

    /// Leave the open conversation through its back control. `false` when no
    /// back control exists; the caller may [`Self::reset`] instead.
    pub async fn close_conversation<P: PageDriver>(&self, page: &P) -> bool {
        for attempt in 1..=STEP_ATTEMPTS {
            let Resolution::Found(back) = self.resolver.resolve(page, SelectorKey::BackButton, &[]).await
            else {
                return false;
            };
            match back.click().await {
                Ok(()) => return true,
                Err(e) => debug!("navigator: back click attempt {} failed: {}", attempt, e),
            }
        }
        false
    }

    /// Hard reset: reload the landing page and wait for the conversation list.
    pub async fn reset<P: PageDriver>(&self, page: &P) -> bool {
        if let Err(e) = page.navigate(WHATSAPP_WEB_URL).await {
            warn!("navigator: reset navigation failed: {}", e);
            if let Err(e) = page.reload().await {
                warn!("navigator: reload failed: {}", e);
                return false;
            }
        }
        self.resolver
            .resolve(page, SelectorKey::ChatList, &[])
            .await
            .is_found()
    }

    async fn type_search<P: PageDriver>(&self, page: &P, name: &str) -> bool {
        for attempt in 1..=STEP_ATTEMPTS {
            let Resolution::Found(input) = self.resolver.resolve(page, SelectorKey::SearchInput, &[]).await
            else {
                return false;
            };
            match input.clear_and_type(name).await {
                Ok(()) => return true,
                Err(e) => debug!("navigator: typing attempt {} failed: {}", attempt, e),
            }
        }
        false
    }

    async fn click_search_result<P: PageDriver>(&self, page: &P, name: &str) -> bool {
        for attempt in 1..=STEP_ATTEMPTS {
            let Resolution::Found(hit) = self
                .resolver
                .resolve(page, SelectorKey::ContactByName, &[("name", name)])
                .await
            else {
                return false;
            };
            match hit.click().await {
                Ok(()) => return true,
                Err(e) => debug!(
                    "navigator: result click attempt {} failed (stale?): {}",
                    attempt, e
                ),
            }
        }
        false
    }

    /// Fallback: scan visible rows for one whose text contains `name`; failing
    /// that, climb from any span mentioning `name` to a row-like ancestor.
    async fn click_matching_row<P: PageDriver>(&self, page: &P, name: &str) -> bool {
        let needle = name.to_lowercase();
        let opts = ResolveOptions::immediate();

        if let Resolution::Found(rows) = self
            .resolver
            .resolve_all(page, None, SelectorKey::ChatRow, &[], opts)
            .await
        {
            for row in rows {
                let text = row.text().await.unwrap_or_default();
                if text.to_lowercase().contains(&needle) && row.click().await.is_ok() {
                    debug!("navigator: opened '{}' via row scan", name);
                    return true;
                }
            }
        }

        let spans = page
            .find_all(
                None,
                &Query::xpath(format!(
                    "//span[contains(text(),{})]",
                    super::selectors::xpath_literal(name)
                )),
            )
            .await
            .unwrap_or_default();
        for span in spans {
            if let Some(row) = row_like_ancestor(page, &span).await {
                if row.click().await.is_ok() {
                    debug!("navigator: opened '{}' via ancestor walk", name);
                    return true;
                }
            }
        }
        false
    }
}

async fn row_like_ancestor<P: PageDriver>(page: &P, start: &P::Element) -> Option<P::Element> {
    let mut current = start.clone();
    for _ in 0..ROW_ANCESTOR_DEPTH {
        let parent = page
            .find_all(Some(&current), &Query::parent())
            .await
            .ok()?
            .into_iter()
            .next()?;
        if looks_row_like(&parent).await {
            return Some(parent);
        }
        current = parent;
    }
    None
}

async fn looks_row_like<E: ElementHandle>(el: &E) -> bool {
    if let Ok(Some(role)) = el.attribute("role").await {
        if matches!(role.as_str(), "row" | "listitem" | "gridcell" | "button") {
            return true;
        }
    }
    if let Ok(Some(tab)) = el.attribute("tabindex").await {
        if tab == "-1" || tab == "0" {
            return true;
        }
    }
    false
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}
