//! Selector health check: which alternative of each key matches the live page.

use crate::core::app_state::AppState;
use crate::scraping::browser_session::{BrowserSession, SessionError};
use crate::scraping::driver::PageDriver;
use crate::scraping::selectors::{Resolver, SelectorKey};
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct SelectorProbe {
    pub key: &'static str,
    pub alternatives: usize,
    /// Index of the first matching alternative; `None` when nothing matched.
    pub matched: Option<usize>,
}

/// Probe every key once, without waiting. `ContactByName` is probed with
/// `sample_name` and skipped when there is none.
pub async fn probe_selectors<P: PageDriver>(
    page: &P,
    resolver: &Resolver,
    sample_name: Option<&str>,
) -> Vec<SelectorProbe> {
    let mut out = Vec::with_capacity(SelectorKey::ALL.len());
    for key in SelectorKey::ALL {
        let matched = match (key, sample_name) {
            (SelectorKey::ContactByName, Some(name)) => {
                resolver.probe(page, key, &[("name", name)]).await
            }
            (SelectorKey::ContactByName, None) => continue,
            _ => resolver.probe(page, key, &[]).await,
        };
        out.push(SelectorProbe {
            key: key.as_str(),
            alternatives: resolver.table().alternatives(key).len(),
            matched,
        });
    }
    out
}

/// Open a session and probe the landing page. Holds the scan lock so it never
/// competes with a scan for the browser profile.
pub async fn run_diagnose(state: &AppState) -> Result<Vec<SelectorProbe>, SessionError> {
    let _guard = state.scan_lock.lock().await;
    let cfg = state.load_config();
    let capability = state.capability_for(cfg.browser_type);
    let mut session = BrowserSession::open(&capability, &cfg, &state.paths, &state.resolver).await?;
    let sample = cfg.monitored_groups.first().map(String::as_str);
    let probes = probe_selectors(session.page(), &state.resolver, sample).await;
    session.screenshot("whatsapp_diagnose").await;
    session.close().await;
    Ok(probes)
}
