//! Scan orchestrator.
//!
//! `Idle → SessionOpening → Navigating → Extracting → TaskExtracting →
//! Persisting → (next conversation) → SessionClosing → Idle`.
//!
//! A conversation that cannot be opened or yields nothing is skipped; the run
//! continues with the next one. Only a persistence failure, or a missing
//! driver with no export / demo fallback, fails the whole scan. Whatever was
//! admitted before a failure stays committed.

use crate::core::app_state::AppState;
use crate::core::config::{load_scraper_config, ScraperConfig};
use crate::core::types::{RawMessage, TaskOrigin};
use crate::features::dedup_gate::DedupGate;
use crate::features::{demo_tasks, export_import};
use crate::nlp::task_extractor::TaskExtractor;
use crate::scraping::browser_session::{capture_screenshot, BrowserSession, SessionError};
use crate::scraping::driver::PageDriver;
use crate::scraping::message_extractor::MessageExtractor;
use crate::scraping::navigator::{ConversationNavigator, NavigatorTimings};
use crate::scraping::selectors::Resolver;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    SessionOpening,
    Navigating,
    Extracting,
    TaskExtracting,
    Persisting,
    SessionClosing,
}

fn log_state(state: ScanState) {
    info!("scan_state={:?}", state);
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("live capture unavailable and no export or demo fallback configured: {0}")]
    DriverUnavailable(String),

    #[error("persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("configuration: {0}")]
    Config(String),
}

/// Where the scanned messages came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    #[default]
    None,
    Live,
    Export,
    Demo,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ScanReport {
    pub source: ScanSource,
    pub conversations_opened: usize,
    pub conversations_skipped: Vec<String>,
    pub messages_seen: usize,
    pub messages_new: usize,
    pub filtered_short: usize,
    pub tasks_extracted: usize,
    pub stored: usize,
    pub skipped: usize,
    pub llm_failures: usize,
    pub warnings: Vec<String>,
    /// Set when the run stopped early without failing (authentication
    /// timeout, profile busy).
    pub aborted: Option<String>,
    #[serde(skip)]
    reached_persisting: bool,
}

impl ScanReport {
    fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("scan: {}", msg);
        self.warnings.push(msg);
    }

    pub fn reached_persisting(&self) -> bool {
        self.reached_persisting
    }
}

/// What to scan. Defaults to every monitored conversation through the
/// configured source.
#[derive(Clone, Debug, Default)]
pub struct ScanRequest {
    /// Scan only this conversation.
    pub group: Option<String>,
    /// Read the export location even when `use_export` is off.
    pub force_export: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared pipeline: dedup → extract → admit
// ─────────────────────────────────────────────────────────────────────────────

/// Run one batch of messages through pre-extraction dedup, task extraction
/// and admission, tagging stored tasks with `origin`.
pub async fn process_messages(
    extractor: &TaskExtractor,
    gate: &DedupGate,
    messages: Vec<RawMessage>,
    origin: TaskOrigin,
    report: &mut ScanReport,
) -> Result<(), ScanError> {
    report.messages_seen += messages.len();
    let fresh = gate
        .filter_unprocessed(messages)
        .await
        .map_err(ScanError::Persistence)?;
    report.messages_new += fresh.len();
    if fresh.is_empty() {
        return Ok(());
    }

    log_state(ScanState::TaskExtracting);
    let extraction = extractor.extract(&fresh).await;
    report.filtered_short += extraction.filtered_short;
    report.llm_failures += extraction.llm_failures;
    report.tasks_extracted += extraction.candidates.len();
    if extraction.llm_failures > 0 {
        report.warn(format!(
            "{} llm batch(es) failed; rule-based extraction used instead",
            extraction.llm_failures
        ));
    }

    log_state(ScanState::Persisting);
    report.reached_persisting = true;
    let candidates: Vec<_> = extraction
        .candidates
        .into_iter()
        .map(|c| c.with_origin(origin))
        .collect();
    let summary = gate
        .admit_all(&candidates)
        .await
        .map_err(ScanError::Persistence)?;
    report.stored += summary.stored;
    report.skipped += summary.skipped;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Live scan over an authenticated page
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a live pass over one authenticated page needs.
pub struct LiveScan<'a> {
    pub resolver: &'a Resolver,
    pub extractor: &'a TaskExtractor,
    pub gate: &'a DedupGate,
    pub max_messages: usize,
    pub timings: NavigatorTimings,
    /// Milestone screenshots (debug mode).
    pub debug_screenshots: Option<&'a Path>,
    /// Screenshots when a conversation cannot be reached.
    pub error_screenshots: Option<&'a Path>,
}

impl<'a> LiveScan<'a> {
    pub fn new(resolver: &'a Resolver, extractor: &'a TaskExtractor, gate: &'a DedupGate) -> Self {
        Self {
            resolver,
            extractor,
            gate,
            max_messages: ScraperConfig::default().max_messages_per_chat,
            timings: NavigatorTimings::default(),
            debug_screenshots: None,
            error_screenshots: None,
        }
    }

    /// Visit each conversation in turn. Persistence errors abort; everything
    /// else skips the conversation.
    pub async fn scan_conversations<P: PageDriver>(
        &self,
        page: &P,
        groups: &[String],
        report: &mut ScanReport,
    ) -> Result<(), ScanError> {
        let navigator = ConversationNavigator::new(self.resolver, self.timings);
        let extractor = MessageExtractor::new(self.resolver);

        for group in groups {
            log_state(ScanState::Navigating);
            if !navigator.open_conversation(page, group).await {
                report.warn(format!("conversation '{}' not found; skipped", group));
                report.conversations_skipped.push(group.clone());
                if let Some(dir) = self.error_screenshots {
                    capture_screenshot(page, dir, "whatsapp_group_not_found").await;
                }
                // Leave no half-typed search behind for the next conversation.
                navigator.reset(page).await;
                continue;
            }
            report.conversations_opened += 1;
            if let Some(dir) = self.debug_screenshots {
                capture_screenshot(page, dir, "whatsapp_group_opened").await;
            }

            log_state(ScanState::Extracting);
            let messages = extractor
                .extract_messages(page, group, self.max_messages)
                .await;
            if messages.is_empty() {
                report.warn(format!("no messages decoded in '{}'", group));
                if let Some(dir) = self.error_screenshots {
                    capture_screenshot(page, dir, "whatsapp_no_messages").await;
                }
            } else {
                process_messages(self.extractor, self.gate, messages, TaskOrigin::Live, report)
                    .await?;
            }

            if !navigator.close_conversation(page).await {
                navigator.reset(page).await;
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Export and demo sources
// ─────────────────────────────────────────────────────────────────────────────

/// Parse every monitored export at `location` and run it through the pipeline.
pub async fn scan_export(
    location: &Path,
    groups: &[String],
    max_messages: usize,
    extractor: &TaskExtractor,
    gate: &DedupGate,
    report: &mut ScanReport,
) -> Result<(), ScanError> {
    report.source = ScanSource::Export;
    let files = export_import::export_files(location)
        .map_err(|e| ScanError::Config(format!("{e:#}")))?;
    let files = export_import::select_monitored(files, groups);
    if files.is_empty() {
        report.warn(format!(
            "no chat exports for the monitored conversations in {}",
            location.display()
        ));
        return Ok(());
    }

    for file in files {
        let mut messages = match export_import::parse_export_file(&file) {
            Ok(m) => m,
            Err(e) => {
                report.warn(format!("{e:#}"));
                continue;
            }
        };
        report.conversations_opened += 1;
        let skip = messages.len().saturating_sub(max_messages);
        messages.drain(..skip);
        process_messages(extractor, gate, messages, TaskOrigin::Export, report).await?;
    }
    Ok(())
}

pub async fn scan_demo(
    groups: &[String],
    extractor: &TaskExtractor,
    gate: &DedupGate,
    report: &mut ScanReport,
) -> Result<(), ScanError> {
    report.source = ScanSource::Demo;
    report.warn("no capture path available; generating demo tasks (origin=demo)");
    let messages = demo_tasks::demo_messages(groups);
    report.conversations_opened += groups.len().max(1);
    process_messages(extractor, gate, messages, TaskOrigin::Demo, report).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry points
// ─────────────────────────────────────────────────────────────────────────────

/// Run one scan. Serialized with every other scan on `state`.
pub async fn run_scan(state: &AppState, request: ScanRequest) -> Result<ScanReport, ScanError> {
    let _guard = state.scan_lock.lock().await;
    log_state(ScanState::Idle);

    let cfg = state.load_config();
    let groups: Vec<String> = match &request.group {
        Some(g) => vec![g.trim().to_string()],
        None => cfg.monitored_groups.clone(),
    };

    let extractor = state.task_extractor(&cfg);
    let gate = DedupGate::new(state.db.clone());
    let mut report = ScanReport::default();

    let outcome = if cfg.use_export || request.force_export {
        match cfg.export_location() {
            Some(location) => {
                scan_export(&location, &groups, cfg.max_messages_per_chat, &extractor, &gate, &mut report)
                    .await
            }
            None => Err(ScanError::Config(
                "use_export is on but export_path is empty".to_string(),
            )),
        }
    } else if groups.is_empty() {
        Err(ScanError::Config(
            "no monitored conversations; add one with `configure --add-group`".to_string(),
        ))
    } else {
        scan_live(state, &cfg, &groups, &extractor, &gate, &mut report).await
    };

    if report.reached_persisting {
        record_scan_time(state);
    }
    log_state(ScanState::Idle);

    outcome.map(|()| {
        info!(
            "scan: done source={:?} opened={} skipped={} new_messages={} stored={} duplicates={}",
            report.source,
            report.conversations_opened,
            report.conversations_skipped.len(),
            report.messages_new,
            report.stored,
            report.skipped
        );
        report
    })
}

async fn scan_live(
    state: &AppState,
    cfg: &ScraperConfig,
    groups: &[String],
    extractor: &TaskExtractor,
    gate: &DedupGate,
    report: &mut ScanReport,
) -> Result<(), ScanError> {
    if state.live_capture_disabled() {
        return fallback(
            "browser driver unavailable earlier in this process",
            cfg,
            groups,
            extractor,
            gate,
            report,
        )
        .await;
    }

    let capability = state.capability_for(cfg.browser_type);
    log_state(ScanState::SessionOpening);
    let mut session = match BrowserSession::open(&capability, cfg, &state.paths, &state.resolver).await {
        Ok(s) => s,
        Err(SessionError::DriverUnavailable(reason)) => {
            state.disable_live_capture();
            return fallback(&reason, cfg, groups, extractor, gate, report).await;
        }
        Err(e @ SessionError::LaunchFailed(_)) => {
            return fallback(&e.to_string(), cfg, groups, extractor, gate, report).await;
        }
        Err(e @ (SessionError::AuthFailure(_) | SessionError::ProfileLocked(_))) => {
            report.warn(e.to_string());
            report.aborted = Some(e.to_string());
            return Ok(());
        }
    };

    report.source = ScanSource::Live;
    let screenshot_dir: PathBuf = state.paths.screenshot_dir.clone();
    let live = LiveScan {
        resolver: &state.resolver,
        extractor,
        gate,
        max_messages: cfg.max_messages_per_chat,
        timings: NavigatorTimings::default(),
        debug_screenshots: cfg.debug_mode.then_some(screenshot_dir.as_path()),
        error_screenshots: cfg.screenshot_on_error.then_some(screenshot_dir.as_path()),
    };
    let result = live.scan_conversations(session.page(), groups, report).await;

    log_state(ScanState::SessionClosing);
    if result.is_err() && cfg.screenshot_on_error {
        session.screenshot("whatsapp_scan_error").await;
    } else if cfg.debug_mode {
        session.screenshot("whatsapp_scan_complete").await;
    }
    session.close().await;
    result
}

/// Live capture is impossible: export location, then demo, else fail.
async fn fallback(
    reason: &str,
    cfg: &ScraperConfig,
    groups: &[String],
    extractor: &TaskExtractor,
    gate: &DedupGate,
    report: &mut ScanReport,
) -> Result<(), ScanError> {
    if let Some(location) = cfg.export_location() {
        report.warn(format!("{reason}; falling back to chat exports"));
        return scan_export(&location, groups, cfg.max_messages_per_chat, extractor, gate, report)
            .await;
    }
    if cfg.demo_fallback {
        report.warn(reason.to_string());
        return scan_demo(groups, extractor, gate, report).await;
    }
    Err(ScanError::DriverUnavailable(reason.to_string()))
}

/// Stamp `last_scan_time`. Re-reads the file so edits made during the scan
/// are kept.
fn record_scan_time(state: &AppState) {
    let mut cfg = load_scraper_config(&state.paths.config_file);
    cfg.last_scan_time = Some(Utc::now());
    if let Err(e) = state.save_config(&cfg) {
        warn!("scan: could not record last_scan_time: {:#}", e);
    }
}

/// Import one export file outside the scan schedule. The whole history is
/// processed, not just the tail.
pub async fn import_export_file(
    state: &AppState,
    path: &Path,
    group_override: Option<&str>,
) -> Result<ScanReport, ScanError> {
    let cfg = state.load_config();
    let extractor = state.task_extractor(&cfg);
    let gate = DedupGate::new(state.db.clone());
    let mut report = ScanReport {
        source: ScanSource::Export,
        ..Default::default()
    };

    let mut messages = export_import::parse_export_file(path)
        .map_err(|e| ScanError::Config(format!("{e:#}")))?;
    if let Some(group) = group_override {
        for m in &mut messages {
            m.group_name = group.to_string();
        }
    }
    report.conversations_opened = 1;
    process_messages(&extractor, &gate, messages, TaskOrigin::Export, &mut report).await?;
    Ok(report)
}
