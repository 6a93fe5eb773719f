//! Browser Session Manager.
//!
//! One automated browser per scan, on a persistent per-family profile:
//! `Launching → AwaitingAuthentication → Authenticated → Closed`.
//! The browser process is torn down on every exit path: explicitly through
//! [`BrowserSession::close`], and by `Drop` when a caller bails out early.

use super::browser_manager::{build_session_config, remove_stale_singleton_lock, BrowserCapability};
use super::cdp_driver::CdpPage;
use super::driver::PageDriver;
use super::selectors::{Resolver, SelectorKey};
use crate::core::config::{AppPaths, ScraperConfig};
use async_trait::async_trait;
use chromiumoxide::Browser;
use fs2::FileExt;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

pub const WHATSAPP_WEB_URL: &str = "https://web.whatsapp.com/";

const PROFILE_LOCK_FILE: &str = ".task-scout.lock";

/// Upper bound for each step of browser teardown before escalating to a kill.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Launching,
    AwaitingAuthentication,
    Authenticated,
    Closed,
}

fn log_state(state: SessionState) {
    info!("browser_session_state={:?}", state);
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// No drivable browser on this machine. Not retried within the process.
    #[error("browser driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("authentication timed out after {0}s (QR code not scanned?)")]
    AuthFailure(u64),

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("browser profile {0} is in use by another scan")]
    ProfileLocked(String),
}

/// Timing for the authentication wait.
#[derive(Clone, Copy, Debug)]
pub struct AuthTimeouts {
    /// How long to wait for either the chat list or the QR screen to render.
    /// A paired profile can take a while to sync before the chat list shows.
    pub initial_load: Duration,
    /// How long the user gets to scan the QR code once it is shown.
    pub qr_timeout: Duration,
    pub poll: Duration,
}

impl AuthTimeouts {
    pub fn from_config(cfg: &ScraperConfig) -> Self {
        Self {
            initial_load: cfg.auth_timeout(),
            qr_timeout: cfg.auth_timeout(),
            poll: Duration::from_secs(2),
        }
    }
}

/// Poll the landing page until the conversation list shows up.
///
/// The QR marker moves the session into `AwaitingAuthentication` and restarts
/// the deadline with the longer `qr_timeout`.
pub async fn await_authentication<P: PageDriver>(
    page: &P,
    resolver: &Resolver,
    timeouts: AuthTimeouts,
    mut on_state: impl FnMut(SessionState),
) -> Result<(), SessionError> {
    let mut deadline = Instant::now() + timeouts.initial_load;
    let mut awaiting = false;
    let mut waited_for = timeouts.initial_load;

    loop {
        if resolver.probe(page, SelectorKey::ChatList, &[]).await.is_some() {
            on_state(SessionState::Authenticated);
            return Ok(());
        }

        if !awaiting && resolver.probe(page, SelectorKey::LandingQr, &[]).await.is_some() {
            awaiting = true;
            waited_for = timeouts.qr_timeout;
            deadline = Instant::now() + timeouts.qr_timeout;
            on_state(SessionState::AwaitingAuthentication);
            info!(
                "browser_session: QR code shown; scan it with WhatsApp on your phone (waiting up to {}s)",
                timeouts.qr_timeout.as_secs()
            );
        }

        if Instant::now() >= deadline {
            return Err(SessionError::AuthFailure(waited_for.as_secs()));
        }
        tokio::time::sleep(timeouts.poll).await;
    }
}

/// Save `{name}_{timestamp}.png` under `dir`. Failures are logged, not raised.
pub async fn capture_screenshot<P: PageDriver>(page: &P, dir: &Path, name: &str) -> Option<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.png", name, stamp));
    match page.screenshot(&path).await {
        Ok(()) => {
            info!("browser_session: screenshot saved to {}", path.display());
            Some(path)
        }
        Err(e) => {
            warn!("browser_session: screenshot '{}' failed: {}", name, e);
            None
        }
    }
}

pub struct BrowserSession {
    browser: Option<Browser>,
    page: CdpPage,
    handler_task: Option<tokio::task::JoinHandle<()>>,
    closed: Arc<AtomicBool>,
    state: SessionState,
    profile_dir: PathBuf,
    screenshot_dir: PathBuf,
    // Held until the browser process has exited; the OS releases it when the
    // file drops.
    profile_lock: Option<std::fs::File>,
}

impl BrowserSession {
    /// Launch, open WhatsApp Web and wait for authentication.
    ///
    /// On any failure after launch the browser is closed before returning.
    pub async fn open(
        capability: &BrowserCapability,
        cfg: &ScraperConfig,
        paths: &AppPaths,
        resolver: &Resolver,
    ) -> Result<Self, SessionError> {
        log_state(SessionState::Launching);

        let exe = capability.executable.clone().ok_or_else(|| {
            SessionError::DriverUnavailable(
                capability
                    .reason
                    .clone()
                    .unwrap_or_else(|| "no browser executable".to_string()),
            )
        })?;

        let profile_dir = paths.profile_dir(capability.family);
        std::fs::create_dir_all(&profile_dir).map_err(|e| {
            SessionError::LaunchFailed(format!("cannot create {}: {}", profile_dir.display(), e))
        })?;
        let profile_lock = lock_profile(&profile_dir)?;
        remove_stale_singleton_lock(&profile_dir);

        let config = build_session_config(&exe, &profile_dir, cfg.headless)
            .map_err(|e| SessionError::LaunchFailed(e.to_string()))?;

        info!(
            "browser_session: launching {} with profile {}",
            exe,
            profile_dir.display()
        );
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::LaunchFailed(format!("{} ({})", e, exe)))?;

        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        let page = match browser.new_page(WHATSAPP_WEB_URL).await {
            Ok(p) => CdpPage::new(p),
            Err(e) => {
                shutdown_browser(browser, Some(handler_task), Some(profile_lock), CLOSE_TIMEOUT)
                    .await;
                return Err(SessionError::LaunchFailed(format!(
                    "cannot open {}: {}",
                    WHATSAPP_WEB_URL, e
                )));
            }
        };

        let mut session = Self {
            browser: Some(browser),
            page,
            handler_task: Some(handler_task),
            closed,
            state: SessionState::Launching,
            profile_dir,
            screenshot_dir: paths.screenshot_dir.clone(),
            profile_lock: Some(profile_lock),
        };

        let mut observed = Vec::new();
        let auth = await_authentication(
            &session.page,
            resolver,
            AuthTimeouts::from_config(cfg),
            |s| {
                log_state(s);
                observed.push(s);
            },
        )
        .await;
        if let Some(last) = observed.last() {
            session.state = *last;
        }

        match auth {
            Ok(()) => {
                info!("browser_session: authenticated");
                if cfg.debug_mode {
                    session.screenshot("whatsapp_loaded").await;
                }
                Ok(session)
            }
            Err(e) => {
                warn!("browser_session: {}", e);
                if cfg.screenshot_on_error {
                    session.screenshot("whatsapp_not_logged_in").await;
                }
                session.close().await;
                Err(e)
            }
        }
    }

    pub fn page(&self) -> &CdpPage {
        &self.page
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// `true` once the CDP connection has dropped (window closed by the user,
    /// browser crash).
    pub fn is_disconnected(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn screenshot(&self, name: &str) -> Option<PathBuf> {
        capture_screenshot(&self.page, &self.screenshot_dir, name).await
    }

    /// Close the browser and wait for the process to exit. Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let handler_task = self.handler_task.take();
        let profile_lock = self.profile_lock.take();
        match self.browser.take() {
            Some(browser) => {
                shutdown_browser(browser, handler_task, profile_lock, CLOSE_TIMEOUT).await
            }
            None => {
                if let Some(task) = handler_task {
                    task.abort();
                }
            }
        }
        self.state = SessionState::Closed;
        log_state(SessionState::Closed);
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        warn!("browser_session: dropped without close(); tearing browser down");

        let handler_task = self.handler_task.take();
        let profile_lock = self.profile_lock.take();
        let Some(browser) = self.browser.take() else {
            if let Some(task) = handler_task {
                task.abort();
            }
            return;
        };
        // Drop cannot await; hand the shutdown to the runtime when there is one.
        // Without a runtime, chromiumoxide kills its child process on drop.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(shutdown_browser(
                browser,
                handler_task,
                profile_lock,
                CLOSE_TIMEOUT,
            ));
        } else if let Some(task) = handler_task {
            task.abort();
        }
    }
}

/// The process-control surface teardown needs from a launched browser.
#[async_trait]
trait BrowserProcess: Send {
    /// Ask the browser to exit over CDP. Goes through the handler task.
    async fn request_close(&mut self) -> anyhow::Result<()>;
    async fn wait_exit(&mut self) -> std::io::Result<()>;
    async fn force_kill(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl BrowserProcess for Browser {
    async fn request_close(&mut self) -> anyhow::Result<()> {
        self.close().await?;
        Ok(())
    }

    async fn wait_exit(&mut self) -> std::io::Result<()> {
        self.wait().await.map(|_| ())
    }

    async fn force_kill(&mut self) -> std::io::Result<()> {
        self.kill().await.unwrap_or(Ok(()))
    }
}

/// Close the browser, escalating to a kill when it does not exit in time.
///
/// The CDP handler must still be running while `close` is in flight, so it is
/// aborted only after the process is gone. The profile lock is released last.
async fn shutdown_browser<B: BrowserProcess>(
    mut browser: B,
    handler_task: Option<tokio::task::JoinHandle<()>>,
    profile_lock: Option<std::fs::File>,
    step_timeout: Duration,
) {
    match tokio::time::timeout(step_timeout, browser.request_close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("browser_session: close error (non-fatal): {}", e),
        Err(_) => warn!(
            "browser_session: close not acknowledged within {}s",
            step_timeout.as_secs()
        ),
    }

    let exited = matches!(
        tokio::time::timeout(step_timeout, browser.wait_exit()).await,
        Ok(Ok(()))
    );
    if !exited {
        warn!("browser_session: browser still running; killing it");
        if let Err(e) = browser.force_kill().await {
            warn!("browser_session: kill failed: {}", e);
        }
    }

    if let Some(task) = handler_task {
        task.abort();
    }
    drop(profile_lock);
}

fn lock_profile(profile_dir: &Path) -> Result<std::fs::File, SessionError> {
    let lock_path = profile_dir.join(PROFILE_LOCK_FILE);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| {
            SessionError::LaunchFailed(format!("cannot open {}: {}", lock_path.display(), e))
        })?;
    file.try_lock_exclusive()
        .map_err(|_| SessionError::ProfileLocked(profile_dir.display().to_string()))?;
    Ok(file)
}

fn spawn_handler_task(
    mut handler: chromiumoxide::Handler,
    closed: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::debug!("chromiumoxide handler event error: {}", e);
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}
