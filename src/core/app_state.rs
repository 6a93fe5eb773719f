use crate::core::config::{load_scraper_config, save_scraper_config, AppPaths, BrowserFamily, ScraperConfig};
use crate::db::Database;
use crate::nlp::llm_client::{HttpLlmClient, LlmClient};
use crate::nlp::task_extractor::TaskExtractor;
use crate::scraping::browser_manager::BrowserCapability;
use crate::scraping::selectors::Resolver;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which LLM backs task extraction.
#[derive(Clone, Default)]
pub enum LlmMode {
    /// Resolve from the config's `llm` block and env vars on every scan.
    #[default]
    Auto,
    /// Rule-based extraction only.
    Disabled,
    Client(Arc<dyn LlmClient>),
}

/// Capabilities and shared handles passed to every scan, manual or
/// background. Nothing here is global; two states never share a lock.
#[derive(Clone)]
pub struct AppState {
    pub http_client: reqwest::Client,
    pub paths: Arc<AppPaths>,
    pub db: Database,
    pub resolver: Arc<Resolver>,

    // Serializes scans over the single browser profile; manual and
    // background scans both take it.
    pub scan_lock: Arc<tokio::sync::Mutex<()>>,

    // None → detect per scan from the configured browser family.
    pub browser_capability: Option<Arc<BrowserCapability>>,

    pub llm: LlmMode,

    // Set the first time the browser driver proves unavailable; live capture
    // is not retried for the rest of the process.
    pub driver_disabled: Arc<AtomicBool>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("root", &self.paths.root)
            .field("db", &self.db)
            .field("capability_override", &self.browser_capability.is_some())
            .field("driver_disabled", &self.driver_disabled.load(Ordering::SeqCst))
            .finish()
    }
}

impl AppState {
    /// Open (and migrate) the database under `paths`.
    pub fn new(http_client: reqwest::Client, paths: AppPaths) -> Result<Self> {
        let db = Database::new(paths.database.clone())?;
        Ok(Self {
            http_client,
            paths: Arc::new(paths),
            db,
            resolver: Arc::new(Resolver::default()),
            scan_lock: Arc::new(tokio::sync::Mutex::new(())),
            browser_capability: None,
            llm: LlmMode::Auto,
            driver_disabled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_capability(mut self, capability: BrowserCapability) -> Self {
        self.browser_capability = Some(Arc::new(capability));
        self
    }

    pub fn with_llm(mut self, llm: LlmMode) -> Self {
        self.llm = llm;
        self
    }

    pub fn load_config(&self) -> ScraperConfig {
        load_scraper_config(&self.paths.config_file)
    }

    pub fn save_config(&self, cfg: &ScraperConfig) -> Result<()> {
        save_scraper_config(&self.paths.config_file, cfg)
    }

    pub fn capability_for(&self, family: BrowserFamily) -> BrowserCapability {
        match &self.browser_capability {
            Some(cap) => cap.as_ref().clone(),
            None => BrowserCapability::detect(family),
        }
    }

    pub fn live_capture_disabled(&self) -> bool {
        self.driver_disabled.load(Ordering::SeqCst)
    }

    pub fn disable_live_capture(&self) {
        self.driver_disabled.store(true, Ordering::SeqCst);
    }

    /// Task extractor for one scan, honoring `min_words` and the LLM mode.
    pub fn task_extractor(&self, cfg: &ScraperConfig) -> TaskExtractor {
        let extractor = TaskExtractor::new(cfg.min_words);
        let settings = cfg.llm_settings();
        match &self.llm {
            LlmMode::Disabled => extractor,
            LlmMode::Client(client) => extractor.with_llm(Arc::clone(client), settings.batch_size),
            LlmMode::Auto if settings.api_available() => {
                let batch = settings.batch_size;
                let client = HttpLlmClient::new(self.http_client.clone(), settings);
                extractor.with_llm(Arc::new(client), batch)
            }
            LlmMode::Auto => extractor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_opens_database_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(reqwest::Client::new(), AppPaths::under(dir.path())).unwrap();
        assert!(state.paths.database.exists());
        assert_eq!(state.load_config(), ScraperConfig::default());
    }

    #[tokio::test]
    async fn test_disabled_llm_means_rules_only() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(reqwest::Client::new(), AppPaths::under(dir.path()))
            .unwrap()
            .with_llm(LlmMode::Disabled);
        assert!(!state.task_extractor(&ScraperConfig::default()).api_available());
    }

    #[tokio::test]
    async fn test_capability_override() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(reqwest::Client::new(), AppPaths::under(dir.path()))
            .unwrap()
            .with_capability(BrowserCapability::unavailable(BrowserFamily::Chrome, "test"));
        assert!(!state.capability_for(BrowserFamily::Chrome).is_available());
        assert!(!state.live_capture_disabled());
        state.disable_live_capture();
        assert!(state.clone().live_capture_disabled());
    }
}
