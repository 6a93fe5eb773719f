use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_HOME: &str = "TASK_SCOUT_HOME";
pub const ENV_CONFIG: &str = "TASK_SCOUT_CONFIG";
pub const ENV_DB: &str = "TASK_SCOUT_DB";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_EDGE_EXECUTABLE: &str = "EDGE_EXECUTABLE";
pub const ENV_LLM_PROVIDER: &str = "TASK_SCOUT_LLM_PROVIDER";
pub const ENV_LLM_BASE_URL: &str = "TASK_SCOUT_LLM_BASE_URL";
pub const ENV_LLM_MODEL: &str = "TASK_SCOUT_LLM_MODEL";

const CONFIG_FILE_NAME: &str = "whatsapp_config.json";
const MIN_AUTH_TIMEOUT_SECS: u64 = 60;
const MAX_LLM_BATCH: usize = 10;

// ---------------------------------------------------------------------------
// App paths
// ---------------------------------------------------------------------------

/// Every on-disk location the scraper touches, derived from one root.
#[derive(Clone, Debug)]
pub struct AppPaths {
    pub root: PathBuf,
    pub config_file: PathBuf,
    pub database: PathBuf,
    pub session_dir: PathBuf,
    pub screenshot_dir: PathBuf,
}

impl AppPaths {
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_file: root.join(CONFIG_FILE_NAME),
            database: root.join("tasks.db"),
            session_dir: root.join("whatsapp_session"),
            screenshot_dir: root.join("screenshots"),
            root,
        }
    }

    /// `TASK_SCOUT_HOME` → `~/.task-scout`, with per-file env overrides for
    /// the config file and the database.
    pub fn resolve() -> Result<Self> {
        let root = match env_nonempty(ENV_HOME) {
            Some(v) => PathBuf::from(expand_tilde(&v)),
            None => dirs::home_dir()
                .ok_or_else(|| anyhow!("cannot locate home directory; set {ENV_HOME}"))?
                .join(".task-scout"),
        };
        let mut paths = Self::under(root);
        if let Some(v) = env_nonempty(ENV_CONFIG) {
            paths.config_file = PathBuf::from(expand_tilde(&v));
        }
        if let Some(v) = env_nonempty(ENV_DB) {
            paths.database = PathBuf::from(expand_tilde(&v));
        }
        Ok(paths)
    }

    /// Persistent profile directory, one per browser family so a Chrome
    /// pairing never collides with an Edge one.
    pub fn profile_dir(&self, family: BrowserFamily) -> PathBuf {
        self.session_dir.join(format!("{}_profile", family.as_str()))
    }
}

// ---------------------------------------------------------------------------
// ScraperConfig, persisted as whatsapp_config.json
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    #[default]
    Chrome,
    Firefox,
    Edge,
}

impl BrowserFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserFamily::Chrome => "chrome",
            BrowserFamily::Firefox => "firefox",
            BrowserFamily::Edge => "edge",
        }
    }
}

impl FromStr for BrowserFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Ok(BrowserFamily::Chrome),
            "firefox" => Ok(BrowserFamily::Firefox),
            "edge" | "msedge" => Ok(BrowserFamily::Edge),
            other => Err(anyhow!("unknown browser '{other}' (chrome|firefox|edge)")),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ScraperConfig {
    pub enabled: bool,
    pub monitored_groups: Vec<String>,
    pub max_messages_per_chat: usize,
    pub min_words: usize,
    pub browser_type: BrowserFamily,
    pub headless: bool,
    pub auto_scan: bool,
    pub scan_interval_seconds: u64,
    pub use_export: bool,
    pub export_path: String,
    pub last_scan_time: Option<DateTime<Utc>>,
    /// Save a screenshot at every navigation milestone.
    pub debug_mode: bool,
    pub screenshot_on_error: bool,
    /// How long to wait for a QR pairing before giving up on this run.
    pub auth_timeout_seconds: u64,
    /// Synthesize clearly-tagged demo tasks when no capture path is available.
    pub demo_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            monitored_groups: Vec::new(),
            max_messages_per_chat: 50,
            min_words: 5,
            browser_type: BrowserFamily::Chrome,
            headless: false,
            auto_scan: false,
            scan_interval_seconds: 3600,
            use_export: false,
            export_path: String::new(),
            last_scan_time: None,
            debug_mode: false,
            screenshot_on_error: true,
            auth_timeout_seconds: 120,
            demo_fallback: false,
            llm: None,
        }
    }
}

impl ScraperConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_seconds.max(MIN_AUTH_TIMEOUT_SECS))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds.max(60))
    }

    /// Configured export location (a chat export file or a directory of
    /// them), regardless of `use_export`.
    pub fn export_location(&self) -> Option<PathBuf> {
        let raw = self.export_path.trim();
        if raw.is_empty() {
            return None;
        }
        Some(PathBuf::from(expand_tilde(raw)))
    }

    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings::resolve(self.llm.as_ref())
    }

    pub fn add_group(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.monitored_groups.iter().any(|g| g == name) {
            return false;
        }
        self.monitored_groups.push(name.to_string());
        true
    }

    pub fn remove_group(&mut self, name: &str) -> bool {
        let before = self.monitored_groups.len();
        self.monitored_groups.retain(|g| g != name.trim());
        before != self.monitored_groups.len()
    }
}

/// Load the scraper config.
///
/// Missing file → `ScraperConfig::default()` (silent).
/// Parse error → log a warning, return `ScraperConfig::default()`.
pub fn load_scraper_config(path: &Path) -> ScraperConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<ScraperConfig>(&contents) {
            Ok(cfg) => {
                tracing::debug!("config: loaded {}", path.display());
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    "config: parse error at {}: {}; using defaults",
                    path.display(),
                    e
                );
                ScraperConfig::default()
            }
        },
        Err(_) => ScraperConfig::default(),
    }
}

/// Persist the scraper config atomically (temp file + rename).
pub fn save_scraper_config(path: &Path, cfg: &ScraperConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(cfg).context("config serialization failed")?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename {} → {}", tmp.display(), path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// LLM settings: JSON field → env var → default
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    /// Any OpenAI-compatible `/chat/completions` endpoint (Ollama, LM Studio…).
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            "openai" => Ok(LlmProvider::OpenAi),
            other => Err(anyhow!("unknown llm provider '{other}'")),
        }
    }
}

/// Optional `llm` block of the config file.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct LlmConfig {
    pub provider: Option<LlmProvider>,
    /// Never logged.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub batch_size: Option<usize>,
}

/// Fully resolved LLM settings. `api_key == None` means the API is
/// unavailable and the rule-based extractor is used.
#[derive(Clone, Debug, PartialEq)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub batch_size: usize,
}

impl LlmSettings {
    pub fn resolve(cfg: Option<&LlmConfig>) -> Self {
        let empty = LlmConfig::default();
        let cfg = cfg.unwrap_or(&empty);

        let provider = cfg
            .provider
            .or_else(|| env_nonempty(ENV_LLM_PROVIDER).and_then(|v| v.parse().ok()))
            .unwrap_or_default();

        let key_env = match provider {
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAi => "OPENAI_API_KEY",
        };
        let api_key = cfg
            .api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .or_else(|| env_nonempty(key_env));

        let base_url = cfg
            .base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| env_nonempty(ENV_LLM_BASE_URL))
            .unwrap_or_else(|| match provider {
                LlmProvider::Anthropic => "https://api.anthropic.com/v1".to_string(),
                LlmProvider::OpenAi => "https://api.openai.com/v1".to_string(),
            });

        let model = cfg
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| env_nonempty(ENV_LLM_MODEL))
            .unwrap_or_else(|| match provider {
                LlmProvider::Anthropic => "claude-3-haiku-20240307".to_string(),
                LlmProvider::OpenAi => "gpt-4o-mini".to_string(),
            });

        Self {
            provider,
            api_key,
            base_url,
            model,
            max_tokens: cfg.max_tokens.unwrap_or(1000),
            batch_size: cfg.batch_size.unwrap_or(MAX_LLM_BATCH).clamp(1, MAX_LLM_BATCH),
        }
    }

    pub fn api_available(&self) -> bool {
        self.api_key.is_some()
    }
}

// ---------------------------------------------------------------------------

/// Executable override for a browser family, if set to an existing path.
pub fn browser_executable_override(family: BrowserFamily) -> Option<String> {
    let var = match family {
        BrowserFamily::Chrome => ENV_CHROME_EXECUTABLE,
        BrowserFamily::Edge => ENV_EDGE_EXECUTABLE,
        BrowserFamily::Firefox => return None,
    };
    let p = env_nonempty(var)?;
    if Path::new(&p).exists() {
        Some(p)
    } else {
        None
    }
}

pub fn expand_tilde(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    raw.to_string()
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_scraper_config(&dir.path().join("nope.json"));
        assert_eq!(cfg, ScraperConfig::default());
        assert_eq!(cfg.min_words, 5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"enabled": true, "monitored_groups": ["Ops"], "browser_type": "edge"}"#,
        )
        .unwrap();
        let cfg = load_scraper_config(&path);
        assert!(cfg.enabled);
        assert_eq!(cfg.monitored_groups, vec!["Ops".to_string()]);
        assert_eq!(cfg.browser_type, BrowserFamily::Edge);
        assert_eq!(cfg.max_messages_per_chat, 50);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_scraper_config(&path), ScraperConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut cfg = ScraperConfig::default();
        cfg.add_group("Family");
        cfg.scan_interval_seconds = 900;
        save_scraper_config(&path, &cfg).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(load_scraper_config(&path), cfg);
    }

    #[test]
    fn test_auth_timeout_has_floor() {
        let cfg = ScraperConfig {
            auth_timeout_seconds: 5,
            ..Default::default()
        };
        assert_eq!(cfg.auth_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_group_add_remove() {
        let mut cfg = ScraperConfig::default();
        assert!(cfg.add_group("Ops"));
        assert!(!cfg.add_group("Ops"));
        assert!(!cfg.add_group("   "));
        assert!(cfg.remove_group("Ops"));
        assert!(cfg.monitored_groups.is_empty());
    }

    #[test]
    fn test_llm_settings_from_file_block() {
        let block = LlmConfig {
            provider: Some(LlmProvider::OpenAi),
            api_key: Some(" sk-test ".into()),
            base_url: Some("http://localhost:11434/v1".into()),
            model: Some("llama3".into()),
            max_tokens: None,
            batch_size: Some(50),
        };
        let s = LlmSettings::resolve(Some(&block));
        assert_eq!(s.provider, LlmProvider::OpenAi);
        assert_eq!(s.api_key.as_deref(), Some("sk-test"));
        assert_eq!(s.base_url, "http://localhost:11434/v1");
        assert_eq!(s.model, "llama3");
        assert_eq!(s.batch_size, 10);
        assert!(s.api_available());
    }

    #[test]
    fn test_blank_llm_key_never_resolves() {
        let block = LlmConfig {
            api_key: Some("   ".into()),
            ..Default::default()
        };
        let s = LlmSettings::resolve(Some(&block));
        // A key may still come from the environment, but never the blank one.
        assert!(s.api_key.as_deref().map_or(true, |k| !k.trim().is_empty()));
    }

    #[test]
    fn test_profile_dir_is_scoped_per_family() {
        let paths = AppPaths::under("/tmp/ts");
        assert_ne!(
            paths.profile_dir(BrowserFamily::Chrome),
            paths.profile_dir(BrowserFamily::Edge)
        );
        assert!(paths
            .profile_dir(BrowserFamily::Chrome)
            .ends_with("whatsapp_session/chrome_profile"));
    }
}
