//! Harness configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::AuthConfig;
use crate::driver::{ContextOptions, Viewport};
use crate::error::{E2eError, E2eResult};
use crate::executor::ExecutorConfig;

/// Top-level configuration, usually read from `uiflow.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Base URL of the application under test
    pub base_url: String,

    /// Accounts used by scenarios
    pub credentials: Credentials,

    /// Extra `${name}` values available to scenario files
    pub vars: BTreeMap<String, String>,

    pub timeouts: TimeoutConfig,

    pub browser: BrowserConfig,

    pub auth: AuthConfig,

    /// Scenario files directory
    pub scenarios_dir: PathBuf,

    /// Failure snapshots directory
    pub diagnostics_dir: PathBuf,

    /// Where results.json is written
    pub results_dir: PathBuf,

    /// Scenarios run concurrently, each in its own session
    pub parallelism: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            credentials: Credentials::default(),
            vars: BTreeMap::new(),
            timeouts: TimeoutConfig::default(),
            browser: BrowserConfig::default(),
            auth: AuthConfig::default(),
            scenarios_dir: PathBuf::from("scenarios"),
            diagnostics_dir: PathBuf::from("test-results/diagnostics"),
            results_dir: PathBuf::from("test-results"),
            parallelism: 1,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub admin_email: String,
    pub admin_password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("admin_email", &self.admin_email)
            .field("admin_password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default budget for fill/click/wait steps
    pub action_ms: u64,
    /// Default budget for navigate steps
    pub navigation_ms: u64,
    /// Fixed delay between resolving an element and acting on it
    pub stabilization_ms: u64,
    /// Locator re-probe interval
    pub poll_interval_ms: u64,
    /// Best-effort network-idle wait after navigation
    pub network_idle_ms: u64,
    /// Budget for each terminal assertion
    pub assertion_ms: u64,
    /// Budget for each diagnostics capture primitive
    pub capture_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            action_ms: 10_000,
            navigation_ms: 15_000,
            stabilization_ms: 1_000,
            poll_interval_ms: 250,
            network_idle_ms: 8_000,
            assertion_ms: 10_000,
            capture_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = E2eError;

    fn from_str(s: &str) -> E2eResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" => Ok(BrowserKind::Webkit),
            other => Err(E2eError::Config(format!("unknown browser '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: BrowserKind,
    pub headless: bool,
    pub viewport: Viewport,
    /// Extra launch arguments
    pub args: Vec<String>,
    /// Share one browser process across scenarios instead of one per scenario
    pub shared: bool,
    /// Node.js binary used to host Playwright
    pub node_binary: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: BrowserKind::Chromium,
            headless: true,
            viewport: Viewport::default(),
            args: vec![
                "--disable-dev-shm-usage".to_string(),
                "--no-sandbox".to_string(),
                "--disable-gpu".to_string(),
            ],
            shared: true,
            node_binary: "node".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file; a missing file yields defaults
    pub fn load(path: &Path) -> E2eResult<Self> {
        let mut config = if path.exists() {
            debug!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `UIFLOW_*` overrides from `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let targets: [(&str, &mut String); 5] = [
            ("UIFLOW_BASE_URL", &mut self.base_url),
            ("UIFLOW_EMAIL", &mut self.credentials.email),
            ("UIFLOW_PASSWORD", &mut self.credentials.password),
            ("UIFLOW_ADMIN_EMAIL", &mut self.credentials.admin_email),
            ("UIFLOW_ADMIN_PASSWORD", &mut self.credentials.admin_password),
        ];
        for (key, slot) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(E2eError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.parallelism == 0 {
            return Err(E2eError::Config("parallelism must be at least 1".into()));
        }
        self.auth.validate()
    }

    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            viewport: self.browser.viewport.clone(),
            action_timeout_ms: self.timeouts.action_ms,
            navigation_timeout_ms: self.timeouts.navigation_ms,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            base_url: self.base_url.clone(),
            stabilization_delay: Duration::from_millis(self.timeouts.stabilization_ms),
            poll_interval: Duration::from_millis(self.timeouts.poll_interval_ms),
            network_idle_grace: Duration::from_millis(self.timeouts.network_idle_ms),
        }
    }

    /// Values available to `${name}` placeholders in scenario files
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        vars.insert("base_url".into(), self.base_url.trim_end_matches('/').to_string());
        vars.insert("email".into(), self.credentials.email.clone());
        vars.insert("password".into(), self.credentials.password.clone());
        vars.insert("admin_email".into(), self.credentials.admin_email.clone());
        vars.insert("admin_password".into(), self.credentials.admin_password.clone());
        vars
    }
}
