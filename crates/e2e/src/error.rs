//! Error types for E2E flows

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::DriverError;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Element not found: none of [{}] matched in {frames} frame(s) within {budget_ms} ms", .candidates.join(", "))]
    ElementNotFound {
        candidates: Vec<String>,
        frames: usize,
        budget_ms: u64,
    },

    #[error("Action timed out: {action} on '{target}' did not complete within {timeout_ms} ms")]
    ActionTimeout {
        action: String,
        target: String,
        timeout_ms: u64,
    },

    #[error("Action failed: {action} on '{target}' - {reason}")]
    ActionError {
        action: String,
        target: String,
        reason: String,
    },

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Authentication flow exhausted after {loops} alternate-method loop(s) (limit {limit})")]
    FlowExhausted { loops: u32, limit: u32 },

    #[error("Invalid flow transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Playwright not found. Install with: npm i -D playwright && npx playwright install chromium")]
    PlaywrightNotFound,

    #[error("Scenario parse error: {0}")]
    SpecParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Target {url} unreachable after {attempts} attempts")]
    TargetUnreachable { url: String, attempts: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Coarse classification carried in scenario results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ElementNotFound,
    ActionTimeout,
    ActionError,
    NavigationError,
    AssertionFailure,
    FlowExhausted,
    HarnessError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ElementNotFound => "element_not_found",
            ErrorKind::ActionTimeout => "action_timeout",
            ErrorKind::ActionError => "action_error",
            ErrorKind::NavigationError => "navigation_error",
            ErrorKind::AssertionFailure => "assertion_failure",
            ErrorKind::FlowExhausted => "flow_exhausted",
            ErrorKind::HarnessError => "harness_error",
        };
        f.write_str(s)
    }
}

impl E2eError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            E2eError::ElementNotFound { .. } => ErrorKind::ElementNotFound,
            E2eError::ActionTimeout { .. } => ErrorKind::ActionTimeout,
            E2eError::ActionError { .. } => ErrorKind::ActionError,
            E2eError::Navigation { .. } => ErrorKind::NavigationError,
            E2eError::AssertionFailed(_) => ErrorKind::AssertionFailure,
            E2eError::FlowExhausted { .. } => ErrorKind::FlowExhausted,
            E2eError::Driver(DriverError::Timeout(_)) => ErrorKind::ActionTimeout,
            _ => ErrorKind::HarnessError,
        }
    }
}
