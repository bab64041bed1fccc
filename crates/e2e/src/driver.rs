//! Browser driver seam
//!
//! The core never talks to a browser directly. Everything it needs goes
//! through the traits in this module, implemented by the Playwright bridge
//! ([`crate::playwright`]) and by the in-memory driver ([`crate::mock`]).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by a driver implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("element or frame detached: {0}")]
    Detached(String),

    #[error("execution context destroyed (navigation in progress): {0}")]
    ContextDestroyed(String),

    #[error("browser, context or page already closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DriverError {
    /// Errors caused by the document changing underneath a probe
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Detached(_) | DriverError::ContextDestroyed(_))
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Identifies one frame of a page. The main document is always [`FrameId::MAIN`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub String);

impl FrameId {
    pub const MAIN: &'static str = "main";

    pub fn main() -> Self {
        FrameId(Self::MAIN.to_string())
    }

    pub fn is_main(&self) -> bool {
        self.0 == Self::MAIN
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A currently attached frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameInfo {
    pub id: FrameId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Opaque reference to a DOM element inside one frame
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: String,
    pub frame: FrameId,
    pub selector: String,
}

/// Actionability of an element at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    pub attached: bool,
    pub visible: bool,
    pub enabled: bool,
    pub editable: bool,
}

impl ElementState {
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_clickable(&self) -> bool {
        self.attached && self.visible && self.enabled
    }

    pub fn is_fillable(&self) -> bool {
        self.attached && self.visible && self.editable
    }
}

/// Page lifecycle milestones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    /// DOMContentLoaded
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    Load,
    /// No network activity for a short window; may never happen on long-poll apps
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::Load => "load",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1280, height: 720 }
    }
}

/// Options for one isolated browsing context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextOptions {
    pub viewport: Viewport,
    pub action_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            action_timeout_ms: 10_000,
            navigation_timeout_ms: 15_000,
        }
    }
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> DriverResult<Arc<dyn Browser>>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a context with its own cookie/storage jar
    async fn new_context(&self, options: &ContextOptions) -> DriverResult<Box<dyn BrowserContext>>;

    async fn close(&self) -> DriverResult<()>;
}

#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> DriverResult<Arc<dyn Page>>;

    /// Close the context and every page it owns
    async fn close(&self) -> DriverResult<()>;
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Main document first, then attached frames in document order
    async fn frames(&self) -> DriverResult<Vec<FrameInfo>>;

    /// First element in `frame` matching `selector`, if any
    async fn query(&self, frame: &FrameId, selector: &str) -> DriverResult<Option<ElementHandle>>;

    async fn element_state(&self, element: &ElementHandle) -> DriverResult<ElementState>;

    /// Replace the element's content with `value`
    async fn fill(&self, element: &ElementHandle, value: &str, timeout: Duration) -> DriverResult<()>;

    async fn click(&self, element: &ElementHandle, timeout: Duration) -> DriverResult<()>;

    async fn goto(&self, url: &str, until: LoadState, timeout: Duration) -> DriverResult<()>;

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> DriverResult<()>;

    async fn url(&self) -> DriverResult<String>;

    /// Serialized main document
    async fn content(&self) -> DriverResult<String>;

    /// PNG bytes
    async fn screenshot(&self, full_page: bool) -> DriverResult<Vec<u8>>;

    async fn evaluate(&self, expression: &str) -> DriverResult<serde_json::Value>;

    async fn close(&self) -> DriverResult<()>;
}

/// JavaScript truthiness of an evaluation result
pub fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transient_errors() {
        assert!(DriverError::Detached("frame".into()).is_transient());
        assert!(DriverError::ContextDestroyed("nav".into()).is_transient());
        assert!(!DriverError::Closed.is_transient());
        assert!(!DriverError::Timeout("x".into()).is_transient());
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!("sess_123")));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!({})));
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(false)));
    }

    #[test]
    fn test_element_state_actionability() {
        let state = ElementState { attached: true, visible: true, enabled: false, editable: true };
        assert!(!state.is_clickable());
        assert!(state.is_fillable());
        assert!(!ElementState::detached().is_fillable());
    }

    #[test]
    fn test_load_state_wire_names() {
        assert_eq!(serde_json::to_string(&LoadState::DomContentLoaded).unwrap(), "\"domcontentloaded\"");
        assert_eq!(LoadState::NetworkIdle.as_str(), "networkidle");
    }
}
