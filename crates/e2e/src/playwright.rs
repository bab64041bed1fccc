//! Playwright driver over a Node.js bridge process
//!
//! One `node` process hosts one browser. Requests and responses are single
//! JSON lines tagged with an id, so many contexts and pages (and therefore
//! many concurrent scenarios) can share the process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{BrowserConfig, BrowserKind};
use crate::driver::{
    Browser, BrowserContext, BrowserLauncher, ContextOptions, DriverError, DriverResult, ElementHandle,
    ElementState, FrameId, FrameInfo, LoadState, Page,
};
use crate::error::{E2eError, E2eResult};

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

/// Slack added to a request's own timeout before the bridge is considered hung
const RESPONSE_SLACK: Duration = Duration::from_secs(5);

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: BrowserKind,
    pub headless: bool,
    pub args: Vec<String>,
    pub node_binary: String,
    /// Directory Playwright is resolved from (its `node_modules`)
    pub working_dir: PathBuf,
    /// Budget for requests that carry no timeout of their own
    pub default_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self::from(&BrowserConfig::default())
    }
}

impl From<&BrowserConfig> for PlaywrightConfig {
    fn from(config: &BrowserConfig) -> Self {
        Self {
            browser: config.kind,
            headless: config.headless,
            args: config.args.clone(),
            node_binary: config.node_binary.clone(),
            working_dir: PathBuf::from("."),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Check that `node` can resolve the `playwright` package
pub fn check_playwright_installed(config: &PlaywrightConfig) -> E2eResult<()> {
    let status = Command::new(&config.node_binary)
        .args(["-e", "require.resolve('playwright', { paths: [process.cwd()] })"])
        .current_dir(&config.working_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(E2eError::PlaywrightNotFound),
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    kind: String,
    message: String,
}

impl From<ErrorBody> for DriverError {
    fn from(body: ErrorBody) -> Self {
        match body.kind.as_str() {
            "timeout" => DriverError::Timeout(body.message),
            "detached" => DriverError::Detached(body.message),
            "context_destroyed" => DriverError::ContextDestroyed(body.message),
            "closed" => DriverError::Closed,
            "unsupported" => DriverError::Unsupported(body.message),
            _ => DriverError::Protocol(body.message),
        }
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<DriverResult<Value>>>>>;

/// The running node process and its request multiplexer
struct Bridge {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    pending: Pending,
    next_id: AtomicU64,
    closed: AtomicBool,
    default_timeout: Duration,
    // Holds the script file for the life of the process
    _script_dir: tempfile::TempDir,
}

impl Bridge {
    async fn spawn(config: &PlaywrightConfig) -> E2eResult<Arc<Self>> {
        check_playwright_installed(config)?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("uiflow-bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        debug!("Starting Playwright bridge: {}", script_path.display());

        let mut child = TokioCommand::new(&config.node_binary)
            .arg(&script_path)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (Some(stdin), Some(stdout), Some(stderr)) = (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(E2eError::Driver(DriverError::Protocol("bridge stdio not captured".into())));
        };

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let response: Response = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Unparseable bridge output ({}): {}", e, line);
                        continue;
                    }
                };
                let Some(tx) = reader_pending.lock().remove(&response.id) else {
                    debug!("Late bridge response for request {}", response.id);
                    continue;
                };
                let outcome = if response.ok {
                    Ok(response.result)
                } else {
                    Err(response
                        .error
                        .map(DriverError::from)
                        .unwrap_or_else(|| DriverError::Protocol("error without body".into())))
                };
                let _ = tx.send(outcome);
            }
            // Process gone: fail everything still waiting
            for (_, tx) in reader_pending.lock().drain() {
                let _ = tx.send(Err(DriverError::Closed));
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[bridge] {}", line);
            }
        });

        Ok(Arc::new(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            default_timeout: config.default_timeout,
            _script_dir: script_dir,
        }))
    }

    async fn call(&self, op: &str, mut params: Value, timeout: Option<Duration>) -> DriverResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Value::Object(map) = &mut params {
            map.insert("id".into(), json!(id));
            map.insert("op".into(), json!(op));
        }
        let mut line = serde_json::to_string(&params).map_err(|e| DriverError::Protocol(e.to_string()))?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().remove(&id);
                return Err(DriverError::Protocol(format!("bridge write failed: {}", e)));
            }
            let _ = stdin.flush().await;
        }

        let wait = timeout.unwrap_or(self.default_timeout) + RESPONSE_SLACK;
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(DriverError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(DriverError::Timeout(format!("{} (no bridge response in {} ms)", op, wait.as_millis())))
            }
        }
    }

    /// Close the browser, then stop the process: close request, SIGTERM, kill
    async fn shutdown(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let closed = self.call("close", json!({}), Some(Duration::from_secs(5))).await;
        self.closed.store(true, Ordering::SeqCst);

        let mut child = self.child.lock().await;
        if tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_ok() {
            return closed.map(|_| ());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                info!("Bridge did not exit, sending SIGTERM (pid: {})", pid);
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && tokio::time::timeout(Duration::from_secs(1), child.wait()).await.is_ok()
                {
                    return closed.map(|_| ());
                }
            }
        }

        let _ = child.kill().await;
        closed.map(|_| ())
    }
}

/// Launches one bridge process per call
#[derive(Debug, Clone, Default)]
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
}

impl PlaywrightLauncher {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self) -> DriverResult<Arc<dyn Browser>> {
        let browser = PlaywrightBrowser::launch(&self.config)
            .await
            .map_err(|e| match e {
                E2eError::Driver(d) => d,
                other => DriverError::Protocol(other.to_string()),
            })?;
        Ok(Arc::new(browser))
    }
}

pub struct PlaywrightBrowser {
    bridge: Arc<Bridge>,
}

impl PlaywrightBrowser {
    pub async fn launch(config: &PlaywrightConfig) -> E2eResult<Self> {
        let bridge = Bridge::spawn(config).await?;
        let launched = bridge
            .call(
                "launch",
                json!({
                    "browser": config.browser.as_str(),
                    "headless": config.headless,
                    "args": config.args,
                }),
                Some(Duration::from_secs(60)),
            )
            .await;

        match launched {
            Ok(launched) => {
                let version = launched.get("version").and_then(serde_json::Value::as_str).unwrap_or("");
                info!("Launched {} {}", config.browser.as_str(), version);
                Ok(Self { bridge })
            }
            Err(e) => {
                let _ = bridge.shutdown().await;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Browser for PlaywrightBrowser {
    async fn new_context(&self, options: &ContextOptions) -> DriverResult<Box<dyn BrowserContext>> {
        let id = self
            .bridge
            .call(
                "newContext",
                json!({
                    "viewport": { "width": options.viewport.width, "height": options.viewport.height },
                    "actionTimeout": options.action_timeout_ms,
                    "navigationTimeout": options.navigation_timeout_ms,
                }),
                None,
            )
            .await?;
        Ok(Box::new(PlaywrightContext {
            bridge: Arc::clone(&self.bridge),
            id: expect_str(id, "newContext")?,
        }))
    }

    async fn close(&self) -> DriverResult<()> {
        self.bridge.shutdown().await
    }
}

struct PlaywrightContext {
    bridge: Arc<Bridge>,
    id: String,
}

#[async_trait]
impl BrowserContext for PlaywrightContext {
    async fn new_page(&self) -> DriverResult<Arc<dyn Page>> {
        let id = self.bridge.call("newPage", json!({ "context": self.id }), None).await?;
        Ok(Arc::new(PlaywrightPage {
            bridge: Arc::clone(&self.bridge),
            id: expect_str(id, "newPage")?,
        }))
    }

    async fn close(&self) -> DriverResult<()> {
        self.bridge
            .call("closeContext", json!({ "context": self.id }), None)
            .await
            .map(|_| ())
    }
}

struct PlaywrightPage {
    bridge: Arc<Bridge>,
    id: String,
}

impl PlaywrightPage {
    async fn call(&self, op: &str, mut params: Value, timeout: Option<Duration>) -> DriverResult<Value> {
        if let Value::Object(map) = &mut params {
            map.insert("page".into(), json!(self.id));
        }
        self.bridge.call(op, params, timeout).await
    }
}

#[async_trait]
impl Page for PlaywrightPage {
    async fn frames(&self) -> DriverResult<Vec<FrameInfo>> {
        let value = self.call("frames", json!({}), None).await?;
        serde_json::from_value(value).map_err(|e| DriverError::Protocol(e.to_string()))
    }

    async fn query(&self, frame: &FrameId, selector: &str) -> DriverResult<Option<ElementHandle>> {
        let value = self
            .call("query", json!({ "frame": frame.0, "selector": selector }), None)
            .await?;
        match value {
            Value::Null => Ok(None),
            Value::String(id) => Ok(Some(ElementHandle {
                id,
                frame: frame.clone(),
                selector: selector.to_string(),
            })),
            other => Err(DriverError::Protocol(format!("unexpected query result {}", other))),
        }
    }

    async fn element_state(&self, element: &ElementHandle) -> DriverResult<ElementState> {
        let value = self.call("state", json!({ "element": element.id }), None).await?;
        serde_json::from_value(value).map_err(|e| DriverError::Protocol(e.to_string()))
    }

    async fn fill(&self, element: &ElementHandle, value: &str, timeout: Duration) -> DriverResult<()> {
        self.call(
            "fill",
            json!({ "element": element.id, "value": value, "timeout": timeout.as_millis() as u64 }),
            Some(timeout),
        )
        .await
        .map(|_| ())
    }

    async fn click(&self, element: &ElementHandle, timeout: Duration) -> DriverResult<()> {
        self.call(
            "click",
            json!({ "element": element.id, "timeout": timeout.as_millis() as u64 }),
            Some(timeout),
        )
        .await
        .map(|_| ())
    }

    async fn goto(&self, url: &str, until: LoadState, timeout: Duration) -> DriverResult<()> {
        self.call(
            "goto",
            json!({ "url": url, "until": until.as_str(), "timeout": timeout.as_millis() as u64 }),
            Some(timeout),
        )
        .await
        .map(|_| ())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> DriverResult<()> {
        self.call(
            "waitForLoadState",
            json!({ "state": state.as_str(), "timeout": timeout.as_millis() as u64 }),
            Some(timeout),
        )
        .await
        .map(|_| ())
    }

    async fn url(&self) -> DriverResult<String> {
        let value = self.call("url", json!({}), None).await?;
        expect_str(value, "url")
    }

    async fn content(&self) -> DriverResult<String> {
        let value = self.call("content", json!({}), None).await?;
        expect_str(value, "content")
    }

    async fn screenshot(&self, full_page: bool) -> DriverResult<Vec<u8>> {
        let value = self.call("screenshot", json!({ "fullPage": full_page }), None).await?;
        let encoded = expect_str(value, "screenshot")?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DriverError::Protocol(format!("screenshot payload: {}", e)))
    }

    async fn evaluate(&self, expression: &str) -> DriverResult<Value> {
        self.call("evaluate", json!({ "expression": expression }), None).await
    }

    async fn close(&self) -> DriverResult<()> {
        self.call("closePage", json!({}), None).await.map(|_| ())
    }
}

fn expect_str(value: Value, op: &str) -> DriverResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(DriverError::Protocol(format!("{} returned {}", op, other))),
    }
}
