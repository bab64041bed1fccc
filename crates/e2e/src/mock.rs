//! In-memory driver
//!
//! Pages are [`MockDocument`]s: a main document plus nested frames holding
//! [`MockElement`]s that answer to literal selector strings and `text=`
//! selectors. Application behaviour is supplied by a [`MockApp`], one
//! instance per page. Counters in [`MockStats`] let tests check probing
//! order and resource release.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tokio::time::{sleep, Instant};

use crate::driver::{
    Browser, BrowserContext, BrowserLauncher, ContextOptions, DriverError, DriverResult, ElementHandle,
    ElementState, FrameId, FrameInfo, LoadState, Page,
};

#[derive(Debug, Clone)]
pub struct MockElement {
    pub key: String,
    pub selectors: Vec<String>,
    pub text: String,
    pub value: String,
    pub visible: bool,
    pub enabled: bool,
    pub editable: bool,
    /// Not rendered before this instant
    pub ready_at: Option<Instant>,
    /// Not rendered from this instant on
    pub gone_at: Option<Instant>,
}

impl MockElement {
    pub fn input(key: &str, selectors: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            text: String::new(),
            value: String::new(),
            visible: true,
            enabled: true,
            editable: true,
            ready_at: None,
            gone_at: None,
        }
    }

    pub fn button(key: &str, selectors: &[&str], text: &str) -> Self {
        Self {
            text: text.to_string(),
            editable: false,
            ..Self::input(key, selectors)
        }
    }

    /// Plain visible text, reachable through `text=` selectors only
    pub fn text(key: &str, text: &str) -> Self {
        Self::button(key, &[], text)
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn appears_after(mut self, delay: Duration) -> Self {
        self.ready_at = Some(Instant::now() + delay);
        self
    }

    /// Replaced by a re-render after `delay`
    pub fn disappears_after(mut self, delay: Duration) -> Self {
        self.gone_at = Some(Instant::now() + delay);
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    fn rendered(&self, now: Instant) -> bool {
        self.ready_at.map_or(true, |at| now >= at) && self.gone_at.map_or(true, |at| now < at)
    }

    fn matches(&self, selector: &str) -> bool {
        if let Some(needle) = selector.strip_prefix("text=") {
            let needle = needle.trim_matches('"').to_lowercase();
            return !needle.is_empty() && self.text.to_lowercase().contains(&needle);
        }
        self.selectors.iter().any(|s| s == selector)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockFrame {
    pub id: String,
    pub name: String,
    pub url: String,
    pub elements: Vec<MockElement>,
}

impl MockFrame {
    pub fn new(id: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            url: url.to_string(),
            elements: Vec::new(),
        }
    }

    pub fn with(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }
}

/// State of one page as the application renders it
#[derive(Debug, Clone, Default)]
pub struct MockDocument {
    pub url: String,
    pub elements: Vec<MockElement>,
    /// Attached frames in document order
    pub frames: Vec<MockFrame>,
    /// Values returned by `evaluate`, keyed by expression
    pub globals: HashMap<String, Value>,
    pub network_idle: bool,
}

impl MockDocument {
    pub fn blank() -> Self {
        Self {
            url: "about:blank".to_string(),
            network_idle: true,
            ..Default::default()
        }
    }

    pub fn at(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::blank()
        }
    }

    pub fn with(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_frame(mut self, frame: MockFrame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Drop every element and frame, keep URL and globals
    pub fn clear(&mut self) {
        self.elements.clear();
        self.frames.clear();
    }

    pub fn add(&mut self, element: MockElement) {
        self.elements.push(element);
    }

    /// Add to the frame `frame_id`, creating the frame if needed
    pub fn add_to_frame(&mut self, frame_id: &str, element: MockElement) {
        match self.frames.iter_mut().find(|f| f.id == frame_id) {
            Some(frame) => frame.elements.push(element),
            None => self.frames.push(MockFrame::new(frame_id, &self.url).with(element)),
        }
    }

    /// Remove an element anywhere in the page
    pub fn remove(&mut self, key: &str) {
        self.elements.retain(|e| e.key != key);
        for frame in &mut self.frames {
            frame.elements.retain(|e| e.key != key);
        }
    }

    pub fn find(&self, key: &str) -> Option<&MockElement> {
        self.elements
            .iter()
            .chain(self.frames.iter().flat_map(|f| f.elements.iter()))
            .find(|e| e.key == key)
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut MockElement> {
        self.elements
            .iter_mut()
            .chain(self.frames.iter_mut().flat_map(|f| f.elements.iter_mut()))
            .find(|e| e.key == key)
    }

    pub fn set_global(&mut self, expression: &str, value: Value) {
        self.globals.insert(expression.to_string(), value);
    }

    fn frame_elements(&self, frame: &FrameId) -> Option<&[MockElement]> {
        if frame.is_main() {
            return Some(&self.elements);
        }
        self.frames
            .iter()
            .find(|f| f.id == frame.0)
            .map(|f| f.elements.as_slice())
    }

    fn render(&self) -> String {
        let mut html = format!("<html data-url=\"{}\"><body>\n", self.url);
        for e in &self.elements {
            html.push_str(&format!("<div data-key=\"{}\">{}</div>\n", e.key, e.text));
        }
        for f in &self.frames {
            html.push_str(&format!("<iframe name=\"{}\" src=\"{}\"></iframe>\n", f.name, f.url));
        }
        html.push_str("</body></html>\n");
        html
    }
}

/// Application behaviour behind a mock page
pub trait MockApp: Send {
    /// Document shown by a fresh page
    fn initial(&mut self) -> MockDocument {
        MockDocument::blank()
    }

    fn navigate(&mut self, url: &str, doc: &mut MockDocument) -> DriverResult<()> {
        doc.url = url.to_string();
        Ok(())
    }

    fn click(&mut self, _element: &str, _doc: &mut MockDocument) {}

    fn fill(&mut self, _element: &str, _value: &str, _doc: &mut MockDocument) {}
}

/// Serves one fixed document; navigation only changes the URL
#[derive(Debug, Clone)]
pub struct StaticApp {
    document: MockDocument,
}

impl StaticApp {
    pub fn new(document: MockDocument) -> Self {
        Self { document }
    }
}

impl MockApp for StaticApp {
    fn initial(&mut self) -> MockDocument {
        self.document.clone()
    }
}

/// Resource and probe counters shared by a browser and everything it opens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub launches: usize,
    pub browsers_closed: usize,
    pub contexts_opened: usize,
    pub contexts_closed: usize,
    pub pages_opened: usize,
    pub pages_closed: usize,
    pub main_probes: usize,
    pub frame_probes: usize,
}

impl MockStats {
    pub fn open_contexts(&self) -> usize {
        self.contexts_opened - self.contexts_closed
    }

    pub fn open_pages(&self) -> usize {
        self.pages_opened - self.pages_closed
    }
}

/// Failures injected into every page of a browser
#[derive(Debug, Clone, Default)]
pub struct MockFaults {
    /// The next N queries fail with `Detached`
    pub transient_queries: u32,
    /// The next N frame enumerations fail with `ContextDestroyed`
    pub transient_frames: u32,
    /// Every `goto` fails with this error
    pub goto_error: Option<DriverError>,
    /// `goto` never completes
    pub goto_hangs: bool,
    pub screenshot_error: Option<DriverError>,
    /// `content` never completes
    pub content_hangs: bool,
    /// Fill/click on this element key fails with `Detached`
    pub detach_on_action: Option<String>,
    /// Opening a context fails
    pub context_error: Option<DriverError>,
}

type AppFactory = Arc<dyn Fn() -> Box<dyn MockApp> + Send + Sync>;

#[derive(Clone)]
struct Shared {
    factory: AppFactory,
    stats: Arc<Mutex<MockStats>>,
    faults: Arc<Mutex<MockFaults>>,
}

pub struct MockBrowser {
    shared: Shared,
    closed: AtomicBool,
}

impl MockBrowser {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn MockApp> + Send + Sync + 'static,
    {
        Self::from_shared(Shared {
            factory: Arc::new(factory),
            stats: Arc::new(Mutex::new(MockStats::default())),
            faults: Arc::new(Mutex::new(MockFaults::default())),
        })
    }

    /// Every page shows `document`
    pub fn with_document(document: MockDocument) -> Self {
        Self::new(move || Box::new(StaticApp::new(document.clone())) as Box<dyn MockApp>)
    }

    fn from_shared(shared: Shared) -> Self {
        shared.stats.lock().launches += 1;
        Self {
            shared,
            closed: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> MockStats {
        self.shared.stats.lock().clone()
    }

    pub fn faults(&self) -> MutexGuard<'_, MockFaults> {
        self.shared.faults.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn new_context(&self, _options: &ContextOptions) -> DriverResult<Box<dyn BrowserContext>> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        if let Some(err) = self.shared.faults.lock().context_error.clone() {
            return Err(err);
        }
        self.shared.stats.lock().contexts_opened += 1;
        Ok(Box::new(MockContext {
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        self.shared.stats.lock().browsers_closed += 1;
        Ok(())
    }
}

/// Launches [`MockBrowser`]s that share one set of counters and faults
#[derive(Clone)]
pub struct MockLauncher {
    shared: Shared,
}

impl MockLauncher {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn MockApp> + Send + Sync + 'static,
    {
        Self {
            shared: Shared {
                factory: Arc::new(factory),
                stats: Arc::new(Mutex::new(MockStats::default())),
                faults: Arc::new(Mutex::new(MockFaults::default())),
            },
        }
    }

    pub fn stats(&self) -> MockStats {
        self.shared.stats.lock().clone()
    }

    pub fn faults(&self) -> MutexGuard<'_, MockFaults> {
        self.shared.faults.lock()
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self) -> DriverResult<Arc<dyn Browser>> {
        Ok(Arc::new(MockBrowser::from_shared(self.shared.clone())))
    }
}

pub struct MockContext {
    shared: Shared,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserContext for MockContext {
    async fn new_page(&self) -> DriverResult<Arc<dyn Page>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        let mut app = (self.shared.factory)();
        let doc = app.initial();
        self.shared.stats.lock().pages_opened += 1;
        Ok(Arc::new(MockPage {
            inner: Mutex::new(PageInner { app, doc, closed: false }),
            shared: self.shared.clone(),
        }))
    }

    async fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        self.shared.stats.lock().contexts_closed += 1;
        Ok(())
    }
}

struct PageInner {
    app: Box<dyn MockApp>,
    doc: MockDocument,
    closed: bool,
}

pub struct MockPage {
    inner: Mutex<PageInner>,
    shared: Shared,
}

impl MockPage {
    fn open(&self) -> DriverResult<MutexGuard<'_, PageInner>> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(DriverError::Closed);
        }
        Ok(inner)
    }

    fn act<F>(&self, element: &ElementHandle, op: F) -> DriverResult<()>
    where
        F: FnOnce(&mut PageInner, &str),
    {
        if self.shared.faults.lock().detach_on_action.as_deref() == Some(element.id.as_str()) {
            return Err(DriverError::Detached(element.selector.clone()));
        }
        let mut inner = self.open()?;
        let now = Instant::now();
        let present = inner
            .doc
            .frame_elements(&element.frame)
            .map_or(false, |els| els.iter().any(|e| e.key == element.id && e.rendered(now)));
        if !present {
            return Err(DriverError::Detached(element.selector.clone()));
        }
        op(&mut *inner, &element.id);
        Ok(())
    }
}

#[async_trait]
impl Page for MockPage {
    async fn frames(&self) -> DriverResult<Vec<FrameInfo>> {
        {
            let mut faults = self.shared.faults.lock();
            if faults.transient_frames > 0 {
                faults.transient_frames -= 1;
                return Err(DriverError::ContextDestroyed("navigation in progress".into()));
            }
        }
        let inner = self.open()?;
        let mut frames = vec![FrameInfo {
            id: FrameId::main(),
            name: String::new(),
            url: inner.doc.url.clone(),
        }];
        frames.extend(inner.doc.frames.iter().map(|f| FrameInfo {
            id: FrameId(f.id.clone()),
            name: f.name.clone(),
            url: f.url.clone(),
        }));
        Ok(frames)
    }

    async fn query(&self, frame: &FrameId, selector: &str) -> DriverResult<Option<ElementHandle>> {
        {
            let mut stats = self.shared.stats.lock();
            if frame.is_main() {
                stats.main_probes += 1;
            } else {
                stats.frame_probes += 1;
            }
        }
        {
            let mut faults = self.shared.faults.lock();
            if faults.transient_queries > 0 {
                faults.transient_queries -= 1;
                return Err(DriverError::Detached(format!("frame {} detached", frame)));
            }
        }

        let inner = self.open()?;
        let Some(elements) = inner.doc.frame_elements(frame) else {
            return Err(DriverError::Detached(format!("frame {} detached", frame)));
        };
        // First visible match, else the first match at all
        let now = Instant::now();
        let mut matching = elements.iter().filter(|e| e.rendered(now) && e.matches(selector));
        let first = matching.clone().next();
        Ok(matching
            .find(|e| e.visible)
            .or(first)
            .map(|e| ElementHandle {
                id: e.key.clone(),
                frame: frame.clone(),
                selector: selector.to_string(),
            }))
    }

    async fn element_state(&self, element: &ElementHandle) -> DriverResult<ElementState> {
        let inner = self.open()?;
        let now = Instant::now();
        let found = inner
            .doc
            .frame_elements(&element.frame)
            .and_then(|els| els.iter().find(|e| e.key == element.id && e.rendered(now)));
        Ok(match found {
            Some(e) => ElementState {
                attached: true,
                visible: e.visible,
                enabled: e.enabled,
                editable: e.editable,
            },
            None => ElementState::detached(),
        })
    }

    async fn fill(&self, element: &ElementHandle, value: &str, _timeout: Duration) -> DriverResult<()> {
        self.act(element, |inner, key| {
            if let Some(e) = inner.doc.find_mut(key) {
                e.value = value.to_string();
            }
            inner.app.fill(key, value, &mut inner.doc);
        })
    }

    async fn click(&self, element: &ElementHandle, _timeout: Duration) -> DriverResult<()> {
        self.act(element, |inner, key| inner.app.click(key, &mut inner.doc))
    }

    async fn goto(&self, url: &str, _until: LoadState, timeout: Duration) -> DriverResult<()> {
        let (error, hangs) = {
            let faults = self.shared.faults.lock();
            (faults.goto_error.clone(), faults.goto_hangs)
        };
        if let Some(err) = error {
            return Err(err);
        }
        if hangs {
            sleep(timeout).await;
            return Err(DriverError::Timeout(format!("goto {}", url)));
        }
        let mut inner = self.open()?;
        let PageInner { app, doc, .. } = &mut *inner;
        app.navigate(url, doc)
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> DriverResult<()> {
        let idle = self.open()?.doc.network_idle;
        if state != LoadState::NetworkIdle || idle {
            return Ok(());
        }
        sleep(timeout).await;
        Err(DriverError::Timeout(format!("waiting for {}", state.as_str())))
    }

    async fn url(&self) -> DriverResult<String> {
        Ok(self.open()?.doc.url.clone())
    }

    async fn content(&self) -> DriverResult<String> {
        if self.shared.faults.lock().content_hangs {
            sleep(Duration::from_secs(3600)).await;
        }
        Ok(self.open()?.doc.render())
    }

    async fn screenshot(&self, _full_page: bool) -> DriverResult<Vec<u8>> {
        if let Some(err) = self.shared.faults.lock().screenshot_error.clone() {
            return Err(err);
        }
        let url = self.open()?.doc.url.clone();
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(url.as_bytes());
        Ok(png)
    }

    async fn evaluate(&self, expression: &str) -> DriverResult<Value> {
        Ok(self
            .open()?
            .doc
            .globals
            .get(expression)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn close(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(DriverError::Closed);
        }
        inner.closed = true;
        drop(inner);
        self.shared.stats.lock().pages_closed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_selector_is_case_insensitive_substring() {
        let el = MockElement::text("t", "Bucket created successfully");
        assert!(el.matches("text=bucket created"));
        assert!(el.matches("text=\"Bucket created\""));
        assert!(!el.matches("text=deleted"));
        assert!(!el.matches("#t"));
    }

    #[test]
    fn test_document_remove_reaches_frames() {
        let mut doc = MockDocument::at("http://app/sign-in")
            .with(MockElement::input("a", &["#a"]))
            .with_frame(MockFrame::new("auth", "http://idp/").with(MockElement::input("b", &["#b"])));
        doc.remove("b");
        assert!(doc.find("b").is_none());
        assert!(doc.find("a").is_some());
        doc.add_to_frame("other", MockElement::input("c", &["#c"]));
        assert_eq!(doc.frames.len(), 2);
    }

    #[tokio::test]
    async fn test_page_lifecycle_counters() {
        let browser = MockBrowser::with_document(MockDocument::blank());
        let ctx = browser.new_context(&ContextOptions::default()).await.unwrap();
        let page = ctx.new_page().await.unwrap();
        page.close().await.unwrap();
        assert_eq!(page.url().await, Err(DriverError::Closed));
        ctx.close().await.unwrap();
        browser.close().await.unwrap();

        let stats = browser.stats();
        assert_eq!(stats.open_pages(), 0);
        assert_eq!(stats.open_contexts(), 0);
        assert_eq!(stats.browsers_closed, 1);
    }
}
