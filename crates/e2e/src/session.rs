//! Isolated browsing session owned by one scenario run

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::{Browser, BrowserContext, BrowserLauncher, ContextOptions, Page};
use crate::error::E2eResult;

/// Where sessions get their browser from
#[derive(Clone)]
pub enum BrowserSource {
    /// One browser process shared by every scenario; each session only opens
    /// and closes its own context. The `Arc` is the reference count.
    Shared(Arc<dyn Browser>),
    /// Launch a browser per session; the session closes it on teardown
    PerScenario(Arc<dyn BrowserLauncher>),
}

/// What teardown managed to close
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub pages_closed: usize,
    pub context_closed: bool,
    pub browser_closed: bool,
    pub errors: Vec<String>,
}

/// One isolated cookie/storage jar with its pages
pub struct Session {
    id: String,
    browser: Arc<dyn Browser>,
    owns_browser: bool,
    context: Box<dyn BrowserContext>,
    active: Arc<dyn Page>,
    pages: Vec<Arc<dyn Page>>,
    options: ContextOptions,
    closed: bool,
}

impl Session {
    /// Open a fresh context and its first page
    pub async fn open(source: &BrowserSource, options: ContextOptions) -> E2eResult<Self> {
        let (browser, owns_browser) = match source {
            BrowserSource::Shared(browser) => (Arc::clone(browser), false),
            BrowserSource::PerScenario(launcher) => (launcher.launch().await?, true),
        };

        let context = match browser.new_context(&options).await {
            Ok(context) => context,
            Err(e) => {
                if owns_browser {
                    let _ = browser.close().await;
                }
                return Err(e.into());
            }
        };

        let page = match context.new_page().await {
            Ok(page) => page,
            Err(e) => {
                let _ = context.close().await;
                if owns_browser {
                    let _ = browser.close().await;
                }
                return Err(e.into());
            }
        };

        let id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        debug!("Session {} opened (owns browser: {})", id, owns_browser);

        Ok(Self {
            id,
            browser,
            owns_browser,
            context,
            active: Arc::clone(&page),
            pages: vec![page],
            options,
            closed: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The page actions target: the most recently opened one
    pub fn page(&self) -> &dyn Page {
        self.active.as_ref()
    }

    pub async fn new_page(&mut self) -> E2eResult<&dyn Page> {
        let page = self.context.new_page().await?;
        self.active = Arc::clone(&page);
        self.pages.push(page);
        Ok(self.page())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.options.action_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.options.navigation_timeout_ms)
    }

    /// Close every page, the context and, if owned, the browser. Consumes the
    /// session so it cannot be torn down twice. Never fails; problems are
    /// reported in the returned [`TeardownReport`].
    pub async fn close(mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for page in self.pages.drain(..).rev() {
            match page.close().await {
                Ok(()) => report.pages_closed += 1,
                Err(e) => report.errors.push(format!("page: {}", e)),
            }
        }

        match self.context.close().await {
            Ok(()) => report.context_closed = true,
            Err(e) => report.errors.push(format!("context: {}", e)),
        }

        if self.owns_browser {
            match self.browser.close().await {
                Ok(()) => report.browser_closed = true,
                Err(e) => report.errors.push(format!("browser: {}", e)),
            }
        }

        for err in &report.errors {
            warn!("Session {} teardown: {}", self.id, err);
        }
        debug!("Session {} closed", self.id);

        self.closed = true;
        report
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Session {} dropped without close(); browser resources may leak", self.id);
        }
    }
}
