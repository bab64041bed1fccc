//! Step execution with timeout and stabilization policy

use std::future::Future;
use std::time::Duration;

use regex::Regex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

use crate::driver::{is_truthy, DriverError, ElementHandle, ElementState, LoadState, Page};
use crate::error::{E2eError, E2eResult};
use crate::locator::FrameAwareLocator;
use crate::selector::SelectorSet;
use crate::session::Session;
use crate::step::{Action, Condition, Step};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Relative navigate URLs are joined to this
    pub base_url: String,
    /// Wait between resolving an element and acting on it. The target UI
    /// re-renders right after most navigations; acting sooner hits stale nodes.
    pub stabilization_delay: Duration,
    pub poll_interval: Duration,
    /// Best-effort network-idle wait after navigation
    pub network_idle_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            stabilization_delay: Duration::from_millis(1_000),
            poll_interval: Duration::from_millis(250),
            network_idle_grace: Duration::from_millis(8_000),
        }
    }
}

/// Executes one [`Step`] against a session's active page
#[derive(Debug, Clone)]
pub struct StepExecutor {
    config: ExecutorConfig,
    locator: FrameAwareLocator,
}

impl StepExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let locator = FrameAwareLocator::new(config.poll_interval);
        Self { config, locator }
    }

    pub fn locator(&self) -> &FrameAwareLocator {
        &self.locator
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `step` to completion. The step's action has finished when this
    /// returns `Ok`, so the next step never overlaps it.
    pub async fn execute(&self, step: &Step, session: &Session) -> E2eResult<()> {
        let page = session.page();
        let budget = self.budget(step, session);
        debug!("Executing step {} (budget {} ms)", step.describe(), budget.as_millis());

        match (step.action(), step.target(), step.value()) {
            (Action::Navigate, _, Some(url)) => self.navigate(page, url, budget).await,
            (Action::Fill, Some(target), Some(value)) => self.fill(page, target, value, budget).await,
            (Action::Click, Some(target), _) => self.click(page, target, budget).await,
            (Action::WaitForCondition, _, _) => self.wait_for(page, step, budget).await,
            _ => Err(E2eError::SpecParse(format!("incomplete step {}", step.describe()))),
        }
    }

    fn budget(&self, step: &Step, session: &Session) -> Duration {
        match step.timeout_ms() {
            Some(ms) => Duration::from_millis(ms),
            None if step.action() == Action::Navigate => session.navigation_timeout(),
            None => session.action_timeout(),
        }
    }

    /// Join a relative route to the base URL; absolute URLs pass through
    pub fn resolve_url(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") || target.starts_with("about:") {
            return target.to_string();
        }
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            target.trim_start_matches('/')
        )
    }

    async fn navigate(&self, page: &dyn Page, target: &str, budget: Duration) -> E2eResult<()> {
        let url = self.resolve_url(target);
        info!("Navigating to {}", url);

        // Wait for DOMContentLoaded only: the app keeps long-poll connections
        // open, so network idle is not a reliable milestone.
        match timeout(budget, page.goto(&url, LoadState::DomContentLoaded, budget)).await {
            Err(_) | Ok(Err(DriverError::Timeout(_))) => {
                return Err(E2eError::ActionTimeout {
                    action: "navigate".into(),
                    target: url,
                    timeout_ms: budget.as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                return Err(E2eError::Navigation {
                    url,
                    reason: e.to_string(),
                })
            }
            Ok(Ok(())) => {}
        }

        let grace = self.config.network_idle_grace;
        match timeout(grace, page.wait_for_load_state(LoadState::NetworkIdle, grace)).await {
            Ok(Ok(())) => debug!("Network idle reached for {}", url),
            Ok(Err(e)) => debug!("Network idle not reached for {} ({}), continuing", url, e),
            Err(_) => debug!("Network idle wait for {} exceeded {} ms, continuing", url, grace.as_millis()),
        }
        Ok(())
    }

    async fn fill(&self, page: &dyn Page, target: &SelectorSet, value: &str, budget: Duration) -> E2eResult<()> {
        let (element, deadline) = self.resolve_stable(page, target, budget).await?;
        self.wait_actionable(page, &element, "fill", deadline, budget, ElementState::is_fillable)
            .await?;

        let remaining = remaining_or_timeout("fill", &element, deadline, budget)?;
        self.act("fill", &element, budget, page.fill(&element, value, remaining)).await
    }

    async fn click(&self, page: &dyn Page, target: &SelectorSet, budget: Duration) -> E2eResult<()> {
        let (element, deadline) = self.resolve_stable(page, target, budget).await?;
        self.wait_actionable(page, &element, "click", deadline, budget, ElementState::is_clickable)
            .await?;

        let remaining = remaining_or_timeout("click", &element, deadline, budget)?;
        self.act("click", &element, budget, page.click(&element, remaining)).await
    }

    /// Resolve, wait the stabilization delay, and re-resolve once if the UI
    /// replaced the element in the meantime. The delay does not consume the
    /// step budget; the returned deadline excludes it.
    async fn resolve_stable(
        &self,
        page: &dyn Page,
        target: &SelectorSet,
        budget: Duration,
    ) -> E2eResult<(ElementHandle, Instant)> {
        let started = Instant::now();
        let resolved = self.locator.resolve(page, target, budget).await?;
        let spent = started.elapsed();

        sleep(self.config.stabilization_delay).await;
        let deadline = Instant::now() + budget.saturating_sub(spent);

        match page.element_state(&resolved.element).await {
            Ok(state) if state.attached => Ok((resolved.element, deadline)),
            Ok(_) | Err(_) => {
                debug!("'{}' re-rendered during stabilization, resolving again", resolved.element.selector);
                let remaining = deadline.saturating_duration_since(Instant::now());
                let again = self.locator.resolve(page, target, remaining).await?;
                Ok((again.element, deadline))
            }
        }
    }

    async fn wait_actionable(
        &self,
        page: &dyn Page,
        element: &ElementHandle,
        action: &str,
        deadline: Instant,
        budget: Duration,
        ready: fn(&ElementState) -> bool,
    ) -> E2eResult<()> {
        loop {
            let state = match page.element_state(element).await {
                Ok(state) => state,
                Err(e) if e.is_transient() => ElementState::detached(),
                Err(e) => return Err(e.into()),
            };

            if !state.attached {
                return Err(E2eError::ActionError {
                    action: action.into(),
                    target: element.selector.clone(),
                    reason: "element detached before the action could start".into(),
                });
            }
            if ready(&state) {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(E2eError::ActionTimeout {
                    action: action.into(),
                    target: element.selector.clone(),
                    timeout_ms: budget.as_millis() as u64,
                });
            }
            sleep(self.locator.poll_interval().min(deadline - now)).await;
        }
    }

    async fn act<F>(&self, action: &str, element: &ElementHandle, budget: Duration, op: F) -> E2eResult<()>
    where
        F: Future<Output = Result<(), DriverError>>,
    {
        match timeout(budget, op).await {
            Ok(Ok(())) => {
                debug!("{} on '{}' done", action, element.selector);
                Ok(())
            }
            Ok(Err(DriverError::Timeout(_))) | Err(_) => Err(E2eError::ActionTimeout {
                action: action.into(),
                target: element.selector.clone(),
                timeout_ms: budget.as_millis() as u64,
            }),
            Ok(Err(e)) if e.is_transient() => Err(E2eError::ActionError {
                action: action.into(),
                target: element.selector.clone(),
                reason: e.to_string(),
            }),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn wait_for(&self, page: &dyn Page, step: &Step, budget: Duration) -> E2eResult<()> {
        let value = step.value().unwrap_or_default();
        let reached = match step.condition() {
            Condition::Visible => {
                let target = require_target(step)?;
                self.poll(budget, || self.element_visible(page, target)).await?
            }
            Condition::Hidden => {
                let target = require_target(step)?;
                self.poll(budget, || async { Ok::<_, E2eError>(!self.element_visible(page, target).await?) })
                    .await?
            }
            Condition::TextVisible => {
                let target = SelectorSet::text(value);
                self.poll(budget, || self.element_visible(page, &target)).await?
            }
            Condition::UrlMatches => {
                let matcher = UrlPattern::parse(value)?;
                self.poll(budget, || async {
                    match page.url().await {
                        Ok(url) => Ok(matcher.matches(&url)),
                        Err(e) if e.is_transient() => Ok(false),
                        Err(e) => Err(E2eError::from(e)),
                    }
                })
                .await?
            }
            Condition::Expression => {
                self.poll(budget, || async {
                    match page.evaluate(value).await {
                        Ok(v) => Ok(is_truthy(&v)),
                        Err(e) if e.is_transient() => Ok(false),
                        Err(e) => Err(E2eError::from(e)),
                    }
                })
                .await?
            }
        };

        if reached {
            Ok(())
        } else {
            Err(E2eError::ActionTimeout {
                action: "wait".into(),
                target: step.describe(),
                timeout_ms: budget.as_millis() as u64,
            })
        }
    }

    /// One-shot visibility check across the whole resolution scope
    async fn element_visible(&self, page: &dyn Page, target: &SelectorSet) -> E2eResult<bool> {
        let Some(found) = self.locator.probe_once(page, &[target]).await? else {
            return Ok(false);
        };
        match page.element_state(&found.element).await {
            Ok(state) => Ok(state.attached && state.visible),
            Err(e) if e.is_transient() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-check `check` on the poll interval; `Ok(false)` once `budget` elapses
    async fn poll<F, Fut>(&self, budget: Duration, mut check: F) -> E2eResult<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<bool>>,
    {
        let deadline = Instant::now() + budget;
        loop {
            if check().await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(self.locator.poll_interval().min(deadline - now)).await;
        }
    }
}

fn require_target(step: &Step) -> E2eResult<&SelectorSet> {
    step.target()
        .ok_or_else(|| E2eError::SpecParse(format!("{} requires a target", step.describe())))
}

fn remaining_or_timeout(action: &str, element: &ElementHandle, deadline: Instant, budget: Duration) -> E2eResult<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(E2eError::ActionTimeout {
            action: action.into(),
            target: element.selector.clone(),
            timeout_ms: budget.as_millis() as u64,
        });
    }
    Ok(remaining)
}

/// URL expectation: plain text is a substring match, `re:` prefix is a regex
#[derive(Debug, Clone)]
pub enum UrlPattern {
    Contains(String),
    Regex(Regex),
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> E2eResult<Self> {
        match pattern.strip_prefix("re:") {
            Some(expr) => Regex::new(expr)
                .map(UrlPattern::Regex)
                .map_err(|e| E2eError::SpecParse(format!("invalid URL regex '{}': {}", expr, e))),
            None => Ok(UrlPattern::Contains(pattern.to_string())),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Contains(needle) => url.contains(needle.as_str()),
            UrlPattern::Regex(re) => re.is_match(url),
        }
    }
}
