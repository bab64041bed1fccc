//! Frame-aware element resolution
//!
//! Resolves a [`SelectorSet`] against the main document and every attached
//! frame, re-probing until the budget elapses. The identity UI of the target
//! application lives in an embedded frame whose presence and shape change
//! per flow step, so no fixed document shape is assumed.
//!
//! Precedence within one probe pass:
//!
//! ```text
//! candidate[0]: main, frame[0], frame[1], ...
//! candidate[1]: main, frame[0], frame[1], ...
//! ...
//! ```
//!
//! An earlier candidate always wins over a later one, and a main-document
//! match always wins over a frame match for the same candidate. Only
//! visible elements count as matches.

use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

use crate::driver::{DriverError, ElementHandle, FrameId, FrameInfo, Page};
use crate::error::{E2eError, E2eResult};
use crate::selector::SelectorSet;

/// Documents visible to one resolution attempt, main first
#[derive(Debug, Clone)]
pub struct ResolutionScope {
    frames: Vec<FrameInfo>,
}

impl ResolutionScope {
    /// Enumerate the page's frames. A transient failure (a frame detaching
    /// while being listed) degrades to the main document only.
    pub async fn capture(page: &dyn Page) -> E2eResult<Self> {
        let frames = match page.frames().await {
            Ok(frames) => frames,
            Err(e) if e.is_transient() => {
                debug!("Frame enumeration interrupted ({}), probing main document only", e);
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut ordered = Vec::with_capacity(frames.len() + 1);
        ordered.push(FrameInfo {
            id: FrameId::main(),
            name: String::new(),
            url: String::new(),
        });
        ordered.extend(frames.into_iter().filter(|f| !f.id.is_main()));
        Ok(Self { frames: ordered })
    }

    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// A concrete element found by the locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub element: ElementHandle,
    /// Index of the selector group that matched (0 for [`FrameAwareLocator::resolve`])
    pub group: usize,
    /// Index of the candidate within its group
    pub candidate: usize,
}

impl Resolved {
    pub fn in_main_document(&self) -> bool {
        self.element.frame.is_main()
    }
}

#[derive(Debug, Clone)]
pub struct FrameAwareLocator {
    poll_interval: Duration,
}

impl Default for FrameAwareLocator {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl FrameAwareLocator {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(10)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Resolve `set` to an element, polling until `budget` elapses
    pub async fn resolve(&self, page: &dyn Page, set: &SelectorSet, budget: Duration) -> E2eResult<Resolved> {
        self.resolve_any(page, &[set], budget).await
    }

    /// Resolve the first matching group, in group order. Used to race
    /// mutually exclusive UI states (e.g. "code field" vs "alternate method").
    pub async fn resolve_any(
        &self,
        page: &dyn Page,
        groups: &[&SelectorSet],
        budget: Duration,
    ) -> E2eResult<Resolved> {
        let deadline = Instant::now() + budget;
        let mut frames_seen = 1;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let scope = ResolutionScope::capture(page).await?;
            frames_seen = frames_seen.max(scope.len());

            if let Some(found) = self.probe(page, &scope, groups, deadline).await? {
                debug!(
                    "Resolved '{}' in frame {} after {} attempt(s)",
                    found.element.selector, found.element.frame, attempts
                );
                return Ok(found);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(E2eError::ElementNotFound {
                    candidates: groups
                        .iter()
                        .flat_map(|g| g.candidates().iter().cloned())
                        .collect(),
                    frames: frames_seen,
                    budget_ms: budget.as_millis() as u64,
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// One pass over the current scope, no waiting
    pub async fn probe_once(&self, page: &dyn Page, groups: &[&SelectorSet]) -> E2eResult<Option<Resolved>> {
        let scope = ResolutionScope::capture(page).await?;
        let deadline = Instant::now() + self.poll_interval.max(Duration::from_secs(1));
        self.probe(page, &scope, groups, deadline).await
    }

    async fn probe(
        &self,
        page: &dyn Page,
        scope: &ResolutionScope,
        groups: &[&SelectorSet],
        deadline: Instant,
    ) -> E2eResult<Option<Resolved>> {
        for (group, set) in groups.iter().enumerate() {
            for (candidate, selector) in set.iter().enumerate() {
                for frame in scope.frames() {
                    // A probe may outlive the budget if the driver hangs; bound it by
                    // the remaining time but always give it a minimal slice.
                    let remaining = deadline
                        .saturating_duration_since(Instant::now())
                        .max(Duration::from_millis(50));

                    match timeout(remaining, page.query(&frame.id, selector)).await {
                        Ok(Ok(Some(element))) => {
                            if self.interactable(page, &element, deadline).await? {
                                return Ok(Some(Resolved { element, group, candidate }));
                            }
                            trace!("'{}' matched a hidden element in frame {}", selector, frame.id);
                        }
                        Ok(Ok(None)) => {}
                        Ok(Err(e)) if e.is_transient() => {
                            trace!("Transient probe error in frame {} for '{}': {}", frame.id, selector, e);
                        }
                        Ok(Err(DriverError::Timeout(_))) | Err(_) => {
                            trace!("Probe timed out in frame {} for '{}'", frame.id, selector);
                        }
                        Ok(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
        Ok(None)
    }

    /// Attached and visible. Hidden matches (autofill decoys, collapsed
    /// panels) never satisfy a resolution.
    async fn interactable(&self, page: &dyn Page, element: &ElementHandle, deadline: Instant) -> E2eResult<bool> {
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(50));
        match timeout(remaining, page.element_state(element)).await {
            Ok(Ok(state)) => Ok(state.attached && state.visible),
            Ok(Err(e)) if e.is_transient() => Ok(false),
            Ok(Err(DriverError::Timeout(_))) | Err(_) => Ok(false),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}
