//! Failure snapshots
//!
//! A snapshot is taken only at a failure boundary, at most once per boundary
//! per run. Capturing never fails: a primitive that errors or hangs leaves
//! its field empty and adds a line to `capture_errors`.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::auth::FlowState;
use crate::driver::DriverResult;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureBoundary {
    /// Where the failure first surfaced (failing step or auth flow)
    Initial,
    /// After terminal assertions, right before teardown
    Final,
}

impl FailureBoundary {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureBoundary::Initial => "initial",
            FailureBoundary::Final => "final",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub scenario: String,
    pub run_id: String,
    pub boundary: FailureBoundary,
    pub timestamp: DateTime<Utc>,
    pub current_url: Option<String>,
    pub triggering_step: Option<String>,
    pub flow_state: FlowState,
    /// Serialized document
    pub document_path: Option<PathBuf>,
    pub document_sha256: Option<String>,
    /// Full-page screenshot
    pub visual_capture_path: Option<PathBuf>,
    pub visual_capture_sha256: Option<String>,
    /// This snapshot as JSON
    pub snapshot_path: Option<PathBuf>,
    pub capture_errors: Vec<String>,
}

impl DiagnosticsSnapshot {
    pub fn is_partial(&self) -> bool {
        !self.capture_errors.is_empty()
    }
}

pub struct DiagnosticsRecorder {
    dir: PathBuf,
    scenario: String,
    slug: String,
    run_id: String,
    capture_timeout: Duration,
    taken: HashSet<FailureBoundary>,
    snapshots: Vec<DiagnosticsSnapshot>,
}

impl DiagnosticsRecorder {
    pub fn new(dir: impl Into<PathBuf>, scenario: &str, run_id: &str, capture_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            scenario: scenario.to_string(),
            slug: slugify(scenario),
            run_id: run_id.to_string(),
            capture_timeout,
            taken: HashSet::new(),
            snapshots: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn has_captured(&self, boundary: FailureBoundary) -> bool {
        self.taken.contains(&boundary)
    }

    pub fn snapshots(&self) -> &[DiagnosticsSnapshot] {
        &self.snapshots
    }

    pub fn into_snapshots(self) -> Vec<DiagnosticsSnapshot> {
        self.snapshots
    }

    /// Capture a snapshot for `boundary`. Returns `None` if this boundary was
    /// already captured in this run.
    pub async fn capture(
        &mut self,
        session: &Session,
        boundary: FailureBoundary,
        triggering_step: Option<&str>,
        flow_state: FlowState,
    ) -> Option<&DiagnosticsSnapshot> {
        if !self.taken.insert(boundary) {
            return None;
        }

        let page = session.page();
        let stem = format!("{}-{}-{}", self.slug, self.run_id, boundary.as_str());
        let mut errors = Vec::new();

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            errors.push(format!("create {}: {}", self.dir.display(), e));
        }

        let current_url = self.bounded("url", page.url(), &mut errors).await;

        let mut document_path = None;
        let mut document_sha256 = None;
        if let Some(html) = self.bounded("content", page.content(), &mut errors).await {
            let path = self.dir.join(format!("{}.html", stem));
            match tokio::fs::write(&path, html.as_bytes()).await {
                Ok(()) => {
                    document_sha256 = Some(digest(html.as_bytes()));
                    document_path = Some(path);
                }
                Err(e) => errors.push(format!("write {}: {}", path.display(), e)),
            }
        }

        let mut visual_capture_path = None;
        let mut visual_capture_sha256 = None;
        if let Some(png) = self.bounded("screenshot", page.screenshot(true), &mut errors).await {
            let path = self.dir.join(format!("{}.png", stem));
            match tokio::fs::write(&path, &png).await {
                Ok(()) => {
                    visual_capture_sha256 = Some(digest(&png));
                    visual_capture_path = Some(path);
                }
                Err(e) => errors.push(format!("write {}: {}", path.display(), e)),
            }
        }

        let mut snapshot = DiagnosticsSnapshot {
            scenario: self.scenario.clone(),
            run_id: self.run_id.clone(),
            boundary,
            timestamp: Utc::now(),
            current_url,
            triggering_step: triggering_step.map(str::to_string),
            flow_state,
            document_path,
            document_sha256,
            visual_capture_path,
            visual_capture_sha256,
            snapshot_path: None,
            capture_errors: errors,
        };

        let json_path = self.dir.join(format!("{}.json", stem));
        snapshot.snapshot_path = Some(json_path.clone());
        let written = match serde_json::to_vec_pretty(&snapshot) {
            Ok(json) => tokio::fs::write(&json_path, json).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = written {
            snapshot.snapshot_path = None;
            snapshot.capture_errors.push(format!("write {}: {}", json_path.display(), e));
        }

        for err in &snapshot.capture_errors {
            warn!("Diagnostics for '{}' ({}) incomplete: {}", self.scenario, boundary.as_str(), err);
        }
        info!(
            "Captured {} diagnostics for '{}' at {}",
            boundary.as_str(),
            self.scenario,
            snapshot.current_url.as_deref().unwrap_or("<unknown url>")
        );

        self.snapshots.push(snapshot);
        self.snapshots.last()
    }

    async fn bounded<T, F>(&self, what: &str, op: F, errors: &mut Vec<String>) -> Option<T>
    where
        F: Future<Output = DriverResult<T>>,
    {
        match timeout(self.capture_timeout, op).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                errors.push(format!("{}: {}", what, e));
                None
            }
            Err(_) => {
                errors.push(format!("{}: timed out after {} ms", what, self.capture_timeout.as_millis()));
                None
            }
        }
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// File-name-safe form of a scenario name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "scenario".to_string()
    } else {
        slug.to_string()
    }
}
