//! Scenario lifecycle: session, auth, steps, assertions, diagnostics, teardown

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::auth::{AuthConfig, AuthFlowController, FlowState, Transition};
use crate::config::HarnessConfig;
use crate::diagnostics::{DiagnosticsRecorder, DiagnosticsSnapshot, FailureBoundary};
use crate::driver::ContextOptions;
use crate::error::{E2eError, E2eResult, ErrorKind};
use crate::executor::{ExecutorConfig, StepExecutor, UrlPattern};
use crate::scenario::{Assertion, Placeholders, Scenario};
use crate::session::{BrowserSource, Session, TeardownReport};
use crate::step::{Condition, Step};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail { kind: ErrorKind, message: String },
}

/// Where a scenario stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Index into the scenario's steps; `None` for the auth precondition
    pub index: Option<usize>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub description: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub run_id: String,
    pub outcome: Outcome,
    pub failed_step: Option<StepFailure>,
    pub flow_state: FlowState,
    pub transitions: Vec<Transition>,
    pub assertions: Vec<AssertionResult>,
    pub snapshots: Vec<DiagnosticsSnapshot>,
    pub teardown: TeardownReport,
    pub duration_ms: u64,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    pub fn final_snapshot(&self) -> Option<&DiagnosticsSnapshot> {
        self.snapshots.iter().find(|s| s.boundary == FailureBoundary::Final)
    }

    /// One line naming the step, flow state, error and diagnostics; `None` on pass
    pub fn failure_report(&self) -> Option<String> {
        let Outcome::Fail { kind, message } = &self.outcome else {
            return None;
        };
        let step = match &self.failed_step {
            Some(StepFailure { index: Some(i), description }) => format!("step {} ({})", i + 1, description),
            Some(StepFailure { index: None, description }) => description.clone(),
            None => "assertions".to_string(),
        };
        let paths: Vec<String> = self
            .snapshots
            .iter()
            .filter_map(|s| s.snapshot_path.as_ref())
            .map(|p| p.display().to_string())
            .collect();
        let diagnostics = if paths.is_empty() {
            "none".to_string()
        } else {
            paths.join(", ")
        };
        Some(format!(
            "{} failed at {} [flow: {}] {}: {} (diagnostics: {})",
            self.name, step, self.flow_state, kind, message, diagnostics
        ))
    }
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Configuration for the scenario runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub context: ContextOptions,
    pub executor: ExecutorConfig,
    pub auth: AuthConfig,
    pub vars: BTreeMap<String, String>,
    pub diagnostics_dir: PathBuf,
    pub results_dir: PathBuf,
    pub assertion_timeout: Duration,
    pub capture_timeout: Duration,
    pub parallelism: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&HarnessConfig::default())
    }
}

impl From<&HarnessConfig> for RunnerConfig {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            context: config.context_options(),
            executor: config.executor_config(),
            auth: config.auth.clone(),
            vars: config.template_vars(),
            diagnostics_dir: config.diagnostics_dir.clone(),
            results_dir: config.results_dir.clone(),
            assertion_timeout: Duration::from_millis(config.timeouts.assertion_ms),
            capture_timeout: Duration::from_millis(config.timeouts.capture_ms),
            parallelism: config.parallelism.max(1),
        }
    }
}

/// Mutable record of one run, filled in as the scenario progresses
#[derive(Default)]
struct RunRecord {
    error: Option<E2eError>,
    failed_step: Option<StepFailure>,
    /// Lives here rather than in `drive` so the state reached survives a panic
    auth: Option<AuthFlowController>,
    assertions: Vec<AssertionResult>,
}

impl RunRecord {
    fn fail(&mut self, step: StepFailure, err: E2eError) {
        if self.error.is_none() {
            self.failed_step = Some(step);
            self.error = Some(err);
        }
    }

    fn flow_state(&self) -> FlowState {
        self.auth.as_ref().map_or(FlowState::Init, AuthFlowController::state)
    }
}

pub struct ScenarioRunner {
    source: BrowserSource,
    config: RunnerConfig,
    executor: StepExecutor,
}

impl ScenarioRunner {
    pub fn new(source: BrowserSource, config: RunnerConfig) -> Self {
        let executor = StepExecutor::new(config.executor.clone());
        Self {
            source,
            config,
            executor,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one scenario in its own session. Never returns an error: every
    /// failure becomes a `Fail` outcome, and the session is closed exactly
    /// once on every path.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioResult {
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        info!("Running scenario '{}' (run {})", scenario.name, run_id);

        let mut options = self.config.context.clone();
        if let Some(viewport) = &scenario.viewport {
            options.viewport = viewport.clone();
        }

        let session = match Session::open(&self.source, options).await {
            Ok(session) => session,
            Err(e) => {
                error!("Scenario '{}' could not open a session: {}", scenario.name, e);
                return ScenarioResult {
                    name: scenario.name.clone(),
                    run_id,
                    outcome: Outcome::Fail {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                    failed_step: Some(StepFailure {
                        index: None,
                        description: "open session".into(),
                    }),
                    flow_state: FlowState::Init,
                    transitions: Vec::new(),
                    assertions: Vec::new(),
                    snapshots: Vec::new(),
                    teardown: TeardownReport::default(),
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        let mut recorder = DiagnosticsRecorder::new(
            &self.config.diagnostics_dir,
            &scenario.name,
            &run_id,
            self.config.capture_timeout,
        );
        let mut record = RunRecord::default();

        let drive = AssertUnwindSafe(self.drive(scenario, &session, &mut recorder, &mut record));
        if let Err(panic) = drive.catch_unwind().await {
            let reason = panic_message(panic.as_ref());
            error!("Scenario '{}' panicked: {}", scenario.name, reason);
            record.fail(
                StepFailure {
                    index: None,
                    description: "scenario execution".into(),
                },
                E2eError::ActionError {
                    action: "scenario".into(),
                    target: scenario.name.clone(),
                    reason: format!("panicked: {}", reason),
                },
            );
        }

        if record.error.is_some() {
            let trigger = record.failed_step.as_ref().map(|s| s.description.clone());
            recorder
                .capture(&session, FailureBoundary::Final, trigger.as_deref(), record.flow_state())
                .await;
        }

        let teardown = session.close().await;

        let outcome = match &record.error {
            None => Outcome::Pass,
            Some(e) => Outcome::Fail {
                kind: e.kind(),
                message: e.to_string(),
            },
        };

        let flow_state = record.flow_state();
        let result = ScenarioResult {
            name: scenario.name.clone(),
            run_id,
            outcome,
            failed_step: record.failed_step,
            flow_state,
            transitions: record.auth.map(AuthFlowController::into_transitions).unwrap_or_default(),
            assertions: record.assertions,
            snapshots: recorder.into_snapshots(),
            teardown,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        match result.failure_report() {
            None => info!("✓ {} ({} ms)", result.name, result.duration_ms),
            Some(report) => error!("✗ {}", report),
        }
        result
    }

    async fn drive(
        &self,
        scenario: &Scenario,
        session: &Session,
        recorder: &mut DiagnosticsRecorder,
        record: &mut RunRecord,
    ) {
        let scenario = match scenario.expand(&Placeholders::new(self.config.vars.clone())) {
            Ok(expanded) => expanded,
            Err(e) => {
                record.fail(
                    StepFailure {
                        index: None,
                        description: "expand placeholders".into(),
                    },
                    e,
                );
                return;
            }
        };

        if let Some(precondition) = &scenario.auth {
            let controller = record.auth.insert(AuthFlowController::new(self.config.auth.clone()));
            let outcome = controller.authenticate(&self.executor, session, precondition).await;

            if let Err(e) = outcome {
                let description = format!("authenticate ({})", precondition.email);
                recorder
                    .capture(session, FailureBoundary::Initial, Some(&description), record.flow_state())
                    .await;
                record.fail(StepFailure { index: None, description }, e);
            }
        }

        if record.error.is_none() {
            for (index, step) in scenario.steps.iter().enumerate() {
                debug!("{} step {}/{}: {}", scenario.name, index + 1, scenario.steps.len(), step.describe());
                if let Err(e) = self.executor.execute(step, session).await {
                    let description = step.describe();
                    recorder
                        .capture(session, FailureBoundary::Initial, Some(&description), record.flow_state())
                        .await;
                    record.fail(StepFailure { index: Some(index), description }, e);
                    break;
                }
            }
        }

        let budget = scenario
            .assertion_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.assertion_timeout);

        for assertion in &scenario.assertions {
            let checked = self.check(assertion, session, budget).await;
            let passed = checked.is_ok();
            record.assertions.push(AssertionResult {
                description: assertion.describe(),
                passed,
                message: checked.as_ref().err().map(|e| e.to_string()),
            });
            if let Err(e) = checked {
                record.fail(
                    StepFailure {
                        index: None,
                        description: assertion.describe(),
                    },
                    e,
                );
            }
        }
    }

    async fn check(&self, assertion: &Assertion, session: &Session, budget: Duration) -> E2eResult<()> {
        let budget_ms = budget.as_millis() as u64;
        let waited = match assertion {
            Assertion::TextVisible(text) => {
                let step = Step::wait_for(Condition::TextVisible, text.as_str()).with_timeout_ms(budget_ms);
                self.executor.execute(&step, session).await
            }
            Assertion::UrlMatches(pattern) => {
                let step = Step::wait_for(Condition::UrlMatches, pattern.as_str()).with_timeout_ms(budget_ms);
                self.executor.execute(&step, session).await
            }
            Assertion::UrlExcludes(pattern) => {
                let pattern = UrlPattern::parse(pattern)?;
                let url = session.page().url().await?;
                if pattern.matches(&url) {
                    Err(E2eError::AssertionFailed(String::new()))
                } else {
                    Ok(())
                }
            }
        };

        match waited {
            Ok(()) => Ok(()),
            Err(E2eError::ActionTimeout { .. })
            | Err(E2eError::ElementNotFound { .. })
            | Err(E2eError::AssertionFailed(_)) => {
                let url = session
                    .page()
                    .url()
                    .await
                    .unwrap_or_else(|e| format!("<unavailable: {}>", e));
                Err(E2eError::AssertionFailed(format!(
                    "{} (current url: {})",
                    assertion.describe(),
                    url
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Run scenarios with bounded parallelism, one session each
    pub async fn run_suite(&self, scenarios: &[Scenario]) -> SuiteResult {
        let start = Instant::now();
        info!(
            "Running {} scenario(s) with parallelism {}",
            scenarios.len(),
            self.config.parallelism
        );

        let mut indexed: Vec<(usize, ScenarioResult)> = futures::stream::iter(scenarios.iter().enumerate())
            .map(|(i, scenario)| async move { (i, self.run(scenario).await) })
            .buffer_unordered(self.config.parallelism.max(1))
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);
        let results: Vec<ScenarioResult> = indexed.into_iter().map(|(_, r)| r).collect();

        let passed = results.iter().filter(|r| r.passed()).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!("Scenario results: {} passed, {} failed ({} ms)", passed, failed, duration_ms);

        SuiteResult {
            total: results.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    /// Write suite results to `<results_dir>/results.json`
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.results_dir)?;

        let path = self.config.results_dir.join("results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(name: &str) -> ScenarioResult {
        ScenarioResult {
            name: name.into(),
            run_id: "abc".into(),
            outcome: Outcome::Fail {
                kind: ErrorKind::ElementNotFound,
                message: "Element not found: none of [#save] matched".into(),
            },
            failed_step: Some(StepFailure {
                index: Some(2),
                description: "click:#save".into(),
            }),
            flow_state: FlowState::Authenticated,
            transitions: Vec::new(),
            assertions: Vec::new(),
            snapshots: Vec::new(),
            teardown: TeardownReport::default(),
            duration_ms: 10,
        }
    }

    #[test]
    fn test_failure_report_names_step_and_state() {
        let report = failed("bucket-crud").failure_report().unwrap();
        assert!(report.contains("step 3 (click:#save)"), "{report}");
        assert!(report.contains("[flow: Authenticated]"), "{report}");
        assert!(report.contains("element_not_found"), "{report}");
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_value(failed("x").outcome).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["kind"], "element_not_found");
        assert_eq!(serde_json::to_value(Outcome::Pass).unwrap()["status"], "pass");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
