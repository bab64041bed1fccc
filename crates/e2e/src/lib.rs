//! uiflow E2E substrate
//!
//! Drives a live web application through a browser and runs declarative
//! scenarios against it:
//! - Resolves elements across the main document and nested frames
//! - Executes typed steps with timeouts and a stabilization delay
//! - Walks the adaptive sign-in flow as an explicit state machine
//! - Captures diagnostics at failure boundaries
//! - Guarantees session teardown on every exit path
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ScenarioRunner                                             │
//! │    ├── Session::open(BrowserSource) -> Session              │
//! │    ├── AuthFlowController::authenticate(precondition)       │
//! │    ├── StepExecutor::execute(step)  (per step, in order)    │
//! │    │     └── FrameAwareLocator::resolve(selector set)       │
//! │    ├── assertions (always evaluated)                        │
//! │    ├── DiagnosticsRecorder::capture(boundary) on failure    │
//! │    └── Session::close()  (exactly once)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  driver traits: Browser / BrowserContext / Page             │
//! │    ├── playwright: Node.js bridge process                   │
//! │    └── mock: in-memory documents                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod executor;
pub mod locator;
pub mod mock;
pub mod playwright;
pub mod runner;
pub mod scenario;
pub mod selector;
pub mod session;
pub mod step;
pub mod target;

pub use auth::{AuthConfig, AuthFlowController, AuthPrecondition, FlowState, Transition};
pub use config::HarnessConfig;
pub use diagnostics::{DiagnosticsRecorder, DiagnosticsSnapshot, FailureBoundary};
pub use error::{E2eError, E2eResult, ErrorKind};
pub use executor::{ExecutorConfig, StepExecutor};
pub use locator::FrameAwareLocator;
pub use runner::{Outcome, RunnerConfig, ScenarioResult, ScenarioRunner, SuiteResult};
pub use scenario::{Assertion, Scenario};
pub use selector::SelectorSet;
pub use session::{BrowserSource, Session};
pub use step::{Action, Condition, Step};
