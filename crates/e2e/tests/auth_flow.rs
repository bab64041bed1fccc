//! Adaptive sign-in flow against the simulated identity UI

mod common;

use std::sync::Arc;

use common::{CodeMode, EMAIL, PASSWORD, SENTINEL};
use uiflow_e2e::driver::{Browser, ContextOptions, Page};
use uiflow_e2e::mock::{MockBrowser, MockDocument, MockElement};
use uiflow_e2e::{
    AuthConfig, AuthFlowController, AuthPrecondition, BrowserSource, E2eError, FlowState, Session, StepExecutor,
};

async fn session_on(browser: &Arc<MockBrowser>) -> Session {
    let shared: Arc<dyn Browser> = browser.clone();
    let options = ContextOptions {
        action_timeout_ms: 3_000,
        navigation_timeout_ms: 5_000,
        ..Default::default()
    };
    Session::open(&BrowserSource::Shared(shared), options).await.unwrap()
}

fn auth_config() -> AuthConfig {
    AuthConfig {
        prompt_wait_ms: 3_000,
        session_confirm_ms: 3_000,
        flow_budget_ms: 60_000,
        ..Default::default()
    }
}

fn path(transitions: &[uiflow_e2e::Transition]) -> Vec<(FlowState, FlowState)> {
    transitions.iter().map(|t| (t.from, t.to)).collect()
}

/// Password-only sign-in goes straight from PasswordSubmitted to Authenticated
#[tokio::test(start_paused = true)]
async fn test_sign_in_without_code_prompt() {
    let (browser, log) = common::identity_browser(CodeMode::NoCode);
    let session = session_on(&browser).await;
    let executor = StepExecutor::new(common::executor_config());
    let mut flow = AuthFlowController::new(auth_config());

    flow.authenticate(&executor, &session, &AuthPrecondition::new(EMAIL, PASSWORD))
        .await
        .unwrap();

    use FlowState::*;
    assert_eq!(flow.state(), Authenticated);
    assert_eq!(
        path(flow.transitions()),
        vec![
            (Init, EmailSubmitted),
            (EmailSubmitted, PasswordSubmitted),
            (PasswordSubmitted, Authenticated),
        ]
    );
    assert!(log.lock().submitted_codes.is_empty());
    assert!(session.page().url().await.unwrap().ends_with("/dashboard"));
    session.close().await;
}

/// The hidden autofill password input on the email step is not mistaken
/// for a sign-up form; the password goes in on its own step
#[tokio::test(start_paused = true)]
async fn test_hidden_autofill_password_is_ignored() {
    let (browser, log) = common::identity_browser_with(CodeMode::NoCode, |app| app.with_hidden_password());
    let session = session_on(&browser).await;
    let executor = StepExecutor::new(common::executor_config());
    let mut flow = AuthFlowController::new(auth_config());

    flow.authenticate(&executor, &session, &AuthPrecondition::new(EMAIL, PASSWORD))
        .await
        .unwrap();

    use FlowState::*;
    assert_eq!(
        path(flow.transitions()),
        vec![
            (Init, EmailSubmitted),
            (EmailSubmitted, PasswordSubmitted),
            (PasswordSubmitted, Authenticated),
        ]
    );
    assert_eq!(flow.transitions()[1].reason, "password");
    assert!(log.lock().submitted_codes.is_empty());
    session.close().await;
}

/// The sentinel code is submitted when no codes are queued
#[tokio::test(start_paused = true)]
async fn test_sign_in_with_sentinel_code() {
    let (browser, log) = common::identity_browser(CodeMode::Sentinel);
    let session = session_on(&browser).await;
    let executor = StepExecutor::new(common::executor_config());
    let mut flow = AuthFlowController::new(auth_config());

    flow.authenticate(&executor, &session, &AuthPrecondition::new(EMAIL, PASSWORD))
        .await
        .unwrap();

    use FlowState::*;
    let transitions = path(flow.transitions());
    assert_eq!(
        transitions[transitions.len() - 3..],
        [
            (PasswordSubmitted, CodeRequired),
            (CodeRequired, CodeSubmitted),
            (CodeSubmitted, Authenticated),
        ]
    );
    assert_eq!(log.lock().submitted_codes, vec![SENTINEL]);
    assert_eq!(flow.alternate_loops(), 0);
    session.close().await;
}

/// A rejected code, then an unavailable channel, then the sentinel: two
/// alternate-method loops, each pressing both alternate method and resend
#[tokio::test(start_paused = true)]
async fn test_rejected_code_recovers_after_two_alternate_loops() {
    let (browser, log) = common::identity_browser(CodeMode::FlakyChannel);
    let session = session_on(&browser).await;
    let executor = StepExecutor::new(common::executor_config());
    let mut flow = AuthFlowController::new(auth_config());
    let precondition = AuthPrecondition::new(EMAIL, PASSWORD).with_codes(["000000"]);

    flow.authenticate(&executor, &session, &precondition).await.unwrap();

    use FlowState::*;
    assert_eq!(flow.state(), Authenticated);
    assert_eq!(flow.alternate_loops(), 2);

    let transitions = path(flow.transitions());
    let loops = transitions
        .iter()
        .filter(|t| **t == (AlternateMethodRequested, CodeRequired))
        .count();
    assert_eq!(loops, 2);
    assert_eq!(
        transitions[3..],
        [
            (CodeRequired, CodeSubmitted),
            (CodeSubmitted, CodeRequired),
            (CodeRequired, AlternateMethodRequested),
            (AlternateMethodRequested, CodeRequired),
            (CodeRequired, AlternateMethodRequested),
            (AlternateMethodRequested, CodeRequired),
            (CodeRequired, CodeSubmitted),
            (CodeSubmitted, Authenticated),
        ]
    );
    assert_eq!(flow.transitions()[4].reason, "rejected");
    assert_eq!(flow.transitions()[5].reason, "code_rejected");
    assert_eq!(flow.transitions()[6].reason, "alternate_method+resend");
    assert_eq!(flow.transitions()[7].reason, "channel_unavailable");
    assert_eq!(flow.transitions()[8].reason, "alternate_method+resend");

    let log = log.lock();
    assert_eq!(log.submitted_codes, vec!["000000", SENTINEL]);
    assert_eq!(log.alternate_clicks, 2);
    assert_eq!(log.resends, 2);
    session.close().await;
}

/// A channel that never comes back stops at the loop limit
#[tokio::test(start_paused = true)]
async fn test_alternate_loop_limit_yields_flow_exhausted() {
    let (browser, log) = common::identity_browser(CodeMode::NeverAvailable);
    let session = session_on(&browser).await;
    let executor = StepExecutor::new(common::executor_config());
    let mut flow = AuthFlowController::new(AuthConfig {
        max_alternate_loops: 2,
        ..auth_config()
    });

    let err = flow
        .authenticate(&executor, &session, &AuthPrecondition::new(EMAIL, PASSWORD))
        .await
        .unwrap_err();

    assert!(matches!(err, E2eError::FlowExhausted { loops: 2, limit: 2 }), "{err}");
    assert_eq!(flow.state(), FlowState::Failed);
    assert_eq!(flow.alternate_loops(), 2);
    assert_eq!(log.lock().alternate_clicks, 2);
    assert!(log.lock().submitted_codes.is_empty());
    session.close().await;
}

/// A flow that stops advancing fails on the overall budget
#[tokio::test(start_paused = true)]
async fn test_flow_budget_bounds_a_stuck_flow() {
    let doc = MockDocument::at("http://app.test/sign-in")
        .with(MockElement::input("email", &[common::EMAIL_SEL]))
        .with(MockElement::button("continue", &[common::SUBMIT_SEL], "Continue"));
    let browser = Arc::new(MockBrowser::with_document(doc));
    let session = session_on(&browser).await;
    let executor = StepExecutor::new(common::executor_config());
    let mut flow = AuthFlowController::new(AuthConfig {
        prompt_wait_ms: 30_000,
        flow_budget_ms: 5_000,
        ..auth_config()
    });

    let err = flow
        .authenticate(&executor, &session, &AuthPrecondition::new(EMAIL, PASSWORD))
        .await
        .unwrap_err();

    match err {
        E2eError::ActionTimeout {
            action,
            target,
            timeout_ms,
        } => {
            assert_eq!(action, "authenticate");
            assert!(target.contains("EmailSubmitted"), "{target}");
            assert_eq!(timeout_ms, 5_000);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(flow.state(), FlowState::Failed);
    let last = flow.transitions().last().unwrap();
    assert_eq!((last.from, last.to), (FlowState::EmailSubmitted, FlowState::Failed));
    session.close().await;
}

/// A password prompt the precondition cannot answer fails the flow
#[tokio::test(start_paused = true)]
async fn test_password_requested_without_password_fails() {
    let (browser, _log) = common::identity_browser(CodeMode::Sentinel);
    let session = session_on(&browser).await;
    let executor = StepExecutor::new(common::executor_config());
    let mut flow = AuthFlowController::new(auth_config());
    let precondition = AuthPrecondition {
        password: None,
        ..AuthPrecondition::new(EMAIL, "")
    };

    let err = flow.authenticate(&executor, &session, &precondition).await.unwrap_err();
    assert!(matches!(err, E2eError::ActionError { ref action, .. } if action == "authenticate"), "{err}");
    assert_eq!(flow.state(), FlowState::Failed);
    session.close().await;
}
