//! Authentication flow state machine
//!
//! Drives the identity UI from a signed-out page to an established session:
//!
//! ```text
//! Init -> EmailSubmitted -> PasswordSubmitted -> Authenticated
//!              |                   |
//!              +-------------------+-> CodeRequired -> CodeSubmitted -> Authenticated
//!                                        ^    |            |
//!                                        |    v            | rejected
//!                          AlternateMethodRequested <------+
//! ```
//!
//! Every non-terminal state may move to `Failed`. `Authenticated` is only
//! entered once the application's session check evaluates truthy; a UI that
//! merely looks signed in is not enough.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::driver::{is_truthy, Page};
use crate::error::{E2eError, E2eResult};
use crate::executor::StepExecutor;
use crate::selector::SelectorSet;
use crate::session::Session;
use crate::step::{Condition, Step};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    #[default]
    Init,
    EmailSubmitted,
    PasswordSubmitted,
    CodeRequired,
    CodeSubmitted,
    AlternateMethodRequested,
    Authenticated,
    Failed,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Authenticated | FlowState::Failed)
    }

    pub fn can_transition_to(&self, next: FlowState) -> bool {
        use FlowState::*;

        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (*self, next),
            (Init, EmailSubmitted)
                | (EmailSubmitted, PasswordSubmitted)
                | (EmailSubmitted, CodeRequired)
                | (PasswordSubmitted, CodeRequired)
                | (PasswordSubmitted, Authenticated)
                | (CodeRequired, CodeSubmitted)
                | (CodeRequired, AlternateMethodRequested)
                | (CodeSubmitted, Authenticated)
                | (CodeSubmitted, CodeRequired)
                | (AlternateMethodRequested, CodeRequired)
        )
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowState::Init => "Init",
            FlowState::EmailSubmitted => "EmailSubmitted",
            FlowState::PasswordSubmitted => "PasswordSubmitted",
            FlowState::CodeRequired => "CodeRequired",
            FlowState::CodeSubmitted => "CodeSubmitted",
            FlowState::AlternateMethodRequested => "AlternateMethodRequested",
            FlowState::Authenticated => "Authenticated",
            FlowState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: FlowState,
    pub to: FlowState,
    pub reason: String,
    /// Time since the flow started
    pub elapsed_ms: u64,
}

/// Selector sets for the identity UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSelectors {
    pub email: SelectorSet,
    pub password: SelectorSet,
    pub code: SelectorSet,
    pub submit: SelectorSet,
    pub alternate_method: SelectorSet,
    pub resend_code: SelectorSet,
    /// Error text shown when a submitted code is refused
    pub code_rejected: SelectorSet,
}

impl Default for AuthSelectors {
    fn default() -> Self {
        Self {
            email: SelectorSet::literal(&[
                "#identifier-field",
                "input[name=\"identifier\"]",
                "#emailAddress-field",
                "input[name=\"emailAddress\"]",
                "input[type=\"email\"]",
            ]),
            password: SelectorSet::literal(&[
                "#password-field",
                "input[name=\"password\"]",
                "input[type=\"password\"]",
            ]),
            code: SelectorSet::literal(&[
                "input[data-input-otp=\"true\"]",
                "input[autocomplete=\"one-time-code\"]",
                "input[name*=\"code\"]",
                "input[type=\"tel\"]",
            ]),
            submit: SelectorSet::literal(&[
                "button.cl-formButtonPrimary",
                "button:has-text(\"Continue\")",
                "button:has-text(\"Continuar\")",
                "button[type=\"submit\"]",
            ]),
            alternate_method: SelectorSet::literal(&[
                "button:has-text(\"Utilize outro método\")",
                "a:has-text(\"Utilize outro método\")",
                "button:has-text(\"Use another method\")",
                "a:has-text(\"Use another method\")",
            ]),
            resend_code: SelectorSet::literal(&[
                ".cl-formResendCodeLink",
                "button:has-text(\"Enviar código\")",
                "button:has-text(\"Reenviar\")",
                "button:has-text(\"Resend\")",
            ]),
            code_rejected: SelectorSet::literal(&[
                ".cl-formFieldErrorText",
                "text=Incorrect code",
                "text=Código incorreto",
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub selectors: AuthSelectors,

    /// Code accepted by the application in test mode
    pub sentinel_code: String,

    /// Maximum AlternateMethodRequested -> CodeRequired loops
    pub max_alternate_loops: u32,

    /// How long to wait for the next prompt after a submission
    pub prompt_wait_ms: u64,

    /// How long to poll the session check before giving up
    pub session_confirm_ms: u64,

    /// Wall-clock budget for the whole flow
    pub flow_budget_ms: u64,

    /// JavaScript predicate that is truthy once a session exists
    pub session_check: String,

    /// Route the flow starts from
    pub entry: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            selectors: AuthSelectors::default(),
            sentinel_code: "424242".to_string(),
            max_alternate_loops: 3,
            prompt_wait_ms: 15_000,
            session_confirm_ms: 20_000,
            flow_budget_ms: 90_000,
            session_check: "() => !!(window.Clerk && window.Clerk.session && window.Clerk.session.id)"
                .to_string(),
            entry: "/sign-in".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> E2eResult<()> {
        if self.sentinel_code.trim().is_empty() {
            return Err(E2eError::Config("auth.sentinel_code must not be empty".into()));
        }
        if self.session_check.trim().is_empty() {
            return Err(E2eError::Config("auth.session_check must not be empty".into()));
        }
        if self.flow_budget_ms == 0 {
            return Err(E2eError::Config("auth.flow_budget_ms must be positive".into()));
        }
        if self.entry.trim().is_empty() {
            return Err(E2eError::Config("auth.entry must not be empty".into()));
        }
        Ok(())
    }
}

/// Authentication a scenario needs before its steps run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPrecondition {
    /// Overrides [`AuthConfig::entry`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Codes submitted in order before falling back to the sentinel
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<String>,
}

impl AuthPrecondition {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            entry: None,
            email: email.into(),
            password: Some(password.into()),
            codes: Vec::new(),
        }
    }

    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Copy with every string passed through `f`
    pub fn expand<F>(&self, mut f: F) -> E2eResult<Self>
    where
        F: FnMut(&str) -> E2eResult<String>,
    {
        Ok(Self {
            entry: self.entry.as_deref().map(&mut f).transpose()?,
            email: f(&self.email)?,
            password: self.password.as_deref().map(&mut f).transpose()?,
            codes: self.codes.iter().map(|c| f(c)).collect::<E2eResult<_>>()?,
        })
    }
}

/// What a prompt wait observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Session,
    Group(usize),
    Nothing,
}

/// Owns the [`FlowState`] of one session
pub struct AuthFlowController {
    config: AuthConfig,
    state: FlowState,
    transitions: Vec<Transition>,
    alternate_loops: u32,
    codes: VecDeque<String>,
    code_rejected: bool,
    started: Instant,
}

impl AuthFlowController {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            state: FlowState::Init,
            transitions: Vec::new(),
            alternate_loops: 0,
            codes: VecDeque::new(),
            code_rejected: false,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<Transition> {
        self.transitions
    }

    /// Completed AlternateMethodRequested -> CodeRequired loops
    pub fn alternate_loops(&self) -> u32 {
        self.alternate_loops
    }

    /// Drive the flow to `Authenticated`. On error the state is `Failed`.
    pub async fn authenticate(
        &mut self,
        executor: &StepExecutor,
        session: &Session,
        precondition: &AuthPrecondition,
    ) -> E2eResult<()> {
        self.started = Instant::now();
        self.codes = precondition.codes.iter().cloned().collect();
        let budget = Duration::from_millis(self.config.flow_budget_ms);

        info!("Authenticating {} (budget {} ms)", precondition.email, budget.as_millis());

        match timeout(budget, self.drive(executor, session, precondition)).await {
            Ok(Ok(())) => {
                info!(
                    "Authenticated {} after {} transition(s)",
                    precondition.email,
                    self.transitions.len()
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.fail(&e.kind().to_string());
                Err(e)
            }
            Err(_) => {
                let stuck_in = self.state;
                self.fail("budget_exceeded");
                Err(E2eError::ActionTimeout {
                    action: "authenticate".into(),
                    target: format!("flow stuck in {}", stuck_in),
                    timeout_ms: budget.as_millis() as u64,
                })
            }
        }
    }

    async fn drive(&mut self, executor: &StepExecutor, session: &Session, pre: &AuthPrecondition) -> E2eResult<()> {
        let selectors = self.config.selectors.clone();
        let prompt_wait = Duration::from_millis(self.config.prompt_wait_ms);
        let page = session.page();

        // Init: entry form
        let entry = pre.entry.clone().unwrap_or_else(|| self.config.entry.clone());
        executor.execute(&Step::navigate(entry), session).await?;
        executor
            .execute(&Step::fill(selectors.email.clone(), pre.email.as_str()), session)
            .await?;

        // Sign-up forms present the password next to the email
        let mut password_inline = false;
        if let Some(password) = &pre.password {
            if executor.locator().probe_once(page, &[&selectors.password]).await?.is_some() {
                executor
                    .execute(&Step::fill(selectors.password.clone(), password.as_str()), session)
                    .await?;
                password_inline = true;
            }
        }
        executor.execute(&Step::click(selectors.submit.clone()), session).await?;
        self.transition(FlowState::EmailSubmitted, "email")?;

        // EmailSubmitted: password step or straight to verification
        if password_inline {
            self.transition(FlowState::PasswordSubmitted, "same_form")?;
        } else {
            let next = executor
                .locator()
                .resolve_any(page, &[&selectors.password, &selectors.code], prompt_wait)
                .await?;
            if next.group == 0 {
                let password = pre.password.as_deref().ok_or_else(|| E2eError::ActionError {
                    action: "authenticate".into(),
                    target: selectors.password.to_string(),
                    reason: "password requested but the precondition has none".into(),
                })?;
                executor
                    .execute(&Step::fill(selectors.password.clone(), password), session)
                    .await?;
                executor.execute(&Step::click(selectors.submit.clone()), session).await?;
                self.transition(FlowState::PasswordSubmitted, "password")?;
            } else {
                self.transition(FlowState::CodeRequired, "verification_prompt")?;
            }
        }

        // PasswordSubmitted: a code prompt or a session
        if self.state == FlowState::PasswordSubmitted {
            match self
                .observe(executor, page, &[&selectors.code, &selectors.alternate_method], prompt_wait)
                .await?
            {
                Observed::Group(_) => self.transition(FlowState::CodeRequired, "code_prompt")?,
                Observed::Session | Observed::Nothing => {
                    self.confirm_session(executor, session).await?;
                    return self.transition(FlowState::Authenticated, "no_code_prompt");
                }
            }
        }

        loop {
            match self.state {
                FlowState::CodeRequired => {
                    let presented = executor
                        .locator()
                        .resolve_any(page, &[&selectors.code, &selectors.alternate_method], prompt_wait)
                        .await?;

                    if presented.group == 0 && !self.code_rejected {
                        let code = self.next_code();
                        debug!("Submitting verification code ({} queued)", self.codes.len());
                        executor
                            .execute(&Step::fill(selectors.code.clone(), code), session)
                            .await?;
                        self.submit_if_present(executor, session).await?;
                        self.transition(FlowState::CodeSubmitted, "code")?;
                    } else {
                        if self.alternate_loops >= self.config.max_alternate_loops {
                            return Err(E2eError::FlowExhausted {
                                loops: self.alternate_loops,
                                limit: self.config.max_alternate_loops,
                            });
                        }
                        let reason = if self.code_rejected { "code_rejected" } else { "channel_unavailable" };
                        self.transition(FlowState::AlternateMethodRequested, reason)?;
                    }
                }
                FlowState::CodeSubmitted => {
                    match self
                        .observe(executor, page, &[&selectors.code_rejected], prompt_wait)
                        .await?
                    {
                        Observed::Group(_) => {
                            warn!("Verification code rejected");
                            self.code_rejected = true;
                            self.transition(FlowState::CodeRequired, "rejected")?;
                        }
                        Observed::Session | Observed::Nothing => {
                            self.confirm_session(executor, session).await?;
                            return self.transition(FlowState::Authenticated, "code_accepted");
                        }
                    }
                }
                FlowState::AlternateMethodRequested => {
                    self.alternate_loops += 1;
                    let alternate = self.click_if_present(executor, session, &selectors.alternate_method).await?;
                    let resend = self.click_if_present(executor, session, &selectors.resend_code).await?;
                    self.code_rejected = false;
                    let reason = match (alternate, resend) {
                        (true, true) => "alternate_method+resend",
                        (true, false) => "alternate_method",
                        (false, true) => "resend",
                        (false, false) => "retry",
                    };
                    self.transition(FlowState::CodeRequired, reason)?;
                }
                other => {
                    return Err(E2eError::InvalidTransition {
                        from: other.to_string(),
                        to: FlowState::Authenticated.to_string(),
                    })
                }
            }
        }
    }

    fn transition(&mut self, to: FlowState, reason: &str) -> E2eResult<()> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(E2eError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        info!("Auth flow {} -> {} ({}, {} ms)", from, to, reason, elapsed_ms);
        self.transitions.push(Transition {
            from,
            to,
            reason: reason.to_string(),
            elapsed_ms,
        });
        self.state = to;
        Ok(())
    }

    fn fail(&mut self, reason: &str) {
        if !self.state.is_terminal() {
            let _ = self.transition(FlowState::Failed, reason);
        }
    }

    fn next_code(&mut self) -> String {
        self.codes
            .pop_front()
            .unwrap_or_else(|| self.config.sentinel_code.clone())
    }

    /// Poll the session check and the `watch` groups until one shows up
    async fn observe(
        &self,
        executor: &StepExecutor,
        page: &dyn Page,
        watch: &[&SelectorSet],
        budget: Duration,
    ) -> E2eResult<Observed> {
        let deadline = Instant::now() + budget;
        let interval = executor.locator().poll_interval();
        loop {
            if self.session_established(page).await {
                return Ok(Observed::Session);
            }
            if let Some(found) = executor.locator().probe_once(page, watch).await? {
                if page.element_state(&found.element).await.map(|s| s.visible).unwrap_or(false) {
                    return Ok(Observed::Group(found.group));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Observed::Nothing);
            }
            sleep(interval.min(deadline - now)).await;
        }
    }

    async fn session_established(&self, page: &dyn Page) -> bool {
        match page.evaluate(&self.config.session_check).await {
            Ok(value) => is_truthy(&value),
            Err(e) => {
                debug!("Session check unavailable: {}", e);
                false
            }
        }
    }

    async fn confirm_session(&self, executor: &StepExecutor, session: &Session) -> E2eResult<()> {
        let step = Step::wait_for(Condition::Expression, self.config.session_check.as_str())
            .with_timeout_ms(self.config.session_confirm_ms)
            .with_label("session established");
        executor.execute(&step, session).await
    }

    /// OTP inputs often auto-submit once complete, leaving no button behind
    async fn submit_if_present(&self, executor: &StepExecutor, session: &Session) -> E2eResult<()> {
        self.click_if_present(executor, session, &self.config.selectors.submit)
            .await
            .map(|_| ())
    }

    async fn click_if_present(&self, executor: &StepExecutor, session: &Session, target: &SelectorSet) -> E2eResult<bool> {
        if executor.locator().probe_once(session.page(), &[target]).await?.is_none() {
            return Ok(false);
        }
        match executor.execute(&Step::click(target.clone()), session).await {
            Ok(()) => Ok(true),
            Err(E2eError::ElementNotFound { .. }) | Err(E2eError::ActionError { .. }) => {
                debug!("'{}' went away before it could be clicked", target);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use FlowState::*;

        assert!(Init.can_transition_to(EmailSubmitted));
        assert!(PasswordSubmitted.can_transition_to(Authenticated));
        assert!(CodeSubmitted.can_transition_to(CodeRequired));
        assert!(AlternateMethodRequested.can_transition_to(CodeRequired));

        assert!(!Init.can_transition_to(Authenticated));
        assert!(!CodeRequired.can_transition_to(Authenticated));
        assert!(!AlternateMethodRequested.can_transition_to(CodeSubmitted));
        assert!(!Authenticated.can_transition_to(CodeRequired));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        use FlowState::*;

        for state in [Init, EmailSubmitted, PasswordSubmitted, CodeRequired, CodeSubmitted, AlternateMethodRequested] {
            assert!(state.can_transition_to(Failed), "{state}");
        }
        assert!(!Authenticated.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_codes_then_sentinel() {
        let mut controller = AuthFlowController::new(AuthConfig::default());
        controller.codes = ["111111".to_string()].into_iter().collect();
        assert_eq!(controller.next_code(), "111111");
        assert_eq!(controller.next_code(), "424242");
        assert_eq!(controller.next_code(), "424242");
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut controller = AuthFlowController::new(AuthConfig::default());
        let err = controller.transition(FlowState::CodeSubmitted, "skip").unwrap_err();
        assert!(matches!(err, E2eError::InvalidTransition { .. }));
        assert_eq!(controller.state(), FlowState::Init);
        assert!(controller.transitions().is_empty());
    }

    #[test]
    fn test_precondition_yaml() {
        let yaml = "email: ${email}\npassword: ${password}\ncodes: ['000000']\n";
        let pre: AuthPrecondition = serde_yaml::from_str(yaml).unwrap();
        let expanded = pre
            .expand(|s| Ok(s.replace("${email}", "user@example.com").replace("${password}", "pw")))
            .unwrap();
        assert_eq!(expanded.email, "user@example.com");
        assert_eq!(expanded.password.as_deref(), Some("pw"));
        assert_eq!(expanded.codes, vec!["000000".to_string()]);
        assert!(expanded.entry.is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(AuthConfig::default().validate().is_ok());
        let config = AuthConfig {
            sentinel_code: " ".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
