//! Simulated application for integration tests
//!
//! `IdentityApp` renders a sign-in flow inside an embedded `clerk` frame and
//! a small dashboard behind it, behaving like the real identity UI: the
//! email step, the password step, an optional verification code step with
//! rejection, "use another method" and resend controls.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use uiflow_e2e::auth::AuthConfig;
use uiflow_e2e::driver::DriverResult;
use uiflow_e2e::mock::{MockApp, MockBrowser, MockDocument, MockElement, MockLauncher};
use uiflow_e2e::runner::RunnerConfig;
use uiflow_e2e::ExecutorConfig;

pub const BASE: &str = "http://app.test";
pub const EMAIL: &str = "user@example.com";
pub const PASSWORD: &str = "Secr3t!23";
pub const SENTINEL: &str = "424242";

pub const EMAIL_SEL: &str = "#identifier-field";
pub const PASSWORD_SEL: &str = "#password-field";
pub const CODE_SEL: &str = "input[data-input-otp=\"true\"]";
pub const SUBMIT_SEL: &str = "button.cl-formButtonPrimary";
pub const ALTERNATE_SEL: &str = "a:has-text(\"Utilize outro método\")";
pub const RESEND_SEL: &str = "button:has-text(\"Enviar código\")";
pub const REJECTED_SEL: &str = ".cl-formFieldErrorText";

const FRAME: &str = "clerk";

/// How the verification step behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeMode {
    /// No code step: password signs in directly
    NoCode,
    /// Code step; the sentinel is accepted
    Sentinel,
    /// Code step; after the first alternate-method request the code
    /// channel is unavailable until the next request. Every render of the
    /// code step offers both the alternate-method and resend controls.
    FlakyChannel,
    /// Code step whose channel never becomes available
    NeverAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Email,
    Password,
    Code,
    Done,
}

/// What the app saw, shared with the test
#[derive(Debug, Default)]
pub struct AppLog {
    pub submitted_codes: Vec<String>,
    pub alternate_clicks: usize,
    pub resends: usize,
}

pub struct IdentityApp {
    mode: CodeMode,
    stage: Stage,
    email: String,
    password: String,
    code: String,
    authenticated: bool,
    session_check: String,
    log: Arc<Mutex<AppLog>>,
    panic_on_click: Option<String>,
    hidden_password: bool,
}

impl IdentityApp {
    pub fn new(mode: CodeMode, log: Arc<Mutex<AppLog>>) -> Self {
        Self {
            mode,
            stage: Stage::Email,
            email: String::new(),
            password: String::new(),
            code: String::new(),
            authenticated: false,
            session_check: AuthConfig::default().session_check,
            log,
            panic_on_click: None,
            hidden_password: false,
        }
    }

    /// Render the hidden autofill password input the identity UI keeps on
    /// its email and password steps
    pub fn with_hidden_password(mut self) -> Self {
        self.hidden_password = true;
        self
    }

    fn add_hidden_password(&self, doc: &mut MockDocument) {
        if self.hidden_password {
            doc.add_to_frame(
                FRAME,
                MockElement::input("hidden-password", &["input[type=\"password\"]", "input[name=\"hiddenPassword\"]"]).hidden(),
            );
        }
    }

    /// Panic when the element `key` is clicked
    pub fn panicking_on(mut self, key: &str) -> Self {
        self.panic_on_click = Some(key.to_string());
        self
    }

    fn render_email(&self, doc: &mut MockDocument) {
        doc.clear();
        doc.add(MockElement::text("title", "Acme Storage"));
        doc.add_to_frame(FRAME, MockElement::input("email", &[EMAIL_SEL, "input[name=\"identifier\"]"]));
        self.add_hidden_password(doc);
        doc.add_to_frame(FRAME, submit());
    }

    fn render_password(&self, doc: &mut MockDocument) {
        doc.clear();
        self.add_hidden_password(doc);
        doc.add_to_frame(FRAME, MockElement::input("password", &[PASSWORD_SEL, "input[type=\"password\"]"]));
        doc.add_to_frame(FRAME, submit());
    }

    fn render_code(&self, doc: &mut MockDocument, code_field: bool, resend: bool) {
        doc.clear();
        if code_field {
            doc.add_to_frame(FRAME, MockElement::input("code", &[CODE_SEL, "input[autocomplete=\"one-time-code\"]"]));
            doc.add_to_frame(FRAME, submit());
        }
        if code_field || resend {
            doc.add_to_frame(FRAME, MockElement::button("resend", &[RESEND_SEL], "Enviar código"));
        }
        doc.add_to_frame(FRAME, MockElement::button("alternate", &[ALTERNATE_SEL], "Utilize outro método"));
    }

    fn render_dashboard(&self, doc: &mut MockDocument) {
        doc.clear();
        doc.add(MockElement::text("heading", "Buckets"));
        doc.add(MockElement::input("bucket-name", &["#bucket-name", "input[name=\"name\"]"]));
        doc.add(MockElement::button("create", &["button:has-text(\"Create\")"], "Create"));
    }

    fn sign_in(&mut self, doc: &mut MockDocument) {
        self.authenticated = true;
        self.stage = Stage::Done;
        doc.set_global(&self.session_check, json!("sess_2b1c"));
        doc.url = format!("{}/dashboard", BASE);
        self.render_dashboard(doc);
    }
}

fn submit() -> MockElement {
    MockElement::button("continue", &[SUBMIT_SEL, "button[type=\"submit\"]"], "Continue")
}

fn path_of(url: &str) -> &str {
    url.strip_prefix(BASE).unwrap_or(url)
}

impl MockApp for IdentityApp {
    fn navigate(&mut self, url: &str, doc: &mut MockDocument) -> DriverResult<()> {
        let path = path_of(url).to_string();
        doc.url = url.to_string();

        if path.starts_with("/sign-in") {
            self.stage = Stage::Email;
            self.render_email(doc);
        } else if self.authenticated {
            self.render_dashboard(doc);
        } else {
            doc.url = format!("{}/sign-in?redirect_url={}", BASE, path.replace('/', "%2F"));
            self.stage = Stage::Email;
            self.render_email(doc);
        }
        Ok(())
    }

    fn fill(&mut self, element: &str, value: &str, _doc: &mut MockDocument) {
        match element {
            "email" => self.email = value.to_string(),
            "password" => self.password = value.to_string(),
            "code" => self.code = value.to_string(),
            _ => {}
        }
    }

    fn click(&mut self, element: &str, doc: &mut MockDocument) {
        if self.panic_on_click.as_deref() == Some(element) {
            panic!("simulated crash clicking {}", element);
        }

        match (element, self.stage) {
            ("continue", Stage::Email) if self.email.contains('@') => {
                self.stage = Stage::Password;
                self.render_password(doc);
            }
            ("continue", Stage::Password) if self.password == PASSWORD => {
                if self.mode == CodeMode::NoCode {
                    self.sign_in(doc);
                } else {
                    self.stage = Stage::Code;
                    self.render_code(doc, self.mode != CodeMode::NeverAvailable, false);
                }
            }
            ("continue", Stage::Code) => {
                self.log.lock().submitted_codes.push(self.code.clone());
                if self.code == SENTINEL {
                    self.sign_in(doc);
                } else {
                    doc.add_to_frame(FRAME, MockElement::button("error", &[REJECTED_SEL], "Incorrect code"));
                }
            }
            ("alternate", Stage::Code) => {
                let clicks = {
                    let mut log = self.log.lock();
                    log.alternate_clicks += 1;
                    log.alternate_clicks
                };
                let available = match self.mode {
                    CodeMode::FlakyChannel => clicks % 2 == 0,
                    CodeMode::NeverAvailable => false,
                    _ => true,
                };
                self.render_code(doc, available, self.mode == CodeMode::FlakyChannel);
            }
            ("resend", Stage::Code) => {
                self.log.lock().resends += 1;
            }
            _ => {}
        }
    }
}

pub fn identity_browser(mode: CodeMode) -> (Arc<MockBrowser>, Arc<Mutex<AppLog>>) {
    let log = Arc::new(Mutex::new(AppLog::default()));
    let app_log = Arc::clone(&log);
    let browser = MockBrowser::new(move || Box::new(IdentityApp::new(mode, Arc::clone(&app_log))) as Box<dyn MockApp>);
    (Arc::new(browser), log)
}

/// Like `identity_browser`, with the app adjusted by `configure`
pub fn identity_browser_with(
    mode: CodeMode,
    configure: fn(IdentityApp) -> IdentityApp,
) -> (Arc<MockBrowser>, Arc<Mutex<AppLog>>) {
    let log = Arc::new(Mutex::new(AppLog::default()));
    let app_log = Arc::clone(&log);
    let browser =
        MockBrowser::new(move || Box::new(configure(IdentityApp::new(mode, Arc::clone(&app_log)))) as Box<dyn MockApp>);
    (Arc::new(browser), log)
}

pub fn identity_launcher(mode: CodeMode) -> MockLauncher {
    let log = Arc::new(Mutex::new(AppLog::default()));
    MockLauncher::new(move || Box::new(IdentityApp::new(mode, Arc::clone(&log))) as Box<dyn MockApp>)
}

/// Route harness logs to the test writer; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn executor_config() -> ExecutorConfig {
    init_tracing();
    ExecutorConfig {
        base_url: BASE.to_string(),
        stabilization_delay: Duration::from_millis(100),
        poll_interval: Duration::from_millis(50),
        network_idle_grace: Duration::from_millis(500),
    }
}

pub fn runner_config(diagnostics: &std::path::Path) -> RunnerConfig {
    let mut config = RunnerConfig::default();
    config.executor = executor_config();
    config.context.action_timeout_ms = 2_000;
    config.context.navigation_timeout_ms = 3_000;
    config.assertion_timeout = Duration::from_millis(1_000);
    config.capture_timeout = Duration::from_millis(500);
    config.diagnostics_dir = diagnostics.join("diagnostics");
    config.results_dir = diagnostics.join("results");
    config.vars.insert("email".into(), EMAIL.into());
    config.vars.insert("password".into(), PASSWORD.into());
    config.vars.insert("base_url".into(), BASE.into());
    config
}
