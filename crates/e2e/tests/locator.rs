//! Frame-aware element resolution against in-memory pages

use std::sync::Arc;
use std::time::Duration;

use uiflow_e2e::driver::{Browser, ContextOptions, Page};
use uiflow_e2e::mock::{MockBrowser, MockDocument, MockElement, MockFrame};
use uiflow_e2e::{E2eError, FrameAwareLocator, SelectorSet};

async fn open(browser: &MockBrowser) -> Arc<dyn Page> {
    let ctx = browser.new_context(&ContextOptions::default()).await.unwrap();
    ctx.new_page().await.unwrap()
}

fn locator() -> FrameAwareLocator {
    FrameAwareLocator::new(Duration::from_millis(50))
}

/// A match in the main document wins without touching any frame
#[tokio::test(start_paused = true)]
async fn test_main_document_precedence() {
    let doc = MockDocument::at("http://app.test/sign-in")
        .with(MockElement::input("main-email", &["#email"]))
        .with_frame(MockFrame::new("auth", "http://idp.test/").with(MockElement::input("frame-email", &["#email"])));
    let browser = MockBrowser::with_document(doc);
    let page = open(&browser).await;

    let set = SelectorSet::literal(&["#email", "input[type=\"email\"]"]);
    let found = locator().resolve(page.as_ref(), &set, Duration::from_secs(2)).await.unwrap();

    assert_eq!(found.element.id, "main-email");
    assert!(found.in_main_document());
    assert_eq!(browser.stats().frame_probes, 0);
}

/// A hidden main-document match does not shadow a visible one in a frame
#[tokio::test(start_paused = true)]
async fn test_hidden_main_match_falls_through_to_frame() {
    let doc = MockDocument::at("http://app.test/sign-in")
        .with(MockElement::input("autofill", &["input[type=\"password\"]"]).hidden())
        .with_frame(MockFrame::new("clerk", "http://idp.test/").with(MockElement::input("password", &["input[type=\"password\"]"])));
    let browser = MockBrowser::with_document(doc);
    let page = open(&browser).await;

    let set = SelectorSet::single("input[type=\"password\"]");
    let found = locator().resolve(page.as_ref(), &set, Duration::from_secs(1)).await.unwrap();

    assert_eq!(found.element.id, "password");
    assert_eq!(found.element.frame.0, "clerk");
}

/// Only hidden matches is the same as no match
#[tokio::test(start_paused = true)]
async fn test_hidden_only_match_is_not_found() {
    let doc = MockDocument::at("http://app.test/").with(MockElement::input("secret", &["#secret"]).hidden());
    let browser = MockBrowser::with_document(doc);
    let page = open(&browser).await;

    let err = locator()
        .resolve(page.as_ref(), &SelectorSet::single("#secret"), Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, E2eError::ElementNotFound { .. }), "{err}");
}

/// Candidate order is preference across the whole scope: an earlier
/// candidate inside a frame beats a later one in the main document
#[tokio::test(start_paused = true)]
async fn test_candidate_order_before_frame_order() {
    let doc = MockDocument::at("http://app.test/")
        .with(MockElement::input("fallback", &["input[type=\"email\"]"]))
        .with_frame(MockFrame::new("auth", "http://idp.test/").with(MockElement::input("preferred", &["#identifier-field"])));
    let browser = MockBrowser::with_document(doc);
    let page = open(&browser).await;

    let set = SelectorSet::literal(&["#identifier-field", "input[type=\"email\"]"]);
    let found = locator().resolve(page.as_ref(), &set, Duration::from_secs(1)).await.unwrap();

    assert_eq!(found.element.id, "preferred");
    assert_eq!(found.candidate, 0);
}

/// A frame-only match is found, and stays the same element on repeat
#[tokio::test(start_paused = true)]
async fn test_frame_only_match_is_stable() {
    let doc = MockDocument::at("http://app.test/sign-in")
        .with(MockElement::text("title", "Sign in"))
        .with_frame(MockFrame::new("ads", "http://ads.test/"))
        .with_frame(MockFrame::new("clerk", "http://idp.test/").with(MockElement::input("code", &["input[name=\"code\"]"])));
    let browser = MockBrowser::with_document(doc);
    let page = open(&browser).await;
    let locator = locator();
    let set = SelectorSet::literal(&["#otp", "input[name=\"code\"]"]);

    let first = locator.resolve(page.as_ref(), &set, Duration::from_secs(2)).await.unwrap();
    let second = locator.resolve(page.as_ref(), &set, Duration::from_secs(2)).await.unwrap();

    assert_eq!(first.element.frame.0, "clerk");
    assert!(!first.in_main_document());
    assert_eq!(first.element, second.element);
    assert!(browser.stats().frame_probes > 0);
}

/// Detached frames and navigation races are retried within the budget
#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried() {
    let doc = MockDocument::at("http://app.test/").with(MockElement::button("save", &["#save"], "Save"));
    let browser = MockBrowser::with_document(doc);
    let page = open(&browser).await;
    {
        let mut faults = browser.faults();
        faults.transient_frames = 2;
        faults.transient_queries = 3;
    }

    let found = locator()
        .resolve(page.as_ref(), &SelectorSet::single("#save"), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(found.element.id, "save");
}

/// Elements rendered late are picked up by polling
#[tokio::test(start_paused = true)]
async fn test_waits_for_delayed_render() {
    let doc = MockDocument::at("http://app.test/")
        .with(MockElement::text("toast", "Bucket created").appears_after(Duration::from_millis(700)));
    let browser = MockBrowser::with_document(doc);
    let page = open(&browser).await;

    let started = tokio::time::Instant::now();
    let found = locator()
        .resolve(page.as_ref(), &SelectorSet::text("Bucket created"), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(found.element.id, "toast");
    assert!(started.elapsed() >= Duration::from_millis(700));
}

/// Exhausting the budget names every candidate tried
#[tokio::test(start_paused = true)]
async fn test_not_found_names_candidates() {
    let doc = MockDocument::at("http://app.test/").with_frame(MockFrame::new("clerk", "http://idp.test/"));
    let browser = MockBrowser::with_document(doc);
    let page = open(&browser).await;

    let set = SelectorSet::literal(&["#missing", "button:has-text(\"Missing\")"]);
    let err = locator()
        .resolve(page.as_ref(), &set, Duration::from_millis(300))
        .await
        .unwrap_err();

    match err {
        E2eError::ElementNotFound {
            candidates,
            frames,
            budget_ms,
        } => {
            assert_eq!(candidates, vec!["#missing", "button:has-text(\"Missing\")"]);
            assert_eq!(frames, 2);
            assert_eq!(budget_ms, 300);
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Racing two groups reports which one showed up
#[tokio::test(start_paused = true)]
async fn test_resolve_any_reports_group() {
    let doc = MockDocument::at("http://app.test/")
        .with_frame(MockFrame::new("clerk", "http://idp.test/").with(MockElement::button("alt", &["a.alt"], "Use another method")));
    let browser = MockBrowser::with_document(doc);
    let page = open(&browser).await;

    let code = SelectorSet::single("input.code");
    let alternate = SelectorSet::single("a.alt");
    let found = locator()
        .resolve_any(page.as_ref(), &[&code, &alternate], Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(found.group, 1);
}
