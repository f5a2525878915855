#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Integration tests for fail-point injection across the exchange.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p enverify-exchange --features failpoints --test failpoint_tests
//! ```

use enverify_exchange::{
    assert_exchange_error,
    error::{INTERNAL_MESSAGE, SIGNING_FAILURE_MESSAGE},
    testutil::TestHarness,
};
use enverify_storage::{
    VerificationStore,
    testutil::{ACTIVE_API_KEY, VALID_CODE},
};
use http::StatusCode;

async fn code_is_used(harness: &TestHarness) -> bool {
    harness.store.find_code_by_value(VALID_CODE).await.expect("lookup").expect("present").is_used()
}

#[tokio::test]
async fn fetch_failure_is_unauthorized_and_not_cached() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("cache-before-fetch", "return").expect("failed to configure fail point");

    let harness = TestHarness::new().await;
    let request = harness.request(ACTIVE_API_KEY, VALID_CODE);

    let (status, _) = harness.service.handle(&request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!code_is_used(&harness).await);

    fail::remove("cache-before-fetch");
    let (status, _) = harness.service.handle(&request).await;
    assert_eq!(status, StatusCode::OK, "the injected failure must not be cached");

    scenario.teardown();
}

#[tokio::test]
async fn storage_failure_during_consume_is_internal() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("consume-before-commit", "return").expect("failed to configure fail point");

    let harness = TestHarness::new().await;
    let result = harness.service.execute(&harness.request(ACTIVE_API_KEY, VALID_CODE)).await;

    assert_exchange_error!(result, Internal);
    assert_eq!(result.unwrap_err().public_message(), INTERNAL_MESSAGE);
    assert!(!code_is_used(&harness).await, "a failed transaction leaves the code usable");

    fail::remove("consume-before-commit");
    let result = harness.service.execute(&harness.request(ACTIVE_API_KEY, VALID_CODE)).await;
    assert!(result.is_ok(), "code is still exchangeable: {result:?}");

    scenario.teardown();
}

#[tokio::test]
async fn commit_failure_is_internal() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-before-commit", "return").expect("failed to configure fail point");

    let harness = TestHarness::new().await;
    let (status, body) =
        harness.service.handle(&harness.request(ACTIVE_API_KEY, VALID_CODE)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.error.as_deref(), Some(INTERNAL_MESSAGE));
    assert!(!code_is_used(&harness).await);

    scenario.teardown();
}

#[tokio::test]
async fn failure_after_consume_spends_code() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("exchange-before-sign", "return").expect("failed to configure fail point");

    let harness = TestHarness::new().await;
    let (status, body) =
        harness.service.handle(&harness.request(ACTIVE_API_KEY, VALID_CODE)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.error.as_deref(), Some(SIGNING_FAILURE_MESSAGE));
    assert!(code_is_used(&harness).await, "signing happens after the code is spent");

    scenario.teardown();
}
