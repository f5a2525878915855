//! End-to-end exchange scenarios against a seeded in-memory store.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use enverify_exchange::{
    Clock, ExchangeConfig, ExchangeError, assert_exchange_error,
    error::{KEY_UNAVAILABLE_MESSAGE, SIGNING_FAILURE_MESSAGE, UNAUTHORIZED_MESSAGE},
    testutil::{
        RejectingSigningClient, TEST_ISSUER, TEST_SIGNING_KEY, TestHarness,
        UnavailableSigningClient,
    },
};
use enverify_storage::{
    VerificationStore,
    testutil::{ACTIVE_API_KEY, DELETED_API_KEY, VALID_CODE},
};
use http::StatusCode;
use tokio_util::sync::CancellationToken;

async fn code_is_used(harness: &TestHarness, code: &str) -> bool {
    harness.store.find_code_by_value(code).await.expect("lookup").expect("code exists").is_used()
}

#[tokio::test]
async fn valid_code_yields_verifiable_token() {
    let harness = TestHarness::new().await;

    let request = harness.request(ACTIVE_API_KEY, VALID_CODE);
    let (status, body) = harness.service.handle(&request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.test_type.as_deref(), Some("confirmed"));
    assert_eq!(body.test_date.as_deref(), Some("2020-07-01"));
    assert!(body.error.is_none());

    let token = body.verification_token.expect("token present");
    let claims = harness.service.codec().verify(&token, &harness.decoding_key()).unwrap();
    assert_eq!(claims.iss, TEST_ISSUER);
    assert_eq!(claims.aud, TEST_ISSUER);
    assert_eq!(claims.sub, "confirmed.2020-07-01");
    assert_eq!(claims.iat, harness.clock.now().timestamp());
    assert_eq!(claims.exp, (harness.clock.now() + TimeDelta::hours(24)).timestamp());

    let header = jsonwebtoken::decode_header(&token).unwrap();
    assert_eq!(header.kid.as_deref(), Some(TEST_SIGNING_KEY));

    let persisted = harness.store.find_token_by_id(&claims.jti).await.unwrap();
    assert!(persisted.is_some(), "token record is persisted under its jti");
    assert!(code_is_used(&harness, VALID_CODE).await);
}

#[tokio::test]
async fn reused_code_is_rejected() {
    let harness = TestHarness::new().await;
    let request = harness.request(ACTIVE_API_KEY, VALID_CODE);

    let (first, _) = harness.service.handle(&request).await;
    let (second, body) = harness.service.handle(&request).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::BAD_REQUEST);
    assert!(body.error.unwrap().contains("used"));
    assert!(body.verification_token.is_none());
}

#[tokio::test]
async fn deleted_and_unknown_keys_are_indistinguishable() {
    let harness = TestHarness::new().await;

    let (deleted_status, deleted) =
        harness.service.handle(&harness.request(DELETED_API_KEY, VALID_CODE)).await;
    let (unknown_status, unknown) =
        harness.service.handle(&harness.request("K-nope", VALID_CODE)).await;

    assert_eq!(deleted_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(deleted.error.as_deref(), Some(UNAUTHORIZED_MESSAGE));
    assert_eq!(deleted, unknown);
    assert!(!code_is_used(&harness, VALID_CODE).await);
}

#[tokio::test]
async fn unavailable_signer_does_not_consume_code() {
    let harness = TestHarness::with_remote_signer(Arc::new(UnavailableSigningClient)).await;

    let request = harness.request(ACTIVE_API_KEY, VALID_CODE);
    let (status, body) = harness.service.handle(&request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.error.as_deref(), Some(KEY_UNAVAILABLE_MESSAGE));
    assert!(!code_is_used(&harness, VALID_CODE).await);
    assert_eq!(harness.store.app_lookups(), 0, "signer is resolved before authorization");
}

#[tokio::test]
async fn signing_failure_spends_code() {
    let harness = TestHarness::with_remote_signer(Arc::new(RejectingSigningClient)).await;

    let result = harness.service.execute(&harness.request(ACTIVE_API_KEY, VALID_CODE)).await;
    assert_exchange_error!(result, SigningFailure);
    assert_eq!(result.unwrap_err().public_message(), SIGNING_FAILURE_MESSAGE);

    assert!(code_is_used(&harness, VALID_CODE).await);
    let retry = harness.service.execute(&harness.request(ACTIVE_API_KEY, VALID_CODE)).await;
    assert_exchange_error!(retry, CodeAlreadyUsed);
}

#[tokio::test]
async fn expired_code_is_rejected_without_mutation() {
    let harness = TestHarness::new().await;
    harness.clock.advance(TimeDelta::hours(2));

    let request = harness.request(ACTIVE_API_KEY, VALID_CODE);
    let (status, body) = harness.service.handle(&request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.error.as_deref(), Some("verification code expired"));
    assert!(!code_is_used(&harness, VALID_CODE).await);
}

#[tokio::test]
async fn unknown_code_is_internal_error() {
    let harness = TestHarness::new().await;

    let result = harness.service.execute(&harness.request(ACTIVE_API_KEY, "999999")).await;

    assert_exchange_error!(result, Internal);
    assert_eq!(result.unwrap_err().public_message(), "internal server error");
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let harness = TestHarness::new().await;

    let bodies: [&[u8]; 7] = [
        b"not json",
        b"[]",
        br#"["K1","123456"]"#,
        br#""K1""#,
        b"null",
        br#"{"apiKey": 7, "code": "123456"}"#,
        br#"{"apiKey": "K1"}"#,
    ];
    for body in bodies {
        let (status, response) = harness.service.handle_json(body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", String::from_utf8_lossy(body));
        assert!(response.error.unwrap().starts_with("invalid request: "));
    }
    assert!(!code_is_used(&harness, VALID_CODE).await, "no malformed body spends the code");

    let (status, response) =
        harness.service.handle_json(br#"{"apiKey": "K1", "code": "123456"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.verification_token.is_some());
}

#[tokio::test]
async fn custom_audience_and_duration() {
    let config = ExchangeConfig::builder()
        .token_issuer(TEST_ISSUER)
        .token_audience("downstream.example")
        .token_signing_key(TEST_SIGNING_KEY)
        .verification_token_duration(Duration::from_secs(3600))
        .build()
        .unwrap();
    let harness = TestHarness::with_config(config).await;

    let success = harness.service.execute(&harness.request(ACTIVE_API_KEY, VALID_CODE)).await;
    let claims = harness
        .service
        .codec()
        .verify(&success.unwrap().verification_token, &harness.decoding_key())
        .unwrap();

    assert_eq!(claims.aud, "downstream.example");
    assert_eq!(claims.exp - claims.iat, 3600);
}

#[tokio::test(start_paused = true)]
async fn slow_authorization_times_out() {
    let config = ExchangeConfig::builder()
        .token_issuer(TEST_ISSUER)
        .token_signing_key(TEST_SIGNING_KEY)
        .api_key_fetch_timeout(Duration::from_secs(60))
        .request_timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let harness = TestHarness::with_config(config).await;
    harness.store.set_lookup_delay(Some(Duration::from_secs(10)));

    let request = harness.request(ACTIVE_API_KEY, VALID_CODE);
    let (status, body) = harness.service.handle(&request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.error.as_deref(), Some("internal server error"));
    assert!(!code_is_used(&harness, VALID_CODE).await);
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_is_unauthorized() {
    let config = ExchangeConfig::builder()
        .token_issuer(TEST_ISSUER)
        .token_signing_key(TEST_SIGNING_KEY)
        .api_key_fetch_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let harness = TestHarness::with_config(config).await;
    harness.store.set_lookup_delay(Some(Duration::from_secs(10)));

    let result = harness.service.execute(&harness.request(ACTIVE_API_KEY, VALID_CODE)).await;

    assert_exchange_error!(result, Unauthorized);
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_in_flight_exchange() {
    let harness = TestHarness::new().await;
    harness.store.set_lookup_delay(Some(Duration::from_secs(10)));
    let cancel = CancellationToken::new();

    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let result = harness
        .service
        .execute_with_cancellation(&harness.request(ACTIVE_API_KEY, VALID_CODE), &cancel)
        .await;
    trigger.await.unwrap();

    assert!(matches!(result, Err(ExchangeError::Cancelled)));
    assert!(!code_is_used(&harness, VALID_CODE).await);
}

#[tokio::test(start_paused = true)]
async fn background_refresh_revokes_deleted_app() {
    let config = ExchangeConfig::builder()
        .token_issuer(TEST_ISSUER)
        .token_signing_key(TEST_SIGNING_KEY)
        .api_key_cache_ttl(Duration::from_secs(3600))
        .api_key_refresh_interval(Duration::from_secs(30))
        .build()
        .unwrap();
    let harness = TestHarness::with_config(config).await;

    let request = harness.request(ACTIVE_API_KEY, VALID_CODE);
    let (status, _) = harness.service.handle(&request).await;
    assert_eq!(status, StatusCode::OK);

    harness
        .store
        .save_authorized_app(&enverify_storage::testutil::deleted_app(ACTIVE_API_KEY))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;

    let code = enverify_storage::testutil::valid_code("654321");
    harness.store.save_code(&code).await.unwrap();
    let (status, _) = harness.service.handle(&harness.request(ACTIVE_API_KEY, "654321")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    harness.service.shutdown().await;
}
