//! End-to-end behavior of the request layer against a scripted transport.

mod harness;

use futures::future::join_all;
use harness::{client, persistent_config, test_config, MockTransport};
use purchases_backend::{
    BackendErrorCode, DispatchDelay, PostReceiptData, PostReceiptOutcome, RequestError,
    RequestSignature, SubscriberAttribute,
};
use purchases_core::{HttpResponse, TransportError};
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn customer_body(user: &str) -> Value {
    json!({
        "request_date": "2024-01-01T00:00:00Z",
        "subscriber": {
            "original_app_user_id": user,
            "entitlements": {
                "pro": {"product_identifier": "monthly", "expires_date": "2100-01-01T00:00:00Z"}
            },
            "subscriptions": {}
        }
    })
}

fn offerings_body() -> Value {
    json!({
        "current_offering_id": "default",
        "offerings": [{
            "identifier": "default",
            "description": "Standard",
            "packages": [{"identifier": "$rc_monthly", "platform_product_identifier": "monthly"}]
        }]
    })
}

fn receipt(user: &str, transactions: &[&str]) -> PostReceiptData {
    PostReceiptData {
        app_user_id: user.to_string(),
        receipt: b"receipt-bytes".to_vec(),
        transaction_ids: transactions.iter().map(|t| t.to_string()).collect(),
        product_ids: vec!["monthly".to_string()],
        ..PostReceiptData::default()
    }
}

fn sent_body(transport: &MockTransport, index: usize) -> Value {
    let body = transport.requests()[index]
        .body
        .clone()
        .expect("request should carry a body");
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_exchange() {
    let transport = MockTransport::held();
    transport.respond_json(200, customer_body("user"));
    let client = client(&test_config(), &transport);

    let callers = (0..16).map(|_| client.get_customer_info("user", DispatchDelay::None));
    let release = async {
        transport.wait_for_calls(1).await;
        transport.release();
    };
    let (results, ()) = tokio::join!(join_all(callers), release);

    assert_eq!(transport.calls(), 1);
    let first = results[0].as_ref().unwrap();
    assert_eq!(first.subscriber.original_app_user_id, "user");
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
    assert_eq!(client.backend().in_flight_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn network_failure_reaches_every_caller() {
    let transport = MockTransport::held();
    transport.respond(Err(TransportError::Timeout("30s elapsed".to_string())));
    let client = client(&test_config(), &transport);

    let callers = (0..4).map(|_| client.get_offerings("user", DispatchDelay::None));
    let release = async {
        transport.wait_for_calls(1).await;
        transport.release();
    };
    let (results, ()) = tokio::join!(join_all(callers), release);

    assert_eq!(transport.calls(), 1);
    for result in results {
        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            err,
            RequestError::Network(TransportError::Timeout("30s elapsed".to_string()))
        );
    }
}

#[tokio::test]
async fn completed_operation_is_cleared_before_next_registration() {
    let transport = MockTransport::new();
    transport
        .respond_json(200, customer_body("user"))
        .respond_json(200, customer_body("user"));
    let client = client(&test_config(), &transport);
    let signature = RequestSignature::get("/subscribers/user");

    client
        .get_customer_info("user", DispatchDelay::None)
        .await
        .unwrap();
    assert!(!client.backend().is_in_flight(&signature));

    client
        .get_customer_info("user", DispatchDelay::None)
        .await
        .unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn not_modified_replays_stored_body() {
    let transport = MockTransport::new();
    transport
        .respond(Ok(
            HttpResponse::new(200, offerings_body().to_string()).with_validation_tag("abc")
        ))
        .respond(Ok(HttpResponse::not_modified()));
    let client = client(&test_config(), &transport);
    let signature = RequestSignature::get("/subscribers/user/offerings");

    let first = client
        .get_offerings("user", DispatchDelay::None)
        .await
        .unwrap();
    let entry = client.backend().cache().entry(&signature).unwrap();
    assert_eq!(entry.validation_tag, "abc");

    let second = client
        .get_offerings("user", DispatchDelay::Long)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second.current().unwrap().description, "Standard");
    let requests = transport.requests();
    assert_eq!(requests[0].validation_tag(), None);
    assert_eq!(requests[1].validation_tag(), Some("abc"));
}

#[tokio::test]
async fn not_modified_without_cached_body_is_malformed() {
    let transport = MockTransport::new();
    transport
        .respond(Ok(HttpResponse::not_modified()))
        .respond_json(200, customer_body("user"));
    let client = client(&test_config(), &transport);

    let err = client
        .get_customer_info("user", DispatchDelay::None)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::MalformedResponse { .. }));
    assert!(!err.is_retryable());

    client
        .get_customer_info("user", DispatchDelay::None)
        .await
        .unwrap();
    assert_eq!(transport.requests()[1].validation_tag(), None);
}

#[tokio::test]
async fn caching_disabled_sends_unconditional_requests() {
    let transport = MockTransport::new();
    transport
        .respond(Ok(
            HttpResponse::new(200, customer_body("user").to_string()).with_validation_tag("abc")
        ))
        .respond_json(200, customer_body("user"));
    let mut config = test_config();
    config.cache.enabled = false;
    let client = client(&config, &transport);

    for _ in 0..2 {
        client
            .get_customer_info("user", DispatchDelay::None)
            .await
            .unwrap();
    }

    assert_eq!(transport.requests()[1].validation_tag(), None);
}

#[tokio::test]
async fn malformed_success_body_is_never_a_backend_error() {
    let transport = MockTransport::new();
    transport
        .respond(Ok(HttpResponse::new(200, "<html>gateway</html>")))
        .respond_json(200, json!({"subscriber": 5}));
    let client = client(&test_config(), &transport);

    for _ in 0..2 {
        let err = client
            .get_customer_info("user", DispatchDelay::None)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::MalformedResponse { .. }));
        assert!(err.backend_error().is_none());
    }
}

#[tokio::test]
async fn unknown_code_is_unknown_backend_error() {
    let transport = MockTransport::new();
    transport.respond_json(500, json!({"code": 9999, "message": "boom"}));
    let client = client(&test_config(), &transport);

    let err = client
        .get_products_entitlements(DispatchDelay::None)
        .await
        .unwrap_err();

    let RequestError::UnknownBackend(error) = &err else {
        panic!("expected unknown backend error, got {err:?}");
    };
    assert_eq!(error.code, BackendErrorCode::Unknown(9999));
    assert_eq!(error.message.as_deref(), Some("boom"));
    assert!(!error.successfully_synced);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_receipt_posts_share_one_exchange() {
    let transport = MockTransport::held();
    transport.respond_json(200, customer_body("user"));
    let client = client(&test_config(), &transport);

    let release = async {
        transport.wait_for_calls(1).await;
        transport.release();
    };
    let (first, second, ()) = tokio::join!(
        client.post_receipt(receipt("user", &["t1"])),
        client.post_receipt(receipt("user", &["t1"])),
        release
    );

    assert_eq!(transport.calls(), 1);
    let first = first.unwrap();
    assert!(matches!(first, PostReceiptOutcome::Posted(_)));
    assert_eq!(first, second.unwrap());
    assert!(client.ledger().is_synced("t1"));
}

#[tokio::test]
async fn receipt_post_sends_only_unsynced_transactions() {
    let transport = MockTransport::new();
    transport.respond_json(200, customer_body("user"));
    let client = client(&test_config(), &transport);
    client.ledger().mark_synced("t1").unwrap();

    client
        .post_receipt(receipt("user", &["t1", "t2"]))
        .await
        .unwrap();

    let body = sent_body(&transport, 0);
    assert_eq!(body["transaction_ids"], json!(["t2"]));
    assert_eq!(body["fetch_token"], "cmVjZWlwdC1ieXRlcw==");
    assert_eq!(transport.requests()[0].path, "/receipts");
    assert_eq!(transport.requests()[0].validation_tag(), None);
    assert_eq!(client.ledger().synced_ids(), vec!["t1", "t2"]);
}

#[tokio::test]
async fn receipt_post_is_skipped_when_everything_is_synced() {
    let transport = MockTransport::new();
    transport.respond_json(200, customer_body("user"));
    let client = client(&test_config(), &transport);
    client
        .ledger()
        .mark_all_synced(["t1", "t2"])
        .unwrap();

    let outcome = client
        .post_receipt(receipt("user", &["t1", "t2"]))
        .await
        .unwrap();
    assert_eq!(outcome, PostReceiptOutcome::AlreadySynced);
    assert_eq!(transport.calls(), 0);

    let restore = PostReceiptData {
        is_restore: true,
        ..receipt("user", &["t1", "t2"])
    };
    let outcome = client.post_receipt(restore).await.unwrap();
    assert!(matches!(outcome, PostReceiptOutcome::Posted(_)));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn finishable_rejection_marks_transactions_synced() {
    let transport = MockTransport::new();
    transport.respond_json(400, json!({"code": 7103, "message": "invalid receipt token"}));
    let client = client(&test_config(), &transport);

    let err = client
        .post_receipt(receipt("user", &["t1"]))
        .await
        .unwrap_err();

    let RequestError::Backend(error) = &err else {
        panic!("expected backend error, got {err:?}");
    };
    assert_eq!(error.code, BackendErrorCode::InvalidReceiptToken);
    assert!(err.finishable());
    assert!(err.successfully_synced());
    assert!(client.ledger().is_synced("t1"));
}

#[tokio::test]
async fn server_and_network_failures_leave_transactions_unsynced() {
    let transport = MockTransport::new();
    transport
        .respond_json(500, json!({"code": 7110}))
        .respond(Err(TransportError::Connect("refused".to_string())))
        .respond_json(200, customer_body("user"));
    let client = client(&test_config(), &transport);

    let server = client
        .post_receipt(receipt("user", &["t1"]))
        .await
        .unwrap_err();
    assert!(!server.finishable());
    assert!(!client.ledger().is_synced("t1"));

    let network = client
        .post_receipt(receipt("user", &["t1"]))
        .await
        .unwrap_err();
    assert!(network.is_retryable());
    assert!(!client.ledger().is_synced("t1"));

    client
        .post_receipt(receipt("user", &["t1"]))
        .await
        .unwrap();
    assert_eq!(transport.calls(), 3);
    assert!(client.ledger().is_synced("t1"));
}

#[tokio::test]
async fn unavailable_with_attribute_errors() {
    let transport = MockTransport::new();
    transport.respond_json(
        503,
        json!({"attribute_errors": [{"key_name": "email", "message": "invalid"}]}),
    );
    let client = client(&test_config(), &transport);
    let attributes = BTreeMap::from([(
        "email".to_string(),
        SubscriberAttribute {
            value: Some("not-an-email".to_string()),
            updated_at_ms: 1_700_000_000_000,
        },
    )]);

    let err = client
        .post_subscriber_attributes("user", &attributes)
        .await
        .unwrap_err();

    let error = err.backend_error().unwrap();
    assert_eq!(
        error.attribute_errors,
        BTreeMap::from([("email".to_string(), "invalid".to_string())])
    );
    assert!(!error.successfully_synced);
    assert!(!err.finishable());
    assert!(!err.is_retryable());
    assert_eq!(transport.requests()[0].path, "/subscribers/user/attributes");
}

#[tokio::test]
async fn partial_attribute_rejection_on_success() {
    let transport = MockTransport::new();
    transport.respond_json(
        200,
        json!({
            "attributes_error_response": {
                "code": 7263,
                "message": "Some subscriber attributes keys were unable to be saved.",
                "attribute_errors": [{"key_name": "$email", "message": "invalid"}]
            }
        }),
    );
    let client = client(&test_config(), &transport);
    let attributes = BTreeMap::from([(
        "$email".to_string(),
        SubscriberAttribute {
            value: None,
            updated_at_ms: 1,
        },
    )]);

    let err = client
        .post_subscriber_attributes("user", &attributes)
        .await
        .unwrap_err();

    let RequestError::Backend(error) = &err else {
        panic!("expected backend error, got {err:?}");
    };
    assert_eq!(error.code, BackendErrorCode::InvalidSubscriberAttributes);
    assert!(error.successfully_synced);
    assert_eq!(error.attribute_errors["$email"], "invalid");
}

#[tokio::test]
async fn empty_attribute_post_sends_nothing() {
    let transport = MockTransport::new();
    let client = client(&test_config(), &transport);

    client
        .post_subscriber_attributes("user", &BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn ledger_filters_synced_transactions_in_order() {
    let transport = MockTransport::new();
    let client = client(&test_config(), &transport);
    let ledger = client.ledger();

    assert!(ledger.mark_synced("t1").unwrap());
    assert!(!ledger.mark_synced("t1").unwrap());
    assert!(ledger.is_synced("t1"));
    assert_eq!(ledger.filter_unsynced(&["t1", "t2", "t3"]), vec!["t2", "t3"]);
    assert_eq!(ledger.filter_unsynced(&["t3", "t1", "t2"]), vec!["t3", "t2"]);
}

#[tokio::test]
async fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = persistent_config(dir.path());

    let transport = MockTransport::new();
    transport
        .respond(Ok(
            HttpResponse::new(200, customer_body("user").to_string()).with_validation_tag("v1")
        ))
        .respond_json(200, customer_body("user"));
    let before = {
        let client = client(&config, &transport);
        let info = client
            .get_customer_info("user", DispatchDelay::None)
            .await
            .unwrap();
        client
            .post_receipt(receipt("user", &["t1"]))
            .await
            .unwrap();
        info
    };

    let transport = MockTransport::new();
    transport.respond(Ok(HttpResponse::not_modified()));
    let client = client(&config, &transport);

    assert!(client.ledger().is_synced("t1"));
    let after = client
        .get_customer_info("user", DispatchDelay::None)
        .await
        .unwrap();
    assert_eq!(before, after);
    assert_eq!(transport.requests()[0].validation_tag(), Some("v1"));

    let outcome = client
        .post_receipt(receipt("user", &["t1"]))
        .await
        .unwrap();
    assert_eq!(outcome, PostReceiptOutcome::AlreadySynced);
}

#[tokio::test]
async fn clearing_caches_drops_validation_tags() {
    let transport = MockTransport::new();
    transport
        .respond(Ok(
            HttpResponse::new(200, customer_body("user").to_string()).with_validation_tag("abc")
        ))
        .respond_json(200, customer_body("user"));
    let client = client(&test_config(), &transport);

    client
        .get_customer_info("user", DispatchDelay::None)
        .await
        .unwrap();
    client.clear_caches();
    client
        .get_customer_info("user", DispatchDelay::None)
        .await
        .unwrap();

    assert_eq!(transport.requests()[1].validation_tag(), None);
}
