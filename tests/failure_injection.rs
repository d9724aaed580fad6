//! Failure injection tests against real sockets.

use std::io::Read;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docstore_client::config::{ClientConfig, DestinationConfig};
use docstore_client::http::{ApiKeyAuthentication, Credentials, RequestContext, RequestDescriptor};
use docstore_client::replication::OperationKind;
use docstore_client::{ClientError, DocumentStoreClient};

mod common;
use common::{MockReply, MockRequest};

#[tokio::test]
async fn test_failover_from_dead_primary() {
    let primary = common::closed_port().await;
    let replica = common::start_programmable_backend(|request: MockRequest| async move {
        assert!(request.header("Raven-Client-Primary-Server-Url").is_some());
        MockReply::new(200, r#"{"Name":"from replica"}"#)
    })
    .await;

    let mut config = ClientConfig::default();
    config.replication.destinations.push(DestinationConfig {
        url: format!("http://{}", replica),
        database: None,
        allow_writes: false,
    });
    let primary_url = format!("http://{}", primary);
    let executor = Arc::new(common::executor(&config));
    let client = DocumentStoreClient::with_executor(&primary_url, config, executor);

    let body = client
        .get_json(&RequestContext::default(), "/docs?id=users/1")
        .await
        .expect("replica should answer");
    assert_eq!(body["Name"], "from replica");
    assert_eq!(client.router().failure_count(&primary_url), 1);

    // The failing primary is skipped until its re-probe interval passes.
    let target = client.router().resolve_url(OperationKind::Read, &primary_url);
    assert_eq!(target.url, format!("http://{}", replica));
}

#[tokio::test]
async fn test_unauthorized_is_retried_with_api_key() {
    let seen = Arc::new(AtomicU32::new(0));
    let counter = seen.clone();
    let addr = common::start_programmable_backend(move |request: MockRequest| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            match request.header("Authorization") {
                Some("Bearer secret") => MockReply::new(200, r#"{"ok":true}"#),
                _ => MockReply::new(401, ""),
            }
        }
    })
    .await;

    let config = ClientConfig::default();
    let executor = common::executor(&config).with_authentication(Arc::new(ApiKeyAuthentication));
    let descriptor = RequestDescriptor::get(format!("http://{}/docs?id=a", addr)).with_credentials(Credentials {
        api_key: Some("secret".into()),
    });

    let body = executor
        .execute_json(&RequestContext::default(), &descriptor)
        .await
        .unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let addr = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        MockReply::new(200, "{}")
    })
    .await;

    let config = ClientConfig::default();
    let executor = common::executor(&config);
    let descriptor =
        RequestDescriptor::get(format!("http://{}/docs", addr)).with_timeout(Duration::from_millis(200));

    let err = executor
        .execute(&RequestContext::default(), &descriptor)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {}", err);
    assert!(err.is_server_down());
}

#[tokio::test]
async fn test_request_body_is_gzipped_on_the_wire() {
    let addr = common::start_programmable_backend(|request: MockRequest| async move {
        assert_eq!(request.method, "PUT");
        assert_eq!(request.header("Content-Encoding"), Some("gzip"));
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(request.body.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        MockReply::new(201, decoded)
    })
    .await;

    let config = ClientConfig::default();
    let executor = common::executor(&config);
    let descriptor = RequestDescriptor::new(
        docstore_client::http::HttpMethod::Put,
        format!("http://{}/docs/users/1", addr),
    )
    .with_json(&serde_json::json!({ "Name": "Ayende" }));

    let echoed = executor
        .execute_json(&RequestContext::default(), &descriptor)
        .await
        .unwrap();
    assert_eq!(echoed["Name"], "Ayende");
}

#[tokio::test]
async fn test_conditional_get_over_http() {
    let addr = common::start_programmable_backend(|request: MockRequest| async move {
        match request.header("If-None-Match") {
            Some("\"e1\"") => MockReply::new(304, ""),
            _ => MockReply::new(200, r#"{"v":1}"#).with_header("ETag", "\"e1\""),
        }
    })
    .await;

    let config = ClientConfig::default();
    let executor = common::executor(&config);
    let descriptor = RequestDescriptor::get(format!("http://{}/docs?id=a", addr));
    let ctx = RequestContext::default();

    let first = executor.execute(&ctx, &descriptor).await.unwrap();
    let second = executor.execute(&ctx, &descriptor).await.unwrap();
    assert_eq!(first.status, 200);
    assert_eq!(second.status, 304);
    assert!(second.is_from_cache());
    assert_eq!(second.body, first.body);
    assert_eq!(executor.cached_request_count(), 1);
}

#[tokio::test]
async fn test_server_error_body_is_parsed() {
    let addr = common::start_programmable_backend(|_| async {
        MockReply::new(500, r#"{"Error":"index is corrupted","Url":"/indexes/x"}"#)
    })
    .await;

    let config = ClientConfig::default();
    let executor = common::executor(&config);
    let err = executor
        .execute(
            &RequestContext::default(),
            &RequestDescriptor::get(format!("http://{}/indexes/x", addr)),
        )
        .await
        .unwrap_err();

    match err {
        ClientError::Server { status, message, fields } => {
            assert_eq!(status, 500);
            assert_eq!(message, "index is corrupted");
            assert_eq!(fields.get("Url").map(String::as_str), Some("/indexes/x"));
        }
        other => panic!("unexpected {:?}", other),
    }
}
