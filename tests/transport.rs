use std::time::{Duration, Instant};

use httpmock::prelude::*;
use polymarket_clob_core::Kind;
use polymarket_clob_core::error::RetriesExhausted;
use polymarket_clob_core::transport::{Request, RetryPolicy, Transport};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use url::Url;

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .base_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build()
}

fn transport(server: &MockServer, policy: RetryPolicy) -> anyhow::Result<Transport> {
    Ok(Transport::new(Url::parse(&server.base_url())?, policy)?)
}

#[tokio::test]
async fn server_errors_are_retried_until_exhausted() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/book");
            then.status(503);
        })
        .await;

    let err = transport(&server, fast_policy(3))?
        .execute(&Request::get("/book"), &CancellationToken::new())
        .await
        .unwrap_err();

    mock.assert_calls_async(4).await;
    assert_eq!(err.kind(), Kind::Transport);

    let exhausted = err.downcast_ref::<RetriesExhausted>().expect("exhausted");
    assert_eq!(exhausted.attempts, 4);
    assert_eq!(
        err.status().map(|s| (s.status_code, s.message.as_str())),
        Some((StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"))
    );
    assert!(err.to_string().contains("request failed after 4 attempts"));
    Ok(())
}

#[tokio::test]
async fn client_errors_are_terminal() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/data/order/abc");
            then.status(404).body("  order not found \n");
        })
        .await;

    let err = transport(&server, fast_policy(3))?
        .execute(&Request::get("/data/order/abc"), &CancellationToken::new())
        .await
        .unwrap_err();

    mock.assert_calls_async(1).await;
    assert_eq!(err.kind(), Kind::Status);

    let status = err.status().expect("status");
    assert_eq!(status.status_code, StatusCode::NOT_FOUND);
    assert_eq!(status.method, reqwest::Method::GET);
    assert_eq!(status.path, "/data/order/abc");
    assert_eq!(status.message, "order not found");
    assert!(!err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn success_returns_status_and_body() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/time").query_param("probe", "1");
            then.status(200).body("1700000000");
        })
        .await;

    let response = transport(&server, fast_policy(0))?
        .execute(
            &Request::get("/time").query("probe", "1"),
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json::<i64>()?, 1_700_000_000);
    Ok(())
}

#[tokio::test]
async fn body_is_replayed_on_every_attempt() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let body = r#"{"orderID":"0xabc"}"#;
    let mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/order").body(body);
            then.status(502);
        })
        .await;

    let request = Request::delete("/order").body(body.to_owned());
    let err = transport(&server, fast_policy(2))?
        .execute(&request, &CancellationToken::new())
        .await
        .unwrap_err();

    mock.assert_calls_async(3).await;
    assert_eq!(err.status().map(|s| s.status_code), Some(StatusCode::BAD_GATEWAY));
    Ok(())
}

#[tokio::test]
async fn retry_after_overrides_backoff() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/book");
            then.status(429).header("Retry-After", "1");
        })
        .await;

    let started = Instant::now();
    let err = transport(&server, fast_policy(1))?
        .execute(&Request::get("/book"), &CancellationToken::new())
        .await
        .unwrap_err();

    mock.assert_calls_async(2).await;
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(
        err.status().map(|s| s.status_code),
        Some(StatusCode::TOO_MANY_REQUESTS)
    );
    Ok(())
}

#[tokio::test]
async fn cancellation_interrupts_backoff() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/book");
            then.status(503).header("Retry-After", "30");
        })
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = transport(&server, fast_policy(3))?
        .execute(&Request::get("/book"), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Kind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn cancellation_interrupts_a_slow_response() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/book");
            then.status(200).delay(Duration::from_secs(5)).body("{}");
        })
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = transport(&server, fast_policy(0))?
        .execute(&Request::get("/book"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Kind::Cancelled);
    Ok(())
}

#[tokio::test]
async fn connection_refused_is_retried() -> anyhow::Result<()> {
    // Nothing listens on the discard port.
    let transport = Transport::new(Url::parse("http://127.0.0.1:9")?, fast_policy(2))?;

    let err = transport
        .execute(&Request::get("/time"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Kind::Transport);
    let exhausted = err.downcast_ref::<RetriesExhausted>().expect("exhausted");
    assert_eq!(exhausted.attempts, 3);
    assert_eq!(exhausted.last.kind(), Kind::Transport);
    Ok(())
}
