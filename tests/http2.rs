#![allow(missing_docs)]

use http::{StatusCode, Version};
use hyperguise::client::Client;
use hyperguise::Body;

mod support;
use support::{BoxError, TIMEOUT};

#[tokio::test]
async fn prior_knowledge_over_plain_http() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = support::serve_h2c().await?;
    let client = Client::builder().build()?;

    let request = http::Request::get(server.uri("http", "/"))
        .version(Version::HTTP_2)
        .body(Body::empty())?;
    let response = tokio::time::timeout(TIMEOUT, client.request(request)).await??;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.version(), Version::HTTP_2);
    assert_eq!(response.text().await?, "ok");
    Ok(())
}

#[tokio::test]
async fn negotiated_connection_is_shared() -> Result<(), BoxError> {
    let server = support::serve_tls(&[b"h2", b"http/1.1"]).await?;
    let client = Client::builder().build()?;

    let first = tokio::time::timeout(TIMEOUT, client.get(server.uri("https", "/"))).await??;
    let second = tokio::time::timeout(TIMEOUT, client.get(server.uri("https", "/"))).await??;
    assert_eq!(first.version(), Version::HTTP_2);
    assert_eq!(second.version(), Version::HTTP_2);

    assert_eq!(first.text().await?, "ok");
    assert_eq!(second.text().await?, "ok");
    assert_eq!(server.accepted(), 1);
    Ok(())
}

#[tokio::test]
async fn close_idle_drops_shared_connection() -> Result<(), BoxError> {
    let server = support::serve_tls(&[b"h2", b"http/1.1"]).await?;
    let client = Client::builder().build()?;

    let response = tokio::time::timeout(TIMEOUT, client.get(server.uri("https", "/"))).await??;
    assert_eq!(response.text().await?, "ok");

    client.close_idle_connections();

    let response = tokio::time::timeout(TIMEOUT, client.get(server.uri("https", "/"))).await??;
    assert_eq!(response.text().await?, "ok");
    assert_eq!(server.accepted(), 2);
    Ok(())
}

#[tokio::test]
async fn closing_one_stream_keeps_siblings() -> Result<(), BoxError> {
    let server = support::serve_tls(&[b"h2", b"http/1.1"]).await?;
    let client = Client::builder().build()?;

    let hanging =
        tokio::time::timeout(TIMEOUT, client.get(server.uri("https", "/hang"))).await??;
    let sibling = tokio::time::timeout(TIMEOUT, client.get(server.uri("https", "/"))).await??;
    assert_eq!(server.accepted(), 1);

    hanging
        .connection()
        .close_with_error(Some("no longer needed".into()));
    assert!(hanging.connection().scope().is_cancelled());
    assert!(!sibling.connection().scope().is_cancelled());

    let error = tokio::time::timeout(TIMEOUT, hanging.text())
        .await?
        .unwrap_err();
    assert!(error.is_cancelled());
    assert_eq!(sibling.text().await?, "ok");

    let again = tokio::time::timeout(TIMEOUT, client.get(server.uri("https", "/"))).await??;
    assert_eq!(again.text().await?, "ok");
    assert_eq!(server.accepted(), 1);
    Ok(())
}

#[tokio::test]
async fn close_fails_streaming_body() -> Result<(), BoxError> {
    let server = support::serve_tls(&[b"h2", b"http/1.1"]).await?;
    let client = Client::builder().build()?;

    let hanging =
        tokio::time::timeout(TIMEOUT, client.get(server.uri("https", "/hang"))).await??;
    client.close();

    let error = tokio::time::timeout(TIMEOUT, hanging.text())
        .await?
        .unwrap_err();
    assert!(error.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn response_outlives_dropped_client() -> Result<(), BoxError> {
    let server = support::serve_tls(&[b"h2", b"http/1.1"]).await?;

    let response = {
        let client = Client::builder().build()?;
        tokio::time::timeout(TIMEOUT, client.get(server.uri("https", "/"))).await??
    };

    assert_eq!(tokio::time::timeout(TIMEOUT, response.text()).await??, "ok");
    Ok(())
}
