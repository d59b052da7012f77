//! End-to-end tests over real TCP connections.
//!
//! Each test starts a `SliceServer` on a free port and talks to it either
//! with a hyper HTTP/1 client or, where the exact bytes matter, a raw
//! `TcpStream`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, stream};
use http_body_util::{BodyExt, Empty, Full};
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use sliceway_http::{Body, Connection, Headers, Slice, StatusCode, response_fn, slice_fn};
use sliceway_server::{BridgeError, ServerConfig, SliceServer, echo_slice};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

async fn serve(slice: impl Slice) -> (SliceServer, u16) {
    let server = SliceServer::new(
        slice,
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        },
    );
    let port = server.start().await.unwrap();
    (server, port)
}

async fn client<B>(port: u16) -> SendRequest<B>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });
    sender
}

async fn get(port: u16, path: &str) -> (StatusCode, http::HeaderMap, Bytes) {
    let mut sender = client::<Empty<Bytes>>(port).await;
    let req = http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", "localhost")
        .body(Empty::new())
        .unwrap();
    let resp = sender.send_request(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

/// Write `request` on a fresh connection and read until the server closes it.
async fn raw(port: u16, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut wire = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut wire))
        .await
        .expect("server kept the connection open")
        .unwrap();
    String::from_utf8_lossy(&wire).into_owned()
}

fn hello_world() -> impl Slice {
    slice_fn(|_line, _headers, _body| {
        Ok(response_fn(|conn| {
            conn.accept(
                StatusCode::OK,
                Headers::new(),
                Body::from_stream(stream::iter(["Hello", " ", "World", "!!!"]).map(|s| Ok(Bytes::from(s)))),
            )
        }))
    })
}

#[tokio::test]
async fn get_hello_world() {
    let (server, port) = serve(hello_world()).await;

    let (status, headers, body) = get(port, "/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("transfer-encoding").unwrap(), "chunked");
    assert_eq!(body, Bytes::from("Hello World!!!"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn echoes_posted_body_with_length() {
    let (server, port) = serve(echo_slice()).await;

    let mut sender = client::<Full<Bytes>>(port).await;
    let req = http::Request::builder()
        .method("POST")
        .uri("/echo")
        .header("host", "localhost")
        .header("content-length", "12")
        .body(Full::new(Bytes::from("echo me back")))
        .unwrap();
    let resp = sender.send_request(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-length").unwrap(), "12");
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from("echo me back"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn echoes_chunked_request_chunked() {
    let (server, port) = serve(echo_slice()).await;

    let wire = raw(
        port,
        b"POST /echo HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
          4\r\nabcd\r\n3\r\nefg\r\n0\r\n\r\n",
    )
    .await;
    assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(wire.contains("transfer-encoding: chunked\r\n"));
    assert!(wire.ends_with("0\r\n\r\n"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn keep_alive_reuses_connection() {
    let (server, port) = serve(hello_world()).await;

    let mut sender = client::<Empty<Bytes>>(port).await;
    for path in ["/one", "/two", "/three"] {
        sender.ready().await.unwrap();
        let req = http::Request::builder()
            .uri(path)
            .header("host", "localhost")
            .body(Empty::new())
            .unwrap();
        let resp = sender.send_request(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from("Hello World!!!"));
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn slice_error_returns_500() {
    let (server, port) = serve(slice_fn(|_line, _headers, _body| {
        anyhow::bail!("Failed to create response")
    }))
    .await;

    let (status, headers, body) = get(port, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(headers.get("content-type").unwrap(), "text/plain; charset=utf-8");
    assert!(String::from_utf8_lossy(&body).contains("Failed to create response"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn slice_panic_returns_500() {
    let (server, port) = serve(slice_fn(|_line, _headers, _body| {
        panic!("slice is in an illegal state")
    }))
    .await;

    let (status, _, body) = get(port, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(&body).contains("illegal state"));

    // The panic did not take the server down.
    let (status, _, _) = get(port, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn response_send_panic_returns_500() {
    let (server, port) = serve(slice_fn(|_line, _headers, _body| {
        Ok(response_fn(|_conn| panic!("Failed to send response")))
    }))
    .await;

    let (status, _, body) = get(port, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(&body).contains("Failed to send response"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn async_rejection_returns_500() {
    let (server, port) = serve(slice_fn(|_line, _headers, _body| {
        Ok(response_fn(|_conn| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<(), _>(anyhow::anyhow!("Failed to respond asynchronously"))
            })
        }))
    }))
    .await;

    let (status, _, body) = get(port, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(&body).contains("Failed to respond asynchronously"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn failing_body_returns_500() {
    let (server, port) = serve(slice_fn(|_line, _headers, _body| {
        Ok(response_fn(|conn| {
            conn.accept(
                StatusCode::OK,
                Headers::new(),
                Body::failed(anyhow::anyhow!("Failed to produce body")),
            )
        }))
    }))
    .await;

    let (status, _, body) = get(port, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(&body).contains("Failed to produce body"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn mid_stream_failure_closes_without_second_status() {
    let slice = slice_fn(|_line, _headers, _body| {
        Ok(response_fn(|conn| {
            let body = stream::iter(vec![Ok(Bytes::from("first"))]).chain(stream::once(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(anyhow::anyhow!("stream broke"))
            }));
            conn.accept(StatusCode::OK, Headers::new(), Body::from_stream(body))
        }))
    });
    let (server, port) = serve(slice).await;

    let wire = raw(port, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(wire.matches("HTTP/1.1 ").count(), 1);
    assert!(wire.contains("first"));
    assert!(!wire.ends_with("0\r\n\r\n"));

    // A hyper client sees a truncated body.
    let mut sender = client::<Empty<Bytes>>(port).await;
    let req = http::Request::builder()
        .uri("/")
        .header("host", "localhost")
        .body(Empty::new())
        .unwrap();
    let resp = sender.send_request(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.into_body().collect().await.is_err());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn continue_precedes_final_response() {
    let (server, port) = serve(echo_slice()).await;

    let wire = raw(
        port,
        b"POST / HTTP/1.1\r\nHost: x\r\nExpect: 100-continue\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
    )
    .await;
    assert_eq!(
        wire,
        "HTTP/1.1 100 Continue\r\n\r\n\
         HTTP/1.1 200 OK\r\nContent-Length: 5\r\nconnection: close\r\n\r\nhello"
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn second_terminal_response_is_refused() {
    let (tx, mut rx) = mpsc::unbounded_channel::<anyhow::Result<()>>();
    let slice = slice_fn(move |_line, _headers, _body| {
        let tx = tx.clone();
        Ok(response_fn(move |conn: Arc<dyn Connection>| {
            Box::pin(async move {
                let first = conn.accept(StatusCode::OK, Headers::new().with("content-length", "2"), Body::from("ok"));
                let second = conn.accept(StatusCode::ACCEPTED, Headers::new(), Body::from("no"));
                let _ = tx.send(second.await);
                first.await
            })
        }))
    });
    let (server, port) = serve(slice).await;

    let (status, _, body) = get(port, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from("ok"));

    let second = rx.recv().await.unwrap().unwrap_err();
    assert!(matches!(
        second.downcast_ref::<BridgeError>(),
        Some(BridgeError::AlreadyResponded)
    ));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_request_gets_400() {
    let (server, port) = serve(hello_world()).await;

    let wire = raw(port, b"NOT A REQUEST\r\n\r\n").await;
    assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    server.stop().await.unwrap();
}
