//! HTTP backend against a throwaway local server.

use std::sync::Arc;
use std::time::Duration;

use colloquy::adapters::backend::{HttpBackendConfig, HttpChatBackend};
use colloquy::adapters::storage::InMemoryConversationStore;
use colloquy::application::{MessageDispatcher, RetryManager, RetryPolicy, SendMode};
use colloquy::domain::conversation::{Message, SendPhase};
use colloquy::ports::{BackendError, ChatBackend, ChatRequest, ConversationStore};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// What the server saw.
struct Captured {
    head: String,
    body: serde_json::Value,
}

/// Serves exactly one request with `response`, then closes the connection.
async fn serve_once(response: String) -> (String, oneshot::Receiver<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}/api/chat", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let captured = read_request(&mut socket).await;
        let _ = tx.send(captured);
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    (endpoint, rx)
}

async fn read_request(socket: &mut TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        assert!(n > 0, "connection closed before headers ended");
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before body ended");
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = serde_json::from_slice(&buf[header_end..header_end + content_length]).unwrap();
    Captured { head, body }
}

fn json_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn sse_response(lines: &[&str]) -> String {
    let mut response = String::from(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
    );
    for line in lines {
        response.push_str(line);
        response.push('\n');
    }
    response
}

#[tokio::test]
async fn atomic_send_posts_message_and_history() {
    let (endpoint, captured) = serve_once(json_response(
        "200 OK",
        r#"{"response":"Hello!","sources":[{"content":"CV","category":"experience","score":0.8}]}"#,
    ))
    .await;
    let backend = HttpChatBackend::new(HttpBackendConfig::new(endpoint).with_api_key("sk-test")).unwrap();

    let request = ChatRequest::new("Hi", vec![Message::assistant("Welcome")]);
    let reply = backend.send(&request).await.unwrap();

    assert_eq!(reply.response, "Hello!");
    assert_eq!(reply.sources.map(|s| s.len()), Some(1));

    let captured = captured.await.unwrap();
    assert!(captured.head.starts_with("post /api/chat"));
    assert!(captured.head.contains("authorization: bearer sk-test"));
    assert_eq!(captured.body["message"], "Hi");
    assert_eq!(captured.body["history"][0]["text"], "Welcome");
    assert!(captured.body.get("stream").is_none());
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let response = "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 7\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    let (endpoint, _captured) = serve_once(response.to_string()).await;
    let backend = HttpChatBackend::new(HttpBackendConfig::new(endpoint)).unwrap();

    let err = backend.send(&ChatRequest::new("Hi", vec![])).await.unwrap_err();
    assert_eq!(
        err,
        BackendError::RateLimited {
            retry_after_secs: Some(7)
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn client_error_is_not_retryable() {
    let (endpoint, _captured) = serve_once(json_response("400 Bad Request", r#"{"detail":"no"}"#)).await;
    let backend = HttpChatBackend::new(HttpBackendConfig::new(endpoint)).unwrap();

    let err = backend.send(&ChatRequest::new("Hi", vec![])).await.unwrap_err();
    assert!(matches!(err, BackendError::Client { status: 400, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn malformed_reply_is_a_parse_error() {
    let (endpoint, _captured) = serve_once(json_response("200 OK", "not json")).await;
    let backend = HttpChatBackend::new(HttpBackendConfig::new(endpoint)).unwrap();

    let err = backend.send(&ChatRequest::new("Hi", vec![])).await.unwrap_err();
    assert!(matches!(err, BackendError::Parse(_)));
}

#[tokio::test]
async fn open_stream_requests_event_stream() {
    let (endpoint, captured) = serve_once(sse_response(&[r#"data: {"type":"done"}"#])).await;
    let backend = HttpChatBackend::new(HttpBackendConfig::new(endpoint)).unwrap();

    let stream = backend.open_stream(&ChatRequest::new("Hi", vec![])).await.unwrap();
    let bytes: Vec<u8> = stream
        .map(|read| read.unwrap().to_vec())
        .collect::<Vec<_>>()
        .await
        .concat();

    assert_eq!(String::from_utf8(bytes).unwrap(), "data: {\"type\":\"done\"}\n");
    let captured = captured.await.unwrap();
    assert!(captured.head.contains("accept: text/event-stream"));
    assert_eq!(captured.body["stream"], true);
}

#[tokio::test]
async fn streamed_reply_over_http_lands_in_store() {
    let (endpoint, _captured) = serve_once(sse_response(&[
        r#"data: {"type":"chunk","content":"A"}"#,
        "",
        r#"data: {"type":"chunk","content":"B"}"#,
        "data: {broken",
        r#"data: {"type":"chunk","content":"C"}"#,
        r#"data: {"type":"done"}"#,
    ]))
    .await;
    let backend = HttpChatBackend::new(
        HttpBackendConfig::new(endpoint).with_timeout(Duration::from_secs(5)),
    )
    .unwrap();
    let store = Arc::new(InMemoryConversationStore::new());
    let conversation = store.create(Some("Demo".into())).await.unwrap();
    let dispatcher =
        MessageDispatcher::new(Arc::new(backend), store.clone(), RetryManager::new(RetryPolicy::none()));

    let outcome = dispatcher
        .send(conversation.id(), "Hi", SendMode::Streaming)
        .await
        .unwrap();

    assert_eq!(outcome.phase, SendPhase::Complete);
    let reply = outcome.assistant_message().unwrap();
    assert_eq!(reply.text(), "ABC");
    assert!(reply.is_streaming_complete());
    assert_eq!(store.get(conversation.id()).await.unwrap().message_count(), 2);
}
