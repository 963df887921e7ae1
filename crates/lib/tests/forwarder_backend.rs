//! Forwarder against a stubbed backend (wiremock) and against the bundled mock backend.

mod common;

use chatrelay::backend::{mock, BackendClient};
use chatrelay::channels::{ChannelHandle, InboundMention};
use chatrelay::error::RelayError;
use chatrelay::forwarder::{Forwarder, ForwarderOptions};
use chatrelay::trace::Span;
use common::{finished_spans, journal, span_exporter, RecordingChannel};
use opentelemetry::trace::Status;
use opentelemetry::Value;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mention under a fresh root span (ended right away; its context stays usable).
fn mention(user: &str, conversation: &str, text: &str) -> InboundMention {
    span_exporter();
    let root = Span::root("mention");
    InboundMention {
        user_id: user.to_string(),
        conversation_id: conversation.to_string(),
        text: text.to_string(),
        trace: root.context(),
    }
}

fn forwarder(
    url: Option<String>,
    channel: Arc<RecordingChannel>,
    options: ForwarderOptions,
) -> Forwarder {
    let channel: Arc<dyn ChannelHandle> = channel;
    Forwarder::new(
        BackendClient::new(url, Duration::from_secs(2)),
        channel,
        options,
    )
}

fn event_stream(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

#[tokio::test]
async fn posts_query_and_relays_frames_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(mock::STREAM_PATH))
        .and(header("content-type", "application/json"))
        .and(header_exists("traceparent"))
        .and(body_json(json!({ "user_id": "U1", "query": "ping" })))
        .respond_with(event_stream(
            "id: 1\ndata: hello\n\nid: 2\ndata: world\n\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let channel = Arc::new(RecordingChannel::new(journal()));
    let fwd = forwarder(
        Some(format!("{}{}", server.uri(), mock::STREAM_PATH)),
        channel.clone(),
        ForwarderOptions::default(),
    );
    let m = mention("U1", "C1", "ping");
    let trace_id = m.trace.trace_id();

    let outcome = fwd.forward(m).await.unwrap();
    assert_eq!(outcome.frames_posted, 2);
    assert_eq!(outcome.frames_failed, 0);
    assert!(!outcome.truncated);
    assert_eq!(channel.posts_to("C1"), vec!["hello", "world"]);

    let requests = server.received_requests().await.unwrap();
    let traceparent = requests[0]
        .headers
        .get("traceparent")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(traceparent.starts_with(&format!("00-{}-", trace_id)));
}

#[tokio::test]
async fn missing_backend_url_makes_no_request_and_posts_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let channel = Arc::new(RecordingChannel::new(journal()));
    let fwd = forwarder(None, channel.clone(), ForwarderOptions::default());

    let err = fwd.forward(mention("U1", "C1", "ping")).await.unwrap_err();
    assert!(matches!(err, RelayError::ConfigurationMissing(_)));
    assert!(channel.posts_to("C1").is_empty());
}

#[tokio::test]
async fn error_status_body_is_relayed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Invalid JSON\n"))
        .mount(&server)
        .await;

    let channel = Arc::new(RecordingChannel::new(journal()));
    let fwd = forwarder(
        Some(server.uri()),
        channel.clone(),
        ForwarderOptions {
            failure_notice: Some("Sorry, something went wrong.".to_string()),
            ..ForwarderOptions::default()
        },
    );
    let m = mention("U1", "C1", "ping");
    let trace_id = m.trace.trace_id();

    let outcome = fwd.forward(m).await.unwrap();
    assert_eq!(outcome.frames_posted, 1);
    assert!(outcome.truncated);
    assert_eq!(channel.posts_to("C1"), vec!["Invalid JSON"]);

    let spans = finished_spans(&trace_id);
    let backend = spans.iter().find(|s| s.name == "backend.send").unwrap();
    assert!(backend
        .attributes
        .iter()
        .any(|kv| kv.key.as_str() == "http.status" && kv.value == Value::I64(400)));
    assert!(matches!(backend.status, Status::Error { .. }));
}

#[tokio::test]
async fn transport_failure_posts_notice() {
    let port = common::free_port();
    let channel = Arc::new(RecordingChannel::new(journal()));
    let fwd = forwarder(
        Some(format!("http://127.0.0.1:{}{}", port, mock::STREAM_PATH)),
        channel.clone(),
        ForwarderOptions {
            failure_notice: Some("Sorry, something went wrong.".to_string()),
            ..ForwarderOptions::default()
        },
    );

    let err = fwd.forward(mention("U1", "C1", "ping")).await.unwrap_err();
    assert!(matches!(err, RelayError::Transport(_)));
    assert_eq!(
        channel.posts_to("C1"),
        vec!["Sorry, something went wrong."]
    );
}

#[tokio::test]
async fn failures_are_silent_without_notice() {
    let port = common::free_port();
    let channel = Arc::new(RecordingChannel::new(journal()));
    let fwd = forwarder(
        Some(format!("http://127.0.0.1:{}", port)),
        channel.clone(),
        ForwarderOptions::default(),
    );

    assert!(fwd.forward(mention("U1", "C1", "ping")).await.is_err());
    assert!(channel.posts_to("C1").is_empty());
}

#[tokio::test]
async fn spans_form_one_trace_under_the_mention() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(event_stream("data: ok\n\n"))
        .mount(&server)
        .await;

    let channel = Arc::new(RecordingChannel::new(journal()));
    let fwd = forwarder(Some(server.uri()), channel, ForwarderOptions::default());
    let m = mention("U1", "C1", "ping");
    let trace_id = m.trace.trace_id();
    let root_span_id = m.trace.span_id();

    fwd.forward(m).await.unwrap();

    let spans = finished_spans(&trace_id);
    let forward = spans.iter().find(|s| s.name == "forward").unwrap();
    let backend = spans.iter().find(|s| s.name == "backend.send").unwrap();
    assert_eq!(forward.parent_span_id.to_string(), root_span_id);
    assert_eq!(backend.parent_span_id, forward.span_context.span_id());
    assert!(backend
        .attributes
        .iter()
        .any(|kv| kv.key.as_str() == "http.status" && kv.value == Value::I64(200)));
    assert!(!matches!(backend.status, Status::Error { .. }));
}

#[tokio::test]
async fn slow_backend_hits_forward_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(event_stream("data: late\n\n").set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let channel = Arc::new(RecordingChannel::new(journal()));
    let fwd = forwarder(
        Some(server.uri()),
        channel.clone(),
        ForwarderOptions {
            forward_timeout: Duration::from_millis(200),
            failure_notice: None,
        },
    );

    let err = fwd.forward(mention("U1", "C1", "ping")).await.unwrap_err();
    assert!(matches!(err, RelayError::Timeout(d) if d == Duration::from_millis(200)));
    assert!(channel.posts_to("C1").is_empty());
}

#[tokio::test]
async fn failed_post_does_not_stop_later_frames() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(event_stream(
            "id: 1\ndata: one\n\nid: 2\ndata: two\n\nid: 3\ndata: three\n\n",
        ))
        .mount(&server)
        .await;

    let channel = Arc::new(RecordingChannel::new(journal()).failing("two"));
    let fwd = forwarder(Some(server.uri()), channel.clone(), ForwarderOptions::default());

    let outcome = fwd.forward(mention("U1", "C1", "ping")).await.unwrap();
    assert_eq!(outcome.frames_posted, 2);
    assert_eq!(outcome.frames_failed, 1);
    assert_eq!(channel.posts_to("C1"), vec!["one", "two", "three"]);
}

#[tokio::test]
async fn unterminated_last_frame_is_relayed_as_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(event_stream("id: 1\ndata: complete\n\nid: 2\ndata: cut off"))
        .mount(&server)
        .await;

    let channel = Arc::new(RecordingChannel::new(journal()));
    let fwd = forwarder(Some(server.uri()), channel.clone(), ForwarderOptions::default());

    let outcome = fwd.forward(mention("U1", "C1", "ping")).await.unwrap();
    assert!(outcome.truncated);
    assert_eq!(channel.posts_to("C1"), vec!["complete", "cut off"]);
}

#[tokio::test]
async fn relays_mock_backend_reply_word_by_word() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(mock::serve(listener, Duration::ZERO));

    let channel = Arc::new(RecordingChannel::new(journal()));
    let fwd = forwarder(
        Some(format!("http://{}{}", addr, mock::STREAM_PATH)),
        channel.clone(),
        ForwarderOptions::default(),
    );

    let outcome = fwd.forward(mention("U42", "C9", "what time is it")).await.unwrap();
    assert_eq!(outcome.frames_posted, 7);
    assert_eq!(
        channel.posts_to("C9"),
        vec!["Hello", ",", "U42", "!", "You", "said:", "what time is it"]
    );
    server.abort();
}
