#![allow(dead_code)]

use async_trait::async_trait;
use chatrelay::channels::ChannelHandle;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use std::sync::{Arc, Mutex, OnceLock};

/// Shared, ordered record of everything a test observed (acks, posts).
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Channel stub: records posts as `post:<conversation>:<text>`. Posts whose text is in
/// `fail_texts` return an error; posts whose text is in `hang_texts` never complete.
pub struct RecordingChannel {
    pub journal: Journal,
    fail_texts: Vec<String>,
    hang_texts: Vec<String>,
}

impl RecordingChannel {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail_texts: Vec::new(),
            hang_texts: Vec::new(),
        }
    }

    pub fn failing(mut self, text: &str) -> Self {
        self.fail_texts.push(text.to_string());
        self
    }

    pub fn hanging(mut self, text: &str) -> Self {
        self.hang_texts.push(text.to_string());
        self
    }

    /// Texts posted to `conversation_id`, in order.
    pub fn posts_to(&self, conversation_id: &str) -> Vec<String> {
        let prefix = format!("post:{}:", conversation_id);
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ChannelHandle for RecordingChannel {
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("post:{}:{}", conversation_id, text));
        if self.hang_texts.iter().any(|t| t == text) {
            std::future::pending::<()>().await;
        }
        if self.fail_texts.iter().any(|t| t == text) {
            return Err("channel_not_found".to_string());
        }
        Ok(())
    }
}

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

static SPAN_EXPORTER: OnceLock<InMemorySpanExporter> = OnceLock::new();

/// Install (once per test binary) a global tracer provider that keeps finished spans
/// in memory.
pub fn span_exporter() -> InMemorySpanExporter {
    SPAN_EXPORTER
        .get_or_init(|| {
            let exporter = InMemorySpanExporter::default();
            let provider = SdkTracerProvider::builder()
                .with_simple_exporter(exporter.clone())
                .build();
            opentelemetry::global::set_tracer_provider(provider);
            exporter
        })
        .clone()
}

/// Finished spans belonging to one trace.
pub fn finished_spans(trace_id: &str) -> Vec<SpanData> {
    span_exporter()
        .get_finished_spans()
        .unwrap_or_default()
        .into_iter()
        .filter(|s| s.span_context.trace_id().to_string() == trace_id)
        .collect()
}
