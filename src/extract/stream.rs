//! Streaming chat-completions client.
//!
//! The backend answers with server-sent events (`data: {...}` lines, closed by
//! `data: [DONE]`). Each event carries a fragment for one of two channels:
//! `delta.content` (final answer) or `delta.reasoning_content` /
//! `delta.reasoning` (deliberation). Both are accumulated independently in a
//! single sequential pass over the byte stream.
//!
//! Resolution at stream end:
//! 1. non-empty final channel -> returned as-is
//! 2. else the first JSON-shaped span inside the deliberation channel
//! 3. else the raw deliberation text

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::ExtractionBackend;
use crate::ingest::providers::USER_AGENT;

/// One decoded stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Deliberation(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
}

/// Decode one SSE line into zero or more events.
pub fn parse_sse_line(line: &str) -> Vec<StreamEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        // comments (`: keep-alive`), `event:` and blank separators
        return Vec::new();
    };
    let data = data.trim();
    if data == "[DONE]" {
        return vec![StreamEvent::Done];
    }
    let chunk: Chunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(target: "extract", error = %e, "skipping undecodable stream event");
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for choice in chunk.choices {
        let d = choice.delta;
        if let Some(r) = d.reasoning_content.or(d.reasoning).filter(|r| !r.is_empty()) {
            out.push(StreamEvent::Deliberation(r));
        }
        if let Some(c) = d.content.filter(|c| !c.is_empty()) {
            out.push(StreamEvent::Content(c));
        }
    }
    out
}

/// Accumulates both channels across arbitrarily split network chunks.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending: Vec<u8>,
    content: String,
    deliberation: String,
    received_bytes: usize,
    events: usize,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; complete lines are decoded immediately.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        self.received_bytes += chunk.len();
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.push_line(&String::from_utf8_lossy(&line));
        }
    }

    fn push_line(&mut self, line: &str) {
        for ev in parse_sse_line(line) {
            self.push_event(ev);
        }
    }

    /// Apply one event. Events after `Done` are ignored.
    pub fn push_event(&mut self, ev: StreamEvent) {
        if self.done {
            return;
        }
        self.events += 1;
        match ev {
            StreamEvent::Content(s) => self.content.push_str(&s),
            StreamEvent::Deliberation(s) => self.deliberation.push_str(&s),
            StreamEvent::Done => self.done = true,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn received_any(&self) -> bool {
        self.received_bytes > 0
    }

    pub fn events(&self) -> usize {
        self.events
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn deliberation(&self) -> &str {
        &self.deliberation
    }

    /// Flush a trailing unterminated line and resolve the final text.
    pub fn finish(mut self) -> String {
        if !self.done && !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.push_line(&String::from_utf8_lossy(&rest));
        }
        resolve(&self.content, &self.deliberation)
    }
}

pub fn resolve(content: &str, deliberation: &str) -> String {
    if !content.trim().is_empty() {
        return content.to_string();
    }
    match first_json_span(deliberation) {
        Some(span) => span.to_string(),
        None => deliberation.to_string(),
    }
}

/// First balanced `{..}`/`[..]` span that parses as JSON. Openers inside
/// prose that never close (or close into non-JSON) are skipped.
pub fn first_json_span(text: &str) -> Option<&str> {
    text.char_indices()
        .filter(|&(_, c)| c == '{' || c == '[')
        .filter_map(|(start, _)| balanced_end(&text[start..]).map(|len| &text[start..start + len]))
        .find(|span| serde_json::from_str::<serde_json::Value>(span).is_ok())
}

/// Byte length of the balanced group opening at `s[0]`, string-aware.
fn balanced_end(s: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_str = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_str {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_str = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

const SYSTEM_PROMPT: &str = "You analyze user-reported problems and return only JSON. No prose, no markdown.";

/// OpenAI-compatible streaming chat-completions backend.
pub struct StreamingClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl StreamingClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .context("building extraction http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    async fn complete_impl(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: max_output_tokens,
            temperature: 0.2,
            stream: true,
        };

        let mut builder = self
            .http
            .post(&self.endpoint)
            .header("Accept", "text/event-stream")
            .json(&req);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let resp = builder
            .send()
            .await
            .context("extraction backend request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(300).collect();
            anyhow::bail!("extraction backend returned {status}: {excerpt}");
        }

        let mut acc = StreamAccumulator::new();
        let mut stream = resp.bytes_stream();
        while let Some(item) = stream.next().await {
            match item {
                Ok(bytes) => acc.push_bytes(&bytes),
                Err(e) if !acc.received_any() => {
                    return Err(e).context("extraction stream failed before first byte");
                }
                Err(e) => {
                    // Keep what arrived; recovery decides if it is usable.
                    tracing::warn!(target: "extract", error = ?e, events = acc.events(), "stream cut short");
                    break;
                }
            }
            if acc.is_done() {
                break;
            }
        }

        tracing::debug!(
            target: "extract",
            events = acc.events(),
            content_len = acc.content().len(),
            deliberation_len = acc.deliberation().len(),
            "stream finished"
        );
        Ok(acc.finish())
    }
}

impl ExtractionBackend for StreamingClient {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        max_output_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.complete_impl(prompt, max_output_tokens))
    }

    fn name(&self) -> &'static str {
        "openai_compatible"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
