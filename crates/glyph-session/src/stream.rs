//! Streaming response decoding
//!
//! The service streams typed events over server-sent events. Only the terminal
//! `complete` event carries the document; deltas exist for progress display and
//! are never assembled into content.

use crate::error::{ErrorClass, ServiceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One event of a modification stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Generation started
    Start {
        /// Model serving the request
        #[serde(default)]
        model: Option<String>,
        /// Session the service attached the request to
        #[serde(default, rename = "sessionId")]
        session_id: Option<String>,
    },
    /// Partial output, for progress only
    Delta {
        /// Raw fragment
        content: String,
    },
    /// Regions the service reports as touched
    Changes {
        /// Region names
        #[serde(default)]
        regions: Vec<String>,
    },
    /// Authoritative final document
    Complete {
        /// Full new content
        content: String,
        /// Regions the service reports as touched
        #[serde(default, rename = "changedRegions")]
        changed_regions: Vec<String>,
    },
    /// Terminal service-side failure
    Error {
        /// Human-readable message
        message: String,
        /// Machine-readable code
        #[serde(default)]
        code: Option<String>,
        /// HTTP-equivalent status
        #[serde(default)]
        status: Option<u16>,
    },
    /// Transport saw bytes that completed no event (keep-alive comment or
    /// part of a frame); never on the wire
    #[serde(skip)]
    Heartbeat,
}

/// Stream-level failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Stream closed before a terminal event
    #[error("stream ended without complete")]
    Incomplete,

    /// Service sent an `error` event
    #[error("remote error: {0}")]
    Remote(ServiceError),

    /// Connection failed while reading
    #[error("transport error: {0}")]
    Transport(ServiceError),

    /// Terminal payload was prose, not a document
    #[error("ai refusal: {explanation}")]
    Refusal {
        /// Short excerpt of the model's answer
        explanation: String,
    },

    /// Payload could not be decoded
    #[error("malformed stream event: {0}")]
    Malformed(String),
}

impl StreamError {
    /// Failure class of this error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Remote(e) | Self::Transport(e) => e.class(),
            Self::Refusal { .. } => ErrorClass::AiRefusal,
            Self::Incomplete | Self::Malformed(_) => ErrorClass::Unknown,
        }
    }
}

/// What a fed event meant for the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Generation started
    Started {
        /// Model serving the request
        model: Option<String>,
    },
    /// More output arrived
    Received {
        /// Total delta characters so far
        chars: usize,
    },
    /// Service listed touched regions
    Regions(Vec<String>),
    /// Connection is alive but nothing was decoded
    KeepAlive,
    /// Terminal event seen, stop reading
    Finished,
    /// Event arrived after the terminal event
    Ignored,
}

/// Accepted result of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedModification {
    /// New document content, taken from `complete`
    pub content: String,
    /// Touched regions reported by the service
    pub changed_regions: Vec<String>,
    /// Model reported at start
    pub model: Option<String>,
}

/// Folds stream events into a single outcome
#[derive(Debug, Default)]
pub struct StreamDecoder {
    model: Option<String>,
    chars: usize,
    hinted: Vec<String>,
    terminal: Option<Result<(String, Vec<String>), StreamError>>,
}

impl StreamDecoder {
    /// Create empty decoder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one event
    ///
    /// # Errors
    /// An `error` event is returned as [`StreamError::Remote`].
    pub fn feed(&mut self, event: StreamEvent) -> Result<Progress, StreamError> {
        if self.terminal.is_some() {
            tracing::debug!("Ignoring stream event after terminal event");
            return Ok(Progress::Ignored);
        }

        match event {
            StreamEvent::Heartbeat => Ok(Progress::KeepAlive),
            StreamEvent::Start { model, .. } => {
                self.model.clone_from(&model);
                Ok(Progress::Started { model })
            }
            StreamEvent::Delta { content } => {
                self.chars += content.chars().count();
                Ok(Progress::Received { chars: self.chars })
            }
            StreamEvent::Changes { regions } => {
                self.hinted.clone_from(&regions);
                Ok(Progress::Regions(regions))
            }
            StreamEvent::Complete {
                content,
                changed_regions,
            } => {
                self.terminal = Some(Ok((content, changed_regions)));
                Ok(Progress::Finished)
            }
            StreamEvent::Error {
                message,
                code,
                status,
            } => {
                let err = StreamError::Remote(ServiceError::from_response(
                    status.unwrap_or(500),
                    Some(message),
                    code,
                ));
                self.terminal = Some(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Whether a terminal event has been seen
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.terminal.is_some()
    }

    /// Delta characters received so far
    #[inline]
    #[must_use]
    pub fn chars_received(&self) -> usize {
        self.chars
    }

    /// Resolve the stream
    ///
    /// # Errors
    /// [`StreamError::Incomplete`] without a terminal event, the remote error
    /// for an `error` event, [`StreamError::Refusal`] for a prose answer.
    pub fn finish(self) -> Result<DecodedModification, StreamError> {
        let (content, changed_regions) = self.terminal.ok_or(StreamError::Incomplete)??;

        if let Some(explanation) = detect_refusal(&content) {
            return Err(StreamError::Refusal { explanation });
        }

        Ok(DecodedModification {
            content,
            changed_regions: if changed_regions.is_empty() {
                self.hinted
            } else {
                changed_regions
            },
            model: self.model,
        })
    }
}

const REFUSAL_PHRASES: &[&str] = &[
    "i'm sorry",
    "i am sorry",
    "i apologize",
    "i can't",
    "i cannot",
    "i can not",
    "i'm unable",
    "i am unable",
    "i won't",
    "unable to comply",
    "as an ai",
];

const SHORT_PROSE_LIMIT: usize = 200;
const EXPLANATION_LIMIT: usize = 160;

/// Detect a prose answer where a document was expected
///
/// Returns a short explanation when `content` has no markup and either reads
/// as an apology/refusal or is too short to be a document.
#[must_use]
pub fn detect_refusal(content: &str) -> Option<String> {
    let trimmed = content.trim();
    let has_markup = trimmed.contains('<') && trimmed.contains('>');
    if has_markup {
        return None;
    }

    let lower = trimmed.to_lowercase();
    let apologetic = REFUSAL_PHRASES.iter().any(|p| lower.contains(p));
    if !apologetic && trimmed.chars().count() >= SHORT_PROSE_LIMIT {
        return None;
    }

    Some(explanation(trimmed))
}

fn explanation(text: &str) -> String {
    if text.is_empty() {
        return "The service returned an empty document.".to_string();
    }

    let first_sentence = text
        .char_indices()
        .find(|&(i, c)| {
            matches!(c, '.' | '!' | '?')
                && text[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace)
        })
        .map_or(text, |(i, c)| &text[..i + c.len_utf8()]);

    if first_sentence.chars().count() <= EXPLANATION_LIMIT {
        first_sentence.to_string()
    } else {
        let cut: String = first_sentence.chars().take(EXPLANATION_LIMIT - 1).collect();
        format!("{}…", cut.trim_end())
    }
}

/// Incremental server-sent-events decoder
///
/// Bytes are buffered until a blank line closes a frame, so frames and UTF-8
/// sequences may be split across chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create empty decoder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, StreamError>> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_frame(&frame[..end]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing frame that was not closed by a blank line
    pub fn finish(&mut self) -> Vec<Result<StreamEvent, StreamError>> {
        let frame = std::mem::take(&mut self.buffer);
        parse_frame(&frame).into_iter().collect()
    }
}

fn parse_frame(frame: &[u8]) -> Option<Result<StreamEvent, StreamError>> {
    let text = String::from_utf8_lossy(frame);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data.is_empty() {
        return None;
    }
    let payload = data.join("\n");
    if payload.trim().is_empty() || payload.trim() == "[DONE]" {
        return None;
    }

    Some(serde_json::from_str(&payload).map_err(|e| {
        tracing::warn!("Undecodable stream payload: {}", e);
        StreamError::Malformed(e.to_string())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn delta(s: &str) -> StreamEvent {
        StreamEvent::Delta {
            content: s.to_string(),
        }
    }

    fn complete(s: &str) -> StreamEvent {
        StreamEvent::Complete {
            content: s.to_string(),
            changed_regions: vec![],
        }
    }

    #[test]
    fn complete_payload_is_authoritative() {
        let mut decoder = StreamDecoder::new();
        for part in ["<a", "b>", "<c/>"] {
            decoder.feed(delta(part)).unwrap();
        }
        assert_eq!(decoder.chars_received(), 8);
        assert_eq!(decoder.feed(complete("<x/>")).unwrap(), Progress::Finished);

        let decoded = decoder.finish().unwrap();
        assert_eq!(decoded.content, "<x/>");
    }

    #[test]
    fn missing_terminal_event_is_incomplete() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(delta("<html>")).unwrap();
        assert_eq!(decoder.finish().unwrap_err(), StreamError::Incomplete);
    }

    #[test]
    fn events_after_terminal_are_ignored() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(complete("<p>done</p>")).unwrap();
        assert_eq!(decoder.feed(complete("<p>late</p>")).unwrap(), Progress::Ignored);
        assert_eq!(decoder.finish().unwrap().content, "<p>done</p>");
    }

    #[test]
    fn heartbeat_keeps_decoder_open() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.feed(StreamEvent::Heartbeat).unwrap(), Progress::KeepAlive);
        assert!(!decoder.is_finished());
        decoder.feed(complete("<p>done</p>")).unwrap();
        assert_eq!(decoder.finish().unwrap().content, "<p>done</p>");
    }

    #[test]
    fn error_event_is_terminal() {
        let mut decoder = StreamDecoder::new();
        let err = decoder
            .feed(StreamEvent::Error {
                message: "GUARDRAIL_PROTECTED".into(),
                code: None,
                status: Some(400),
            })
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::GuardrailProtected);
        assert!(decoder.is_finished());
        assert!(matches!(decoder.finish(), Err(StreamError::Remote(_))));
    }

    #[test]
    fn hinted_regions_fill_in_missing_complete_list() {
        let mut decoder = StreamDecoder::new();
        decoder
            .feed(StreamEvent::Changes {
                regions: vec!["header".into()],
            })
            .unwrap();
        decoder.feed(complete("<h1>x</h1>")).unwrap();
        assert_eq!(decoder.finish().unwrap().changed_regions, vec!["header"]);
    }

    #[test]
    fn refusal_in_complete_payload() {
        let mut decoder = StreamDecoder::new();
        decoder
            .feed(complete(
                "I'm sorry, but I can't change the tax rules for this invoice. Please edit manually.",
            ))
            .unwrap();
        match decoder.finish() {
            Err(StreamError::Refusal { explanation }) => {
                assert_eq!(
                    explanation,
                    "I'm sorry, but I can't change the tax rules for this invoice."
                );
            }
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[test]
    fn refusal_heuristic() {
        assert!(detect_refusal("<html><body>ok</body></html>").is_none());
        assert!(detect_refusal("<p>I'm sorry for the delay</p>").is_none());
        assert!(detect_refusal("Done.").is_some());
        assert!(detect_refusal("").is_some());
        assert!(detect_refusal(&"long plain text ".repeat(20)).is_none());

        let long_apology = format!("I cannot do that {}", "because ".repeat(40));
        let explanation = detect_refusal(&long_apology).unwrap();
        assert!(explanation.chars().count() <= EXPLANATION_LIMIT);
        assert!(explanation.ends_with('…'));
    }

    #[test]
    fn sse_frames_split_across_chunks() {
        let mut sse = SseDecoder::new();
        assert!(sse.push(b"data: {\"type\":\"delta\",").is_empty());
        let events = sse.push(b"\"content\":\"<a\"}\r\n\r\n: keep-alive\n\ndata: {\"type\":\"complete\",\"content\":\"<x/>\"}\n\n");

        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events, vec![delta("<a"), complete("<x/>")]);
    }

    #[test]
    fn sse_handles_split_utf8_and_done_marker() {
        let payload = "data: {\"type\":\"delta\",\"content\":\"é\"}\n\n".as_bytes();
        let split = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut sse = SseDecoder::new();
        assert!(sse.push(&payload[..split]).is_empty());
        let events = sse.push(&payload[split..]);
        assert_eq!(events, vec![Ok(delta("é"))]);

        assert!(sse.push(b"data: [DONE]\n\n").is_empty());
    }

    #[test]
    fn sse_malformed_payload_and_trailing_frame() {
        let mut sse = SseDecoder::new();
        let events = sse.push(b"data: {not json}\n\ndata: {\"type\":\"start\",\"model\":\"m\"}");
        assert!(matches!(events.as_slice(), [Err(StreamError::Malformed(_))]));
        assert_eq!(
            sse.finish(),
            vec![Ok(StreamEvent::Start {
                model: Some("m".into()),
                session_id: None
            })]
        );
    }

    #[test]
    fn wire_format_is_camel_case() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"complete","content":"<p/>","changedRegions":["totals"]}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::Complete {
                content: "<p/>".into(),
                changed_regions: vec!["totals".into()]
            }
        );
    }
}
