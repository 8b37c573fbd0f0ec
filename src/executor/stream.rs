//! Decoder for the agents' line-delimited JSON event stream.

use super::OutputSink;
use crate::error::ExecutorError;
use crate::signal::{self, Signal};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Events from the agent CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: Delta },

    #[serde(rename = "message_stop")]
    MessageStop {
        #[serde(default)]
        message: Option<AssistantMessage>,
    },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<Value>,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Delta {
    #[serde(rename = "text_delta")]
    Text { text: String },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResultPayload {
    output: String,
}

/// Whether completion markers stay in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerHandling {
    Keep,
    Strip,
}

/// Text and signal decoded from one invocation.
#[derive(Debug, Default)]
pub struct Decoded {
    pub output: String,
    pub signal: Option<Signal>,
    pub error: Option<ExecutorError>,
}

/// Collects decoded chunks in arrival order and forwards each to the sink.
///
/// When stripping, a trailing fragment that may be the start of a marker is
/// held back until the next chunk shows whether it completes one.
pub struct Accumulator<'a> {
    markers: MarkerHandling,
    sink: &'a OutputSink,
    output: String,
    raw: String,
    held: String,
}

impl<'a> Accumulator<'a> {
    pub fn new(markers: MarkerHandling, sink: &'a OutputSink) -> Self {
        Self {
            markers,
            sink,
            output: String::new(),
            raw: String::new(),
            held: String::new(),
        }
    }

    pub fn push(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.raw.push_str(text);

        match self.markers {
            MarkerHandling::Keep => self.emit(text),
            MarkerHandling::Strip => {
                self.held.push_str(text);
                let (cleaned, removed) = signal::remove_completion_markers(&self.held);
                let split = cleaned.len() - signal::partial_marker_len(&cleaned);
                self.held = cleaned[split..].to_string();

                let ready = &cleaned[..split];
                // a chunk that was nothing but a marker leaves no trace
                if !(removed && ready.trim().is_empty()) {
                    self.emit(ready);
                }
            }
        }
    }

    fn emit(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        (self.sink)(text);
        self.output.push_str(text);
    }

    /// Signals are detected on the unstripped text so markers split across
    /// chunks are still found; the last one in the stream wins.
    pub fn finish(mut self, error: Option<ExecutorError>) -> Decoded {
        let held = std::mem::take(&mut self.held);
        self.emit(&held);
        Decoded {
            output: self.output,
            signal: signal::detect(&self.raw),
            error,
        }
    }
}

/// Next line without its terminator, with invalid UTF-8 replaced rather than
/// rejected. `None` at end of stream.
pub(crate) async fn next_line_lossy<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// Extract display text from one line of the event stream.
///
/// Non-JSON lines pass through verbatim. JSON events without text yield `None`.
pub fn decode_line(line: &str) -> Option<String> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Some(format!("{}\n", line)),
    };

    let event: StreamEvent = match serde_json::from_value(value) {
        Ok(e) => e,
        Err(e) => {
            debug!("Skipping unrecognized stream event: {}", e);
            return None;
        }
    };

    match event {
        StreamEvent::Assistant { message } => {
            let text: String = message
                .content
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text),
                    ContentBlock::Other => None,
                })
                .collect();
            Some(text).filter(|t| !t.is_empty())
        }
        StreamEvent::ContentBlockDelta {
            delta: Delta::Text { text },
        } => Some(text),
        StreamEvent::ContentBlockDelta { .. } => None,
        StreamEvent::MessageStop { message } => message.and_then(|m| {
            m.content.into_iter().rev().find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
        }),
        StreamEvent::Result { result } => result.as_ref().and_then(result_text),
        StreamEvent::Other => None,
    }
}

/// The result payload is either `{"output": ...}` or that object encoded as a
/// JSON string. Anything else is a session summary and is dropped.
fn result_text(payload: &Value) -> Option<String> {
    if let Ok(parsed) = ResultPayload::deserialize(payload) {
        return Some(parsed.output);
    }
    payload
        .as_str()
        .and_then(|s| serde_json::from_str::<ResultPayload>(s).ok())
        .map(|parsed| parsed.output)
}

/// Decode a JSON event stream until EOF or cancellation.
pub async fn decode_json_stream<R: AsyncRead + Unpin>(
    reader: R,
    cancel: &CancellationToken,
    markers: MarkerHandling,
    sink: &OutputSink,
) -> Decoded {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut acc = Accumulator::new(markers, sink);

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => return acc.finish(Some(ExecutorError::Cancelled)),
            line = next_line_lossy(&mut reader, &mut buf) => line,
        };

        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(text) = decode_line(&line) {
                    acc.push(&text);
                }
            }
            Ok(None) => break,
            Err(e) => return acc.finish(Some(ExecutorError::Stream(e))),
        }
    }

    acc.finish(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_sink() -> (OutputSink, Arc<Mutex<Vec<String>>>) {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let captured = chunks.clone();
        let sink: OutputSink = Arc::new(move |s: &str| captured.lock().unwrap().push(s.to_string()));
        (sink, chunks)
    }

    async fn decode(input: &str, markers: MarkerHandling) -> (Decoded, Vec<String>) {
        let (sink, chunks) = recording_sink();
        let cancel = CancellationToken::new();
        let decoded = decode_json_stream(input.as_bytes(), &cancel, markers, &sink).await;
        let chunks = chunks.lock().unwrap().clone();
        (decoded, chunks)
    }

    #[test]
    fn test_decode_assistant_concatenates_text_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"a"},{"type":"tool_use","name":"Read","input":{}},{"type":"text","text":"b"}]}}"#;
        assert_eq!(decode_line(line).as_deref(), Some("ab"));
    }

    #[test]
    fn test_decode_text_delta() {
        let line = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"chunk"}}"#;
        assert_eq!(decode_line(line).as_deref(), Some("chunk"));

        let line = r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}"#;
        assert_eq!(decode_line(line), None);
    }

    #[test]
    fn test_decode_message_stop_final_block() {
        let line = r#"{"type":"message_stop","message":{"content":[{"type":"text","text":"first"},{"type":"text","text":"final"}]}}"#;
        assert_eq!(decode_line(line).as_deref(), Some("final"));
        assert_eq!(decode_line(r#"{"type":"message_stop"}"#), None);
    }

    #[test]
    fn test_decode_result_object_and_double_encoded() {
        let line = r#"{"type":"result","result":{"output":"direct"}}"#;
        assert_eq!(decode_line(line).as_deref(), Some("direct"));

        let line = r#"{"type":"result","result":"{\"output\":\"DONE\"}"}"#;
        assert_eq!(decode_line(line).as_deref(), Some("DONE"));
    }

    #[test]
    fn test_decode_result_summary_is_dropped() {
        let line = r#"{"type":"result","subtype":"success","result":"all finished, summary text"}"#;
        assert_eq!(decode_line(line), None);
    }

    #[test]
    fn test_decode_non_json_passes_through() {
        assert_eq!(
            decode_line("warning: something odd").as_deref(),
            Some("warning: something odd\n")
        );
    }

    #[test]
    fn test_decode_ignores_other_events() {
        assert_eq!(decode_line(r#"{"type":"system","subtype":"init"}"#), None);
        assert_eq!(decode_line(r#"{"type":"user","message":{}}"#), None);
    }

    #[tokio::test]
    async fn test_stream_accumulates_in_order() {
        let input = concat!(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}]}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"world"}]}}"#,
            "\n"
        );
        let (decoded, chunks) = decode(input, MarkerHandling::Keep).await;
        assert_eq!(decoded.output, "Helloworld");
        assert_eq!(chunks, vec!["Hello", "world"]);
        assert!(decoded.signal.is_none());
        assert!(decoded.error.is_none());
    }

    #[tokio::test]
    async fn test_stream_detects_signal_split_across_deltas() {
        let input = concat!(
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"done <<<RALPHEX:ALL_TA"}}"#,
            "\n",
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"SKS_DONE>>>"}}"#,
            "\n"
        );
        let (decoded, _) = decode(input, MarkerHandling::Keep).await;
        assert_eq!(decoded.signal, Some(Signal::TaskDone));
    }

    #[tokio::test]
    async fn test_stream_last_signal_wins() {
        let input = concat!(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"<<<RALPHEX:TASK_FAILED>>>"}]}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"<<<RALPHEX:ALL_TASKS_DONE>>>"}]}}"#,
            "\n"
        );
        let (decoded, _) = decode(input, MarkerHandling::Keep).await;
        assert_eq!(decoded.signal, Some(Signal::TaskDone));
    }

    #[tokio::test]
    async fn test_stream_strips_markers_for_secondary() {
        let input = concat!(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"reviewed <<<RALPHEX:CODEX_REVIEW_DONE>>> ok"}]}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"<<<RALPHEX:CODEX_REVIEW_DONE>>>"}]}}"#,
            "\n"
        );
        let (decoded, chunks) = decode(input, MarkerHandling::Strip).await;
        assert_eq!(decoded.output, "reviewed  ok");
        assert_eq!(chunks, vec!["reviewed  ok"]);
        assert_eq!(decoded.signal, Some(Signal::ExternalReviewDone));
    }

    #[tokio::test]
    async fn test_stream_strips_marker_split_across_deltas() {
        let input = concat!(
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"looks good <<<RALPHEX:CODEX_RE"}}"#,
            "\n",
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"VIEW_DONE>>> thanks"}}"#,
            "\n"
        );
        let (decoded, chunks) = decode(input, MarkerHandling::Strip).await;
        assert_eq!(decoded.output, "looks good  thanks");
        assert_eq!(chunks.concat(), decoded.output);
        assert!(!decoded.output.contains("<<<"));
        assert_eq!(decoded.signal, Some(Signal::ExternalReviewDone));
    }

    #[tokio::test]
    async fn test_stream_flushes_unfinished_marker_prefix() {
        let input = concat!(
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"compare a <"}}"#,
            "\n",
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":" b, then <<<RAL"}}"#,
            "\n"
        );
        let (decoded, chunks) = decode(input, MarkerHandling::Strip).await;
        assert_eq!(decoded.output, "compare a < b, then <<<RAL");
        assert_eq!(chunks, vec!["compare a ", "< b, then ", "<<<RAL"]);
        assert!(decoded.signal.is_none());
    }

    #[tokio::test]
    async fn test_stream_survives_invalid_utf8_line() {
        let (sink, _) = recording_sink();
        let cancel = CancellationToken::new();
        let mut input = b"warn \xff byte\n".to_vec();
        input.extend_from_slice(
            br#"{"type":"assistant","message":{"content":[{"type":"text","text":"done <<<RALPHEX:ALL_TASKS_DONE>>>"}]}}"#,
        );
        input.push(b'\n');

        let decoded =
            decode_json_stream(input.as_slice(), &cancel, MarkerHandling::Keep, &sink).await;
        assert!(decoded.error.is_none(), "unexpected error: {:?}", decoded.error);
        assert_eq!(decoded.signal, Some(Signal::TaskDone));
        assert_eq!(
            decoded.output,
            "warn \u{FFFD} byte\ndone <<<RALPHEX:ALL_TASKS_DONE>>>"
        );
    }

    #[tokio::test]
    async fn test_stream_mixed_json_and_plain_lines() {
        let input = "plain line\n\n{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"json\"}]}}\n";
        let (decoded, _) = decode(input, MarkerHandling::Keep).await;
        assert_eq!(decoded.output, "plain line\njson");
    }

    #[tokio::test]
    async fn test_stream_stops_on_cancel() {
        let (sink, _) = recording_sink();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (_writer, reader) = tokio::io::duplex(64);
        let decoded = decode_json_stream(reader, &cancel, MarkerHandling::Keep, &sink).await;
        assert!(matches!(decoded.error, Some(ExecutorError::Cancelled)));
    }
}
