//! Server-sent event framing for chat completion deltas.

use std::collections::VecDeque;

use anyhow::Result;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Terminal frame sent after the last delta.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Frames one text delta in the chat-completions chunk shape.
pub fn encode_delta(text: &str) -> Bytes {
    let payload = json!({ "choices": [{ "delta": { "content": text } }] });
    Bytes::from(format!("data: {payload}\n\n"))
}

/// One decoded `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload text of a `data:` line.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental line decoder; bytes may split frames anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns every complete event they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..pos + 1).collect();
            let line = String::from_utf8_lossy(&line_bytes[..pos]);
            let line = line.trim();
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                // event:, id:, retry: carry nothing we relay
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else {
                events.push(SseEvent::Data(data.to_string()));
            }
        }
        events
    }
}

#[derive(Debug, Deserialize)]
struct ChunkFrame {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extracts `choices[0].delta.content` from a frame payload.
///
/// Returns `None` for frames without text; malformed JSON is logged and
/// dropped.
pub fn delta_content(payload: &str) -> Option<String> {
    match serde_json::from_str::<ChunkFrame>(payload) {
        Ok(frame) => frame
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty()),
        Err(err) => {
            debug!(error = %err, "dropping malformed upstream frame");
            None
        }
    }
}

struct DeltaState {
    upstream: BoxStream<'static, Result<Bytes>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Decodes an upstream SSE byte stream into text deltas.
///
/// Ends at `[DONE]` or when the upstream closes. Transport errors are passed
/// through and end the stream.
pub fn delta_stream<S, E>(upstream: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<anyhow::Error>,
{
    let state = DeltaState {
        upstream: upstream.map(|item| item.map_err(Into::into)).boxed(),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.done {
                return None;
            }
            match state.upstream.next().await {
                Some(Ok(bytes)) => {
                    for event in state.decoder.push(&bytes) {
                        match event {
                            SseEvent::Done => {
                                state.done = true;
                                break;
                            }
                            SseEvent::Data(payload) => {
                                if let Some(text) = delta_content(&payload) {
                                    state.pending.push_back(text);
                                }
                            }
                        }
                    }
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
                None => state.done = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encodes_delta_frame() {
        let frame = encode_delta("Hi \"there\"");
        assert_eq!(
            std::str::from_utf8(&frame).unwrap(),
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi \\\"there\\\"\"}}]}\n\n"
        );
    }

    #[test]
    fn decoder_handles_frames_split_across_reads() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(
            decoder.push(b":1}\n\n: keep-alive\n\ndata: [DONE]\n\n"),
            vec![SseEvent::Data("{\"a\":1}".into()), SseEvent::Done]
        );
    }

    #[test]
    fn malformed_and_empty_frames_yield_nothing() {
        assert_eq!(delta_content("{not json"), None);
        assert_eq!(delta_content("{\"choices\":[{\"delta\":{}}]}"), None);
        assert_eq!(delta_content("{\"choices\":[]}"), None);
        assert_eq!(
            delta_content("{\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}"),
            Some("ok".to_string())
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delta_stream_stops_at_done() {
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n")),
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel")),
            Ok(Bytes::from_static(b"lo\"}}]}\n\ndata: garbage\n\n")),
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n")),
        ];
        let deltas: Vec<String> = delta_stream(stream::iter(chunks))
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["Hello".to_string(), "!".to_string()]);
    }
}
