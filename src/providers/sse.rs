//! Server-sent event decoding shared by the streaming providers
//!
//! Every supported backend streams chat completions as SSE. The decoder turns
//! raw byte chunks into `data:` payloads, and [`fragment_stream`] turns those
//! payloads into a [`TextStream`] using a provider-specific frame parser.

use crate::error::ParleyError;
use crate::providers::{ProviderKind, TextStream};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::VecDeque;

/// Incremental SSE decoder
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence, so
/// undecoded bytes are carried over between pushes.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    bytes: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event payload it completes
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.bytes.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.bytes.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            self.process_line(line, &mut events);
        }

        events
    }

    /// Flush whatever is buffered once the byte stream ends
    pub(crate) fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.bytes.is_empty() {
            let raw = std::mem::take(&mut self.bytes);
            let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
            self.process_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        // Comments (keep-alives) start with a colon
        if line.starts_with(':') {
            return;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            let value = rest.strip_prefix(' ').unwrap_or(rest);
            self.data_lines.push(value.to_string());
        }
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if !self.data_lines.is_empty() {
            events.push(self.data_lines.join("\n"));
            self.data_lines.clear();
        }
    }
}

/// What a single SSE payload contributed to the reply
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Frame {
    /// Text to hand to the caller, if any
    pub text: Option<String>,
    /// The model signalled completion
    pub done: bool,
}

impl Frame {
    pub(crate) fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            done: false,
        }
    }

    pub(crate) fn done() -> Self {
        Self {
            text: None,
            done: true,
        }
    }

    pub(crate) fn skip() -> Self {
        Self::default()
    }
}

/// Parses one SSE payload; `Err` carries a provider-reported failure
pub(crate) type FrameParser = fn(&str) -> std::result::Result<Frame, String>;

struct FragmentState {
    kind: ProviderKind,
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    parse: FrameParser,
    completed: bool,
    finished: bool,
}

/// Turn a streaming HTTP response into text fragments
///
/// The stream ends normally only after the parser reports completion. A
/// transport error, a provider error payload, or the connection closing
/// before completion yields one `Err` item and then ends.
pub(crate) fn fragment_stream(
    kind: ProviderKind,
    response: reqwest::Response,
    parse: FrameParser,
) -> TextStream {
    let state = FragmentState {
        kind,
        bytes: response.bytes_stream().boxed(),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        parse,
        completed: false,
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.completed || st.finished {
                return None;
            }

            if let Some(payload) = st.pending.pop_front() {
                match (st.parse)(&payload) {
                    Ok(frame) => {
                        if frame.done {
                            st.completed = true;
                        }
                        match frame.text {
                            Some(text) if !text.is_empty() => return Some((Ok(text), st)),
                            _ => continue,
                        }
                    }
                    Err(cause) => {
                        st.finished = true;
                        tracing::warn!(provider = %st.kind, "Stream reported error: {}", cause);
                        let err = ParleyError::provider(st.kind.display_name(), cause);
                        return Some((Err(err.into()), st));
                    }
                }
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(&chunk);
                    st.pending.extend(events);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    tracing::warn!(provider = %st.kind, "Stream transport failed: {}", e);
                    let err = ParleyError::provider(st.kind.display_name(), e);
                    return Some((Err(err.into()), st));
                }
                None => {
                    let tail = st.decoder.finish();
                    if !tail.is_empty() {
                        st.pending.extend(tail);
                        continue;
                    }
                    st.finished = true;
                    let err = ParleyError::provider(
                        st.kind.display_name(),
                        "stream ended before the model signalled completion",
                    );
                    return Some((Err(err.into()), st));
                }
            }
        }
    })
    .boxed()
}
