//! Server-sent-event plumbing.
//!
//! Both sides of the gateway speak SSE: providers stream completions to
//! us, and we frame chunks back to clients. [`SseDecoder`] turns an
//! arbitrary byte stream into whole events regardless of how the network
//! fragments them; the frame helpers produce the exact bytes clients see.

use bytes::Bytes;

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, when the stream names its events (Anthropic
    /// does; OpenAI-compatible streams do not).
    pub event: Option<String>,
    /// Concatenated `data:` lines.
    pub data: String,
}

/// The stream terminator used by OpenAI-compatible streams.
pub const DONE_MARKER: &str = "[DONE]";

/// Incremental SSE decoder.
///
/// Feed it raw bytes as they arrive; it buffers partial lines and yields
/// complete events (terminated by a blank line) in order.
#[derive(Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event completed by it.
    ///
    /// Invalid UTF-8 is replaced rather than erroring: a garbled event
    /// fails JSON parsing downstream, which is the right failure locus.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        // Events are separated by a blank line; tolerate \r\n framing.
        while let Some(boundary) = find_event_boundary(&self.buffer) {
            let raw: String = self.buffer.drain(..boundary.end).collect();
            let raw = &raw[..boundary.start];

            let mut event = None;
            let mut data_lines: Vec<&str> = Vec::new();
            for line in raw.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    event = Some(value.trim().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data_lines.push(value.strip_prefix(' ').unwrap_or(value));
                }
            }

            if !data_lines.is_empty() || event.is_some() {
                events.push(SseEvent {
                    event,
                    data: data_lines.join("\n"),
                });
            }
        }
        events
    }
}

struct Boundary {
    /// End of the event's content.
    start: usize,
    /// End of the separator.
    end: usize,
}

fn find_event_boundary(buffer: &str) -> Option<Boundary> {
    let lf = buffer.find("\n\n").map(|i| Boundary { start: i, end: i + 2 });
    let crlf = buffer
        .find("\r\n\r\n")
        .map(|i| Boundary { start: i, end: i + 4 });

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.start <= b.start { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Frame a JSON payload as `data: <json>\n\n`.
pub fn data_frame(json: &str) -> Bytes {
    Bytes::from(format!("data: {json}\n\n"))
}

/// The terminating `data: [DONE]\n\n` frame.
pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_event_decodes() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn fragmented_event_is_buffered() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"a\"").is_empty());
        assert!(decoder.feed(b":1}").is_empty());
        let events = decoder.feed(b"\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: one\n\ndata: two\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
        assert_eq!(events[2].data, DONE_MARKER);
    }

    #[test]
    fn named_events_carry_their_type() {
        let mut decoder = SseDecoder::new();
        let events =
            decoder.feed(b"event: content_block_delta\ndata: {\"delta\":{}}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(events[0].data, "{\"delta\":{}}");
    }

    #[test]
    fn crlf_framing_is_tolerated() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn frame_layout_is_exact() {
        assert_eq!(&data_frame("{}")[..], b"data: {}\n\n");
        assert_eq!(&done_frame()[..], b"data: [DONE]\n\n");
    }
}
