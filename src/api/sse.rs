//! Incremental `text/event-stream` decoder.
//!
//! Bytes arrive in arbitrary chunks; complete events are dispatched on the blank line that
//! terminates them. Unnamed (`message`) events become log lines, an event named `close`
//! ends the stream, and every other named event is skipped.

use super::ServiceError;
use crate::model::StreamMessage;

const CLOSE_EVENT: &str = "close";

#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    has_data: bool,
    /// Last line ended in `\r`; a `\n` at the start of the next chunk belongs to it.
    skip_lf: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamMessage>, ServiceError> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            if self.skip_lf {
                match self.buf.first() {
                    None => break,
                    Some(b'\n') => {
                        self.buf.remove(0);
                    }
                    Some(_) => {}
                }
                self.skip_lf = false;
            }
            // Lines end in `\n`, `\r\n` or a lone `\r`.
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n' || *b == b'\r') else {
                break;
            };
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            if line.pop() == Some(b'\r') {
                self.skip_lf = true;
            }
            let line = String::from_utf8(line)
                .map_err(|e| ServiceError::Protocol(format!("non UTF-8 event line: {e}")))?;
            if let Some(msg) = self.process_line(&line) {
                out.push(msg);
            }
        }

        Ok(out)
    }

    fn process_line(&mut self, line: &str) -> Option<StreamMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data.push(value.to_string());
                self.has_data = true;
            }
            // id/retry only matter for reconnection, which we never do.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<StreamMessage> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        let has_data = std::mem::replace(&mut self.has_data, false);

        match event.as_deref() {
            Some(CLOSE_EVENT) => Some(StreamMessage::Close),
            None | Some("message") if has_data => Some(StreamMessage::Line(data.join("\n"))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> StreamMessage {
        StreamMessage::Line(s.to_string())
    }

    #[test]
    fn decodes_messages_split_across_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: step").unwrap().is_empty());
        assert!(dec.push(b" 1\n").unwrap().is_empty());
        let msgs = dec.push(b"\ndata: step 2\n\n").unwrap();
        assert_eq!(msgs, vec![line("step 1"), line("step 2")]);
    }

    #[test]
    fn close_event_ends_stream() {
        let mut dec = SseDecoder::new();
        let msgs = dec
            .push(b"data: done\r\n\r\nevent: close\r\ndata: bye\r\n\r\n")
            .unwrap();
        assert_eq!(msgs, vec![line("done"), StreamMessage::Close]);
    }

    #[test]
    fn comments_and_unknown_events_are_skipped() {
        let mut dec = SseDecoder::new();
        let msgs = dec
            .push(b": keep-alive\n\nevent: progress\ndata: 50\n\nid: 7\ndata:x\n\n")
            .unwrap();
        assert_eq!(msgs, vec![line("x")]);
    }

    #[test]
    fn multi_line_data_is_joined_and_repeats_preserved() {
        let mut dec = SseDecoder::new();
        let msgs = dec
            .push(b"data: a\ndata: b\n\ndata: same\n\ndata: same\n\n")
            .unwrap();
        assert_eq!(msgs, vec![line("a\nb"), line("same"), line("same")]);
    }

    #[test]
    fn bare_carriage_returns_end_lines() {
        let mut dec = SseDecoder::new();
        let msgs = dec.push(b"data: one\r\rdata: two\r").unwrap();
        assert_eq!(msgs, vec![line("one")]);
        // The `\n` completes the `\r\n` split across chunks; the next one ends the event.
        let msgs = dec.push(b"\n\n").unwrap();
        assert_eq!(msgs, vec![line("two")]);
        let msgs = dec.push(b"event: close\rdata:\r\r").unwrap();
        assert_eq!(msgs, vec![StreamMessage::Close]);
    }

    #[test]
    fn invalid_utf8_is_a_protocol_error() {
        let mut dec = SseDecoder::new();
        let err = dec.push(b"data: \xff\xfe\n").unwrap_err();
        assert!(matches!(err, ServiceError::Protocol(_)));
    }
}
