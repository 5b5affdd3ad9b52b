//! Incremental, line-buffered decoding of the agent's NDJSON event stream.
//!
//! The parser consumes arbitrary byte chunks and emits one [`AgentEvent`]
//! per completed line. Partial trailing data (including a line split in the
//! middle of a multi-byte character) is held until more input arrives or
//! the stream closes, so feeding the same bytes split at any chunk
//! boundaries yields the same event sequence.
//!
//! Malformed lines are not fatal: they become [`AgentEvent::Error`]
//! carrying the raw text, so one bad line never aborts an otherwise
//! successful run.

use drydock_types::AgentEvent;

/// Incremental NDJSON event parser.
#[derive(Debug, Default)]
pub struct EventParser {
    buf: Vec<u8>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, emitting events for every completed line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<AgentEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final unterminated line after the stream closed.
    pub fn finish(&mut self) -> Vec<AgentEvent> {
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest).into_iter().collect()
    }

    /// Decode a finite byte slice in one call, e.g. when replaying a
    /// persisted event log.
    pub fn parse_all(bytes: &[u8]) -> Vec<AgentEvent> {
        let mut parser = Self::new();
        let mut events = parser.feed(bytes);
        events.extend(parser.finish());
        events
    }
}

/// Decode one line. Blank lines are skipped; anything that is not a valid
/// event becomes an `Error` event carrying the raw text.
fn parse_line(line: &[u8]) -> Option<AgentEvent> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<AgentEvent>(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, "unparseable event line");
            Some(AgentEvent::Error {
                message: trimmed.to_string(),
            })
        }
    }
}
