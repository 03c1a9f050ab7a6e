//! Server-Sent Events Decoder
//!
//! Incremental decoder for the chat endpoint's response body. Bytes go in as
//! they arrive from the network; [`StreamEvent`]s come out as soon as a
//! complete `data: ` record has been seen.
//!
//! # Record Handling
//!
//! - Records are newline-terminated; a trailing `\r` is dropped.
//! - Empty records and `:` comments are skipped.
//! - Records without the `data: ` prefix are skipped.
//! - `data: [DONE]` ends decoding; later input is ignored.
//! - Any other payload must be JSON. The delta is read from
//!   `choices[0].delta.content`.
//!
//! A payload that fails to parse is pushed back to the front of the buffer
//! and decoding pauses until more bytes arrive. If it still fails once a
//! further complete record is queued behind it, or when the source ends, it
//! is dropped with a warning so decoding always makes progress.

use serde_json::Value;

use crate::error::ChatError;

/// Default cap on undecoded buffered text
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1024 * 1024;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";
const DELTA_POINTER: &str = "/choices/0/delta/content";

/// A decoded unit of the response stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of assistant text
    Delta(String),
    /// The endpoint signalled the end of the response
    Done,
}

/// Classification of one line of the stream
#[derive(Debug, PartialEq, Eq)]
enum Record<'a> {
    Skip,
    Done,
    Payload(&'a str),
}

fn classify(line: &str) -> Record<'_> {
    if line.starts_with(':') || line.trim().is_empty() {
        return Record::Skip;
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(rest) => {
            let payload = rest.trim();
            if payload == DONE_MARKER {
                Record::Done
            } else {
                Record::Payload(payload)
            }
        }
        None => Record::Skip,
    }
}

/// Pull the text delta out of an OpenAI-style chunk
fn extract_delta(value: &Value) -> Option<&str> {
    value
        .pointer(DELTA_POINTER)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Incremental decoder for `data: <json>` event streams
#[derive(Debug)]
pub struct SseDecoder {
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending: Vec<u8>,
    /// Decoded text not yet consumed as records
    buffer: String,
    /// The record at the front of `buffer` already failed to parse once
    stalled: bool,
    /// `[DONE]` was seen
    done: bool,
    max_buffer_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    /// Create a decoder with the default buffer limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER_BYTES)
    }

    /// Create a decoder with a custom buffer limit
    #[must_use]
    pub fn with_max_buffer(max_buffer_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            buffer: String::new(),
            stalled: false,
            done: false,
            max_buffer_bytes,
        }
    }

    /// Whether `[DONE]` has been seen
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes of decoded text waiting for a newline
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one chunk of the response body
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::BufferOverflow`] if the text left over after
    /// extracting records exceeds the configured limit.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>, ChatError> {
        if self.done {
            return Ok(Vec::new());
        }

        self.decode_utf8(bytes);
        let events = self.drain_records(false);

        if self.buffer.len() > self.max_buffer_bytes {
            return Err(ChatError::BufferOverflow {
                limit: self.max_buffer_bytes,
            });
        }
        Ok(events)
    }

    /// Flush whatever is left once the source reports end-of-data
    ///
    /// A final record without its newline is still decoded. A record that
    /// cannot be parsed at this point is dropped.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }

        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        if !self.buffer.is_empty() && !self.buffer.ends_with('\n') {
            self.buffer.push('\n');
        }

        let events = self.drain_records(true);
        self.buffer.clear();
        self.stalled = false;
        events
    }

    /// Append a chunk to the text buffer
    ///
    /// Incomplete sequences at the end of the chunk wait for the next one.
    /// Bytes that can never be valid become U+FFFD.
    fn decode_utf8(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);

        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    start = self.pending.len();
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    let text =
                        std::str::from_utf8(&self.pending[start..start + valid]).unwrap_or_default();
                    self.buffer.push_str(text);
                    match err.error_len() {
                        Some(invalid) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            start += valid + invalid;
                        }
                        None => {
                            start += valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
    }

    /// Extract complete records from the front of the buffer
    fn drain_records(&mut self, at_eof: bool) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }

            let retrying = std::mem::take(&mut self.stalled);

            match classify(&line) {
                Record::Skip => {}
                Record::Done => {
                    tracing::debug!("Stream signalled [DONE]");
                    self.done = true;
                    self.buffer.clear();
                    self.pending.clear();
                    events.push(StreamEvent::Done);
                    break;
                }
                Record::Payload(payload) => match serde_json::from_str::<Value>(payload) {
                    Ok(value) => {
                        if let Some(delta) = extract_delta(&value) {
                            events.push(StreamEvent::Delta(delta.to_string()));
                        }
                    }
                    Err(err) => {
                        let more_queued = self.buffer.contains('\n');
                        if at_eof || (retrying && more_queued) {
                            tracing::warn!(
                                error = %err,
                                record_len = line.len(),
                                "Dropping unparseable stream record"
                            );
                            continue;
                        }

                        tracing::trace!(error = %err, "Record incomplete, waiting for more data");
                        line.push('\n');
                        self.buffer.insert_str(0, &line);
                        self.stalled = true;
                        break;
                    }
                },
            }
        }

        events
    }
}
