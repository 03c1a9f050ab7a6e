//! Streaming Response Handling
//!
//! Turns the chat endpoint's chunked body into assistant text.
//!
//! ```text
//!   HTTP body ──bytes──▶ SseDecoder ──StreamEvent──▶ consume_stream ──delta──▶ store
//!                         (UTF-8, lines,              (content, [DONE],
//!                          data: records)              end-of-data)
//! ```
//!
//! The decoder is synchronous and owns no I/O; `consume_stream` awaits one
//! chunk at a time so the caller's state is updated between reads.

mod accumulator;
mod decoder;

pub use accumulator::{consume_stream, FinishReason, StreamOutcome};
pub use decoder::{SseDecoder, StreamEvent, DEFAULT_MAX_BUFFER_BYTES};
