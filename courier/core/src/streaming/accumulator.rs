//! Stream Accumulator
//!
//! Drives a response body through the [`SseDecoder`] and hands every delta
//! to the caller before the next chunk is requested.

use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::decoder::{SseDecoder, StreamEvent};
use crate::error::ChatError;

/// Why the stream stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// The endpoint sent `data: [DONE]`
    Done,
    /// The connection closed without `[DONE]`
    EndOfData,
}

/// Result of consuming a response stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Everything the assistant produced
    pub content: String,
    /// How the stream ended
    pub finished_by: FinishReason,
    /// Number of non-empty deltas received
    pub deltas: usize,
}

/// Consume `stream` until `[DONE]` or end-of-data
///
/// `on_delta` is called with each new fragment, after it has been added to
/// the running content and before the next chunk is awaited.
///
/// # Errors
///
/// Returns the first error yielded by the stream, or a decoder error.
/// Content received before the error is discarded with the error.
pub async fn consume_stream<S, F>(
    mut stream: S,
    decoder: &mut SseDecoder,
    mut on_delta: F,
) -> Result<StreamOutcome, ChatError>
where
    S: Stream<Item = Result<Bytes, ChatError>> + Unpin,
    F: FnMut(&str),
{
    let mut content = String::new();
    let mut deltas = 0usize;

    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        tracing::trace!(bytes = bytes.len(), "Received stream chunk");

        let events = decoder.feed(&bytes)?;
        if apply_events(events, &mut content, &mut deltas, &mut on_delta) {
            tracing::debug!(deltas, chars = content.chars().count(), "Stream completed");
            return Ok(StreamOutcome {
                content,
                finished_by: FinishReason::Done,
                deltas,
            });
        }
    }

    let events = decoder.finish();
    let finished_by = if apply_events(events, &mut content, &mut deltas, &mut on_delta) {
        FinishReason::Done
    } else {
        tracing::debug!(deltas, "Stream closed without [DONE]");
        FinishReason::EndOfData
    };

    Ok(StreamOutcome {
        content,
        finished_by,
        deltas,
    })
}

/// Returns `true` once `Done` has been seen
fn apply_events<F>(
    events: Vec<StreamEvent>,
    content: &mut String,
    deltas: &mut usize,
    on_delta: &mut F,
) -> bool
where
    F: FnMut(&str),
{
    for event in events {
        match event {
            StreamEvent::Delta(text) => {
                content.push_str(&text);
                *deltas += 1;
                on_delta(&text);
            }
            StreamEvent::Done => return true,
        }
    }
    false
}
