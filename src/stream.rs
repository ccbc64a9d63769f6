//! Incremental decoding of streamed answers

use std::fmt::Display;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{ChatError, Result};

const REPLACEMENT: char = '\u{FFFD}';

/// How an answer stream ended when no error occurred
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The body ended normally; holds the full text
    Completed(String),
    /// The caller cancelled; holds what was delivered before the stop
    Cancelled { partial: String },
}

impl StreamOutcome {
    pub fn text(&self) -> &str {
        match self {
            StreamOutcome::Completed(text) => text,
            StreamOutcome::Cancelled { partial } => partial,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamOutcome::Cancelled { .. })
    }
}

/// UTF-8 decoder that carries incomplete multi-byte sequences over to the
/// next chunk. Invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));

                    match e.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT);
                            rest = &tail[len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush at end of input. A dangling partial sequence becomes one U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            REPLACEMENT.to_string()
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Drive a byte stream to completion, calling `on_chunk` with the full
/// accumulated text after every chunk.
///
/// Cancellation is checked before every read. Once `cancel` fires no further
/// callbacks are made and the partial text is returned as
/// [`StreamOutcome::Cancelled`]. A read error ends the loop with
/// [`ChatError::StreamRead`].
pub async fn consume_stream<S, B, E, F>(
    stream: S,
    cancel: &CancellationToken,
    on_chunk: &mut F,
) -> Result<StreamOutcome>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(&str) + ?Sized,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = Utf8Decoder::default();
    let mut accumulated = String::new();
    let mut chunks = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Answer stream cancelled after {} chunks", chunks);
                return Ok(StreamOutcome::Cancelled { partial: accumulated });
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                chunks += 1;
                let text = decoder.decode(bytes.as_ref());
                accumulated.push_str(&text);
                on_chunk(&accumulated);
            }
            Some(Err(e)) => {
                error!("Answer stream failed after {} chunks: {}", chunks, e);
                return Err(ChatError::StreamRead {
                    message: e.to_string(),
                    partial: accumulated,
                });
            }
            None => break,
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        accumulated.push_str(&tail);
        on_chunk(&accumulated);
    }

    debug!("Answer stream finished: {} chunks, {} bytes", chunks, accumulated.len());
    Ok(StreamOutcome::Completed(accumulated))
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use pretty_assertions::assert_eq;

    use super::*;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(p.to_vec()))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_decoder_split_multibyte() {
        // "é" is 0xC3 0xA9
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"caf\xC3"), "caf");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(b"\xA9!"), "é!");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_decoder_four_byte_across_three_chunks() {
        // U+1F600 is F0 9F 98 80
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"\xF0"), "");
        assert_eq!(decoder.decode(b"\x9F\x98"), "");
        assert_eq!(decoder.decode(b"\x80 ok"), "\u{1F600} ok");
    }

    #[test]
    fn test_decoder_invalid_bytes_replaced() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_finish_flushes_dangling() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"x\xE2\x82"), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[tokio::test]
    async fn test_accumulator_is_prefix_decoding() {
        let parts: [&[u8]; 4] = [b"Recur", b"sion is ", b"\xE2\x80", b"\x9Ccool\xE2\x80\x9D"];
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();

        let outcome = consume_stream(chunks(&parts), &cancel, &mut |text: &str| {
            seen.push(text.to_string())
        })
        .await
        .unwrap();

        let mut bytes = Vec::new();
        for (k, part) in parts.iter().enumerate() {
            bytes.extend_from_slice(part);
            let expected = match std::str::from_utf8(&bytes) {
                Ok(s) => s.to_string(),
                Err(e) => String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned(),
            };
            assert_eq!(seen[k], expected);
        }
        assert!(seen.windows(2).all(|w| w[1].starts_with(&w[0])));
        assert_eq!(outcome, StreamOutcome::Completed("Recursion is \u{201C}cool\u{201D}".into()));
    }

    #[tokio::test]
    async fn test_multibyte_boundary_single_character() {
        let parts: [&[u8]; 2] = [b"\xE4\xBD", b"\xA0"];
        let cancel = CancellationToken::new();
        let mut last = String::new();

        consume_stream(chunks(&parts), &cancel, &mut |text: &str| last = text.to_string())
            .await
            .unwrap();

        assert_eq!(last, "你");
        assert!(!last.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_empty_stream_completes_without_callbacks() {
        let cancel = CancellationToken::new();
        let mut calls = 0;

        let outcome = consume_stream(chunks(&[]), &cancel, &mut |_: &str| calls += 1)
            .await
            .unwrap();

        assert_eq!(calls, 0);
        assert_eq!(outcome, StreamOutcome::Completed(String::new()));
    }

    #[tokio::test]
    async fn test_read_error_keeps_partial_and_stops() {
        let items: Vec<std::result::Result<Vec<u8>, String>> = vec![
            Ok(b"Recur".to_vec()),
            Err("connection reset".to_string()),
            Ok(b"never".to_vec()),
        ];
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();

        let err = consume_stream(stream::iter(items), &cancel, &mut |text: &str| {
            seen.push(text.to_string())
        })
        .await
        .unwrap_err();

        assert_eq!(seen, vec!["Recur".to_string()]);
        match err {
            ChatError::StreamRead { message, partial } => {
                assert_eq!(message, "connection reset");
                assert_eq!(partial, "Recur");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_callbacks() {
        let cancel = CancellationToken::new();
        let stream = chunks(&[b"Recur".as_slice()]).chain(stream::pending());
        let mut calls = 0;

        let token = cancel.clone();
        let outcome = consume_stream(stream, &cancel, &mut |_: &str| {
            calls += 1;
            token.cancel();
        })
        .await
        .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(outcome, StreamOutcome::Cancelled { partial: "Recur".into() });
    }

    #[tokio::test]
    async fn test_cancel_before_first_read() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut calls = 0;

        let outcome = consume_stream(chunks(&[b"never".as_slice()]), &cancel, &mut |_: &str| calls += 1)
            .await
            .unwrap();

        assert_eq!(calls, 0);
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.text(), "");
    }
}
