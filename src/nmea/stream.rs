//! # NMEA Byte Stream
//!
//! Turns raw serial bytes into a sequence of [`Fix`] values.
//!
//! [`SentenceBuffer`] does the line framing and is fully synchronous;
//! [`FixStream`] drives it from any `AsyncRead` and skips records that fail
//! validation, so callers only ever see good fixes or a read failure.

use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use super::decoder::decode_sentence;
use super::protocol::{Fix, NMEA_MAX_SENTENCE_LEN, NMEA_START_BYTE};
use crate::error::{PingerError, Result};

/// Read chunk size for the underlying stream
const READ_CHUNK_SIZE: usize = 256;

/// Incremental line splitter for NMEA sentences
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    buf: BytesMut,
    /// Set while discarding the remainder of an overlong line
    overflowed: bool,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete sentence, if one is buffered
    ///
    /// Lines that do not start with `$` (typically a record cut in half when
    /// the port was opened) and lines longer than [`NMEA_MAX_SENTENCE_LEN`]
    /// are dropped without being returned.
    pub fn next_sentence(&mut self) -> Option<String> {
        loop {
            let Some(newline) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > NMEA_MAX_SENTENCE_LEN {
                    debug!("Discarding {} bytes without line terminator", self.buf.len());
                    self.buf.clear();
                    self.overflowed = true;
                }
                return None;
            };

            let line = self.buf.split_to(newline + 1);
            if std::mem::take(&mut self.overflowed) {
                continue;
            }

            let line = trim_line(&line);
            if line.is_empty() {
                continue;
            }
            if line.len() > NMEA_MAX_SENTENCE_LEN || line[0] != NMEA_START_BYTE {
                trace!("Dropping partial record ({} bytes)", line.len());
                continue;
            }

            return Some(String::from_utf8_lossy(line).into_owned());
        }
    }

    /// Number of buffered bytes not yet framed into a sentence
    pub fn pending(&self) -> usize {
        self.buf.remaining()
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    let start = line[..end]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(end);
    &line[start..end]
}

/// Lazy, non-restartable source of fixes over an async byte stream
pub struct FixStream<R> {
    reader: R,
    sentences: SentenceBuffer,
    /// Maximum silence on the underlying stream before giving up
    idle_limit: Duration,
    last_data: Instant,
    rejected: u64,
}

impl<R> std::fmt::Debug for FixStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixStream")
            .field("idle_limit", &self.idle_limit)
            .field("rejected", &self.rejected)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncRead + Unpin> FixStream<R> {
    /// Wrap a byte stream
    ///
    /// # Arguments
    ///
    /// * `reader` - Serial port or any other byte source
    /// * `idle_limit` - How long the stream may stay completely silent
    pub fn new(reader: R, idle_limit: Duration) -> Self {
        Self {
            reader,
            sentences: SentenceBuffer::new(),
            idle_limit,
            last_data: Instant::now(),
            rejected: 0,
        }
    }

    /// Wait for the next valid fix
    ///
    /// Cancel-safe: bytes already read stay buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`PingerError::Read`] if the underlying read fails, the stream
    /// ends, or no bytes at all arrive within the idle limit.
    pub async fn next_fix(&mut self) -> Result<Fix> {
        loop {
            while let Some(sentence) = self.sentences.next_sentence() {
                match decode_sentence(&sentence) {
                    Ok(Some(fix)) => return Ok(fix),
                    Ok(None) => trace!("Skipping sentence without fix: {}", sentence),
                    Err(e @ PingerError::Checksum { .. }) => {
                        self.rejected += 1;
                        warn!("Dropping NMEA record: {}", e);
                    }
                    Err(e) => {
                        self.rejected += 1;
                        debug!("Dropping NMEA record {:?}: {}", sentence, e);
                    }
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let deadline = self.last_data + self.idle_limit;
            let read = timeout_at(deadline, self.reader.read(&mut chunk))
                .await
                .map_err(|_| PingerError::Read(format!("no data received for {:?}", self.idle_limit)))?
                .map_err(|e| PingerError::Read(e.to_string()))?;

            if read == 0 {
                return Err(PingerError::Read("stream closed".to_string()));
            }

            self.last_data = Instant::now();
            self.sentences.extend(&chunk[..read]);
        }
    }

    /// Records dropped so far for checksum or format errors
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
