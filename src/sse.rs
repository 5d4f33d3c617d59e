//! Incremental decoder for OpenAI-style `text/event-stream` completion bodies.
//!
//! Network chunks never line up with event lines, so bytes are carried over in
//! the codec buffer and only complete lines are interpreted. The trailing
//! fragment stays buffered until its newline arrives (or the source closes).

use crate::constants::{MAX_SSE_LINE_BYTES, SSE_DATA_PREFIX, SSE_DONE_PAYLOAD};
use crate::specs::openai::ChatCompletionChunk;
use crate::upstream::ByteStream;
use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A non-empty fragment of assistant text.
    Delta(String),
    /// The `data: [DONE]` terminator.
    Done,
}

#[derive(Debug, Error)]
pub enum SseDecodeError {
    #[error("SSE line exceeded {0} bytes")]
    LineTooLong(usize),

    #[error("Upstream read failed: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SseFrameDecoder {
    lines: LinesCodec,
    max_line_length: usize,
    skipped_frames: u64,
}

impl Default for SseFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_SSE_LINE_BYTES)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_length),
            max_line_length,
            skipped_frames: 0,
        }
    }

    /// Data lines that could not be parsed and were dropped.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    fn classify(&mut self, line: &str) -> Option<SseFrame> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        // event:, id:, retry: and `:` keep-alive comments carry no text.
        let payload = trimmed.strip_prefix(SSE_DATA_PREFIX)?.trim_start();
        if payload == SSE_DONE_PAYLOAD {
            return Some(SseFrame::Done);
        }

        let chunk = match serde_json::from_str::<ChatCompletionChunk>(payload) {
            Ok(c) => c,
            Err(e) => {
                self.skipped_frames += 1;
                tracing::debug!(
                    "[STREAM] Skipping unparseable frame ({}): {}",
                    e,
                    crate::str_utils::log_snippet(payload, 200)
                );
                return None;
            }
        };

        if let Some(err) = &chunk.error {
            self.skipped_frames += 1;
            tracing::warn!("[☁️  -> ⚙️ ] Provider reported in-band error: {}", err);
            return None;
        }

        let text = chunk.delta_text();
        if text.is_empty() {
            None
        } else {
            Some(SseFrame::Delta(text.to_string()))
        }
    }

    fn map_line_error(&self, e: LinesCodecError) -> SseDecodeError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => {
                SseDecodeError::LineTooLong(self.max_line_length)
            }
            LinesCodecError::Io(io) => SseDecodeError::Io(io),
        }
    }
}

impl Decoder for SseFrameDecoder {
    type Item = SseFrame;
    type Error = SseDecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SseFrame>, SseDecodeError> {
        loop {
            let line = match self.lines.decode(src) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.map_line_error(e)),
            };
            if let Some(frame) = self.classify(&line) {
                return Ok(Some(frame));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<SseFrame>, SseDecodeError> {
        loop {
            let line = match self.lines.decode_eof(src) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.map_line_error(e)),
            };
            if let Some(frame) = self.classify(&line) {
                return Ok(Some(frame));
            }
        }
    }
}

pub type SseFrames = FramedRead<StreamReader<ByteStream, bytes::Bytes>, SseFrameDecoder>;

/// Binds a fresh decoder to one upstream body.
pub fn decode_stream(body: ByteStream) -> SseFrames {
    FramedRead::new(StreamReader::new(body), SseFrameDecoder::new())
}
