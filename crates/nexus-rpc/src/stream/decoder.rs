use super::{Chunk, STREAM_MARKER, StreamMode};
use crate::codec::CodecError;
use crate::codec::json::from_json;
use crate::value::Value;
use bytes::{Buf, BytesMut};

/// Incremental parser for a streamed response body.
///
/// Feed it reads of any size with [`push`](Self::push); every complete line comes back as a
/// chunk. Call [`finish`](Self::finish) at end of body to flush a final unterminated line.
///
/// Empty lines before the first chunk are skipped. Later empty lines are empty-string chunks
/// in text mode and are skipped in JSON mode, where no chunk encodes to an empty line.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buffer: BytesMut,
    mode: Option<StreamMode>,
    delivered: usize,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode of the stream, known once its first line arrived.
    pub fn mode(&self) -> Option<StreamMode> {
        self.mode
    }

    /// Append a read and return the chunks it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Chunk>, CodecError> {
        self.buffer.extend_from_slice(bytes);
        let mut chunks = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(end);
            self.buffer.advance(1);
            if let Some(chunk) = self.line(&line)? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Flush whatever is left after the last newline.
    pub fn finish(&mut self) -> Result<Option<Chunk>, CodecError> {
        let rest = self.buffer.split();
        if rest.is_empty() {
            return Ok(None);
        }
        self.line(&rest)
    }

    fn line(&mut self, raw: &[u8]) -> Result<Option<Chunk>, CodecError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| CodecError::malformed(format!("stream line is not UTF-8: {e}")))?;
        let text = text.strip_suffix('\r').unwrap_or(text);
        if text.is_empty() && (self.delivered == 0 || self.mode == Some(StreamMode::Json)) {
            return Ok(None);
        }

        let mode = match self.mode {
            Some(mode) => mode,
            None if text == STREAM_MARKER => {
                self.mode = Some(StreamMode::Json);
                return Ok(None);
            }
            None => *self.mode.insert(StreamMode::Text),
        };

        let chunk = match mode {
            StreamMode::Json => from_json(serde_json::from_str(text)?),
            StreamMode::Text => Value::String(text.to_string()),
        };
        let first = self.delivered == 0;
        self.delivered += 1;
        Ok(Some(Chunk { chunk, first }))
    }
}
