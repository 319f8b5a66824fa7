//! Line framing over async byte streams.
//!
//! [`LineReader`] yields one terminated line at a time, refusing lines longer
//! than a configured bound so a misbehaving peer cannot grow the buffer
//! without limit. [`LineWriter`] writes encoded messages.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_LINE_LENGTH;
use crate::codec::{MESSAGE_TERMINUS, encode};
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::Message;

/// Reads terminated lines from a buffered byte stream.
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    /// Creates a reader bounded by [`MAX_LINE_LENGTH`].
    pub fn new(reader: R) -> Self {
        Self::with_max_len(reader, MAX_LINE_LENGTH)
    }

    /// Creates a reader bounded by `max_len` bytes per line, excluding the terminus.
    pub fn with_max_len(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            max_len,
        }
    }

    /// Reads the next line, without its terminus.
    ///
    /// Returns `Ok(None)` on a clean end of stream between lines.
    pub async fn read_line(&mut self) -> ProtocolResult<Option<String>> {
        self.buf.clear();

        let limit = self.max_len as u64 + 1;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(MESSAGE_TERMINUS as u8, &mut self.buf)
            .await?;

        if read == 0 {
            return Ok(None);
        }

        if self.buf.last() != Some(&(MESSAGE_TERMINUS as u8)) {
            if self.buf.len() > self.max_len {
                return Err(ProtocolError::LineTooLong { max: self.max_len });
            }
            return Err(ProtocolError::IncompleteLine {
                received: self.buf.len(),
            });
        }

        self.buf.pop();
        let line = String::from_utf8(std::mem::take(&mut self.buf))?;
        Ok(Some(line))
    }

    /// Returns a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Unwraps this reader, returning the underlying stream.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes terminated lines to a byte stream.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes an already-encoded line, appending the terminus if missing.
    pub async fn write_line(&mut self, line: &str) -> ProtocolResult<()> {
        self.writer.write_all(line.as_bytes()).await?;
        if !line.ends_with(MESSAGE_TERMINUS) {
            self.writer.write_all(&[MESSAGE_TERMINUS as u8]).await?;
        }
        Ok(())
    }

    /// Encodes and writes a message.
    pub async fn write_message(&mut self, message: &Message) -> ProtocolResult<()> {
        self.write_line(&encode(message)).await
    }

    /// Flushes the underlying writer.
    pub async fn flush(&mut self) -> ProtocolResult<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the write half.
    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Unwraps this writer, returning the underlying stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_lines_until_eof() {
        let data: &[u8] = b"G|1\nR\nT|hi|2\n";
        let mut reader = LineReader::new(BufReader::new(data));

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("G|1"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("R"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("T|hi|2"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_overlong_lines() {
        let data: &[u8] = b"T|0123456789\n";
        let mut reader = LineReader::with_max_len(BufReader::new(data), 4);

        let err = reader.read_line().await.unwrap_err();
        assert!(matches!(err, ProtocolError::LineTooLong { max: 4 }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn line_at_the_bound_is_accepted() {
        let data: &[u8] = b"G|12\n";
        let mut reader = LineReader::with_max_len(BufReader::new(data), 4);
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("G|12"));
    }

    #[tokio::test]
    async fn unterminated_tail_is_incomplete() {
        let data: &[u8] = b"G|1\nD|1";
        let mut reader = LineReader::new(BufReader::new(data));

        assert!(reader.read_line().await.unwrap().is_some());
        assert!(matches!(
            reader.read_line().await,
            Err(ProtocolError::IncompleteLine { received: 3 })
        ));
    }

    #[tokio::test]
    async fn writer_reader_pipe() {
        let (client, server) = tokio::io::duplex(256);
        let mut writer = LineWriter::new(client);
        let mut reader = LineReader::new(BufReader::new(server));

        writer.write_message(&Message::next_frame(3)).await.unwrap();
        writer.write_line("R").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        let first = reader.read_line().await.unwrap().unwrap();
        assert_eq!(decode(&first).unwrap(), Message::next_frame(3));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("R"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }
}
