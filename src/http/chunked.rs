//! Chunked transfer coding.
//!
//! # Responsibilities
//! - Decode `size[;ext] CRLF data CRLF` frames one chunk at a time
//! - Encode frames with exact size accounting
//! - Hand chunk extensions through verbatim
//!
//! # Design Decisions
//! - The codec never interprets extensions; `ChunkExtensions` does that
//!   for callers that care
//! - Any framing inconsistency is an `InvalidData` error carrying a
//!   `StreamError`: a desynchronised stream cannot be recovered

use std::io;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::StreamError;
use crate::http::line::{read_line, write_line};

fn framing(message: impl Into<String>) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        StreamError::Framing(message.into()),
    )
}

fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, StreamError::UnexpectedEof)
}

/// Chunk-by-chunk decoder over a buffered reader.
///
/// Call [`start_chunk`](Self::start_chunk), read until
/// [`chunk_left`](Self::chunk_left) is zero, repeat. A zero-size chunk is
/// the last one; the trailer block follows on the underlying reader.
pub struct ChunkedReader<'a, R: ?Sized> {
    inner: &'a mut R,
    chunk_size: u64,
    bytes_read: u64,
    extensions: Option<String>,
}

impl<'a, R> ChunkedReader<'a, R>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    pub fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            chunk_size: 0,
            bytes_read: 0,
            extensions: None,
        }
    }

    /// Read the next size line. Returns the chunk size.
    ///
    /// Extensions are kept as received, minus surrounding whitespace.
    pub async fn start_chunk(&mut self) -> io::Result<u64> {
        if self.bytes_read != self.chunk_size {
            return Err(framing("unfinished chunk"));
        }

        let line = read_line(&mut *self.inner).await?;
        let (size, extensions) = match line.split_once(';') {
            Some((size, ext)) => (size, Some(ext.trim().to_string())),
            None => (line.as_str(), None),
        };
        let size = size.trim();
        let size = u64::from_str_radix(size, 16)
            .map_err(|_| framing(format!("invalid chunk size: {size:?}")))?;

        self.chunk_size = size;
        self.bytes_read = 0;
        self.extensions = extensions;
        Ok(size)
    }

    /// Read payload bytes of the current chunk, at most `chunk_left`.
    ///
    /// The CRLF after the payload is consumed once the chunk is complete.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.chunk_left();
        if left == 0 {
            return Err(framing("chunk finished"));
        }

        let want = buf.len().min(usize::try_from(left).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..want]).await?;
        if n == 0 && want > 0 {
            return Err(unexpected_eof());
        }

        self.bytes_read += n as u64;
        if self.bytes_read == self.chunk_size {
            let terminator = read_line(&mut *self.inner).await?;
            if !terminator.is_empty() {
                return Err(framing("chunk data not followed by CRLF"));
            }
        }
        Ok(n)
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_left(&self) -> u64 {
        self.chunk_size - self.bytes_read
    }

    /// Extension string of the current chunk, without the leading `;`.
    pub fn extensions(&self) -> Option<&str> {
        self.extensions.as_deref()
    }
}

/// Chunk-by-chunk encoder over a writer.
pub struct ChunkedWriter<'a, W: ?Sized> {
    inner: &'a mut W,
    chunk_size: u64,
    bytes_written: u64,
    open: bool,
}

impl<'a, W> ChunkedWriter<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    pub fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            chunk_size: 0,
            bytes_written: 0,
            open: false,
        }
    }

    /// Write the size line of a chunk that will carry exactly `size` bytes.
    pub async fn start_chunk(&mut self, size: u64, extensions: Option<&str>) -> io::Result<()> {
        if self.open {
            return Err(framing("unfinished chunk"));
        }

        let mut line = format!("{size:x}");
        if let Some(ext) = extensions {
            line.push(';');
            line.push_str(ext);
        }
        write_line(&mut *self.inner, &line).await?;

        self.chunk_size = size;
        self.bytes_written = 0;
        self.open = size > 0;
        Ok(())
    }

    /// Write payload bytes; more than the chunk has left is an error.
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if buf.len() as u64 > self.chunk_left() {
            return Err(framing("not enough bytes left in chunk"));
        }
        self.inner.write_all(buf).await?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    /// Terminate a fully written chunk with CRLF.
    pub async fn end_chunk(&mut self) -> io::Result<()> {
        if !self.open || self.chunk_left() != 0 {
            return Err(framing("chunk not completely written"));
        }
        self.open = false;
        self.inner.write_all(b"\r\n").await
    }

    /// Write the terminal zero-size chunk and flush. The trailer comes next.
    pub async fn close(&mut self) -> io::Result<()> {
        self.close_with_extensions(None).await
    }

    pub async fn close_with_extensions(&mut self, extensions: Option<&str>) -> io::Result<()> {
        self.start_chunk(0, extensions).await?;
        self.inner.flush().await
    }

    pub fn chunk_left(&self) -> u64 {
        self.chunk_size - self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::headers::Headers;

    async fn encode(parts: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut writer = ChunkedWriter::new(&mut out);
        for part in parts {
            writer.start_chunk(part.len() as u64, None).await.unwrap();
            writer.write(part).await.unwrap();
            writer.end_chunk().await.unwrap();
        }
        writer.close().await.unwrap();
        Headers::new().write(&mut out).await.unwrap();
        out
    }

    async fn decode(mut input: &[u8]) -> (Vec<u8>, Vec<Option<String>>, Headers) {
        let mut body = Vec::new();
        let mut extensions = Vec::new();
        {
            let mut reader = ChunkedReader::new(&mut input);
            loop {
                let size = reader.start_chunk().await.unwrap();
                extensions.push(reader.extensions().map(str::to_string));
                if size == 0 {
                    break;
                }
                let mut buf = [0u8; 3];
                while reader.chunk_left() > 0 {
                    let n = reader.read(&mut buf).await.unwrap();
                    body.extend_from_slice(&buf[..n]);
                }
            }
        }
        let mut trailer = Headers::new();
        trailer.read(&mut input).await.unwrap();
        assert!(input.is_empty());
        (body, extensions, trailer)
    }

    #[tokio::test]
    async fn encode_then_decode_reproduces_bytes() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let single = encode(&[data.as_slice()]).await;
        assert_eq!(decode(&single).await.0, data);

        let pieces: Vec<&[u8]> = data.chunks(7).collect();
        let many = encode(&pieces).await;
        assert_eq!(decode(&many).await.0, data);

        let empty = encode(&[]).await;
        assert_eq!(empty, b"0\r\n\r\n");
        assert!(decode(&empty).await.0.is_empty());
    }

    #[tokio::test]
    async fn wire_format_matches_rfc_layout() {
        let encoded = encode(&[b"foo".as_slice()]).await;
        assert_eq!(encoded, b"3\r\nfoo\r\n0\r\n\r\n");

        let mut out = Vec::new();
        let mut writer = ChunkedWriter::new(&mut out);
        writer.start_chunk(26, Some("name=value")).await.unwrap();
        writer.write(b"abcdefghijklmnopqrstuvwxyz").await.unwrap();
        writer.end_chunk().await.unwrap();
        assert_eq!(&out[..16], b"1a;name=value\r\na");
    }

    #[tokio::test]
    async fn extensions_and_trailer_are_kept() {
        let raw = b"4 ; a=1\r\nWiki\r\n5\r\npedia\r\n0;last\r\nExpires: never\r\n\r\n";
        let (body, extensions, trailer) = decode(raw).await;
        assert_eq!(body, b"Wikipedia");
        assert_eq!(
            extensions,
            vec![Some("a=1".to_string()), None, Some("last".to_string())]
        );
        assert_eq!(trailer.get("Expires"), Some("never"));
    }

    #[tokio::test]
    async fn short_body_is_an_error() {
        let mut input: &[u8] = b"10\r\nshort";
        let mut reader = ChunkedReader::new(&mut input);
        reader.start_chunk().await.unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 5);
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn unfinished_chunk_cannot_restart() {
        let mut input: &[u8] = b"5\r\nabcde\r\n0\r\n\r\n";
        let mut reader = ChunkedReader::new(&mut input);
        reader.start_chunk().await.unwrap();
        let err = reader.start_chunk().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn bad_size_line_is_an_error() {
        let mut input: &[u8] = b"xyz\r\n";
        let mut reader = ChunkedReader::new(&mut input);
        assert_eq!(
            reader.start_chunk().await.unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[tokio::test]
    async fn writer_enforces_sizes() {
        let mut out = Vec::new();
        let mut writer = ChunkedWriter::new(&mut out);
        writer.start_chunk(2, None).await.unwrap();
        assert!(writer.write(b"abc").await.is_err());
        writer.write(b"a").await.unwrap();
        assert!(writer.end_chunk().await.is_err());
        assert!(writer.start_chunk(1, None).await.is_err());
        writer.write(b"b").await.unwrap();
        writer.end_chunk().await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(out, b"2\r\nab\r\n0\r\n");
    }
}
