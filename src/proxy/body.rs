//! Message body transfer.
//!
//! # Responsibilities
//! - Decide how a message body is delimited
//! - Copy chunked bodies frame by frame, extensions and trailer included
//! - Copy length-delimited and close-delimited bodies
//!
//! # Design Decisions
//! - Every single read and write runs under the idle timeout, so a slow but
//!   steady transfer never times out as a whole
//! - Chunk framing is re-encoded, never passed through as raw bytes

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::StreamError;
use crate::http::{ChunkedReader, ChunkedWriter, Headers, Message};
use crate::net::connection::within;

const BUFFER_SIZE: usize = 8 * 1024;

/// The transfer coding a message announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coding {
    /// No `Transfer-Encoding`, or `identity`.
    Identity,
    Chunked,
    Unknown(String),
}

pub fn transfer_coding<M: Message>(message: &M) -> Coding {
    match message.last_transfer_coding() {
        None => Coding::Identity,
        Some(coding) if coding == "identity" => Coding::Identity,
        Some(coding) if coding == "chunked" => Coding::Chunked,
        Some(coding) => Coding::Unknown(coding),
    }
}

/// `Content-Length` as a number. `Err` carries the unparsable raw value.
pub fn content_length<M: Message>(message: &M) -> Result<Option<u64>, String> {
    match message.headers().get("Content-Length") {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| value.to_string()),
    }
}

fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, StreamError::UnexpectedEof)
}

/// Re-encode a chunked body from `reader` onto `writer`.
///
/// The trailer is read into `trailer` and written after the last chunk.
/// Returns the number of payload bytes.
pub async fn copy_chunked<R, W>(
    reader: &mut R,
    writer: &mut W,
    trailer: &mut Headers,
    timeout: Duration,
) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;
    {
        let mut decoder = ChunkedReader::new(&mut *reader);
        let mut encoder = ChunkedWriter::new(&mut *writer);
        loop {
            let size = within(timeout, decoder.start_chunk()).await?;
            if size == 0 {
                within(timeout, encoder.close_with_extensions(decoder.extensions())).await?;
                break;
            }

            encoder.start_chunk(size, decoder.extensions()).await?;
            while decoder.chunk_left() > 0 {
                let n = within(timeout, decoder.read(&mut buf)).await?;
                within(timeout, encoder.write(&buf[..n])).await?;
                total += n as u64;
            }
            encoder.end_chunk().await?;
        }
    }

    within(timeout, trailer.read(reader)).await?;
    within(timeout, trailer.write(writer)).await?;
    Ok(total)
}

/// Copy exactly `length` bytes. Running short is a stream error.
pub async fn copy_length<R, W>(
    reader: &mut R,
    writer: &mut W,
    length: u64,
    timeout: Duration,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut left = length;
    while left > 0 {
        let want = buf.len().min(usize::try_from(left).unwrap_or(usize::MAX));
        let n = within(timeout, reader.read(&mut buf[..want])).await?;
        if n == 0 {
            return Err(unexpected_eof());
        }
        within(timeout, writer.write_all(&buf[..n])).await?;
        left -= n as u64;
    }
    within(timeout, writer.flush()).await
}

/// Copy until the peer closes. Returns the number of bytes.
pub async fn copy_to_end<R, W>(reader: &mut R, writer: &mut W, timeout: Duration) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = within(timeout, reader.read(&mut buf)).await?;
        if n == 0 {
            break;
        }
        within(timeout, writer.write_all(&buf[..n])).await?;
        total += n as u64;
    }
    within(timeout, writer.flush()).await?;
    Ok(total)
}

/// Read a `length` byte body into memory.
pub async fn read_length<R>(reader: &mut R, length: u64, timeout: Duration) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut body = Vec::new();
    copy_length(reader, &mut body, length, timeout).await?;
    Ok(body)
}
