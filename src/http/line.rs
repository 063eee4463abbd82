//! Line-oriented wire I/O shared by start lines, headers and chunk framing.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Longest accepted line, CR/LF excluded.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Read one LF-terminated line. CR bytes are dropped, bytes map to Latin-1.
///
/// End of stream before the LF is an `UnexpectedEof` error.
pub async fn read_line<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = String::new();
    loop {
        let (used, complete) = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of stream",
                ));
            }
            let newline = buf.iter().position(|&b| b == b'\n');
            let chunk = &buf[..newline.unwrap_or(buf.len())];
            line.extend(chunk.iter().filter(|&&b| b != b'\r').map(|&b| b as char));
            (newline.map_or(buf.len(), |i| i + 1), newline.is_some())
        };
        reader.consume(used);

        if line.len() > MAX_LINE_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
        }
        if complete {
            return Ok(line);
        }
    }
}

/// Write `line` followed by CRLF. Characters outside Latin-1 become `?`.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut bytes: Vec<u8> = line
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    bytes.extend_from_slice(b"\r\n");
    writer.write_all(&bytes).await
}
