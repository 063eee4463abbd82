//! Buffered HTTP connection with keep-alive bookkeeping.
//!
//! # Responsibilities
//! - Own one socket's buffered reader and writer
//! - Strip hop-by-hop headers on read and rewrite `Connection` on write
//! - Track keep-alive, idle time and the I/O timeout
//! - Probe pooled connections for staleness
//!
//! # Design Decisions
//! - Every socket operation runs under the connection's timeout; expiry
//!   surfaces as `io::ErrorKind::TimedOut`
//! - Reads can only clear `keep_connection`, never set it again
//! - Generic over the stream so tests can run on in-memory pipes

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
    ReadHalf, WriteHalf,
};
use tokio::time::{self, Instant};

use crate::error::ProxyError;
use crate::http::{read_message, write_message, Headers, Message};

/// How long a liveness probe waits for a stray byte.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(1);

/// Headers that never leave the connection they arrived on.
const NON_STANDARD_HOP_HEADERS: [&str; 2] = ["Proxy-Connection", "Keep-Alive"];

/// Result of waiting for the next inbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Bytes are buffered and ready to parse.
    Data,
    /// The peer closed its side.
    Eof,
    /// Nothing arrived within the wait.
    Idle,
}

pub(crate) fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "connection timed out")
}

pub(crate) async fn within<T, F>(limit: Duration, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(timed_out()),
    }
}

/// Drop inbound hop-by-hop headers. Returns false if `Connection` says `close`.
pub fn strip_incoming(headers: &mut Headers) -> bool {
    for name in NON_STANDARD_HOP_HEADERS {
        headers.remove(name);
    }
    !headers
        .value_list("Connection")
        .is_some_and(|tokens| tokens.iter().any(|t| t.eq_ignore_ascii_case("close")))
}

/// Drop headers named by `Connection` and set `Connection` from `keep`.
pub fn prepare_outgoing(headers: &mut Headers, keep: bool) {
    let named: Vec<String> = headers
        .value_list("Connection")
        .unwrap_or_default()
        .into_iter()
        .filter(|t| {
            !t.is_empty()
                && !t.eq_ignore_ascii_case("close")
                && !t.eq_ignore_ascii_case("Transfer-Encoding")
        })
        .map(str::to_string)
        .collect();
    for name in named {
        headers.remove(&name);
    }

    if keep {
        headers.remove("Connection");
    } else {
        headers.insert("Connection", "close");
    }
}

/// One client or origin socket.
#[derive(Debug)]
pub struct Connection<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    peer: String,
    keep_connection: bool,
    last_activity: Instant,
    timeout: Duration,
    closed: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, peer: impl Into<String>, timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            peer: peer.into(),
            keep_connection: true,
            last_activity: Instant::now(),
            timeout,
            closed: false,
        }
    }

    /// Peer label used in logs.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn keep_connection(&self) -> bool {
        self.keep_connection
    }

    pub fn set_keep_connection(&mut self, keep: bool) {
        self.keep_connection = keep;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Time since the last completed message read or write.
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn reader(&mut self) -> &mut BufReader<ReadHalf<S>> {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut BufWriter<WriteHalf<S>> {
        &mut self.writer
    }

    /// Both halves at once, for relays that read and write concurrently.
    pub fn split(&mut self) -> (&mut BufReader<ReadHalf<S>>, &mut BufWriter<WriteHalf<S>>) {
        (&mut self.reader, &mut self.writer)
    }

    /// Parse one message and strip its hop-by-hop headers.
    pub async fn read<M: Message>(&mut self, message: &mut M) -> Result<(), ProxyError> {
        match time::timeout(self.timeout, read_message(&mut self.reader, message)).await {
            Ok(result) => result?,
            Err(_) => return Err(timed_out().into()),
        }
        if !strip_incoming(message.headers_mut()) {
            self.keep_connection = false;
        }
        self.touch();
        Ok(())
    }

    /// Serialize `message` with its `Connection` header rewritten.
    pub async fn write<M: Message>(&mut self, message: &mut M) -> io::Result<()> {
        prepare_outgoing(message.headers_mut(), self.keep_connection);
        within(self.timeout, write_message(&mut self.writer, &*message)).await?;
        self.touch();
        Ok(())
    }

    /// Write raw body bytes and flush.
    pub async fn write_body(&mut self, bytes: &[u8]) -> io::Result<()> {
        let writer = &mut self.writer;
        within(self.timeout, async move {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await
    }

    /// Wait up to `wait` for the next inbound byte without consuming it.
    pub async fn wait_for_data(&mut self, wait: Duration) -> io::Result<Readiness> {
        match time::timeout(wait, self.reader.fill_buf()).await {
            Ok(Ok(buf)) if buf.is_empty() => Ok(Readiness::Eof),
            Ok(Ok(_)) => Ok(Readiness::Data),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(Readiness::Idle),
        }
    }

    /// Whether an idle pooled connection is still clean.
    ///
    /// Reads one byte with a 1 ms timeout. Only the timeout means alive; a
    /// byte or EOF means the peer closed or sent garbage, and that byte is lost.
    pub async fn probe(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match time::timeout(PROBE_TIMEOUT, self.reader.read_u8()).await {
            Err(_) => true,
            Ok(Ok(_)) => false,
            Ok(Err(_)) => false,
        }
    }

    /// Flush and shut down the write side. Errors are ignored.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.keep_connection = false;
        let _ = time::timeout(self.timeout, async {
            let _ = self.writer.flush().await;
            let _ = self.writer.shutdown().await;
        })
        .await;
    }
}
