//! Bidirectional byte relay with half-close propagation.
//!
//! Each direction copies until its source reaches EOF or fails. It then
//! shuts down the write side of its destination and the read side of its
//! source, which leaves the opposite direction free to drain. Both
//! connections are dropped, and therefore closed, only after both directions
//! have finished.

use std::io;
use std::net::Shutdown;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Copy buffer size per direction.
const BUFFER_SIZE: usize = 8192;

/// Read half of a connection that can stop accepting input.
pub trait ShutdownRead {
    /// Stop reading from the underlying connection.
    fn shutdown_read(&self) -> io::Result<()>;
}

/// A duplex connection that splits into independently closable halves.
///
/// Write-side shutdown goes through [`AsyncWriteExt::shutdown`] on the write
/// half; read-side shutdown through [`ShutdownRead`] on the read half.
pub trait SplitDuplex: Send + 'static {
    type Reader: AsyncRead + ShutdownRead + Unpin + Send;
    type Writer: AsyncWrite + Unpin + Send;

    fn split_duplex(self) -> (Self::Reader, Self::Writer);
}

impl SplitDuplex for TcpStream {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    fn split_duplex(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.into_split()
    }
}

impl ShutdownRead for OwnedReadHalf {
    fn shutdown_read(&self) -> io::Result<()> {
        let stream: &TcpStream = self.as_ref();
        SockRef::from(stream).shutdown(Shutdown::Read)
    }
}

impl SplitDuplex for DuplexStream {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = WriteHalf<DuplexStream>;

    fn split_duplex(self) -> (Self::Reader, Self::Writer) {
        tokio::io::split(self)
    }
}

// In-memory pipes have no separate read shutdown; dropping the half is enough.
impl ShutdownRead for ReadHalf<DuplexStream> {
    fn shutdown_read(&self) -> io::Result<()> {
        Ok(())
    }
}

/// How one relay direction ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectionOutcome {
    /// Bytes copied in this direction.
    pub bytes: u64,
    /// Error that ended the direction, `None` on clean EOF.
    pub error: Option<io::ErrorKind>,
}

/// Result of a finished relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub a_to_b: DirectionOutcome,
    pub b_to_a: DirectionOutcome,
}

/// Relay bytes between `a` and `b` until both directions have finished.
///
/// Per-direction errors are reported in the outcome, never returned.
pub async fn relay<A, B>(a: A, b: B, idle_timeout: Option<Duration>) -> RelayOutcome
where
    A: SplitDuplex,
    B: SplitDuplex,
{
    let (mut a_read, mut a_write) = a.split_duplex();
    let (mut b_read, mut b_write) = b.split_duplex();

    let a_to_b = run_direction("a->b", &mut a_read, &mut b_write, idle_timeout);
    let b_to_a = run_direction("b->a", &mut b_read, &mut a_write, idle_timeout);

    let (a_to_b, b_to_a) = tokio::join!(a_to_b, b_to_a);

    // Dropping every half closes both connections.
    drop((a_read, a_write, b_read, b_write));

    RelayOutcome { a_to_b, b_to_a }
}

/// Copy one direction, then half-close both ends it touched.
async fn run_direction<R, W>(
    label: &'static str,
    src: &mut R,
    dst: &mut W,
    idle_timeout: Option<Duration>,
) -> DirectionOutcome
where
    R: AsyncRead + ShutdownRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut bytes = 0u64;
    let result = copy(src, dst, idle_timeout, &mut bytes).await;

    if let Err(e) = &result {
        debug!(direction = label, bytes, error = %e, "Relay direction failed");
    } else {
        debug!(direction = label, bytes, "Relay direction finished");
    }

    if let Err(e) = dst.shutdown().await {
        debug!(direction = label, error = %e, "Write shutdown failed");
    }
    if let Err(e) = src.shutdown_read() {
        debug!(direction = label, error = %e, "Read shutdown failed");
    }

    DirectionOutcome {
        bytes,
        error: result.err().map(|e| e.kind()),
    }
}

async fn copy<R, W>(
    src: &mut R,
    dst: &mut W,
    idle_timeout: Option<Duration>,
    total: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, src.read(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout")),
            },
            None => src.read(&mut buf).await?,
        };

        if n == 0 {
            return Ok(());
        }
        dst.write_all(&buf[..n]).await?;
        *total += n as u64;
    }
}
