//! Thin async wrappers over `tokio::net::TcpStream`/`TcpListener`. Every
//! fallible operation here downgrades to a `bool`/`Option` return plus a log
//! line at the boundary — callers never see an `io::Error`.

use std::net::SocketAddr;
use std::time::Duration;

use log::{error, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Binds and listens with `SO_REUSEADDR` and a backlog of 10.
/// `socket2` is used only to set the pre-bind option tokio's `TcpListener`
/// does not expose; everything after bind is plain tokio.
pub async fn bind_and_listen(addr: &str, port: u16) -> std::io::Result<TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};

    let ip: std::net::Ipv4Addr = addr.parse().map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "bind_addr is not IPv4")
    })?;
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let sock_addr: SocketAddr = (ip, port).into();
    socket.bind(&sock_addr.into())?;
    socket.listen(10)?;
    TcpListener::from_std(socket.into())
}

pub enum Accepted {
    Connection(TcpStream, SocketAddr),
    Timeout,
    /// A recoverable OS error on `accept`; the acceptor logs and continues.
    Recoverable,
}

/// Times out an `accept()` call, distinguishing a timeout from a
/// recoverable OS error.
pub async fn accept(listener: &TcpListener, sock_timeout: Duration) -> Accepted {
    match timeout(sock_timeout, listener.accept()).await {
        Ok(Ok((stream, addr))) => Accepted::Connection(stream, addr),
        Ok(Err(err)) => {
            error!("accept failed: {err}");
            Accepted::Recoverable
        }
        Err(_) => Accepted::Timeout,
    }
}

/// Connects to `(host, port)`, returning `None` (and logging) on any
/// failure or timeout.
pub async fn connect(host: &str, port: u16, sock_timeout: Duration) -> Option<TcpStream> {
    let target = format!("{host}:{port}");
    match timeout(sock_timeout, TcpStream::connect(&target)).await {
        Ok(Ok(stream)) => Some(stream),
        Ok(Err(err)) => {
            error!("connect failed to {target}: {err}");
            None
        }
        Err(_) => {
            error!("connect timed out to {target}");
            None
        }
    }
}

/// Writes the whole buffer, or logs and returns `false`.
pub async fn send_all(stream: &mut TcpStream, data: &[u8], sock_timeout: Duration) -> bool {
    match timeout(sock_timeout, stream.write_all(data)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("sendall failed: {err}");
            false
        }
        Err(_) => {
            error!("sendall timed out");
            false
        }
    }
}

/// Reads exactly `n` bytes, or `None` on EOF, error, or timeout: an empty
/// read means the peer closed the connection.
pub async fn recv_exact(stream: &mut TcpStream, n: usize, sock_timeout: Duration) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; n];
    match timeout(sock_timeout, stream.read_exact(&mut buf)).await {
        Ok(Ok(_)) => Some(buf),
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            warn!("client connection closed");
            None
        }
        Ok(Err(err)) => {
            error!("recv failed: {err}");
            None
        }
        Err(_) => {
            error!("recv timed out");
            None
        }
    }
}

/// Reads exactly one byte; used to pull length-prefix fields before reading
/// the body they describe.
pub async fn recv_u8(stream: &mut TcpStream, sock_timeout: Duration) -> Option<u8> {
    recv_exact(stream, 1, sock_timeout).await.map(|b| b[0])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    Progressed,
    BothIdle,
    Closed,
}

/// One readiness-bounded duplex pump step: waits up to 1 second
/// for either side to become readable, forwards whatever arrived to the
/// other side, and returns without blocking indefinitely so the
/// termination signal is observed promptly.
pub async fn pump_step(
    a: &mut TcpStream,
    b: &mut TcpStream,
    a_buf: &mut [u8],
    b_buf: &mut [u8],
) -> PumpOutcome {
    tokio::select! {
        result = a.read(a_buf) => forward(result, a_buf, b).await,
        result = b.read(b_buf) => forward(result, b_buf, a).await,
        _ = tokio::time::sleep(Duration::from_secs(1)) => PumpOutcome::BothIdle,
    }
}

async fn forward(
    result: std::io::Result<usize>,
    buf: &[u8],
    dst: &mut TcpStream,
) -> PumpOutcome {
    match result {
        Ok(0) => PumpOutcome::Closed,
        Ok(n) => {
            if dst.write_all(&buf[..n]).await.is_err() {
                PumpOutcome::Closed
            } else {
                PumpOutcome::Progressed
            }
        }
        Err(err) => {
            error!("relay read failed: {err}");
            PumpOutcome::Closed
        }
    }
}
