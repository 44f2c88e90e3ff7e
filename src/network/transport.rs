//! TCP transport to the relay server

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{NetworkError, ProtocolError};
use crate::protocol::{PacketType, PacketWriter};

/// Read buffer for the receive side; comfortably holds many audio frames
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Loopback substitute for a wildcard bind address, which is not connectable
pub fn normalize_host(host: &str) -> Option<&'static str> {
    match host {
        "0.0.0.0" | "::" | "[::]" => Some("127.0.0.1"),
        _ => None,
    }
}

pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, NetworkError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::InvalidAddress(format!("{}:{}: {}", host, port, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(NetworkError::InvalidAddress(format!("{}:{}", host, port)));
    }
    Ok(addrs)
}

/// Open a TCP socket with Nagle disabled and a bounded connect time
fn connect_addr(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
    socket
        .set_nodelay(true)
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

    socket
        .connect_timeout(&SockAddr::from(addr), timeout)
        .map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => NetworkError::Timeout,
            _ => NetworkError::ConnectionFailed(format!("{}: {}", addr, e)),
        })?;

    Ok(socket.into())
}

/// Connected stream plus its serialized write side.
///
/// The receive loop reads through its own clone of the socket (see
/// [`Transport::reader`]); shutting the socket down here unblocks it.
pub struct Transport {
    stream: TcpStream,
    writer: PacketWriter<TcpStream>,
    peer: SocketAddr,
}

impl Transport {
    /// Connect to the first reachable address of `host:port`
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, NetworkError> {
        let mut last_err = None;
        for addr in resolve(host, port)? {
            match connect_addr(addr, timeout) {
                Ok(stream) => {
                    return Self::from_stream(stream)
                        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()));
                }
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| NetworkError::InvalidAddress(host.to_string())))
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let writer = PacketWriter::new(stream.try_clone()?);
        Ok(Self {
            stream,
            writer,
            peer,
        })
    }

    /// Buffered read handle for the receive loop
    pub fn reader(&self) -> io::Result<BufReader<TcpStream>> {
        Ok(BufReader::with_capacity(READ_BUFFER_SIZE, self.stream.try_clone()?))
    }

    pub fn writer(&self) -> &PacketWriter<TcpStream> {
        &self.writer
    }

    pub fn send(&self, kind: PacketType, payload: &[u8]) -> Result<(), ProtocolError> {
        self.writer.send(kind, payload)
    }

    pub fn send_within(
        &self,
        kind: PacketType,
        payload: &[u8],
        wait: Duration,
    ) -> Result<(), ProtocolError> {
        self.writer.send_within(kind, payload, wait)
    }

    /// Bound how long a single write may block on a full send buffer
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_write_timeout(timeout)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn shutdown_read(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Read)
    }

    pub fn shutdown_write(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Write)
    }
}
