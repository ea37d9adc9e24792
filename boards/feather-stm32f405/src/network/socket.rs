#![allow(unsafe_code)] // Required for static socket buffers
//! TCP transport over embassy-net
//!
//! Resolves the broker host, connects a `TcpSocket` and hands it to the
//! supervisor as a [`Connection`]. Socket buffers are the static ones in
//! [`crate::net_buffers`]; only one connection exists at a time.

use defmt::{debug, error, info, Debug2Format};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{self, ConnectError, TcpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use embedded_io_async::{ErrorType, Read, Write};
use hal_abstractions::{Connection, Endpoint, Transport, TransportError};

use crate::net_buffers;

/// Broker transport built on the embassy-net stack
pub struct NetTransport {
    stack: Stack<'static>,
}

impl NetTransport {
    pub fn new(stack: Stack<'static>) -> Self {
        Self { stack }
    }

    async fn resolve(&self, host: &str) -> Result<IpAddress, TransportError> {
        if let Ok(ip) = host.parse::<core::net::Ipv4Addr>() {
            return Ok(IpAddress::Ipv4(ip));
        }
        self.stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|e| {
                error!("DNS query failed: {:?}", Debug2Format(&e));
                TransportError::DnsFailure
            })?
            .first()
            .copied()
            .ok_or_else(|| {
                error!("DNS returned no results for {}", host);
                TransportError::DnsFailure
            })
    }
}

impl Transport for NetTransport {
    type Connection = TcpConnection;

    async fn open(&mut self, endpoint: &Endpoint<'_>) -> Result<TcpConnection, TransportError> {
        if !self.stack.is_config_up() {
            return Err(TransportError::Unreachable);
        }

        let ip = self.resolve(endpoint.host).await?;
        let remote = IpEndpoint::new(ip, endpoint.port);
        debug!("Resolved {} to {}", endpoint.host, Debug2Format(&remote));

        // SAFETY: the supervisor closes the previous connection, dropping
        // its socket, before it opens a new one.
        let (rx, tx) = unsafe { net_buffers::tcp_buffers() };
        let mut socket = TcpSocket::new(self.stack, rx, tx);
        socket.connect(remote).await.map_err(|e| {
            debug!("TCP connect failed: {:?}", e);
            match e {
                ConnectError::ConnectionReset => TransportError::Refused,
                ConnectError::TimedOut => TransportError::Timeout,
                ConnectError::NoRoute => TransportError::Unreachable,
                ConnectError::InvalidState => TransportError::Io,
            }
        })?;
        info!("TCP connection established to {}", Debug2Format(&remote));

        Ok(TcpConnection { socket })
    }
}

/// A connected TCP socket
pub struct TcpConnection {
    socket: TcpSocket<'static>,
}

fn map_io(e: tcp::Error) -> TransportError {
    match e {
        tcp::Error::ConnectionReset => TransportError::Closed,
    }
}

impl ErrorType for TcpConnection {
    type Error = TransportError;
}

impl Read for TcpConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.socket.read(buf).await.map_err(map_io)? {
            // EOF from the peer
            0 if !buf.is_empty() => Err(TransportError::Closed),
            n => Ok(n),
        }
    }
}

impl Write for TcpConnection {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.socket.write(buf).await.map_err(map_io)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.socket.flush().await.map_err(map_io)
    }
}

impl Connection for TcpConnection {
    fn close(&mut self) {
        self.socket.abort();
        debug!("TCP socket closed");
    }
}
