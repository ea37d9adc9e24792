//! Byte-stream transport to a broker endpoint
//!
//! A [`Transport`] opens one [`Connection`] per attempt. Connections speak
//! `embedded-io-async` so they can be handed directly to TLS and MQTT
//! libraries. Transports never retry on their own.

use embedded_io_async::{ErrorType, Read, Write};

/// Remote broker address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Endpoint<'a> {
    /// Hostname (resolved by the transport) or dotted IPv4 literal
    pub host: &'a str,
    /// TCP port, typically 8883 for MQTTS and 1883 for plain MQTT
    pub port: u16,
    /// Whether the supervisor wraps the connection in TLS
    pub use_tls: bool,
}

impl<'a> Endpoint<'a> {
    pub const fn new(host: &'a str, port: u16, use_tls: bool) -> Self {
        Self {
            host,
            port,
            use_tls,
        }
    }
}

/// Transport operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// No route to the host, or the network is down
    Unreachable,
    /// Peer actively refused the connection
    Refused,
    /// Hostname could not be resolved
    DnsFailure,
    /// Peer closed the stream
    Closed,
    /// Operation could not complete without blocking
    WouldBlock,
    /// Operation did not complete in time
    Timeout,
    /// Any other I/O failure
    Io,
}

impl TransportError {
    /// `WouldBlock` means "try again", everything else is a real failure.
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::WouldBlock)
    }
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unreachable => write!(f, "Host unreachable"),
            Self::Refused => write!(f, "Connection refused"),
            Self::DnsFailure => write!(f, "DNS resolution failed"),
            Self::Closed => write!(f, "Connection closed"),
            Self::WouldBlock => write!(f, "Operation would block"),
            Self::Timeout => write!(f, "Transport timeout"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl core::error::Error for TransportError {}

impl embedded_io_async::Error for TransportError {
    fn kind(&self) -> embedded_io_async::ErrorKind {
        use embedded_io_async::ErrorKind;
        match self {
            Self::Unreachable => ErrorKind::NotConnected,
            Self::Refused => ErrorKind::ConnectionRefused,
            Self::Closed => ErrorKind::BrokenPipe,
            Self::Timeout => ErrorKind::TimedOut,
            Self::DnsFailure | Self::WouldBlock | Self::Io => ErrorKind::Other,
        }
    }
}

impl From<embedded_io_async::ErrorKind> for TransportError {
    /// For engines that only report an `embedded-io` error kind
    fn from(kind: embedded_io_async::ErrorKind) -> Self {
        use embedded_io_async::ErrorKind;
        match kind {
            ErrorKind::NotConnected => Self::Unreachable,
            ErrorKind::ConnectionRefused => Self::Refused,
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                Self::Closed
            }
            ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io,
        }
    }
}

/// An open byte stream
///
/// Dropping a connection must release the underlying handle as well;
/// [`Connection::close`] is the orderly path.
pub trait Connection: Read + Write + ErrorType<Error = TransportError> {
    /// Close the stream. Further reads and writes fail with `Closed`.
    fn close(&mut self);
}

/// Opens connections to an [`Endpoint`]
///
/// Implementations may only hold one live connection at a time; callers
/// close (or drop) the previous connection before opening the next.
pub trait Transport {
    type Connection: Connection;

    /// Resolve and connect to `endpoint`.
    ///
    /// # Errors
    ///
    /// `Unreachable`, `Refused` or `DnsFailure` when the connection cannot
    /// be established.
    fn open(
        &mut self,
        endpoint: &Endpoint<'_>,
    ) -> impl core::future::Future<Output = Result<Self::Connection, TransportError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io_async::Error as _;

    #[test]
    fn test_would_block_is_not_a_failure() {
        assert!(!TransportError::WouldBlock.is_failure());
        assert!(TransportError::Closed.is_failure());
        assert!(TransportError::DnsFailure.is_failure());
    }

    #[test]
    fn test_from_error_kind() {
        use embedded_io_async::ErrorKind;
        assert_eq!(TransportError::from(ErrorKind::ConnectionReset), TransportError::Closed);
        assert_eq!(TransportError::from(ErrorKind::TimedOut), TransportError::Timeout);
        assert_eq!(TransportError::from(ErrorKind::InvalidData), TransportError::Io);
        for e in [
            TransportError::Unreachable,
            TransportError::Refused,
            TransportError::Closed,
            TransportError::Timeout,
        ] {
            assert_eq!(TransportError::from(e.kind()), e);
        }
    }

    #[test]
    fn test_error_kinds() {
        use embedded_io_async::ErrorKind;
        assert_eq!(TransportError::Closed.kind(), ErrorKind::BrokenPipe);
        assert_eq!(TransportError::Timeout.kind(), ErrorKind::TimedOut);
        assert_eq!(TransportError::Refused.kind(), ErrorKind::ConnectionRefused);
    }
}
