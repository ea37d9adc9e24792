//! Pub/sub protocol engine
//!
//! The engine encodes and decodes control packets and owns the channel
//! once connected. Retransmission for QoS 1/2 is its business; results are
//! reported back unchanged.

use heapless::{String, Vec};

use crate::transport::{Connection, TransportError};

/// Maximum topic length, in bytes
pub const MAX_TOPIC_LEN: usize = 64;

/// Maximum payload carried through the supervisor queues, in bytes
pub const MAX_PAYLOAD_LEN: usize = 256;

/// Delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            _ => Err(ProtocolError::Malformed),
        }
    }
}

/// Session parameters sent in CONNECT
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions<'a> {
    pub client_id: &'a str,
    /// Keep-alive in seconds; 0 disables it
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
    pub qos: QoS,
}

/// Reason codes a broker uses to refuse a CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectRefusal {
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
}

impl ConnectRefusal {
    /// Classify a CONNACK return code (MQTT 3.1.1) or reason code (MQTT 5).
    ///
    /// Returns `None` for success and for codes that do not refuse the
    /// client itself (malformed packet, protocol error and the like).
    pub const fn from_reason_code(code: u8) -> Option<Self> {
        match code {
            // 3.1.1
            0x01 => Some(Self::UnacceptableProtocolVersion),
            0x02 => Some(Self::IdentifierRejected),
            0x03 => Some(Self::ServerUnavailable),
            0x04 => Some(Self::BadCredentials),
            0x05 => Some(Self::NotAuthorized),
            // 5.0
            0x84 => Some(Self::UnacceptableProtocolVersion),
            0x85 => Some(Self::IdentifierRejected),
            0x86 | 0x8C => Some(Self::BadCredentials),
            0x87 | 0x8A => Some(Self::NotAuthorized),
            0x88 | 0x89 | 0x97 | 0x9C | 0x9D | 0x9F => Some(Self::ServerUnavailable),
            _ => None,
        }
    }
}

/// Protocol engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Peer closed the session or the channel failed underneath it
    ConnectionLost,
    /// Broker refused the CONNECT
    Refused(ConnectRefusal),
    /// Broker returned a failure code in SUBACK
    SubscriptionRejected,
    /// Packet could not be decoded
    Malformed,
    /// Acknowledgement did not arrive in time
    Timeout,
    /// Packet does not fit the engine's buffers
    BufferTooSmall,
    /// Channel read/write failed
    Transport(TransportError),
}

impl ProtocolError {
    /// Whether the channel is unusable after this error
    pub const fn is_link_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::Malformed | Self::Timeout | Self::Transport(_)
        )
    }
}

impl From<TransportError> for ProtocolError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => Self::ConnectionLost,
            other => Self::Transport(other),
        }
    }
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ConnectionLost => write!(f, "Connection lost"),
            Self::Refused(reason) => write!(f, "Connection refused by broker: {:?}", reason),
            Self::SubscriptionRejected => write!(f, "Subscription rejected"),
            Self::Malformed => write!(f, "Malformed packet"),
            Self::Timeout => write!(f, "Protocol timeout"),
            Self::BufferTooSmall => write!(f, "Protocol buffer too small"),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl core::error::Error for ProtocolError {}

/// Client side of the pub/sub protocol over a channel `C`
///
/// The caller may drop a `poll` future, but only before it has read
/// anything from the channel. Engines must not keep read state across
/// `poll` calls that such a drop would lose.
pub trait ProtocolEngine<C: Connection> {
    /// Take ownership of `channel`, send CONNECT and wait for CONNACK.
    ///
    /// On error the channel has been dropped.
    fn connect(
        &mut self,
        channel: C,
        options: &ConnectOptions<'_>,
    ) -> impl core::future::Future<Output = Result<(), ProtocolError>>;

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) -> impl core::future::Future<Output = Result<(), ProtocolError>>;

    /// Subscribe to `filter`, returning the QoS the broker granted.
    fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
    ) -> impl core::future::Future<Output = Result<QoS, ProtocolError>>;

    /// Wait for the next inbound message or keep-alive event.
    ///
    /// `Ok(None)` means traffic was handled but no application message
    /// arrived.
    fn poll(
        &mut self,
    ) -> impl core::future::Future<Output = Result<Option<InboundMessage>, ProtocolError>>;

    /// Send DISCONNECT. The channel stays owned by the engine.
    fn disconnect(&mut self) -> impl core::future::Future<Output = Result<(), ProtocolError>>;

    /// Drop all session state and hand back the channel, if still held.
    fn release(&mut self) -> Option<C>;
}
