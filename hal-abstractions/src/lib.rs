//! Hardware abstraction traits for IoT firmware
//!
//! This crate defines the seams between the platform-agnostic session
//! supervisor and the board support code. BSPs implement these traits on
//! top of their network stack, TLS library and MQTT client.
//!
//! - **`transport`**: byte-stream connections to a broker endpoint
//! - **`tls`**: TLS handshake engine wrapping a transport connection
//! - **`protocol`**: pub/sub protocol engine driven over a connection
//! - **`credentials`**: named credential blobs (trust anchor, client identity)

#![no_std]
#![deny(unsafe_code)]

pub mod credentials;
pub mod protocol;
pub mod tls;
pub mod transport;

pub use credentials::{CredentialName, CredentialStore, StaticCredentialStore, StoreError};
pub use protocol::{
    ConnectOptions, ConnectRefusal, InboundMessage, ProtocolEngine, ProtocolError, QoS,
    MAX_PAYLOAD_LEN, MAX_TOPIC_LEN,
};
pub use tls::{
    ClientIdentity, HandshakeParams, NoTls, PeerCertificate, TlsEngine, TlsError, VerifyMode,
};
pub use transport::{Connection, Endpoint, Transport, TransportError};
