//! TLS handshake engine
//!
//! The engine owns the record layer and certificate-chain validation. The
//! supervisor hands it an open [`Connection`] plus DER-encoded credentials
//! and gets back an encrypted stream that is itself a [`Connection`].

use heapless::String;

use crate::transport::Connection;

/// Maximum length kept for peer certificate subject/issuer summaries
pub const PEER_NAME_LEN: usize = 64;

/// Server certificate verification mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VerifyMode {
    /// Reject the peer unless its chain validates against the trust anchor
    #[default]
    Required,
    /// Accept any peer certificate. Test setups only.
    Insecure,
}

/// DER-encoded client certificate and private key for mutual TLS
#[derive(Debug, Clone, Copy)]
pub struct ClientIdentity<'a> {
    pub certificate: &'a [u8],
    pub private_key: &'a [u8],
}

/// Everything the engine needs for one handshake
#[derive(Debug, Clone, Copy)]
pub struct HandshakeParams<'a> {
    /// Name sent in SNI and matched against the peer certificate
    pub server_name: &'a str,
    /// DER trust anchor; `None` only when `verify` is `Insecure`
    pub trust_anchor: Option<&'a [u8]>,
    pub identity: Option<ClientIdentity<'a>>,
    pub verify: VerifyMode,
}

/// TLS handshake errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TlsError {
    /// A certificate or key could not be parsed
    CertParse,
    /// The peer chain did not validate against the trust anchor
    TrustFailure,
    /// The handshake did not finish in time
    Timeout,
    /// Alert, unexpected message or transport failure mid-handshake
    Protocol,
}

impl core::fmt::Display for TlsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CertParse => write!(f, "Certificate parse error"),
            Self::TrustFailure => write!(f, "Peer certificate not trusted"),
            Self::Timeout => write!(f, "TLS handshake timeout"),
            Self::Protocol => write!(f, "TLS protocol error"),
        }
    }
}

impl core::error::Error for TlsError {}

/// Summary of the peer's leaf certificate, for audit logging
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerCertificate {
    pub subject: String<PEER_NAME_LEN>,
    pub issuer: String<PEER_NAME_LEN>,
}

/// A TLS client implementation
///
/// # Example
///
/// ```ignore
/// let stream = engine.handshake(tcp, &params).await?;
/// if let Some(cert) = engine.peer_certificate(&stream) {
///     info!("peer: {}", cert.subject.as_str());
/// }
/// ```
pub trait TlsEngine {
    /// Encrypted stream over a transport connection
    type Stream<C: Connection>: Connection;

    /// Run a client-mode handshake over `io`.
    ///
    /// On error the engine has already dropped `io` and any state created
    /// for this attempt.
    fn handshake<C: Connection>(
        &mut self,
        io: C,
        params: &HandshakeParams<'_>,
    ) -> impl core::future::Future<Output = Result<Self::Stream<C>, TlsError>>;

    /// Peer certificate of an established stream, when the engine keeps it.
    fn peer_certificate<C: Connection>(&self, _stream: &Self::Stream<C>) -> Option<PeerCertificate> {
        None
    }

    /// Discard per-connection engine state after a failed or abandoned
    /// handshake.
    fn reset(&mut self) {}
}

/// Engine for plain-TCP builds; every handshake is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTls;

impl TlsEngine for NoTls {
    type Stream<C: Connection> = C;

    async fn handshake<C: Connection>(
        &mut self,
        io: C,
        _params: &HandshakeParams<'_>,
    ) -> Result<C, TlsError> {
        drop(io);
        Err(TlsError::Protocol)
    }
}
