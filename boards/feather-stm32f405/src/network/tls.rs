#![allow(unsafe_code)] // Required for static TLS buffer access
//! TLS 1.3 engine on top of embedded-tls
//!
//! # Limitations
//!
//! - This build has no certificate verifier. `VerifyMode::Required` is
//!   refused with `TrustFailure`; run with `VerifyMode::Insecure` until a
//!   verifier is wired in.
//! - No client certificates (no signer for the client key); see
//!   `network::config`.
//! - Single connection at a time (static buffers, see `net_buffers`).

use defmt::{error, info, warn, Debug2Format};
use embedded_io_async::{ErrorType, Read, Write};
use embedded_tls::{
    alert::AlertDescription, Aes128GcmSha256, CryptoProvider, NoVerify, TlsConfig, TlsConnection,
    TlsContext, TlsVerifier,
};
use hal_abstractions::{Connection, HandshakeParams, TlsEngine, TlsError, TransportError, VerifyMode};

use crate::net_buffers;

/// Crypto provider that borrows the hardware RNG for one handshake
struct SimpleCryptoProvider<'a, RNG> {
    rng: &'a mut RNG,
    verifier: NoVerify,
}

impl<'a, RNG> SimpleCryptoProvider<'a, RNG> {
    fn new(rng: &'a mut RNG) -> Self {
        Self {
            rng,
            verifier: NoVerify,
        }
    }
}

impl<RNG> CryptoProvider for SimpleCryptoProvider<'_, RNG>
where
    RNG: rand_core::CryptoRngCore,
{
    type CipherSuite = Aes128GcmSha256;
    type Signature = &'static [u8];

    fn rng(&mut self) -> impl rand_core::CryptoRngCore {
        &mut *self.rng
    }

    fn verifier(
        &mut self,
    ) -> Result<&mut impl TlsVerifier<Self::CipherSuite>, embedded_tls::TlsError> {
        Ok(&mut self.verifier)
    }
}

/// embedded-tls behind the `TlsEngine` seam
pub struct EmbeddedTls<RNG> {
    rng: RNG,
}

impl<RNG> EmbeddedTls<RNG>
where
    RNG: rand_core::CryptoRngCore,
{
    pub fn new(rng: RNG) -> Self {
        Self { rng }
    }
}

impl<RNG> TlsEngine for EmbeddedTls<RNG>
where
    RNG: rand_core::CryptoRngCore,
{
    type Stream<C: Connection> = TlsStream<C>;

    async fn handshake<C: Connection>(
        &mut self,
        io: C,
        params: &HandshakeParams<'_>,
    ) -> Result<TlsStream<C>, TlsError> {
        if params.verify == VerifyMode::Required {
            error!("No certificate verifier in this build; refusing to connect");
            return Err(TlsError::TrustFailure);
        }
        if params.identity.is_some() {
            error!("Client certificates are not supported");
            return Err(TlsError::CertParse);
        }

        // SAFETY: the previous TLS connection was closed and dropped by the
        // supervisor before this handshake started.
        let (read_buf, write_buf) = unsafe { net_buffers::tls_buffers() };

        let config = TlsConfig::new().with_server_name(params.server_name);
        let mut connection = TlsConnection::<C, Aes128GcmSha256>::new(io, read_buf, write_buf);

        info!("Initiating TLS 1.3 handshake with hardware RNG...");
        let provider = SimpleCryptoProvider::new(&mut self.rng);
        connection
            .open(TlsContext::new(&config, provider))
            .await
            .map_err(|e| {
                warn!("TLS handshake failed: {:?}", Debug2Format(&e));
                handshake_error(&e)
            })?;

        info!("TLS 1.3 handshake completed with {}", params.server_name);
        Ok(TlsStream {
            connection: Some(connection),
        })
    }
}

/// Sort an embedded-tls failure into what the supervisor retries on.
///
/// Certificate problems on either side are authentication failures; the
/// rest (alerts about ciphers, I/O, record decoding) are protocol failures.
fn handshake_error(e: &embedded_tls::TlsError) -> TlsError {
    use embedded_tls::TlsError as Tls;
    match e {
        Tls::InvalidCertificate | Tls::InvalidSignature => TlsError::TrustFailure,
        Tls::InvalidCertificateEntry | Tls::InvalidCertificateRequest | Tls::InvalidPrivateKey => {
            TlsError::CertParse
        }
        Tls::HandshakeAborted(_, alert) => match alert {
            AlertDescription::BadCertificate
            | AlertDescription::UnsupportedCertificate
            | AlertDescription::CertificateRevoked
            | AlertDescription::CertificateExpired
            | AlertDescription::CertificateUnknown
            | AlertDescription::UnknownCa
            | AlertDescription::AccessDenied
            | AlertDescription::CertificateRequired => TlsError::TrustFailure,
            _ => TlsError::Protocol,
        },
        _ => TlsError::Protocol,
    }
}

/// An established TLS session
pub struct TlsStream<C: Connection> {
    connection: Option<TlsConnection<'static, C, Aes128GcmSha256>>,
}

impl<C: Connection> TlsStream<C> {
    fn live(&mut self) -> Result<&mut TlsConnection<'static, C, Aes128GcmSha256>, TransportError> {
        self.connection.as_mut().ok_or(TransportError::Closed)
    }
}

fn map_io(e: embedded_tls::TlsError) -> TransportError {
    warn!("TLS I/O error: {:?}", Debug2Format(&e));
    TransportError::Io
}

impl<C: Connection> ErrorType for TlsStream<C> {
    type Error = TransportError;
}

impl<C: Connection> Read for TlsStream<C> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.live()?.read(buf).await.map_err(map_io)
    }
}

impl<C: Connection> Write for TlsStream<C> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.live()?.write(buf).await.map_err(map_io)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.live()?.flush().await.map_err(map_io)
    }
}

impl<C: Connection> Connection for TlsStream<C> {
    /// Drops the TLS state together with the socket underneath.
    fn close(&mut self) {
        self.connection = None;
    }
}
