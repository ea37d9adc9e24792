//! Secure channel establishment
//!
//! Wraps a freshly opened transport connection in TLS:
//!
//! 1. Load and decode credentials (trust anchor, optional client identity)
//! 2. Configure verification (required unless explicitly made insecure)
//! 3. Run the engine's handshake under an overall deadline
//! 4. Log the peer certificate for audit
//!
//! Credentials live only for the duration of [`SecureChannel::handshake`].
//! On any failure the engine state is reset before the error is returned,
//! and the transport connection has been closed or dropped.

use embedded_hal_async::delay::DelayNs;
use hal_abstractions::{Connection, CredentialStore, TlsEngine, TlsError, VerifyMode};

use crate::config::TlsSettings;
use crate::credentials::{CredentialError, Credentials};
use crate::timeout::with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecureError {
    Credentials(CredentialError),
    Handshake(TlsError),
}

impl core::fmt::Display for SecureError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Credentials(e) => write!(f, "{}", e),
            Self::Handshake(e) => write!(f, "{}", e),
        }
    }
}

impl core::error::Error for SecureError {}

impl From<CredentialError> for SecureError {
    fn from(e: CredentialError) -> Self {
        Self::Credentials(e)
    }
}

impl From<TlsError> for SecureError {
    fn from(e: TlsError) -> Self {
        Self::Handshake(e)
    }
}

/// TLS client driver around an engine `E`
pub struct SecureChannel<E> {
    engine: E,
    settings: TlsSettings,
}

impl<E: TlsEngine> SecureChannel<E> {
    pub fn new(engine: E, settings: TlsSettings) -> Self {
        Self { engine, settings }
    }

    /// Run a TLS handshake over `io`.
    ///
    /// # Arguments
    ///
    /// * `io` - Open transport connection; consumed
    /// * `server_name` - SNI and certificate name
    /// * `store` - Credential source, read once per call
    /// * `delay` - Timer bounding the handshake
    ///
    /// # Errors
    ///
    /// `Credentials(..)` when loading fails (the connection is closed
    /// without any TLS traffic), otherwise `Handshake(..)`.
    pub async fn handshake<C, S, D>(
        &mut self,
        mut io: C,
        server_name: &str,
        store: &mut S,
        delay: &mut D,
    ) -> Result<E::Stream<C>, SecureError>
    where
        C: Connection,
        S: CredentialStore,
        D: DelayNs,
    {
        let verify = self.settings.verify;

        // Step 1: credentials
        let credentials = match Credentials::load(store, verify) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("Credential load failed: {}", e);
                io.close();
                return Err(e.into());
            }
        };

        // Step 2: verification mode
        if verify == VerifyMode::Insecure {
            warn!("TLS certificate verification DISABLED for {}", server_name);
        }
        let params = credentials.params(server_name, verify);
        debug!(
            "TLS handshake with {} (client identity: {})",
            server_name,
            credentials.has_identity()
        );

        // Step 3: bounded handshake
        let outcome = with_timeout(
            delay,
            self.settings.handshake_timeout_ms,
            self.engine.handshake(io, &params),
        )
        .await;
        drop(credentials);

        let stream = match outcome {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("TLS handshake failed: {}", e);
                self.engine.reset();
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    "TLS handshake timed out after {} ms",
                    self.settings.handshake_timeout_ms
                );
                self.engine.reset();
                return Err(TlsError::Timeout.into());
            }
        };

        // Step 4: audit
        match self.engine.peer_certificate(&stream) {
            Some(cert) => info!(
                "TLS established; peer subject '{}', issuer '{}'",
                cert.subject.as_str(),
                cert.issuer.as_str()
            ),
            None => info!("TLS established with {}", server_name),
        }

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_io_async::{ErrorType, Read, Write};
    use hal_abstractions::{HandshakeParams, StaticCredentialStore, TransportError};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Connection that reports when it is closed or dropped
    struct Tracked {
        closed: Rc<Cell<bool>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.closed.set(true);
        }
    }

    impl ErrorType for Tracked {
        type Error = TransportError;
    }

    impl Read for Tracked {
        async fn read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
            Ok(0)
        }
    }

    impl Write for Tracked {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    impl Connection for Tracked {
        fn close(&mut self) {
            self.closed.set(true);
        }
    }

    struct InstantDelay;

    impl DelayNs for InstantDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    /// Engine whose handshake never completes
    #[derive(Default)]
    struct Hanging {
        started: u32,
        resets: u32,
    }

    impl TlsEngine for Hanging {
        type Stream<C: Connection> = C;

        async fn handshake<C: Connection>(
            &mut self,
            _io: C,
            _params: &HandshakeParams<'_>,
        ) -> Result<C, TlsError> {
            self.started += 1;
            core::future::pending().await
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    fn settings(verify: VerifyMode) -> TlsSettings {
        TlsSettings {
            verify,
            handshake_timeout_ms: 15_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_hanging_handshake_times_out_and_resets() {
        let closed = Rc::new(Cell::new(false));
        let io = Tracked {
            closed: closed.clone(),
        };
        let mut channel = SecureChannel::new(Hanging::default(), settings(VerifyMode::Insecure));

        let result = block_on(channel.handshake(
            io,
            "broker.example",
            &mut StaticCredentialStore::new(),
            &mut InstantDelay,
        ));

        assert!(matches!(result, Err(SecureError::Handshake(TlsError::Timeout))));
        assert_eq!(channel.engine.started, 1);
        assert_eq!(channel.engine.resets, 1);
        assert!(closed.get());
    }

    #[test]
    fn test_missing_anchor_skips_handshake() {
        let closed = Rc::new(Cell::new(false));
        let io = Tracked {
            closed: closed.clone(),
        };
        let mut channel = SecureChannel::new(Hanging::default(), settings(VerifyMode::Required));

        let result = block_on(channel.handshake(
            io,
            "broker.example",
            &mut StaticCredentialStore::new(),
            &mut InstantDelay,
        ));

        assert!(matches!(
            result,
            Err(SecureError::Credentials(CredentialError::MissingTrustAnchor))
        ));
        assert_eq!(channel.engine.started, 0);
        assert!(closed.get());
    }
}
