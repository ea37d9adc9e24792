//! Failure taxonomy
//!
//! Every stage returns an explicit error; only the supervisor decides what
//! to do with it, based on [`StageError::class`].

use hal_abstractions::{ConnectRefusal, ProtocolError, TlsError, TransportError};

use crate::credentials::CredentialError;
use crate::secure::SecureError;
use crate::session::SessionError;

/// How the supervisor treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailureClass {
    /// Network trouble; retried with backoff
    Transient,
    /// Credentials or trust rejected; retried up to `max_attempts`
    Authentication,
    /// Broken session; full reconnect cycle
    Protocol,
    /// Buffer or queue exhaustion; fatal for the attempt only
    Resource,
    /// Configuration that cannot work; never retried
    Fatal,
}

impl FailureClass {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Authentication => "authentication",
            Self::Protocol => "protocol",
            Self::Resource => "resource",
            Self::Fatal => "fatal",
        }
    }

    /// Whether exceeding `max_attempts` stops retrying for this class
    pub const fn is_bounded(&self) -> bool {
        matches!(self, Self::Authentication | Self::Fatal)
    }

    /// Whether the first failure of this class ends retrying
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal)
    }
}

impl core::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed connection stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StageError {
    /// Opening the transport failed
    Transport(TransportError),
    /// Credential loading or the TLS handshake failed
    Secure(SecureError),
    /// CONNECT, SUBSCRIBE or steady-state traffic failed
    Session(SessionError),
    /// Connectivity loss was signaled from outside the session
    ConnectivityLost,
}

impl StageError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transport(_) | Self::ConnectivityLost => FailureClass::Transient,
            Self::Secure(SecureError::Credentials(
                CredentialError::MissingTrustAnchor | CredentialError::Incomplete,
            )) => FailureClass::Fatal,
            Self::Secure(SecureError::Credentials(_)) => FailureClass::Authentication,
            Self::Secure(SecureError::Handshake(e)) => match e {
                TlsError::CertParse | TlsError::TrustFailure => FailureClass::Authentication,
                TlsError::Timeout => FailureClass::Transient,
                TlsError::Protocol => FailureClass::Protocol,
            },
            Self::Session(SessionError::NotConnected) => FailureClass::Protocol,
            Self::Session(SessionError::Protocol(e)) => protocol_class(e),
        }
    }

    /// Whether the failure came from credentials rather than the network
    pub fn is_credential_problem(&self) -> bool {
        matches!(
            self,
            Self::Secure(SecureError::Credentials(
                CredentialError::Malformed(..)
                    | CredentialError::MissingTrustAnchor
                    | CredentialError::Incomplete
            )) | Self::Secure(SecureError::Handshake(TlsError::CertParse))
        )
    }
}

fn protocol_class(e: &ProtocolError) -> FailureClass {
    match e {
        ProtocolError::Refused(ConnectRefusal::ServerUnavailable) => FailureClass::Transient,
        ProtocolError::Refused(_) => FailureClass::Authentication,
        ProtocolError::Timeout | ProtocolError::Transport(_) => FailureClass::Transient,
        ProtocolError::ConnectionLost
        | ProtocolError::Malformed
        | ProtocolError::SubscriptionRejected => FailureClass::Protocol,
        ProtocolError::BufferTooSmall => FailureClass::Resource,
    }
}

impl core::fmt::Display for StageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {}", e),
            Self::Secure(e) => write!(f, "secure channel: {}", e),
            Self::Session(e) => write!(f, "session: {}", e),
            Self::ConnectivityLost => write!(f, "connectivity lost"),
        }
    }
}

impl core::error::Error for StageError {}

/// Returned by `Supervisor::run` when it stops retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Degraded {
    pub cause: FailureClass,
    pub last_error: StageError,
    /// Escalated failures counted when the supervisor gave up
    pub attempts: u32,
}

impl core::fmt::Display for Degraded {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "degraded after {} attempts ({}): {}",
            self.attempts, self.cause, self.last_error
        )
    }
}

impl core::error::Error for Degraded {}

/// Application request errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// No session is established
    NotConnected,
    /// The request queue is full
    QueueFull,
    InvalidTopic,
    PayloadTooLarge,
}

impl core::fmt::Display for RequestError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not connected"),
            Self::QueueFull => write!(f, "Request queue full"),
            Self::InvalidTopic => write!(f, "Invalid topic"),
            Self::PayloadTooLarge => write!(f, "Payload too large"),
        }
    }
}

impl core::error::Error for RequestError {}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_abstractions::{CredentialName, StoreError};

    #[test]
    fn test_transport_failures_are_transient() {
        for e in [
            TransportError::DnsFailure,
            TransportError::Refused,
            TransportError::Unreachable,
            TransportError::Timeout,
        ] {
            assert_eq!(StageError::Transport(e).class(), FailureClass::Transient);
        }
        assert_eq!(StageError::ConnectivityLost.class(), FailureClass::Transient);
    }

    #[test]
    fn test_certificate_failures_are_authentication() {
        let parse = StageError::Secure(SecureError::Handshake(TlsError::CertParse));
        let trust = StageError::Secure(SecureError::Handshake(TlsError::TrustFailure));
        let load = StageError::Secure(SecureError::Credentials(CredentialError::Unavailable(
            CredentialName::TrustAnchor,
            StoreError::Io,
        )));
        assert_eq!(parse.class(), FailureClass::Authentication);
        assert_eq!(trust.class(), FailureClass::Authentication);
        assert_eq!(load.class(), FailureClass::Authentication);
        assert!(parse.is_credential_problem());
        assert!(!trust.is_credential_problem());
    }

    #[test]
    fn test_handshake_timeout_is_transient() {
        let e = StageError::Secure(SecureError::Handshake(TlsError::Timeout));
        assert_eq!(e.class(), FailureClass::Transient);
    }

    #[test]
    fn test_broker_refusals() {
        let refused = |r| StageError::Session(SessionError::Protocol(ProtocolError::Refused(r)));
        assert_eq!(
            refused(ConnectRefusal::BadCredentials).class(),
            FailureClass::Authentication
        );
        assert_eq!(
            refused(ConnectRefusal::NotAuthorized).class(),
            FailureClass::Authentication
        );
        assert_eq!(
            refused(ConnectRefusal::ServerUnavailable).class(),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_protocol_and_resource_classes() {
        let session = |e| StageError::Session(SessionError::Protocol(e));
        assert_eq!(
            session(ProtocolError::Malformed).class(),
            FailureClass::Protocol
        );
        assert_eq!(
            session(ProtocolError::SubscriptionRejected).class(),
            FailureClass::Protocol
        );
        assert_eq!(
            session(ProtocolError::BufferTooSmall).class(),
            FailureClass::Resource
        );
    }

    #[test]
    fn test_partial_credentials_are_fatal() {
        for e in [CredentialError::Incomplete, CredentialError::MissingTrustAnchor] {
            let stage = StageError::Secure(SecureError::Credentials(e));
            assert_eq!(stage.class(), FailureClass::Fatal);
            assert!(stage.is_credential_problem());
        }
        assert!(FailureClass::Fatal.is_fatal());
        assert!(!FailureClass::Authentication.is_fatal());
    }

    #[test]
    fn test_bounded_classes() {
        assert!(FailureClass::Authentication.is_bounded());
        assert!(FailureClass::Fatal.is_bounded());
        assert!(!FailureClass::Transient.is_bounded());
        assert!(!FailureClass::Protocol.is_bounded());
        assert!(!FailureClass::Resource.is_bounded());
    }
}
