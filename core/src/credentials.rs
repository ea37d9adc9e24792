//! Credential loading for one handshake attempt
//!
//! Credentials are read from the store and decoded to DER right before a
//! handshake and dropped right after it, whatever the outcome.

use hal_abstractions::{
    ClientIdentity, CredentialName, CredentialStore, HandshakeParams, StoreError, VerifyMode,
};

use crate::pem::{self, Der, PemError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CredentialError {
    /// The store failed to produce an item
    Unavailable(CredentialName, StoreError),
    /// An item is present but does not decode
    Malformed(CredentialName, PemError),
    /// Verification is required and there is no trust anchor
    MissingTrustAnchor,
    /// Client certificate without private key, or the reverse
    Incomplete,
}

impl core::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unavailable(name, e) => write!(f, "Cannot load {}: {}", name, e),
            Self::Malformed(name, e) => write!(f, "Cannot parse {}: {}", name, e),
            Self::MissingTrustAnchor => write!(f, "Trust anchor missing"),
            Self::Incomplete => write!(f, "Incomplete client identity"),
        }
    }
}

impl core::error::Error for CredentialError {}

/// Decoded credential set
#[derive(Debug, Default)]
pub struct Credentials {
    trust_anchor: Option<Der>,
    certificate: Option<Der>,
    private_key: Option<Der>,
}

fn load_optional<S: CredentialStore>(
    store: &mut S,
    name: CredentialName,
) -> Result<Option<Der>, CredentialError> {
    match store.load(name) {
        Ok(blob) => pem::decode(blob)
            .map(Some)
            .map_err(|e| CredentialError::Malformed(name, e)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(CredentialError::Unavailable(name, e)),
    }
}

impl Credentials {
    /// Load and decode every stored item.
    ///
    /// # Errors
    ///
    /// - `MissingTrustAnchor` when `verify` is `Required` and no anchor exists
    /// - `Incomplete` when only half of the client identity exists
    /// - `Unavailable` / `Malformed` for store and decode failures
    pub fn load<S: CredentialStore>(store: &mut S, verify: VerifyMode) -> Result<Self, CredentialError> {
        let trust_anchor = load_optional(store, CredentialName::TrustAnchor)?;
        if trust_anchor.is_none() && verify == VerifyMode::Required {
            return Err(CredentialError::MissingTrustAnchor);
        }

        let certificate = load_optional(store, CredentialName::ClientCertificate)?;
        let private_key = load_optional(store, CredentialName::PrivateKey)?;
        if certificate.is_some() != private_key.is_some() {
            return Err(CredentialError::Incomplete);
        }

        Ok(Self {
            trust_anchor,
            certificate,
            private_key,
        })
    }

    pub fn has_identity(&self) -> bool {
        self.certificate.is_some()
    }

    /// Borrow the decoded items as handshake parameters.
    pub fn params<'a>(&'a self, server_name: &'a str, verify: VerifyMode) -> HandshakeParams<'a> {
        let identity = match (&self.certificate, &self.private_key) {
            (Some(certificate), Some(private_key)) => Some(ClientIdentity {
                certificate,
                private_key,
            }),
            _ => None,
        };
        HandshakeParams {
            server_name,
            trust_anchor: self.trust_anchor.as_deref(),
            identity,
            verify,
        }
    }
}
