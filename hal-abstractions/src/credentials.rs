//! Named credential storage
//!
//! Boards keep PEM blobs wherever suits them (flash, a filesystem, compiled
//! in). The supervisor only asks for them by name.

/// The credential items a TLS session can use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CredentialName {
    /// Root certificate validating the broker's chain
    TrustAnchor,
    /// Client certificate for mutual TLS
    ClientCertificate,
    /// Private key matching the client certificate
    PrivateKey,
}

impl CredentialName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TrustAnchor => "ca.pem",
            Self::ClientCertificate => "client.crt",
            Self::PrivateKey => "client.key",
        }
    }
}

impl core::fmt::Display for CredentialName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    NotFound,
    Io,
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "Credential not found"),
            Self::Io => write!(f, "Credential storage I/O error"),
        }
    }
}

impl core::error::Error for StoreError {}

/// Source of PEM-encoded credentials
pub trait CredentialStore {
    /// Return the PEM bytes stored under `name`.
    fn load(&mut self, name: CredentialName) -> Result<&[u8], StoreError>;
}

/// Credentials compiled into the image
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCredentialStore {
    pub trust_anchor: Option<&'static [u8]>,
    pub client_certificate: Option<&'static [u8]>,
    pub private_key: Option<&'static [u8]>,
}

impl StaticCredentialStore {
    pub const fn new() -> Self {
        Self {
            trust_anchor: None,
            client_certificate: None,
            private_key: None,
        }
    }

    pub const fn with_trust_anchor(mut self, pem: &'static [u8]) -> Self {
        self.trust_anchor = Some(pem);
        self
    }

    pub const fn with_identity(
        mut self,
        certificate: &'static [u8],
        private_key: &'static [u8],
    ) -> Self {
        self.client_certificate = Some(certificate);
        self.private_key = Some(private_key);
        self
    }
}

impl CredentialStore for StaticCredentialStore {
    fn load(&mut self, name: CredentialName) -> Result<&[u8], StoreError> {
        let item = match name {
            CredentialName::TrustAnchor => self.trust_anchor,
            CredentialName::ClientCertificate => self.client_certificate,
            CredentialName::PrivateKey => self.private_key,
        };
        item.ok_or(StoreError::NotFound)
    }
}
