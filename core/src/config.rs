//! Supervisor configuration
//!
//! All structs implement `Default`; boards override the fields they care
//! about and call [`SupervisorConfig::validate`] (done by `Supervisor::new`).

use hal_abstractions::{ConnectOptions, Endpoint, QoS, VerifyMode};

use crate::backoff::BackoffPolicy;
use crate::topic::{self, TopicError};

/// Longest client identifier accepted
pub const MAX_CLIENT_ID_LEN: usize = 64;

/// A topic filter subscribed on every session establishment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Subscription {
    pub filter: &'static str,
    pub qos: QoS,
}

impl Subscription {
    pub const fn new(filter: &'static str, qos: QoS) -> Self {
        Self { filter, qos }
    }
}

/// TLS settings
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TlsSettings {
    /// SNI / certificate name; the endpoint host when `None`
    pub server_name: Option<&'static str>,
    pub verify: VerifyMode,
    /// Upper bound on the whole handshake
    pub handshake_timeout_ms: u32,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            server_name: None,
            verify: VerifyMode::Required,
            handshake_timeout_ms: 15_000,
        }
    }
}

/// Retry limits
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    /// Consecutive failed attempts tolerated before giving up
    pub max_attempts: u32,
    /// Also give up on transient, protocol and resource failures
    pub escalate_transient: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            escalate_transient: false,
        }
    }
}

/// Session supervisor configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SupervisorConfig {
    pub endpoint: Endpoint<'static>,
    pub client_id: &'static str,
    pub username: Option<&'static str>,
    pub password: Option<&'static [u8]>,
    /// Keep-alive interval in seconds; 0 disables it
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub subscriptions: &'static [Subscription],
    pub tls: TlsSettings,
    pub retry: RetryPolicy,
    pub backoff: BackoffPolicy,
    /// Bound on transport open and on each session request
    pub io_timeout_ms: u32,
    /// How long one poll waits for inbound traffic
    pub poll_interval_ms: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new("192.168.1.1", 8883, true),
            client_id: "iot-playground",
            username: None,
            password: None,
            keep_alive_secs: 60,
            clean_session: true,
            subscriptions: &[],
            tls: TlsSettings::default(),
            retry: RetryPolicy::default(),
            backoff: BackoffPolicy::default(),
            io_timeout_ms: 10_000,
            poll_interval_ms: 500,
        }
    }
}

impl SupervisorConfig {
    /// Check the configuration for programmer errors.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; none of them is worth retrying.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.endpoint.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        if self.client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(ConfigError::ClientIdTooLong);
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::PasswordWithoutUsername);
        }
        for sub in self.subscriptions {
            topic::validate_filter(sub.filter).map_err(ConfigError::InvalidSubscription)?;
        }
        if self.io_timeout_ms == 0 || self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.endpoint.use_tls && self.tls.handshake_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Name presented in SNI and checked against the broker certificate
    pub fn server_name(&self) -> &'static str {
        self.tls.server_name.unwrap_or(self.endpoint.host)
    }

    pub fn connect_options(&self) -> ConnectOptions<'static> {
        ConnectOptions {
            client_id: self.client_id,
            keep_alive_secs: self.keep_alive_secs,
            clean_session: self.clean_session,
            username: self.username,
            password: self.password,
        }
    }
}

/// Configuration errors, surfaced by `Supervisor::new`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    EmptyHost,
    InvalidPort,
    EmptyClientId,
    ClientIdTooLong,
    PasswordWithoutUsername,
    InvalidSubscription(TopicError),
    ZeroTimeout,
    /// Certificate verification is required but no trust anchor is stored
    MissingTrustAnchor,
    /// Only one of client certificate and private key is stored
    IncompleteCredentials,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EmptyHost => write!(f, "Broker host is empty"),
            Self::InvalidPort => write!(f, "Broker port is invalid"),
            Self::EmptyClientId => write!(f, "Client ID is empty"),
            Self::ClientIdTooLong => write!(f, "Client ID is too long"),
            Self::PasswordWithoutUsername => write!(f, "Password given without a username"),
            Self::InvalidSubscription(e) => write!(f, "Invalid subscription filter: {}", e),
            Self::ZeroTimeout => write!(f, "Timeouts must be non-zero"),
            Self::MissingTrustAnchor => write!(f, "Trust anchor missing"),
            Self::IncompleteCredentials => {
                write!(f, "Client certificate and private key must be provided together")
            }
        }
    }
}

impl core::error::Error for ConfigError {}
