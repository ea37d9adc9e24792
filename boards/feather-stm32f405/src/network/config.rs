#![deny(unsafe_code)]
//! Broker and supervisor settings for this board

use broker_session::{
    topic, BackoffPolicy, RetryPolicy, Subscription, SupervisorConfig, TlsSettings,
};
use hal_abstractions::{Endpoint, QoS, StaticCredentialStore, VerifyMode};
use heapless::String;
use static_cell::StaticCell;

/// Broker on the lab network
pub const BROKER_HOST: &str = "192.168.1.1";
pub const BROKER_PORT: u16 = 8883;

/// Seconds between status publications
pub const STATUS_INTERVAL_SECS: u64 = 60;

/// Minutes to wait before restarting a degraded supervisor
pub const DEGRADED_COOLDOWN_MINS: u64 = 10;

/// PEM trust anchor for the broker, when one is provisioned.
///
/// Point this at `include_bytes!("../../certs/ca.pem")` once verification
/// is available in the TLS engine.
const TRUST_ANCHOR: Option<&[u8]> = None;

// No client identity: `EmbeddedTls` has no signer for a client key, so a
// certificate here would fail every handshake with `CertParse` and the
// supervisor would degrade. Brokers that require mutual TLS cannot be used
// from this board yet; authenticate with username/password instead.

/// Network stack configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// MAC address for Ethernet
    pub mac_addr: [u8; 6],
    /// Random seed for network stack
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac_addr: crate::eth::MAC_ADDR,
            seed: 0x1234_5678_u64,
        }
    }
}

/// Credentials compiled into the image
pub fn credentials() -> StaticCredentialStore {
    StaticCredentialStore {
        trust_anchor: TRUST_ANCHOR,
        ..StaticCredentialStore::new()
    }
}

/// Supervisor configuration for `client_id`.
///
/// Subscribes to `device/{client_id}/cmd`. Must be called once.
pub fn supervisor_config(client_id: &'static str) -> SupervisorConfig {
    static COMMAND_TOPIC: StaticCell<String<{ hal_abstractions::MAX_TOPIC_LEN }>> =
        StaticCell::new();
    static SUBSCRIPTIONS: StaticCell<[Subscription; 1]> = StaticCell::new();

    let subscriptions: &'static [Subscription] = match topic::format_topic(client_id, "cmd") {
        Ok(cmd) => {
            let cmd = COMMAND_TOPIC.init(cmd);
            SUBSCRIPTIONS.init([Subscription::new(cmd.as_str(), QoS::AtLeastOnce)])
        }
        Err(e) => {
            defmt::warn!("No command subscription: {}", e);
            &[]
        }
    };

    SupervisorConfig {
        endpoint: Endpoint::new(BROKER_HOST, BROKER_PORT, true),
        client_id,
        subscriptions,
        tls: TlsSettings {
            // Phase 1: skip verification until a verifier is wired in
            verify: VerifyMode::Insecure,
            ..TlsSettings::default()
        },
        retry: RetryPolicy::default(),
        backoff: BackoffPolicy::default(),
        ..SupervisorConfig::default()
    }
}
