//! Board side of the broker session
//!
//! - **`config`**: broker endpoint, credentials and supervisor settings
//! - **`socket`**: `Transport` over embassy-net TCP
//! - **`tls`**: `TlsEngine` over embedded-tls
//! - **`mqtt`**: `ProtocolEngine` over rust-mqtt
//!
//! The supervisor in `broker-session` drives all three; this module only
//! adapts the board's drivers to its traits and reports link changes.

pub mod config;
pub mod mqtt;
pub mod socket;
pub mod tls;

use broker_session::Link;
use defmt::{info, warn};
use embassy_net::Stack;

pub use config::NetworkConfig;
pub use mqtt::MqttEngine;
pub use socket::NetTransport;
pub use tls::EmbeddedTls;

/// Wait for network configuration (DHCP) and log IP address
pub async fn wait_for_config(stack: &Stack<'_>) {
    info!("Waiting for DHCP...");
    stack.wait_config_up().await;
    info!("Network is UP!");

    if let Some(config) = stack.config_v4() {
        let octets = config.address.address().octets();
        info!(
            "IP: {}.{}.{}.{}",
            octets[0], octets[1], octets[2], octets[3]
        );

        if let Some(gateway) = config.gateway {
            let gw_octets = gateway.octets();
            info!(
                "Gateway: {}.{}.{}.{}",
                gw_octets[0], gw_octets[1], gw_octets[2], gw_octets[3]
            );
        }
    }
}

/// Report every loss of network configuration to the supervisor.
pub async fn watch_link(stack: &Stack<'_>, link: &Link) -> ! {
    loop {
        stack.wait_config_down().await;
        warn!("Network is DOWN");
        link.connectivity_lost();
        wait_for_config(stack).await;
    }
}
