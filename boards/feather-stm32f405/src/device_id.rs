//! Device identity derived from the STM32F405 96-bit unique ID
//!
//! The UID is factory-programmed, stable across reboots and unique to each
//! chip, so it doubles as the broker client id:
//!
//! ```text
//! stm32f405-0123456789abcdef01234567
//! ```

use heapless::String;
use static_cell::StaticCell;

const PREFIX: &str = "stm32f405-";

/// "stm32f405-" (10 chars) + 24 hex chars
pub const CLIENT_ID_LEN: usize = PREFIX.len() + 24;

/// 24-character hex rendering of the UID
pub fn uid_hex() -> &'static str {
    embassy_stm32::uid::uid_hex()
}

/// Format a client id from a UID hex string.
///
/// Returns `None` if `uid` is not the expected 24 characters.
pub fn format_client_id(uid: &str) -> Option<String<CLIENT_ID_LEN>> {
    if uid.len() != 24 {
        return None;
    }
    let mut id = String::new();
    id.push_str(PREFIX).ok()?;
    id.push_str(uid).ok()?;
    Some(id)
}

/// Client id for this device, `'static` so it can sit in the supervisor
/// configuration.
///
/// Must be called once.
pub fn client_id() -> &'static str {
    static CLIENT_ID: StaticCell<String<CLIENT_ID_LEN>> = StaticCell::new();
    let id = format_client_id(uid_hex()).unwrap_or_else(|| {
        defmt::warn!("Unexpected UID length, using a generic client id");
        let mut id = String::new();
        let _ = id.push_str("stm32f405-unknown");
        id
    });
    CLIENT_ID.init(id).as_str()
}
