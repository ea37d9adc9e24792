//! Connection buffers in main SRAM
//!
//! One broker connection is live at a time: the supervisor closes the
//! previous handle before it opens the next one. Every buffer below is
//! therefore handed out once per connection and reused by the next.
//!
//! # Buffer Sizing
//!
//! **TCP (4 KB + 4 KB)**: W5500 socket windows are 2 KB each; 4 KB absorbs
//! a full TLS record fragment in flight.
//!
//! **TLS read (18 KB)**:
//! - TLS 1.3 maximum plaintext: 16384 bytes
//! - Record header: 5 bytes
//! - AEAD tag: 16 bytes (AES-128-GCM-SHA256)
//! - Padding allowance: ~512 bytes
//!
//! **TLS write (16 KB)**: we control outgoing record sizes.
//!
//! **MQTT (2 KB)**: packet assembly through `rust-mqtt`'s bump allocator.
//! Payloads are capped well below that by `hal_abstractions::MAX_PAYLOAD_LEN`.
//!
//! # Safety
//!
//! The accessors return `&'static mut` views of `static mut` storage. Callers
//! must hold at most one view of each buffer, which the supervisor's single
//! live connection guarantees.

#![allow(unsafe_code)] // Required for static mut buffers

use rust_mqtt::buffer::BumpBuffer;

const TCP_BUF_SIZE: usize = 4 * 1024;
const TLS_READ_BUF_SIZE: usize = 18 * 1024; // 18432 bytes
const TLS_WRITE_BUF_SIZE: usize = 16 * 1024; // 16384 bytes
const MQTT_BUF_SIZE: usize = 2048;

static mut TCP_RX_BUF: [u8; TCP_BUF_SIZE] = [0; TCP_BUF_SIZE];
static mut TCP_TX_BUF: [u8; TCP_BUF_SIZE] = [0; TCP_BUF_SIZE];
static mut TLS_READ_BUF: [u8; TLS_READ_BUF_SIZE] = [0; TLS_READ_BUF_SIZE];
static mut TLS_WRITE_BUF: [u8; TLS_WRITE_BUF_SIZE] = [0; TLS_WRITE_BUF_SIZE];
static mut MQTT_BUF: [u8; MQTT_BUF_SIZE] = [0; MQTT_BUF_SIZE];
static mut MQTT_BUMP: Option<BumpBuffer<'static>> = None;

/// TCP socket buffers `(rx, tx)`
///
/// # Safety
///
/// The previous socket built on these buffers must have been dropped.
pub unsafe fn tcp_buffers() -> (&'static mut [u8], &'static mut [u8]) {
    (
        &mut *core::ptr::addr_of_mut!(TCP_RX_BUF),
        &mut *core::ptr::addr_of_mut!(TCP_TX_BUF),
    )
}

/// TLS record buffers `(read, write)`
///
/// # Safety
///
/// The previous TLS connection built on these buffers must have been
/// dropped.
pub unsafe fn tls_buffers() -> (&'static mut [u8], &'static mut [u8]) {
    (
        &mut *core::ptr::addr_of_mut!(TLS_READ_BUF),
        &mut *core::ptr::addr_of_mut!(TLS_WRITE_BUF),
    )
}

/// A fresh bump allocator over the MQTT packet buffer
///
/// # Safety
///
/// The previous MQTT client built on this allocator must have been dropped.
pub unsafe fn mqtt_buffer() -> &'static mut BumpBuffer<'static> {
    let slot = &mut *core::ptr::addr_of_mut!(MQTT_BUMP);
    slot.insert(BumpBuffer::new(&mut *core::ptr::addr_of_mut!(MQTT_BUF)))
}
