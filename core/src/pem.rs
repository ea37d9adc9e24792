//! PEM armor decoding into DER
//!
//! Only the first armored block is decoded. Input that already looks like
//! DER (an ASN.1 SEQUENCE) is passed through unchanged.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use heapless::Vec;

/// Largest DER object accepted (certificate or key)
pub const MAX_DER_LEN: usize = 2048;

const MAX_BODY_LEN: usize = MAX_DER_LEN / 3 * 4;

const BEGIN: &[u8] = b"-----BEGIN ";
const END: &[u8] = b"-----END ";
const ASN1_SEQUENCE: u8 = 0x30;

pub type Der = Vec<u8, MAX_DER_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PemError {
    /// No BEGIN/END armor found
    MissingArmor,
    /// Object larger than [`MAX_DER_LEN`]
    TooLarge,
    InvalidBase64,
}

impl core::fmt::Display for PemError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MissingArmor => write!(f, "PEM armor missing"),
            Self::TooLarge => write!(f, "PEM object too large"),
            Self::InvalidBase64 => write!(f, "Invalid base64 in PEM body"),
        }
    }
}

impl core::error::Error for PemError {}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Skip past the end of the current line.
fn after_line(data: &[u8]) -> &[u8] {
    match data.iter().position(|&b| b == b'\n') {
        Some(i) => &data[i + 1..],
        None => &[],
    }
}

/// Decode a PEM (or raw DER) blob.
pub fn decode(input: &[u8]) -> Result<Der, PemError> {
    if input.first() == Some(&ASN1_SEQUENCE) {
        return Der::from_slice(input).map_err(|_| PemError::TooLarge);
    }

    let begin = find(input, BEGIN).ok_or(PemError::MissingArmor)?;
    let body = after_line(&input[begin + BEGIN.len()..]);
    let end = find(body, END).ok_or(PemError::MissingArmor)?;

    let mut text: Vec<u8, MAX_BODY_LEN> = Vec::new();
    for &b in body[..end].iter().filter(|b| !b.is_ascii_whitespace()) {
        text.push(b).map_err(|_| PemError::TooLarge)?;
    }
    if text.is_empty() {
        return Err(PemError::MissingArmor);
    }

    let mut der = Der::new();
    der.resize_default(MAX_DER_LEN)
        .map_err(|_| PemError::TooLarge)?;
    let len = STANDARD
        .decode_slice(&text, &mut der)
        .map_err(|_| PemError::InvalidBase64)?;
    der.truncate(len);
    Ok(der)
}
