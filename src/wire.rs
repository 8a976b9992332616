//! Self-describing wire format for encrypted PII field values.
//!
//! Each encrypted field is stored as a single ASCII string:
//!
//! ```text
//! <pii:<version?>:<subjectID-base64>:<ciphertext-base64>
//! ```
//!
//! An empty version block means version 1, and version 1 is elided on
//! write. A value that does not match the format is treated as not yet
//! encrypted.

use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;

use crate::error::WireFormatError;

/// Literal prefix marking an encrypted field value.
pub const WIRE_PREFIX: &str = "<pii:";

/// The wire format version written by this crate.
pub const WIRE_VERSION: u32 = 1;

fn wire_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^<pii:\d*:[A-Za-z0-9+/]+={0,2}:[A-Za-z0-9+/]+={0,2}$")
            .expect("wire format regex is valid")
    })
}

/// Checks whether the given string carries an encrypted field value.
pub fn is_wire_formatted(value: &str) -> bool {
    value.starts_with(WIRE_PREFIX) && wire_regex().is_match(value)
}

/// Packs a subject ID and cipher bytes into the wire format.
///
/// The version is elided when it equals 1; emitting `<pii:1:` is legal on
/// read but discouraged on write.
pub fn format_value(subject_id: &str, ciphertext: &[u8], version: u32) -> String {
    let v = if version > 1 {
        version.to_string()
    } else {
        String::new()
    };
    let subject_b64 = STANDARD.encode(subject_id.as_bytes());
    let cipher_b64 = STANDARD.encode(ciphertext);
    format!("{WIRE_PREFIX}{v}:{subject_b64}:{cipher_b64}")
}

/// Unpacks a wire-formatted value into `(version, subject ID, cipher bytes)`.
///
/// The version defaults to 1 when the digit block is empty. Version
/// support is decided by the caller, not here.
pub fn parse_value(value: &str) -> Result<(u32, String, Vec<u8>), WireFormatError> {
    if !is_wire_formatted(value) {
        return Err(WireFormatError::Invalid);
    }

    let rest = &value[WIRE_PREFIX.len()..];
    let mut parts = rest.splitn(3, ':');
    let version_part = parts.next().ok_or(WireFormatError::Invalid)?;
    let subject_part = parts.next().ok_or(WireFormatError::Invalid)?;
    let cipher_part = parts.next().ok_or(WireFormatError::Invalid)?;

    let version = if version_part.is_empty() {
        WIRE_VERSION
    } else {
        version_part
            .parse::<u32>()
            .map_err(|_| WireFormatError::Invalid)?
    };

    let subject_bytes = STANDARD
        .decode(subject_part)
        .map_err(|_| WireFormatError::Invalid)?;
    let subject_id =
        String::from_utf8(subject_bytes).map_err(|_| WireFormatError::Invalid)?;

    let ciphertext = STANDARD
        .decode(cipher_part)
        .map_err(|_| WireFormatError::Invalid)?;

    Ok((version, subject_id, ciphertext))
}
