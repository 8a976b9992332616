//! Partial redaction of PII fields without encryption.
//!
//! [`redact`] walks a record's PII fields applying a redaction function in
//! place; [`mask`] picks a predefined mask per field kind (`email`,
//! `credit_card`, `ipv4_addr`), falling back to the default redactor.

use std::sync::Arc;

use crate::error::{Error, MaskError, WalkError};
use crate::record::{try_resolve_subject, FieldRef, PiiRecord};

/// A redaction function: receives the field slot and its current value and
/// returns the redacted value.
pub type RedactFn = dyn Fn(&FieldRef<'_>, &str) -> Result<String, Error> + Send + Sync;

/// Configuration of a redact call.
pub struct RedactConfig {
    /// Redaction function; explicitly unsetting it makes redact fail with
    /// a redact-func-not-found error.
    pub redact_func: Option<Arc<RedactFn>>,
}

impl Default for RedactConfig {
    fn default() -> Self {
        Self {
            redact_func: Some(default_redactor()),
        }
    }
}

/// The default redactor replaces every character with `*`.
pub fn default_redactor() -> Arc<RedactFn> {
    Arc::new(|_, value| Ok("*".repeat(value.chars().count())))
}

/// Boundary-preserving redactor, banded by length: up to 3 characters all
/// `*`; 4 to 6 keeps the last character; longer values keep the first
/// character and the last two.
pub fn partial_redactor() -> Arc<RedactFn> {
    Arc::new(|_, value| {
        let chars: Vec<char> = value.chars().collect();
        let n = chars.len();
        let redacted = match n {
            0..=3 => "*".repeat(n),
            4..=6 => {
                let mut out = "*".repeat(n - 1);
                out.push(chars[n - 1]);
                out
            }
            _ => {
                let mut out = String::new();
                out.push(chars[0]);
                out.push_str(&"*".repeat(n - 3));
                out.push(chars[n - 2]);
                out.push(chars[n - 1]);
                out
            }
        };
        Ok(redacted)
    })
}

/// Redacts the record's PII fields in place using the configured function.
pub fn redact(record: &mut dyn PiiRecord, config: RedactConfig) -> Result<(), Error> {
    let redact_func = config
        .redact_func
        .ok_or_else(|| Error::from(WalkError::RedactFuncNotFound))?;

    // Redaction does not need a subject; records without one still redact.
    let subject_id = try_resolve_subject(record)?.unwrap_or_default();
    record.rewrite(&subject_id, &mut |field, value| {
        redact_func(field, value).map(Some)
    })
}

/// Redacts the record's PII fields using a predefined mask per field kind.
///
/// Fails when a field value is incompatible with its configured mask.
pub fn mask(record: &mut dyn PiiRecord) -> Result<(), Error> {
    let fallback = default_redactor();
    redact(
        record,
        RedactConfig {
            redact_func: Some(Arc::new(move |field: &FieldRef<'_>, value: &str| {
                match field.kind {
                    "email" => Ok(mask_email(value)?),
                    "credit_card" => Ok(mask_credit_card(value)?),
                    "ipv4_addr" => Ok(mask_ipv4_addr(value, 1)?),
                    _ => fallback(field, value),
                }
            })),
        },
    )
}

/// Redacts the local part of an email address.
pub fn mask_email(email: &str) -> Result<String, MaskError> {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(MaskError::InvalidEmail);
    }
    Ok(format!("{}@{}", "*".repeat(parts[0].chars().count()), parts[1]))
}

/// Redacts all digits except the last four in a credit card number,
/// preserving separators.
pub fn mask_credit_card(number: &str) -> Result<String, MaskError> {
    let digit_count = number.chars().filter(|c| c.is_ascii_digit()).count();
    if digit_count < 4 {
        return Err(MaskError::InvalidCreditCard);
    }

    let mut remaining = digit_count;
    let masked = number
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                remaining -= 1;
                if remaining < 4 {
                    c
                } else {
                    '*'
                }
            } else {
                c
            }
        })
        .collect();
    Ok(masked)
}

/// Masks the last `octets_to_mask` octets of an IPv4 address with `***`.
pub fn mask_ipv4_addr(ip: &str, octets_to_mask: usize) -> Result<String, MaskError> {
    if ip.parse::<std::net::Ipv4Addr>().is_err() {
        return Err(MaskError::InvalidIpAddress);
    }
    let mut octets: Vec<String> = ip.split('.').map(str::to_string).collect();
    if octets.len() != 4 {
        return Err(MaskError::InvalidIpAddress);
    }
    let start = 4usize.saturating_sub(octets_to_mask);
    for octet in octets.iter_mut().skip(start) {
        *octet = "***".to_string();
    }
    Ok(octets.join("."))
}
