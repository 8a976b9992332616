//! Record-level masking and redaction.

mod common;

use common::{CreditCard, Device, MaskProfile};
use pii_guard::{mask, partial_redactor, redact, ErrorKind, RedactConfig};

fn sample() -> MaskProfile {
    MaskProfile {
        email: "email@example.com".to_string(),
        fullname: "Guadalupe Kemmer DDS".to_string(),
        device: Device {
            ip_addr: "169.251.207.194".to_string(),
        },
        credit_cards: vec![CreditCard {
            number: "6706 7510 5149 0155".to_string(),
        }],
    }
}

#[test]
fn test_mask_applies_predefined_masks_per_kind() {
    let mut profile = sample();
    mask(&mut profile).unwrap();

    assert_eq!(profile.email, "*****@example.com");
    assert_eq!(profile.fullname, "********************");
    assert_eq!(profile.device.ip_addr, "169.251.207.***");
    assert_eq!(profile.credit_cards[0].number, "**** **** **** 0155");
}

#[test]
fn test_mask_fails_on_incompatible_values() {
    let mut profile = sample();
    profile.email = "invalid_email.com".to_string();
    assert!(mask(&mut profile).is_err());

    let mut profile = sample();
    profile.credit_cards[0].number = "invalid_number".to_string();
    assert!(mask(&mut profile).is_err());
}

#[test]
fn test_redact_with_default_config_blanks_all_fields() {
    let mut profile = sample();
    redact(&mut profile, RedactConfig::default()).unwrap();

    assert_eq!(profile.email, "*".repeat("email@example.com".len()));
    assert_eq!(profile.fullname, "*".repeat(20));
    assert_eq!(profile.device.ip_addr, "*".repeat("169.251.207.194".len()));
}

#[test]
fn test_redact_with_partial_redactor_keeps_boundaries() {
    let mut profile = sample();
    redact(
        &mut profile,
        RedactConfig {
            redact_func: Some(partial_redactor()),
        },
    )
    .unwrap();

    // 20 chars: first kept, last two kept.
    assert_eq!(profile.fullname, "G*****************DS");
}

#[test]
fn test_redact_without_func_fails() {
    let mut profile = sample();
    let err = redact(&mut profile, RedactConfig { redact_func: None }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RedactFuncNotFound);
}
