//! Protector end-to-end scenarios over the in-memory engine.

mod common;

use std::sync::Arc;

use common::{Note, Plain, Profile};
use pii_guard::{
    is_wire_formatted, parse_value, ErrorKind, InMemoryKeyEngine, Protector, ProtectorConfig,
    SubjectProtector,
};

fn protector(namespace: &str) -> SubjectProtector {
    SubjectProtector::new(namespace, Arc::new(InMemoryKeyEngine::new()))
}

fn hard_protector(namespace: &str) -> SubjectProtector {
    SubjectProtector::with_config(
        namespace,
        Arc::new(InMemoryKeyEngine::new()),
        ProtectorConfig {
            graceful_mode: false,
            ..ProtectorConfig::default()
        },
    )
}

#[tokio::test]
async fn test_encrypt_rewrites_tagged_fields_only() {
    let protector = protector("tenant");
    let mut profile = Profile::sample();

    protector.encrypt(&mut [&mut profile]).await.unwrap();

    assert!(is_wire_formatted(&profile.fullname));
    assert!(is_wire_formatted(&profile.gender));
    assert_eq!(profile.country, "MA");
    assert_eq!(profile.user_id, "kal5430");

    for value in [&profile.fullname, &profile.gender] {
        let (version, subject, _) = parse_value(value).unwrap();
        assert_eq!(version, 1);
        assert_eq!(subject, "kal5430");
    }
}

#[tokio::test]
async fn test_decrypt_restores_original_record() {
    let protector = protector("tenant");
    let original = Profile::sample();
    let mut profile = original.clone();

    protector.encrypt(&mut [&mut profile]).await.unwrap();
    assert_ne!(profile, original);

    protector.decrypt(&mut [&mut profile]).await.unwrap();
    assert_eq!(profile, original);
}

#[tokio::test]
async fn test_encrypt_is_idempotent() {
    let protector = protector("tenant");
    let mut profile = Profile::sample();

    protector.encrypt(&mut [&mut profile]).await.unwrap();
    let once = profile.clone();
    protector.encrypt(&mut [&mut profile]).await.unwrap();

    assert_eq!(profile, once);
}

#[tokio::test]
async fn test_decrypt_is_idempotent() {
    let protector = protector("tenant");
    let original = Profile::sample();
    let mut profile = original.clone();

    protector.encrypt(&mut [&mut profile]).await.unwrap();
    protector.decrypt(&mut [&mut profile]).await.unwrap();
    protector.decrypt(&mut [&mut profile]).await.unwrap();

    assert_eq!(profile, original);
}

#[tokio::test]
async fn test_hard_forget_then_decrypt_replaces_fields() {
    let protector = hard_protector("tenant");
    let mut profile = Profile::sample();

    protector.encrypt(&mut [&mut profile]).await.unwrap();
    protector.forget("kal5430").await.unwrap();
    protector.decrypt(&mut [&mut profile]).await.unwrap();

    assert_eq!(profile.fullname, "deleted pii");
    assert_eq!(profile.gender, "");
    assert_eq!(profile.country, "MA");
}

#[tokio::test]
async fn test_hard_forget_cannot_be_recovered() {
    let protector = hard_protector("tenant");
    let mut profile = Profile::sample();

    protector.encrypt(&mut [&mut profile]).await.unwrap();
    protector.forget("kal5430").await.unwrap();

    let err = protector.recover("kal5430").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CannotRecoverSubject);
    assert_eq!(err.subject(), Some("kal5430"));
}

#[tokio::test]
async fn test_graceful_forget_recover_roundtrip() {
    let protector = protector("tenant");
    let original = Profile::sample();
    let mut profile = original.clone();

    protector.encrypt(&mut [&mut profile]).await.unwrap();
    protector.forget("kal5430").await.unwrap();
    protector.recover("kal5430").await.unwrap();
    protector.decrypt(&mut [&mut profile]).await.unwrap();

    assert_eq!(profile, original);
}

#[tokio::test]
async fn test_graceful_forget_replaces_fields_until_recovered() {
    let protector = protector("tenant");
    let mut profile = Profile::sample();

    protector.encrypt(&mut [&mut profile]).await.unwrap();
    protector.forget("kal5430").await.unwrap();

    let mut forgotten = profile.clone();
    protector.decrypt(&mut [&mut forgotten]).await.unwrap();
    assert_eq!(forgotten.fullname, "deleted pii");
    assert_eq!(forgotten.gender, "");
}

#[tokio::test]
async fn test_forgetting_one_subject_leaves_others_intact() {
    let protector = hard_protector("tenant");
    let mut first = Profile {
        user_id: "aze6590".to_string(),
        ..Profile::sample()
    };
    let mut second = Profile {
        user_id: "aze6590".to_string(),
        fullname: "Nora Vance".to_string(),
        ..Profile::sample()
    };
    let mut third = Profile::sample();

    protector
        .encrypt(&mut [&mut first, &mut second, &mut third])
        .await
        .unwrap();
    protector.forget("kal5430").await.unwrap();

    protector
        .decrypt(&mut [&mut first, &mut second, &mut third])
        .await
        .unwrap();

    assert_eq!(first.fullname, "Idir Moore");
    assert_eq!(second.fullname, "Nora Vance");
    assert_eq!(third.fullname, "deleted pii");
}

#[tokio::test]
async fn test_decrypt_uses_embedded_subject_as_ground_truth() {
    let protector = protector("tenant");
    let mut alice = Profile {
        user_id: "alice".to_string(),
        fullname: "Alice W".to_string(),
        ..Profile::sample()
    };
    let mut bob = Profile {
        user_id: "bob".to_string(),
        fullname: "Bob M".to_string(),
        ..Profile::sample()
    };
    protector.encrypt(&mut [&mut alice, &mut bob]).await.unwrap();

    // A record asserting subject bob but carrying a ciphertext written for
    // alice decrypts with alice's key.
    let mut mixed = bob.clone();
    mixed.fullname = alice.fullname.clone();
    protector.decrypt(&mut [&mut mixed]).await.unwrap();
    assert_eq!(mixed.fullname, "Alice W");
}

#[tokio::test]
async fn test_unsupported_wire_version_fails_decrypt() {
    let protector = protector("tenant");
    let mut profile = Profile::sample();
    profile.fullname = pii_guard::format_value("kal5430", b"opaque", 4);

    let err = protector.decrypt(&mut [&mut profile]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EncryptDecryptFailure);
    assert!(err.is_kind(ErrorKind::WireFormatInvalid));
}

#[tokio::test]
async fn test_encrypt_after_forget_surfaces_subject_forgotten() {
    let protector = hard_protector("tenant");
    let mut profile = Profile::sample();
    protector.encrypt(&mut [&mut profile]).await.unwrap();
    protector.forget("kal5430").await.unwrap();

    let mut fresh = Profile::sample();
    let err = protector.encrypt(&mut [&mut fresh]).await.unwrap_err();
    assert!(err.is_kind(ErrorKind::SubjectForgotten));
}

#[tokio::test]
async fn test_record_without_pii_is_ignored() {
    let protector = protector("tenant");
    let mut plain = Plain {
        name: "nothing sensitive".to_string(),
    };
    protector.encrypt(&mut [&mut plain]).await.unwrap();
    assert_eq!(plain.name, "nothing sensitive");
}

#[tokio::test]
async fn test_optional_and_empty_fields_are_skipped() {
    let protector = protector("tenant");
    let mut empty_note = Note {
        user_id: "u1".to_string(),
        body: None,
    };
    let mut note = Note {
        user_id: "u1".to_string(),
        body: Some("call back tuesday".to_string()),
    };
    let mut profile = Profile {
        gender: String::new(),
        ..Profile::sample()
    };

    protector
        .encrypt(&mut [&mut empty_note, &mut note, &mut profile])
        .await
        .unwrap();

    assert_eq!(empty_note.body, None);
    assert!(is_wire_formatted(note.body.as_deref().unwrap()));
    assert_eq!(profile.gender, "");

    protector
        .decrypt(&mut [&mut note, &mut profile])
        .await
        .unwrap();
    assert_eq!(note.body.as_deref(), Some("call back tuesday"));
}

#[tokio::test]
async fn test_namespaces_do_not_share_keys() {
    let engine = Arc::new(InMemoryKeyEngine::new());
    let tenant_a = SubjectProtector::new("tenant-a", engine.clone());
    let tenant_b = SubjectProtector::new("tenant-b", engine);

    let mut profile = Profile::sample();
    tenant_a.encrypt(&mut [&mut profile]).await.unwrap();

    // Same engine, different namespace: tenant-b has no key for the
    // subject, so the field falls back to its replacement.
    tenant_b.decrypt(&mut [&mut profile]).await.unwrap();
    assert_eq!(profile.fullname, "deleted pii");
    assert_eq!(profile.gender, "");
}
