//! Property tests for the wire format and the encrypter.

use pii_guard::{
    format_value, is_wire_formatted, parse_value, Aes256GcmEncrypter, Encrypter, Key,
    AES_256_KEY_SIZE,
};
use proptest::prelude::*;

fn subject_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_.@-]{1,40}").unwrap()
}

fn namespace_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9-]{0,20}").unwrap()
}

proptest! {
    /// format → parse returns the exact version, subject and cipher bytes.
    #[test]
    fn wire_roundtrip(
        subject in subject_strategy(),
        cipher in prop::collection::vec(any::<u8>(), 1..256),
        version in 1u32..100,
    ) {
        let packed = format_value(&subject, &cipher, version);
        prop_assert!(is_wire_formatted(&packed));

        let (v, s, c) = parse_value(&packed).unwrap();
        prop_assert_eq!(v, version);
        prop_assert_eq!(s, subject);
        prop_assert_eq!(c, cipher);
    }

    /// Version 1 is always elided on write.
    #[test]
    fn wire_version_one_is_elided(
        subject in subject_strategy(),
        cipher in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let packed = format_value(&subject, &cipher, 1);
        prop_assert!(packed.starts_with("<pii::"));
    }

    /// Unicode subject IDs survive the base64 leg.
    #[test]
    fn wire_subject_survives_any_utf8(
        subject in "\\PC{1,20}",
        cipher in prop::collection::vec(any::<u8>(), 1..32),
    ) {
        let packed = format_value(&subject, &cipher, 1);
        let (_, s, _) = parse_value(&packed).unwrap();
        prop_assert_eq!(s, subject);
    }

    /// Plain values never accidentally match the wire format.
    #[test]
    fn wire_rejects_unprefixed_values(value in "\\PC{0,64}") {
        prop_assume!(!value.starts_with("<pii:"));
        prop_assert!(!is_wire_formatted(&value));
    }

    /// decrypt(encrypt(value)) is the identity for any value and namespace.
    #[test]
    fn encrypter_roundtrip(
        namespace in namespace_strategy(),
        plaintext in "\\PC{0,256}",
    ) {
        let encrypter = Aes256GcmEncrypter::new();
        let key = Key::generate(AES_256_KEY_SIZE);

        let cipher = encrypter.encrypt(&namespace, &key, &plaintext).unwrap();
        let decrypted = encrypter.decrypt(&namespace, &key, &cipher).unwrap();
        prop_assert_eq!(decrypted, plaintext);
    }

    /// A ciphertext never decrypts under a different namespace binding.
    #[test]
    fn encrypter_binds_namespace(
        namespace in "[a-z]{1,10}",
        plaintext in "\\PC{1,64}",
    ) {
        let encrypter = Aes256GcmEncrypter::new();
        let key = Key::generate(AES_256_KEY_SIZE);

        let cipher = encrypter.encrypt(&namespace, &key, &plaintext).unwrap();
        let other = format!("{namespace}x");
        prop_assert!(encrypter.decrypt(&other, &key, &cipher).is_err());
    }
}
