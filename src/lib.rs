//! # pii-guard
//!
//! Field-level protection of Personally Identifiable Information: per-subject
//! envelope encryption, crypto-erasure with a recovery grace period,
//! reversible tokenisation, and masking.
//!
//! ## Overview
//!
//! Every data subject gets its own data key, scoped to a namespace. PII
//! fields of application records are rewritten in place to a self-describing
//! `<pii:` envelope that embeds the subject ID next to the ciphertext.
//! Forgetting a subject disables (or deletes) its key, rendering every
//! ciphertext ever written for it unreadable; a disabled key can be
//! recovered until the grace period closes, after which the sweep erases it
//! for good.
//!
//! - **Key engine** — per-subject key lifecycle (ACTIVE → DISABLED →
//!   DELETED) over a conditional-write document store, with an in-process
//!   cache wrapper and an optional KMS envelope wrapper.
//! - **Protector** — encrypt / decrypt / forget / recover / clear over
//!   tagged records.
//! - **Token engine** — value↔token mapping with a read-through cache.
//! - **Masking** — in-place partial redaction (`email`, `credit_card`,
//!   `ipv4_addr`) and IPv4 truncation.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pii_guard::record::{rewrite_field, ReplaceFn};
//! use pii_guard::{
//!     Error, InMemoryKeyEngine, PiiFieldSpec, PiiRecord, Protector, RecordDescriptor,
//!     SubjectProtector, SubjectSpec,
//! };
//!
//! struct Profile {
//!     user_id: String,
//!     fullname: String,
//! }
//!
//! static PROFILE_FIELDS: [PiiFieldSpec; 1] =
//!     [PiiFieldSpec::with_replacement("fullname", "deleted pii")];
//!
//! static PROFILE_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
//!     type_name: "Profile",
//!     subject: Some(SubjectSpec { field: "user_id", prefix: "" }),
//!     fields: &PROFILE_FIELDS,
//!     nested: &[],
//! };
//!
//! impl PiiRecord for Profile {
//!     fn descriptor(&self) -> &'static RecordDescriptor {
//!         &PROFILE_DESCRIPTOR
//!     }
//!
//!     fn own_subject_id(&self) -> Option<String> {
//!         Some(self.user_id.clone())
//!     }
//!
//!     fn dive(
//!         &self,
//!         _visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
//!     ) -> Result<(), Error> {
//!         Ok(())
//!     }
//!
//!     fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error> {
//!         rewrite_field(&PROFILE_FIELDS[0], subject_id, &mut self.fullname, f)
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let protector = SubjectProtector::new("tenant-a", Arc::new(InMemoryKeyEngine::new()));
//!
//! let mut profile = Profile {
//!     user_id: "kal5430".to_string(),
//!     fullname: "Idir Moore".to_string(),
//! };
//!
//! protector.encrypt(&mut [&mut profile]).await?;
//! // profile.fullname now carries the <pii: envelope.
//!
//! protector.decrypt(&mut [&mut profile]).await?;
//! assert_eq!(profile.fullname, "Idir Moore");
//!
//! // Right-to-erasure: disable the key, recoverable during the grace period.
//! protector.forget("kal5430").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`crypto`] — key material, the [`Encrypter`] seam, AES-256-GCM
//! - [`engine`] — key engine contract and capabilities
//! - [`memory`] — in-process cache wrappers / bare engines
//! - [`store`] — durable engines over a conditional-write document store
//! - [`kms`] — envelope-encryption wrapper and KMS clients
//! - [`record`] — record descriptors and the PII field walker
//! - [`protector`] — the Protector service
//! - [`factory`] — per-namespace Protector registry with idle eviction
//! - [`token`] — tokenisation contract
//! - [`redact`] — masking and partial redaction
//! - [`ip`] — IPv4 truncation
//! - [`wire`] — the `<pii:` wire format
//! - [`error`] — error kinds and metadata

pub mod crypto;
pub mod engine;
pub mod error;
pub mod factory;
pub mod ip;
pub mod kms;
pub mod memory;
pub mod protector;
pub mod record;
pub mod redact;
pub mod store;
pub mod token;
pub mod wire;

pub use crypto::{
    Aes256GcmEncrypter, Aes256KeyGenerator, Encrypter, Key, KeyGenerator, KeyMap,
    AES_256_KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
pub use engine::{
    KeyEngine, KeyEngineCache, KeyEngineConfig, KeyEngineWrapper, KeyState, KeySweeper,
    KeyUpdater, DEFAULT_GRACE_PERIOD,
};
pub use error::{
    CryptoError, Error, ErrorKind, KeyEngineError, KmsError, MaskError, Result, StoreError,
    TokenError, WalkError, WireFormatError,
};
pub use factory::{Factory, FactoryConfig, ForceClear, ProtectorBuilder};
pub use ip::truncate_ipv4_addr;
pub use kms::{DataKey, KmsClient, KmsKeyEngine, LocalKms, MasterKeyResolver, StaticMasterKeyResolver};
pub use memory::{InMemoryKeyEngine, InMemoryTokenEngine, DEFAULT_CACHE_TTL};
pub use protector::{Protector, ProtectorConfig, SubjectProtector};
pub use record::{
    Dive, FieldRef, PiiFieldSpec, PiiRecord, RecordDescriptor, SubjectSpec,
};
pub use redact::{default_redactor, mask, mask_credit_card, mask_email, mask_ipv4_addr,
    partial_redactor, redact, RedactConfig, RedactFn};
pub use store::{
    MemoryStoreClient, PostgresStoreClient, StoreClient, StoreKeyEngine, StoreTokenEngine,
};
pub use token::{
    token_data_slice, TokenData, TokenEngine, TokenEngineCache, TokenGenerator, TokenRecord,
    TokenValueMap, TokenizeConfig, UuidTokenGenerator, ValueTokenMap,
};
pub use wire::{format_value, is_wire_formatted, parse_value};
