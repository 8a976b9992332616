//! Error types for PII protection operations.
//!
//! Each subsystem (key engine, encrypter, token engine, wire format, record
//! walker, backing store, KMS, masking) has its own error enum. Everything
//! converts into the crate-level [`Error`], which carries a stable
//! [`ErrorKind`] plus optional namespace and subject metadata attached on
//! the way up through the Protector.

use std::fmt;

use thiserror::Error;

/// Result type alias for PII protection operations.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stable classification of every error the crate surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    EncryptDecryptFailure,
    ForgetSubjectFailure,
    RecoverSubjectFailure,
    ClearCacheFailure,
    CannotRecoverSubject,
    SubjectForgotten,
    KeyNotFound,
    GetKeyFailure,
    PersistKeyFailure,
    DisableKeyFailure,
    ReEnableKeyFailure,
    DeleteKeyFailure,
    EncryptionFailure,
    DecryptionFailure,
    TokenNotFound,
    TokenizeFailure,
    DetokenizeFailure,
    DeleteTokenFailure,
    TokenGenFuncNotFound,
    WireFormatInvalid,
    UnsupportedType,
    UnsupportedFieldType,
    InvalidTagConfiguration,
    MultipleNestedSubjectId,
    SubjectIdNotFound,
    RedactFuncNotFound,
    IpAddressInvalid,
}

impl ErrorKind {
    fn message(self) -> &'static str {
        match self {
            ErrorKind::EncryptDecryptFailure => "failed to encrypt/decrypt",
            ErrorKind::ForgetSubjectFailure => "failed to forget subject",
            ErrorKind::RecoverSubjectFailure => "failed to recover subject",
            ErrorKind::ClearCacheFailure => "failed to clear cache",
            ErrorKind::CannotRecoverSubject => "cannot recover subject",
            ErrorKind::SubjectForgotten => "subject is forgotten",
            ErrorKind::KeyNotFound => "encryption key not found",
            ErrorKind::GetKeyFailure => "failed to get encryption key(s)",
            ErrorKind::PersistKeyFailure => "failed to persist encryption key(s)",
            ErrorKind::DisableKeyFailure => "failed to disable encryption key",
            ErrorKind::ReEnableKeyFailure => "failed to re-enable encryption key",
            ErrorKind::DeleteKeyFailure => "failed to delete encryption key",
            ErrorKind::EncryptionFailure => "failed to encrypt data",
            ErrorKind::DecryptionFailure => "failed to decrypt data",
            ErrorKind::TokenNotFound => "token not found",
            ErrorKind::TokenizeFailure => "failed to tokenize value(s)",
            ErrorKind::DetokenizeFailure => "failed to detokenize token(s)",
            ErrorKind::DeleteTokenFailure => "failed to delete token",
            ErrorKind::TokenGenFuncNotFound => "token gen function is not found",
            ErrorKind::WireFormatInvalid => "invalid PII wire format",
            ErrorKind::UnsupportedType => "unsupported record type",
            ErrorKind::UnsupportedFieldType => "unsupported field type",
            ErrorKind::InvalidTagConfiguration => "invalid PII field configuration",
            ErrorKind::MultipleNestedSubjectId => "potential multiple nested subject IDs",
            ErrorKind::SubjectIdNotFound => "subject ID not found",
            ErrorKind::RedactFuncNotFound => "redact function is not found",
            ErrorKind::IpAddressInvalid => "invalid IP address",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Crate-level error: an [`ErrorKind`] enriched with optional namespace and
/// subject metadata, wrapping the subsystem error that caused it.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    namespace: Option<String>,
    subject: Option<String>,
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            namespace: None,
            subject: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true when this error, or any error it wraps, has the given kind.
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        if self.kind == kind {
            return true;
        }
        let mut source: Option<&(dyn std::error::Error + 'static)> = match &self.source {
            Some(e) => Some(&**e),
            None => None,
        };
        while let Some(err) = source {
            if let Some(e) = err.downcast_ref::<Error>() {
                if e.kind == kind {
                    return true;
                }
            }
            source = err.source();
        }
        false
    }

    /// The namespace associated with the failed operation, if recorded
    /// anywhere along the error chain.
    pub fn namespace(&self) -> Option<&str> {
        if let Some(ns) = self.namespace.as_deref() {
            return Some(ns);
        }
        self.source
            .as_deref()
            .and_then(|e| e.downcast_ref::<Error>())
            .and_then(Error::namespace)
    }

    /// The subject ID associated with the failed operation, if recorded
    /// anywhere along the error chain.
    pub fn subject(&self) -> Option<&str> {
        if let Some(sub) = self.subject.as_deref() {
            return Some(sub);
        }
        self.source
            .as_deref()
            .and_then(|e| e.downcast_ref::<Error>())
            .and_then(Error::subject)
    }

    pub(crate) fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub(crate) fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub(crate) fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.message())?;
        if let Some(ns) = self.namespace() {
            write!(f, " [ns:'{ns}']")?;
        }
        if let Some(sub) = self.subject() {
            write!(f, " [sub:'{sub}']")?;
        }
        if let Some(source) = self.source.as_deref() {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(e) => Some(&**e),
            None => None,
        }
    }
}

/// Errors returned by key engine implementations.
#[derive(Debug, Error)]
pub enum KeyEngineError {
    #[error("encryption key not found")]
    KeyNotFound,
    #[error("failed to get encryption key(s): {0}")]
    Get(String),
    #[error("failed to persist encryption key(s): {0}")]
    Persist(String),
    #[error("failed to disable encryption key: {0}")]
    Disable(String),
    #[error("failed to re-enable encryption key: {0}")]
    ReEnable(String),
    #[error("failed to delete encryption key: {0}")]
    Delete(String),
}

impl From<KeyEngineError> for Error {
    fn from(err: KeyEngineError) -> Self {
        let kind = match &err {
            KeyEngineError::KeyNotFound => ErrorKind::KeyNotFound,
            KeyEngineError::Get(_) => ErrorKind::GetKeyFailure,
            KeyEngineError::Persist(_) => ErrorKind::PersistKeyFailure,
            KeyEngineError::Disable(_) => ErrorKind::DisableKeyFailure,
            KeyEngineError::ReEnable(_) => ErrorKind::ReEnableKeyFailure,
            KeyEngineError::Delete(_) => ErrorKind::DeleteKeyFailure,
        };
        Error::new(kind).with_source(err)
    }
}

/// Errors returned by encrypter implementations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to encrypt data: {0}")]
    Encryption(String),
    #[error("failed to decrypt data: {0}")]
    Decryption(String),
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        let kind = match &err {
            CryptoError::Encryption(_) => ErrorKind::EncryptionFailure,
            CryptoError::Decryption(_) => ErrorKind::DecryptionFailure,
        };
        Error::new(kind).with_source(err)
    }
}

/// Errors returned by token engine implementations.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token not found")]
    NotFound,
    #[error("token gen function is not found")]
    GenFuncNotFound,
    #[error("failed to tokenize value(s): {0}")]
    Tokenize(String),
    #[error("failed to detokenize token(s): {0}")]
    Detokenize(String),
    #[error("failed to delete token: {0}")]
    Delete(String),
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        let kind = match &err {
            TokenError::NotFound => ErrorKind::TokenNotFound,
            TokenError::GenFuncNotFound => ErrorKind::TokenGenFuncNotFound,
            TokenError::Tokenize(_) => ErrorKind::TokenizeFailure,
            TokenError::Detokenize(_) => ErrorKind::DetokenizeFailure,
            TokenError::Delete(_) => ErrorKind::DeleteTokenFailure,
        };
        Error::new(kind).with_source(err)
    }
}

/// Errors raised while packing or parsing the `<pii:` wire format.
#[derive(Debug, Error)]
pub enum WireFormatError {
    #[error("invalid PII wire format")]
    Invalid,
    #[error("unsupported PII wire format version: {0}")]
    UnsupportedVersion(u32),
}

impl From<WireFormatError> for Error {
    fn from(err: WireFormatError) -> Self {
        Error::new(ErrorKind::WireFormatInvalid).with_source(err)
    }
}

/// Errors raised while walking a record's PII fields.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("unsupported record type: {0}")]
    UnsupportedType(String),
    #[error("unsupported field type, must be convertible to string: {0}")]
    UnsupportedFieldType(String),
    #[error("invalid PII field configuration: {0}")]
    InvalidConfiguration(String),
    #[error("potential multiple nested subject IDs")]
    MultipleNestedSubjectId,
    #[error("subject ID not found")]
    SubjectIdNotFound,
    #[error("redact function is not found")]
    RedactFuncNotFound,
}

impl From<WalkError> for Error {
    fn from(err: WalkError) -> Self {
        let kind = match &err {
            WalkError::UnsupportedType(_) => ErrorKind::UnsupportedType,
            WalkError::UnsupportedFieldType(_) => ErrorKind::UnsupportedFieldType,
            WalkError::InvalidConfiguration(_) => ErrorKind::InvalidTagConfiguration,
            WalkError::MultipleNestedSubjectId => ErrorKind::MultipleNestedSubjectId,
            WalkError::SubjectIdNotFound => ErrorKind::SubjectIdNotFound,
            WalkError::RedactFuncNotFound => ErrorKind::RedactFuncNotFound,
        };
        Error::new(kind).with_source(err)
    }
}

/// Errors returned by document store clients.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional write or delete did not pass its condition.
    #[error("conditional check failed")]
    ConditionFailed,
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors returned by KMS clients and resolvers.
#[derive(Debug, Error)]
pub enum KmsError {
    #[error("failed to resolve master key: {0}")]
    Resolver(String),
    #[error("failed to generate data key: {0}")]
    Generate(String),
    #[error("failed to decrypt data key: {0}")]
    Decrypt(String),
    #[error("failed to re-encrypt data key: {0}")]
    ReEncrypt(String),
    #[error("incompatible data key length: {0}")]
    IncompatibleKeyLength(usize),
}

/// Errors raised by the masking helpers.
#[derive(Debug, Error)]
pub enum MaskError {
    #[error("invalid IP address")]
    InvalidIpAddress,
    #[error("invalid email format")]
    InvalidEmail,
    #[error("invalid credit card length")]
    InvalidCreditCard,
}

impl From<MaskError> for Error {
    fn from(err: MaskError) -> Self {
        let kind = match &err {
            MaskError::InvalidIpAddress => ErrorKind::IpAddressInvalid,
            MaskError::InvalidEmail | MaskError::InvalidCreditCard => {
                ErrorKind::UnsupportedFieldType
            }
        };
        Error::new(kind).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_propagates_through_chain() {
        let inner: Error = KeyEngineError::KeyNotFound.into();
        let outer = Error::new(ErrorKind::RecoverSubjectFailure)
            .with_source(inner)
            .with_namespace("tenant-a")
            .with_subject("sub-1");

        assert_eq!(outer.kind(), ErrorKind::RecoverSubjectFailure);
        assert!(outer.is_kind(ErrorKind::KeyNotFound));
        assert!(!outer.is_kind(ErrorKind::TokenNotFound));
        assert_eq!(outer.namespace(), Some("tenant-a"));
        assert_eq!(outer.subject(), Some("sub-1"));
    }

    #[test]
    fn test_metadata_read_from_wrapped_error() {
        let inner = Error::new(ErrorKind::SubjectForgotten).with_subject("kal5430");
        let outer = Error::new(ErrorKind::EncryptDecryptFailure)
            .with_source(inner)
            .with_namespace("orders");

        assert_eq!(outer.namespace(), Some("orders"));
        assert_eq!(outer.subject(), Some("kal5430"));
        let msg = outer.to_string();
        assert!(msg.contains("failed to encrypt/decrypt"));
        assert!(msg.contains("[ns:'orders']"));
        assert!(msg.contains("[sub:'kal5430']"));
    }
}
