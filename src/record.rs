//! Record walking: locating a record's subject ID and its PII field slots.
//!
//! A record participates by implementing [`PiiRecord`] against a static
//! [`RecordDescriptor`]. The descriptor plays the role a reflected type
//! descriptor would: it names the subject field, the PII fields (each with
//! its masking kind and erasure replacement) and the nested record types to
//! recurse into. Nested records inherit the enclosing record's subject ID;
//! a nested record carrying a *different* subject ID is rejected.
//!
//! The concrete annotation surface that produces descriptors is left to the
//! application layer; the integration tests show the hand-written pattern.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::error::{Error, WalkError};

/// Where a record's subject ID comes from: a named field, optionally with a
/// literal prefix prepended to the field's value.
#[derive(Debug, Clone, Copy)]
pub struct SubjectSpec {
    pub field: &'static str,
    pub prefix: &'static str,
}

/// Static description of one PII field slot.
#[derive(Debug, Clone, Copy)]
pub struct PiiFieldSpec {
    pub name: &'static str,
    /// Masking kind (`email`, `credit_card`, `ipv4_addr`, or empty).
    pub kind: &'static str,
    /// Replacement written when decryption finds no key for the subject.
    pub replacement: &'static str,
}

impl PiiFieldSpec {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            kind: "",
            replacement: "",
        }
    }

    pub const fn with_kind(name: &'static str, kind: &'static str) -> Self {
        Self {
            name,
            kind,
            replacement: "",
        }
    }

    pub const fn with_replacement(name: &'static str, replacement: &'static str) -> Self {
        Self {
            name,
            kind: "",
            replacement,
        }
    }
}

/// Static per-type descriptor: the record's subject spec, PII fields, and
/// nested record types.
///
/// Nested types are referenced through descriptor thunks rather than owned
/// values, so mutually-recursive record types (a record containing a field
/// of its own type) stay representable.
pub struct RecordDescriptor {
    pub type_name: &'static str,
    pub subject: Option<SubjectSpec>,
    pub fields: &'static [PiiFieldSpec],
    pub nested: &'static [fn() -> &'static RecordDescriptor],
}

fn has_pii_cache() -> &'static RwLock<HashMap<usize, bool>> {
    static CACHE: OnceLock<RwLock<HashMap<usize, bool>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

impl RecordDescriptor {
    /// Whether this record type carries PII, directly or through a nested
    /// record type. Computed once per descriptor and cached process-wide.
    pub fn has_pii(&'static self) -> bool {
        let key = self as *const RecordDescriptor as usize;
        if let Some(hit) = has_pii_cache().read().get(&key) {
            return *hit;
        }
        let mut visited = HashSet::new();
        let result = compute_has_pii(self, &mut visited);
        has_pii_cache().write().insert(key, result);
        result
    }
}

fn compute_has_pii(desc: &'static RecordDescriptor, visited: &mut HashSet<usize>) -> bool {
    let key = desc as *const RecordDescriptor as usize;
    if !visited.insert(key) {
        return false;
    }
    if !desc.fields.is_empty() {
        return true;
    }
    desc.nested.iter().any(|thunk| compute_has_pii(thunk(), visited))
}

/// A PII field slot handed to replace callbacks, carrying the resolved
/// subject ID and the field's static spec.
#[derive(Debug, Clone, Copy)]
pub struct FieldRef<'a> {
    pub subject_id: &'a str,
    pub name: &'static str,
    pub kind: &'static str,
    pub replacement: &'static str,
}

/// Replace callback: receives the field slot and its current value, returns
/// the new value or `None` to leave the field untouched.
pub type ReplaceFn<'a> = dyn FnMut(&FieldRef<'_>, &str) -> Result<Option<String>, Error> + 'a;

/// A record whose PII fields can be walked and rewritten in place.
pub trait PiiRecord: Send {
    /// The record type's static descriptor.
    fn descriptor(&self) -> &'static RecordDescriptor;

    /// The record's own subject ID with its prefix applied, `None` when the
    /// type declares no subject field.
    fn own_subject_id(&self) -> Option<String>;

    /// Visits nested records immutably.
    fn dive(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error>;

    /// Visits every PII field slot mutably, recursing into nested records
    /// with the same subject ID. A field is rewritten only when the
    /// callback returns a value different from the current one.
    fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error>;
}

/// Applies the replace callback to one string field slot.
///
/// Empty values are skipped; the slot is only written when the callback
/// produced a different value.
pub fn rewrite_field(
    spec: &PiiFieldSpec,
    subject_id: &str,
    value: &mut String,
    f: &mut ReplaceFn<'_>,
) -> Result<(), Error> {
    if value.is_empty() {
        return Ok(());
    }
    let field = FieldRef {
        subject_id,
        name: spec.name,
        kind: spec.kind,
        replacement: spec.replacement,
    };
    if let Some(new_value) = f(&field, value)? {
        if new_value != *value {
            *value = new_value;
        }
    }
    Ok(())
}

/// [`rewrite_field`] over an optional field slot; `None` is skipped.
pub fn rewrite_opt_field(
    spec: &PiiFieldSpec,
    subject_id: &str,
    value: &mut Option<String>,
    f: &mut ReplaceFn<'_>,
) -> Result<(), Error> {
    match value {
        Some(v) => rewrite_field(spec, subject_id, v, f),
        None => Ok(()),
    }
}

/// Resolves the record's subject ID, walking nested records.
///
/// Fails with `subject-id-not-found` when neither the record nor any
/// nested record declares one.
pub fn resolve_subject(record: &dyn PiiRecord) -> Result<String, Error> {
    try_resolve_subject(record)?.ok_or_else(|| WalkError::SubjectIdNotFound.into())
}

/// Resolves the record's subject ID if one exists along any walked path.
///
/// Distinct non-empty subject IDs on the same walk fail with
/// `multiple-nested-subject-id`.
pub fn try_resolve_subject(record: &dyn PiiRecord) -> Result<Option<String>, Error> {
    let mut found = record.own_subject_id().filter(|s| !s.is_empty());
    record.dive(&mut |child| {
        if let Some(nested) = try_resolve_subject(child)? {
            if let Some(existing) = &found {
                if *existing != nested {
                    return Err(WalkError::MultipleNestedSubjectId.into());
                }
            } else {
                found = Some(nested);
            }
        }
        Ok(())
    })?;
    Ok(found)
}

/// Container support for nested records: sequences, mappings, options and
/// boxes of [`PiiRecord`] types all walk their elements.
pub trait Dive {
    fn each(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error>;

    fn each_mut(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error>;
}

impl<T: PiiRecord> Dive for Vec<T> {
    fn each(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for item in self {
            visit(item)?;
        }
        Ok(())
    }

    fn each_mut(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for item in self.iter_mut() {
            visit(item)?;
        }
        Ok(())
    }
}

impl<T: PiiRecord> Dive for Option<T> {
    fn each(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        if let Some(item) = self {
            visit(item)?;
        }
        Ok(())
    }

    fn each_mut(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        if let Some(item) = self.as_mut() {
            visit(item)?;
        }
        Ok(())
    }
}

impl<T: PiiRecord> Dive for Box<T> {
    fn each(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        visit(self.as_ref())
    }

    fn each_mut(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        visit(self.as_mut())
    }
}

impl<K, V: PiiRecord, S> Dive for HashMap<K, V, S> {
    fn each(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for item in self.values() {
            visit(item)?;
        }
        Ok(())
    }

    fn each_mut(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for item in self.values_mut() {
            visit(item)?;
        }
        Ok(())
    }
}

impl<K, V: PiiRecord> Dive for BTreeMap<K, V> {
    fn each(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for item in self.values() {
            visit(item)?;
        }
        Ok(())
    }

    fn each_mut(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for item in self.values_mut() {
            visit(item)?;
        }
        Ok(())
    }
}
