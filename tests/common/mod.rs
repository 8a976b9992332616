//! Shared record fixtures for the integration suites.

#![allow(dead_code)]

use std::collections::HashMap;

use pii_guard::record::{rewrite_field, rewrite_opt_field, Dive, ReplaceFn};
use pii_guard::{Error, PiiFieldSpec, PiiRecord, RecordDescriptor, SubjectSpec};

/// Flat record: subject plus two PII fields, one untagged field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: String,
    pub fullname: String,
    pub gender: String,
    pub country: String,
}

static PROFILE_FIELDS: [PiiFieldSpec; 2] = [
    PiiFieldSpec::with_replacement("fullname", "deleted pii"),
    PiiFieldSpec::new("gender"),
];

static PROFILE_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
    type_name: "Profile",
    subject: Some(SubjectSpec {
        field: "user_id",
        prefix: "",
    }),
    fields: &PROFILE_FIELDS,
    nested: &[],
};

impl PiiRecord for Profile {
    fn descriptor(&self) -> &'static RecordDescriptor {
        &PROFILE_DESCRIPTOR
    }

    fn own_subject_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }

    fn dive(
        &self,
        _visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error> {
        rewrite_field(&PROFILE_FIELDS[0], subject_id, &mut self.fullname, f)?;
        rewrite_field(&PROFILE_FIELDS[1], subject_id, &mut self.gender, f)?;
        Ok(())
    }
}

impl Profile {
    pub fn sample() -> Self {
        Self {
            user_id: "kal5430".to_string(),
            fullname: "Idir Moore".to_string(),
            gender: "M".to_string(),
            country: "MA".to_string(),
        }
    }
}

/// Nested record carrying the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub user_id: String,
    pub fullname: String,
}

static CUSTOMER_FIELDS: [PiiFieldSpec; 1] =
    [PiiFieldSpec::with_replacement("fullname", "gone")];

static CUSTOMER_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
    type_name: "Customer",
    subject: Some(SubjectSpec {
        field: "user_id",
        prefix: "",
    }),
    fields: &CUSTOMER_FIELDS,
    nested: &[],
};

fn customer_descriptor() -> &'static RecordDescriptor {
    &CUSTOMER_DESCRIPTOR
}

impl PiiRecord for Customer {
    fn descriptor(&self) -> &'static RecordDescriptor {
        &CUSTOMER_DESCRIPTOR
    }

    fn own_subject_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }

    fn dive(
        &self,
        _visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error> {
        rewrite_field(&CUSTOMER_FIELDS[0], subject_id, &mut self.fullname, f)
    }
}

/// Enclosing record without a subject of its own: it inherits the nested
/// customer's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: String,
    pub customer: Customer,
}

static ORDER_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
    type_name: "Order",
    subject: None,
    fields: &[],
    nested: &[customer_descriptor],
};

impl PiiRecord for Order {
    fn descriptor(&self) -> &'static RecordDescriptor {
        &ORDER_DESCRIPTOR
    }

    fn own_subject_id(&self) -> Option<String> {
        None
    }

    fn dive(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        visit(&self.customer)
    }

    fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error> {
        self.customer.rewrite(subject_id, f)
    }
}

/// Two nested records that may disagree on the subject.
#[derive(Debug, Clone)]
pub struct MergedAccount {
    pub primary: Customer,
    pub secondary: Customer,
}

static MERGED_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
    type_name: "MergedAccount",
    subject: None,
    fields: &[],
    nested: &[customer_descriptor, customer_descriptor],
};

impl PiiRecord for MergedAccount {
    fn descriptor(&self) -> &'static RecordDescriptor {
        &MERGED_DESCRIPTOR
    }

    fn own_subject_id(&self) -> Option<String> {
        None
    }

    fn dive(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        visit(&self.primary)?;
        visit(&self.secondary)
    }

    fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error> {
        self.primary.rewrite(subject_id, &mut *f)?;
        self.secondary.rewrite(subject_id, f)
    }
}

/// Leaf record with a masked field and no subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub ip_addr: String,
}

static DEVICE_FIELDS: [PiiFieldSpec; 1] = [PiiFieldSpec::with_kind("ip_addr", "ipv4_addr")];

static DEVICE_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
    type_name: "Device",
    subject: None,
    fields: &DEVICE_FIELDS,
    nested: &[],
};

fn device_descriptor() -> &'static RecordDescriptor {
    &DEVICE_DESCRIPTOR
}

impl PiiRecord for Device {
    fn descriptor(&self) -> &'static RecordDescriptor {
        &DEVICE_DESCRIPTOR
    }

    fn own_subject_id(&self) -> Option<String> {
        None
    }

    fn dive(
        &self,
        _visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error> {
        rewrite_field(&DEVICE_FIELDS[0], subject_id, &mut self.ip_addr, f)
    }
}

/// Record diving into a mapping of nested records.
#[derive(Debug, Clone)]
pub struct Fleet {
    pub owner_id: String,
    pub devices: HashMap<String, Device>,
}

static FLEET_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
    type_name: "Fleet",
    subject: Some(SubjectSpec {
        field: "owner_id",
        prefix: "",
    }),
    fields: &[],
    nested: &[device_descriptor],
};

impl PiiRecord for Fleet {
    fn descriptor(&self) -> &'static RecordDescriptor {
        &FLEET_DESCRIPTOR
    }

    fn own_subject_id(&self) -> Option<String> {
        Some(self.owner_id.clone())
    }

    fn dive(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        self.devices.each(visit)
    }

    fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error> {
        self.devices
            .each_mut(&mut |device| device.rewrite(subject_id, &mut *f))
    }
}

/// Masking fixture mirroring a profile with kind-tagged fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditCard {
    pub number: String,
}

static CREDIT_CARD_FIELDS: [PiiFieldSpec; 1] =
    [PiiFieldSpec::with_kind("number", "credit_card")];

static CREDIT_CARD_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
    type_name: "CreditCard",
    subject: None,
    fields: &CREDIT_CARD_FIELDS,
    nested: &[],
};

fn credit_card_descriptor() -> &'static RecordDescriptor {
    &CREDIT_CARD_DESCRIPTOR
}

impl PiiRecord for CreditCard {
    fn descriptor(&self) -> &'static RecordDescriptor {
        &CREDIT_CARD_DESCRIPTOR
    }

    fn own_subject_id(&self) -> Option<String> {
        None
    }

    fn dive(
        &self,
        _visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error> {
        rewrite_field(&CREDIT_CARD_FIELDS[0], subject_id, &mut self.number, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskProfile {
    pub email: String,
    pub fullname: String,
    pub device: Device,
    pub credit_cards: Vec<CreditCard>,
}

static MASK_PROFILE_FIELDS: [PiiFieldSpec; 2] = [
    PiiFieldSpec::with_kind("email", "email"),
    PiiFieldSpec::new("fullname"),
];

static MASK_PROFILE_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
    type_name: "MaskProfile",
    subject: None,
    fields: &MASK_PROFILE_FIELDS,
    nested: &[device_descriptor, credit_card_descriptor],
};

impl PiiRecord for MaskProfile {
    fn descriptor(&self) -> &'static RecordDescriptor {
        &MASK_PROFILE_DESCRIPTOR
    }

    fn own_subject_id(&self) -> Option<String> {
        None
    }

    fn dive(
        &self,
        visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        visit(&self.device)?;
        self.credit_cards.each(visit)
    }

    fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error> {
        rewrite_field(&MASK_PROFILE_FIELDS[0], subject_id, &mut self.email, f)?;
        rewrite_field(&MASK_PROFILE_FIELDS[1], subject_id, &mut self.fullname, f)?;
        self.device.rewrite(subject_id, &mut *f)?;
        self.credit_cards
            .each_mut(&mut |card| card.rewrite(subject_id, &mut *f))
    }
}

/// Record with an optional PII field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub user_id: String,
    pub body: Option<String>,
}

static NOTE_FIELDS: [PiiFieldSpec; 1] = [PiiFieldSpec::new("body")];

static NOTE_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
    type_name: "Note",
    subject: Some(SubjectSpec {
        field: "user_id",
        prefix: "",
    }),
    fields: &NOTE_FIELDS,
    nested: &[],
};

impl PiiRecord for Note {
    fn descriptor(&self) -> &'static RecordDescriptor {
        &NOTE_DESCRIPTOR
    }

    fn own_subject_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }

    fn dive(
        &self,
        _visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn rewrite(&mut self, subject_id: &str, f: &mut ReplaceFn<'_>) -> Result<(), Error> {
        rewrite_opt_field(&NOTE_FIELDS[0], subject_id, &mut self.body, f)
    }
}

/// Record with no PII at all; the protector must ignore it silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plain {
    pub name: String,
}

static PLAIN_DESCRIPTOR: RecordDescriptor = RecordDescriptor {
    type_name: "Plain",
    subject: None,
    fields: &[],
    nested: &[],
};

impl PiiRecord for Plain {
    fn descriptor(&self) -> &'static RecordDescriptor {
        &PLAIN_DESCRIPTOR
    }

    fn own_subject_id(&self) -> Option<String> {
        None
    }

    fn dive(
        &self,
        _visit: &mut dyn FnMut(&dyn PiiRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn rewrite(&mut self, _subject_id: &str, _f: &mut ReplaceFn<'_>) -> Result<(), Error> {
        Ok(())
    }
}
