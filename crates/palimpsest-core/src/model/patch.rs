use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::field::{Field, FieldValue};
use super::user::{Name, Role, User};

/// A sparse set of field values, at most one per [`Field`].
///
/// Used both as the new values of a mutation and as the pre-image stored in
/// a delta record. Fields absent from the set carry no value and are never
/// read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    values: BTreeMap<Field, FieldValue>,
}

impl Patch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: Name) -> Self {
        self.set(FieldValue::Name(name));
        self
    }

    #[must_use]
    pub fn dob(mut self, dob: NaiveDate) -> Self {
        self.set(FieldValue::Dob(dob));
        self
    }

    #[must_use]
    pub fn role(mut self, role: Role) -> Self {
        self.set(FieldValue::Role(role));
        self
    }

    /// Insert or replace the value for its field.
    pub fn set(&mut self, value: FieldValue) {
        self.values.insert(value.field(), value);
    }

    /// Capture the current values of `fields` from `user`.
    #[must_use]
    pub fn capture(user: &User, fields: impl IntoIterator<Item = Field>) -> Self {
        fields
            .into_iter()
            .map(|field| field.value_of(user))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    #[must_use]
    pub fn contains(&self, field: Field) -> bool {
        self.values.contains_key(&field)
    }

    /// Fields present in the set, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.values.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.values.values()
    }

    /// Overwrite the present fields of `user`; absent fields are left alone.
    pub fn apply_to(&self, user: &mut User) {
        for value in self.values.values() {
            value.write_to(user);
        }
    }
}

impl FromIterator<FieldValue> for Patch {
    fn from_iter<I: IntoIterator<Item = FieldValue>>(iter: I) -> Self {
        let mut patch = Self::new();
        for value in iter {
            patch.set(value);
        }
        patch
    }
}
