//! Field tags and tagged values for the mutable part of a [`User`].
//!
//! A [`Field`] names one column of the snapshot; a [`FieldValue`] carries a
//! value for exactly one field. Partial updates and delta records are built
//! from these pairs, so adding a field means adding a variant here rather
//! than reinterpreting positional flags.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::user::{Name, Role, User};

/// One mutable field of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Name,
    Dob,
    Role,
}

impl Field {
    pub const ALL: [Self; 3] = [Self::Name, Self::Dob, Self::Role];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Dob => "dob",
            Self::Role => "role",
        }
    }

    /// Bit used for this field in the persisted change mask.
    #[must_use]
    pub const fn bit(self) -> u32 {
        match self {
            Self::Name => 1,
            Self::Dob => 1 << 1,
            Self::Role => 1 << 2,
        }
    }

    /// Union of all known field bits.
    #[must_use]
    pub const fn all_bits() -> u32 {
        Self::Name.bit() | Self::Dob.bit() | Self::Role.bit()
    }

    /// Read the current value of this field from `user`.
    #[must_use]
    pub fn value_of(self, user: &User) -> FieldValue {
        match self {
            Self::Name => FieldValue::Name(user.name.clone()),
            Self::Dob => FieldValue::Dob(user.dob),
            Self::Role => FieldValue::Role(user.role),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value for exactly one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Name(Name),
    Dob(NaiveDate),
    Role(Role),
}

impl FieldValue {
    #[must_use]
    pub const fn field(&self) -> Field {
        match self {
            Self::Name(_) => Field::Name,
            Self::Dob(_) => Field::Dob,
            Self::Role(_) => Field::Role,
        }
    }

    /// Overwrite the matching field of `user` with this value.
    pub fn write_to(&self, user: &mut User) {
        match self {
            Self::Name(name) => user.name = name.clone(),
            Self::Dob(dob) => user.dob = *dob,
            Self::Role(role) => user.role = *role,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "name={name}"),
            Self::Dob(dob) => write!(f, "dob={dob}"),
            Self::Role(role) => write!(f, "role={role}"),
        }
    }
}

/// Validation failures for field input.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("name is {len} characters long, at most {max} allowed")]
    NameTooLong { len: usize, max: usize },

    #[error("invalid role '{got}': expected one of guest, support, admin")]
    InvalidRole { got: String },

    #[error("invalid date '{got}': expected YYYY-MM-DD")]
    InvalidDate {
        got: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("invalid user id '{got}'")]
    InvalidId { got: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::user::{UserId, parse_date};
    use std::collections::HashSet;

    #[test]
    fn bits_are_distinct_and_cover_all_fields() {
        let mut seen = HashSet::new();
        let mut union = 0;
        for field in Field::ALL {
            assert_eq!(field.bit().count_ones(), 1, "{field} must own one bit");
            assert!(seen.insert(field.bit()));
            union |= field.bit();
        }
        assert_eq!(union, Field::all_bits());
    }

    #[test]
    fn value_of_then_write_to_is_identity() {
        let mut user = User {
            id: UserId::new(),
            name: Name::parse("Ada").expect("name"),
            dob: parse_date("1815-12-10").expect("date"),
            role: Role::Support,
        };
        let before = user.clone();
        for field in Field::ALL {
            let value = field.value_of(&user);
            assert_eq!(value.field(), field);
            value.write_to(&mut user);
        }
        assert_eq!(user, before);
    }

    #[test]
    fn write_to_touches_only_its_field() {
        let mut user = User {
            id: UserId::new(),
            name: Name::parse("Ada").expect("name"),
            dob: parse_date("1815-12-10").expect("date"),
            role: Role::Guest,
        };
        FieldValue::Role(Role::Admin).write_to(&mut user);
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.name.as_str(), "Ada");
    }
}
