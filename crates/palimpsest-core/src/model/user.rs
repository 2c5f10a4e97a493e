use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::field::FieldError;

/// Count of accepted mutations to one user. Starts at [`BASE_REVISION`].
pub type Revision = u64;

/// Revision of a freshly created snapshot (no delta record exists yet).
pub const BASE_REVISION: Revision = 0;

/// Highest revision SQLite can store (its INTEGER is a signed 64-bit value).
pub const MAX_REVISION: Revision = i64::MAX.unsigned_abs();

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 30;

/// Time-ordered identity of a user (UUIDv7).
///
/// The hyphenated text form sorts in creation order, which is how it is
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Mint a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for UserId {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| FieldError::InvalidId { got: s.to_string() })
    }
}

/// A validated display name: trimmed, non-empty, at most [`MAX_NAME_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    /// Validate and normalize a display name.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::EmptyName`] for blank input and
    /// [`FieldError::NameTooLong`] past [`MAX_NAME_LEN`] characters.
    pub fn parse(raw: &str) -> Result<Self, FieldError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(FieldError::EmptyName);
        }
        let len = trimmed.chars().count();
        if len > MAX_NAME_LEN {
            return Err(FieldError::NameTooLong {
                len,
                max: MAX_NAME_LEN,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Name {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Name {
    type Error = FieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.0
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access level of a user. New users start as [`Role::Guest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Guest,
    Support,
    Admin,
}

impl Role {
    pub const ALL: [Self; 3] = [Self::Guest, Self::Support, Self::Admin];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Support => "support",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| FieldError::InvalidRole {
                got: s.to_string(),
            })
    }
}

/// Parse a calendar date in `YYYY-MM-DD` form.
///
/// # Errors
///
/// Returns [`FieldError::InvalidDate`] when the input is not a valid date.
pub fn parse_date(raw: &str) -> Result<NaiveDate, FieldError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|source| FieldError::InvalidDate {
        got: raw.to_string(),
        source,
    })
}

/// The versioned record: one user as stored in the snapshot table, or as
/// reconstructed for an earlier revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: Name,
    pub dob: NaiveDate,
    pub role: Role,
}

impl User {
    /// Age in whole years on `today`; zero for birth dates in the future.
    #[must_use]
    pub fn age_on(&self, today: NaiveDate) -> u32 {
        today.years_since(self.dob).unwrap_or(0)
    }

    /// Age in whole years as of the local calendar date.
    #[must_use]
    pub fn age(&self) -> u32 {
        self.age_on(Local::now().date_naive())
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User(role={}, name={}, age={})",
            self.role,
            self.name,
            self.age()
        )
    }
}
