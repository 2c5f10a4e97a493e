//! Column encoding for domain types.
//!
//! Identities, names and roles are stored as TEXT; dates use rusqlite's
//! chrono encoding (`YYYY-MM-DD`). A delta row stores its changed fields as a
//! bit mask plus one nullable column per field; [`DeltaColumns`] converts
//! between that layout and a [`Patch`].

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::model::{Field, FieldValue, Name, Patch, Role, UserId};

impl ToSql for UserId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for UserId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Name {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Name {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::parse(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Physical layout of a patch: change mask plus one nullable column per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaColumns {
    pub mask: u32,
    pub name: Option<Name>,
    pub dob: Option<NaiveDate>,
    pub role: Option<Role>,
}

impl DeltaColumns {
    #[must_use]
    pub fn from_patch(patch: &Patch) -> Self {
        let mut columns = Self::default();
        for value in patch.values() {
            columns.mask |= value.field().bit();
            match value {
                FieldValue::Name(name) => columns.name = Some(name.clone()),
                FieldValue::Dob(dob) => columns.dob = Some(*dob),
                FieldValue::Role(role) => columns.role = Some(*role),
            }
        }
        columns
    }

    /// Rebuild the sparse patch. Columns whose bit is clear are ignored.
    ///
    /// # Errors
    ///
    /// Returns a description of the inconsistency when the mask has unknown
    /// bits, is empty, or flags a field whose column is NULL.
    pub fn into_patch(self) -> Result<Patch, String> {
        let unknown = self.mask & !Field::all_bits();
        if unknown != 0 {
            return Err(format!("unknown field bits {unknown:#x} in mask {:#x}", self.mask));
        }
        if self.mask == 0 {
            return Err("empty change mask".to_string());
        }

        let mut patch = Patch::new();
        for field in Field::ALL {
            if self.mask & field.bit() == 0 {
                continue;
            }
            let value = match field {
                Field::Name => self.name.clone().map(FieldValue::Name),
                Field::Dob => self.dob.map(FieldValue::Dob),
                Field::Role => self.role.map(FieldValue::Role),
            };
            let value = value.ok_or_else(|| format!("field {field} flagged but not stored"))?;
            patch.set(value);
        }
        Ok(patch)
    }
}
