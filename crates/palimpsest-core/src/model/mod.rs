//! Domain types: the user record, its field tags and sparse patches.

pub mod field;
pub mod patch;
pub mod user;

pub use field::{Field, FieldError, FieldValue};
pub use patch::Patch;
pub use user::{BASE_REVISION, MAX_NAME_LEN, MAX_REVISION, Name, Revision, Role, User, UserId};
