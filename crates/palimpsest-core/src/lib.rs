//! palimpsest-core library.
//!
//! Versioned user records: one current snapshot per user, an append-only log
//! of pre-change field values, compare-and-set writes and point-in-time
//! reconstruction of any earlier revision.
//!
//! # Conventions
//!
//! - **Errors**: store operations return [`error::StoreError`]; setup and
//!   configuration return `anyhow::Result`.
//! - **Logging**: use `tracing` macros (`info!`, `warn!`, `debug!`).

#![forbid(unsafe_code)]

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod reconstruct;
pub mod store;

pub use error::{EngineError, ErrorCode, StoreError};
pub use model::{
    BASE_REVISION, Field, FieldError, FieldValue, MAX_NAME_LEN, MAX_REVISION, Name, Patch, Revision,
    Role, User, UserId,
};
pub use reconstruct::HistoryEntry;
pub use store::UserStore;
