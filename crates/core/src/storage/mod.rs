//! Structured on-disk layout for uploads and conversion outputs.
//!
//! Files land under `<root>/<category>/[user_<id>/]<yyyy>/<mm>/<dd>/` with a
//! name of the form `<basename>_<hash8>_<uuid8>.<ext>`.

mod config;
mod error;
mod layout;

pub use config::StorageConfig;
pub use error::StorageError;
pub use layout::{sanitize_basename, StorageLayout, StoredFile};
