//! Schema definition loading.

use std::path::Path;

use crate::error::{MigrateError, Result};

/// Reads a schema definition file.
///
/// The contents are handed to the engine verbatim; no parsing happens here.
pub fn load_definition(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|source| MigrateError::Io {
        path: path.to_path_buf(),
        source,
    })
}
