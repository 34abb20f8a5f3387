//! JSON report export

use crate::error::{MigrationError, Result};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Write `report` as pretty JSON, creating parent directories
///
/// # Errors
/// `Serialize` if the report cannot be encoded, `Io` if the file cannot be
/// written.
pub fn export_json<T: Serialize + ?Sized>(path: &Path, report: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(report)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| MigrationError::io(parent, e))?;
    }
    std::fs::write(path, text).map_err(|e| MigrationError::io(path, e))?;
    info!(path = %path.display(), "report exported");
    Ok(())
}
