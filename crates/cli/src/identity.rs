//! Vessel self identifier

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// File in the data directory holding a generated self id
pub const SELF_ID_FILE: &str = "self_id";

/// Use the configured id, or load (creating on first run) a persisted one
pub fn resolve_self_id(configured: Option<&str>, data_dir: &Path) -> Result<String> {
    if let Some(id) = configured.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }

    let path = data_dir.join(SELF_ID_FILE);
    if path.exists() {
        let stored = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let stored = stored.trim();
        if !stored.is_empty() {
            return Ok(stored.to_string());
        }
    }

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let id = format!("urn:mrn:signalk:uuid:{}", Uuid::new_v4());
    std::fs::write(&path, format!("{id}\n"))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Generated vessel id {} ({})", id, path.display());
    Ok(id)
}
