//! Listing of already-provisioned services.

use crate::allocator::Allocator;
use crate::config::ProvisionConfig;
use crate::error::{Error, Result};
use crate::unit::parse_unit;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// One provisioned service as found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub identifier: u32,
    pub unit_name: String,
    pub path: PathBuf,
    pub working_directory: Option<PathBuf>,
    pub port: Option<u16>,
    pub enabled: bool,
    /// Set when the unit file could not be read or parsed
    pub error: Option<String>,
}

/// Scan the unit directory and describe every provisioned unit, ordered by
/// identifier. Unreadable units are listed with their error instead of
/// failing the whole scan.
pub fn scan(config: &ProvisionConfig) -> Result<Vec<InventoryEntry>> {
    let allocator = Allocator::new(config);
    let mut entries = Vec::new();

    for unit in allocator.scan()? {
        let parsed = std::fs::read_to_string(&unit.path)
            .map_err(Error::from)
            .and_then(|content| parse_unit(&content, &unit.path));

        let entry = match parsed {
            Ok(parsed) => InventoryEntry {
                identifier: unit.identifier,
                unit_name: parsed.name,
                path: unit.path,
                working_directory: parsed.working_directory,
                port: parsed.port,
                enabled: parsed.enabled,
                error: None,
            },
            Err(e) => {
                warn!(path = %unit.path.display(), error = %e, "Failed to read unit");
                InventoryEntry {
                    identifier: unit.identifier,
                    unit_name: config.unit_name(unit.identifier),
                    path: unit.path,
                    working_directory: None,
                    port: None,
                    enabled: false,
                    error: Some(e.to_string()),
                }
            }
        };
        entries.push(entry);
    }

    Ok(entries)
}
