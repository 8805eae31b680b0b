//! Export snapshots: the full methodology table as versioned JSON.
//!
//! RULE: Importing goes through the same validation as creation. A record
//! whose name already exists is skipped, never overwritten.

use crate::{
    error::{EngineError, EngineResult},
    methodology::Methodology,
    registry::Registry,
    types::Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSnapshot {
    pub schema_version: u32,
    pub exported_at: Timestamp,
    /// Ordered by name.
    pub methodologies: Vec<Methodology>,
}

impl ExportSnapshot {
    pub fn capture(registry: &Registry) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            exported_at: Utc::now(),
            methodologies: registry.all().iter().map(|m| (**m).clone()).collect(),
        }
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        let snapshot: ExportSnapshot = serde_json::from_str(json)?;
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(EngineError::UnsupportedSnapshot(snapshot.schema_version));
        }
        Ok(snapshot)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Names added to the registry.
    pub imported: Vec<String>,
    /// Names already present, left untouched.
    pub skipped: Vec<String>,
    /// Names refused by validation, with the reason.
    pub rejected: Vec<(String, String)>,
}

/// Import every record of `snapshot` into `registry`.
pub fn import(registry: &Registry, snapshot: &ExportSnapshot) -> EngineResult<ImportReport> {
    if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(EngineError::UnsupportedSnapshot(snapshot.schema_version));
    }
    let mut report = ImportReport::default();
    for m in &snapshot.methodologies {
        if registry.find_by_name(&m.name).is_some() {
            report.skipped.push(m.name.clone());
            continue;
        }
        match registry.restore(m.clone()) {
            Ok(_) => report.imported.push(m.name.clone()),
            Err(EngineError::DuplicateName(_) | EngineError::DuplicateId(_)) => {
                report.skipped.push(m.name.clone())
            }
            Err(e @ (EngineError::Validation { .. } | EngineError::InvalidSchema(_))) => {
                log::warn!("snapshot: rejected '{}': {e}", m.name);
                report.rejected.push((m.name.clone(), e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
    log::info!(
        "snapshot: imported {}, skipped {}, rejected {}",
        report.imported.len(),
        report.skipped.len(),
        report.rejected.len()
    );
    Ok(report)
}
