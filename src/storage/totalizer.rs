use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::atomic_file::write_json_atomic;
use crate::utils::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotalizerRecord {
    pub total_liters: f64,
}

/// Durable cumulative volume. The file is only ever replaced whole.
#[derive(Debug, Clone)]
pub struct TotalizerStore {
    path: PathBuf,
}

impl TotalizerStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing, unreadable or corrupt file restarts the
    /// totalizer from zero.
    pub fn load(&self) -> f64 {
        match self.try_load() {
            Ok(Some(total)) => {
                info!("💧 Restored totalizer: {:.3} L from {}", total, self.path.display());
                total
            }
            Ok(None) => {
                warn!("No totalizer at {}, starting from 0", self.path.display());
                0.0
            }
            Err(e) => {
                error!("❌ Failed to load totalizer, starting from 0: {}", e);
                0.0
            }
        }
    }

    fn try_load(&self) -> Result<Option<f64>, GatewayError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GatewayError::Persistence(format!(
                    "read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let record: TotalizerRecord = serde_json::from_str(&content)?;
        if !record.total_liters.is_finite() || record.total_liters < 0.0 {
            return Err(GatewayError::Decode(format!(
                "implausible total_liters {}",
                record.total_liters
            )));
        }
        Ok(Some(record.total_liters))
    }

    pub fn save(&self, total_liters: f64) -> Result<(), GatewayError> {
        write_json_atomic(&self.path, &TotalizerRecord { total_liters }, false)
    }
}
