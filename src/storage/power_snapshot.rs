use std::path::{Path, PathBuf};

use super::atomic_file::write_json_atomic;
use crate::devices::PowerReading;
use crate::utils::error::GatewayError;

/// The on-disk copy of the latest meter reading, rewritten each good poll.
#[derive(Debug, Clone)]
pub struct PowerSnapshotFile {
    path: PathBuf,
}

impl PowerSnapshotFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, reading: &PowerReading) -> Result<(), GatewayError> {
        write_json_atomic(&self.path, reading, true)
    }

    pub fn read(&self) -> Result<PowerReading, GatewayError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            GatewayError::Persistence(format!("read {}: {}", self.path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Raw JSON view, for consumers that pass the file through untouched.
    pub fn read_value(&self) -> Result<serde_json::Value, GatewayError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            GatewayError::Persistence(format!("read {}: {}", self.path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}
