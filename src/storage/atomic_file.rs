use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::utils::error::GatewayError;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replaces `path` with `contents` so readers only ever see the old or the
/// new file in full: write a sibling temp file, fsync it, rename over.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), GatewayError> {
    let persist = |op: &str, e: std::io::Error| {
        GatewayError::Persistence(format!("{} {}: {}", op, path.display(), e))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persist("create dir for", e))?;
    }

    let tmp = temp_path(path);
    let mut file = File::create(&tmp).map_err(|e| persist("create temp for", e))?;
    file.write_all(contents).map_err(|e| persist("write temp for", e))?;
    file.sync_all().map_err(|e| persist("sync temp for", e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| persist("rename temp over", e))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T, pretty: bool) -> Result<(), GatewayError> {
    let contents = if pretty {
        serde_json::to_vec_pretty(value)
    } else {
        serde_json::to_vec(value)
    }
    .map_err(|e| GatewayError::Persistence(format!("serialize {}: {}", path.display(), e)))?;

    write_atomic(path, &contents)
}
