//! Side-effecting adapters: filesystem, subprocesses and git.

pub mod config;
pub mod git;
pub mod init;
pub mod merge;
pub mod paths;
pub mod process;
pub mod task_store;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Write `contents` to a sibling temp file, fsync it, then rename over `path`.
///
/// Readers never observe a partially written file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);

    let mut file =
        File::create(&tmp_path).with_context(|| format!("create temp {}", tmp_path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("write temp {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync temp {}", tmp_path.display()))?;
    drop(file);
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Pretty JSON with a trailing newline, the on-disk format for records.
pub(crate) fn to_json_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    Ok(buf)
}
