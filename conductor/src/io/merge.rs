//! Append staged proposal files to the shared target file.
//!
//! Each proposal becomes a delimited block whose begin marker carries a
//! content fingerprint. A proposal whose complete block is already present is
//! not appended again, so re-running after a crash between append and delete
//! cannot duplicate content. A block cut short by a crash mid-append is
//! truncated and written again.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use super::config::MergeConfig;
use super::paths::ConductorPaths;

/// Resolved merge locations and marker style.
#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub staging_dir: PathBuf,
    pub target: PathBuf,
    pub comment_prefix: String,
    pub extensions: Vec<String>,
}

impl MergeSettings {
    pub fn from_config(paths: &ConductorPaths, cfg: &MergeConfig) -> Self {
        Self {
            staging_dir: paths.resolve(&cfg.staging_dir),
            target: paths.resolve(&cfg.target),
            comment_prefix: cfg.comment_prefix.clone(),
            extensions: cfg.extensions.clone(),
        }
    }

    fn accepts(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return false;
        }
        if self.extensions.is_empty() {
            return true;
        }
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }
}

/// What one merge pass did, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Proposals appended to the target.
    pub merged: Vec<String>,
    /// Proposals already present in the target; only their files were removed.
    pub deduplicated: Vec<String>,
    /// Proposals left staged because they are not UTF-8 text.
    pub skipped: Vec<String>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty() && self.deduplicated.is_empty() && self.skipped.is_empty()
    }
}

/// First 16 hex digits of the SHA-256 of `contents`.
pub fn fingerprint(contents: &str) -> String {
    let digest = Sha256::digest(contents.as_bytes());
    hex::encode(&digest[..8])
}

pub fn begin_marker(prefix: &str, name: &str, contents: &str) -> String {
    format!(
        "{prefix} >>>>>>> PROPOSAL {name} sha256:{}",
        fingerprint(contents)
    )
}

pub fn end_marker(prefix: &str, name: &str) -> String {
    format!("{prefix} <<<<<<< END {name}")
}

pub fn section_marker(prefix: &str) -> String {
    format!("{prefix} === AUTO-MERGED PROPOSALS ===")
}

/// Begin marker, contents and end marker, each on their own lines.
fn proposal_block(prefix: &str, name: &str, contents: &str) -> String {
    let mut block = begin_marker(prefix, name, contents);
    block.push('\n');
    block.push_str(contents);
    if !contents.ends_with('\n') {
        block.push('\n');
    }
    block.push_str(&end_marker(prefix, name));
    block.push('\n');
    block
}

/// Offset of an unfinished copy of `block` at the very end of `existing`.
fn partial_tail(existing: &str, block: &str, begin: &str) -> Option<usize> {
    let start = existing.rfind(begin)?;
    let at_line_start = start == 0 || existing[..start].ends_with('\n');
    (at_line_start && block.starts_with(&existing[start..])).then_some(start)
}

/// Merge every staged proposal into the target, in file-name order.
///
/// A proposal file is deleted only after its block is durably appended.
#[instrument(skip_all, fields(staging = %settings.staging_dir.display(), target = %settings.target.display()))]
pub fn merge_proposals(settings: &MergeSettings) -> Result<MergeReport> {
    let proposals = list_proposals(settings)?;
    let mut report = MergeReport::default();
    if proposals.is_empty() {
        debug!("no proposals staged");
        return Ok(report);
    }

    let mut existing = match fs::read_to_string(&settings.target) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", settings.target.display()));
        }
    };
    if let Some(parent) = settings.target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut target = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.target)
        .with_context(|| format!("open {}", settings.target.display()))?;

    let prefix = settings.comment_prefix.as_str();
    let section = section_marker(prefix);
    let mut needs_section = !existing.trim().is_empty() && !existing.contains(&section);

    for (name, path) in proposals {
        let bytes = fs::read(&path).with_context(|| format!("read proposal {}", path.display()))?;
        let Ok(contents) = String::from_utf8(bytes) else {
            warn!(proposal = %name, "skipping proposal that is not UTF-8 text");
            report.skipped.push(name);
            continue;
        };
        let body = proposal_block(prefix, &name, &contents);

        if existing.contains(&body) {
            info!(proposal = %name, "proposal already merged, removing staged copy");
            remove_proposal(&path)?;
            report.deduplicated.push(name);
            continue;
        }

        let begin = begin_marker(prefix, &name, &contents);
        if let Some(start) = partial_tail(&existing, &body, &begin) {
            warn!(proposal = %name, offset = start, "truncating partially merged proposal");
            target
                .set_len(start as u64)
                .with_context(|| format!("truncate {}", settings.target.display()))?;
            existing.truncate(start);
        }

        let mut block = String::new();
        if needs_section && !existing.trim().is_empty() {
            if !existing.ends_with('\n') {
                block.push('\n');
            }
            block.push('\n');
            block.push_str(&section);
            block.push('\n');
        }
        needs_section = false;
        block.push_str(&body);
        block.push('\n');

        target
            .write_all(block.as_bytes())
            .with_context(|| format!("append to {}", settings.target.display()))?;
        target
            .sync_all()
            .with_context(|| format!("sync {}", settings.target.display()))?;
        existing.push_str(&block);

        remove_proposal(&path)?;
        info!(proposal = %name, "merged proposal");
        report.merged.push(name);
    }

    sync_dir(&settings.staging_dir);
    Ok(report)
}

fn list_proposals(settings: &MergeSettings) -> Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(&settings.staging_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("list {}", settings.staging_dir.display()));
        }
    };

    let mut proposals = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("list {}", settings.staging_dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %path.display(), "skipping proposal with non-UTF-8 name");
            continue;
        };
        if settings.accepts(&name) {
            proposals.push((name, path));
        }
    }
    proposals.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(proposals)
}

fn remove_proposal(path: &Path) -> Result<()> {
    fs::remove_file(path).with_context(|| format!("remove proposal {}", path.display()))
}

fn sync_dir(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), err = %err, "directory sync unavailable");
    }
}
