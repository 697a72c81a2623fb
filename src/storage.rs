//! Launch history on disk.
//!
//! Each completed launch cycle is written as one pretty-printed JSON file under
//! `<data dir>/workspace-launcher/launches/`. File names start with the cycle's
//! timestamp so a reverse lexical sort lists the newest first.

use crate::model::LaunchRecord;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

fn base_dir() -> Result<PathBuf> {
    let root = dirs::data_dir()
        .or_else(dirs::home_dir)
        .context("cannot determine a data directory for launch history")?;
    Ok(root.join("workspace-launcher").join("launches"))
}

fn file_name(record: &LaunchRecord) -> String {
    let stamp: String = record
        .timestamp_utc
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("launch-{}-{}.json", stamp, record.launch_id)
}

pub fn save_record(record: &LaunchRecord) -> Result<PathBuf> {
    save_record_in(&base_dir()?, record)
}

pub fn load_recent(limit: usize) -> Result<Vec<LaunchRecord>> {
    load_recent_in(&base_dir()?, limit)
}

pub fn delete_record(record: &LaunchRecord) -> Result<()> {
    delete_record_in(&base_dir()?, record)
}

/// Write the record to an arbitrary path chosen by the user.
pub fn export_json(path: &Path, record: &LaunchRecord) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(record)?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn save_record_in(dir: &Path, record: &LaunchRecord) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(file_name(record));
    export_json(&path, record)?;
    Ok(path)
}

fn load_recent_in(dir: &Path, limit: usize) -> Result<Vec<LaunchRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("json"))
        .collect();
    files.sort();
    files.reverse();

    let mut out = Vec::new();
    for p in files {
        if out.len() >= limit {
            break;
        }
        // Skip files we cannot parse rather than failing the whole listing.
        let Ok(data) = fs::read_to_string(&p) else {
            continue;
        };
        match serde_json::from_str::<LaunchRecord>(&data) {
            Ok(r) => out.push(r),
            Err(e) => tracing::debug!(path = %p.display(), error = %e, "skipping unreadable history entry"),
        }
    }
    Ok(out)
}

fn delete_record_in(dir: &Path, record: &LaunchRecord) -> Result<()> {
    let path = dir.join(file_name(record));
    fs::remove_file(&path).with_context(|| format!("delete {}", path.display()))?;
    Ok(())
}
