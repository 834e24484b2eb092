//! The export ledger: the target service's config file, read and written as
//! `(volume, device)` stanza pairs.
//!
//! ```text
//! Target iqn.2016-04:bmi.bmi7img12
//!     Lun 0 Path=/dev/rbd3,Type=blockio
//! ```
//!
//! The ledger is re-read on every call; nothing is cached between operations.

use crate::error::{BmiError, BmiResult};
use crate::persist::write_atomic;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const TARGET_PREFIX: &str = "iqn.2016-04:bmi";
const TARGET_KEYWORD: &str = "Target";
const LUN_KEYWORD: &str = "Lun";

/// Map of exported volume name to the local device backing it.
pub type ExportEntries = BTreeMap<String, String>;

/// Render one stanza pair for `volume` backed by `device`.
pub fn render_stanza(volume: &str, device: &str) -> String {
    format!("{TARGET_KEYWORD} {TARGET_PREFIX}.{volume}\n\t{LUN_KEYWORD} 0 Path={device},Type=blockio\n")
}

/// Volume name embedded in a qualified target name (`iqn.<date>:<ns>.<volume>`).
pub fn target_volume(target: &str) -> Option<&str> {
    target.split('.').nth(2).filter(|volume| !volume.is_empty())
}

/// Parse a ledger document into its entries.
///
/// Exactly one target may be pending at a time: a second `Target` line before
/// its `Lun` line, or a `Lun` line with no pending target, is a corrupt ledger.
pub fn parse_ledger(contents: &str) -> BmiResult<ExportEntries> {
    let mut entries = ExportEntries::new();
    let mut pending: Option<String> = None;

    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        let lineno = idx + 1;
        if line.starts_with(TARGET_KEYWORD) {
            if let Some(previous) = &pending {
                return Err(BmiError::InvalidConfig(format!(
                    "line {lineno}: target declared while `{previous}` has no LUN"
                )));
            }
            let volume = target_volume(line).ok_or_else(|| {
                BmiError::InvalidConfig(format!("line {lineno}: malformed target `{line}`"))
            })?;
            pending = Some(volume.to_string());
        } else if line.starts_with(LUN_KEYWORD) {
            let Some(volume) = pending.take() else {
                return Err(BmiError::InvalidConfig(format!(
                    "line {lineno}: LUN declared with no pending target"
                )));
            };
            let device = lun_device(line).ok_or_else(|| {
                BmiError::InvalidConfig(format!("line {lineno}: malformed LUN `{line}`"))
            })?;
            entries.insert(volume, device.to_string());
        }
    }

    if let Some(volume) = pending {
        return Err(BmiError::InvalidConfig(format!(
            "target `{volume}` has no LUN"
        )));
    }

    Ok(entries)
}

fn lun_device(line: &str) -> Option<&str> {
    let first = line.split(',').next()?;
    let (_, device) = first.split_once('=')?;
    Some(device.trim()).filter(|d| !d.is_empty())
}

fn line_targets(line: &str, volume: &str) -> bool {
    let line = line.trim();
    line.starts_with(TARGET_KEYWORD) && target_volume(line) == Some(volume)
}

/// File-backed ledger.
#[derive(Debug, Clone)]
pub struct ExportLedger {
    path: PathBuf,
}

impl ExportLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current entries. A missing file is an empty ledger.
    pub fn show_mappings(&self) -> BmiResult<ExportEntries> {
        parse_ledger(&self.read()?)
    }

    /// Append a stanza for `volume`.
    pub fn append(&self, volume: &str, device: &str) -> BmiResult<()> {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                file.write_all(render_stanza(volume, device).as_bytes())?;
                file.flush()
            });
        result.map_err(|err| self.update_failed(err))
    }

    /// Drop the stanza for `volume`, keeping every other line as written.
    pub fn remove(&self, volume: &str) -> BmiResult<()> {
        let contents = self.read()?;
        let mut kept = String::with_capacity(contents.len());
        let mut skip_lun = false;
        let mut removed = false;

        for line in contents.lines() {
            if skip_lun && line.trim().starts_with(LUN_KEYWORD) {
                skip_lun = false;
                continue;
            }
            skip_lun = false;
            if line_targets(line, volume) {
                skip_lun = true;
                removed = true;
                continue;
            }
            kept.push_str(line);
            kept.push('\n');
        }

        if !removed {
            log::debug!("ledger has no stanza for {volume}; rewriting unchanged");
        }
        write_atomic(&self.path, kept.as_bytes(), None).map_err(|err| self.update_failed(err))
    }

    /// Replace the whole ledger with `entries`.
    pub fn rewrite(&self, entries: &ExportEntries) -> BmiResult<()> {
        let body: String = entries
            .iter()
            .map(|(volume, device)| render_stanza(volume, device))
            .collect();
        write_atomic(&self.path, body.as_bytes(), None).map_err(|err| self.update_failed(err))
    }

    fn read(&self) -> BmiResult<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(BmiError::ReadConfigFailed(format!(
                "{}: {err}",
                self.path.display()
            ))),
        }
    }

    fn update_failed(&self, err: io::Error) -> BmiError {
        BmiError::UpdateConfigFailed(format!("{}: {err}", self.path.display()))
    }
}
