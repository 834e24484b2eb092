//! `rbd showmapped` output parsing.
//!
//! Recent releases print a JSON array with `--format json`; older ones print an
//! object keyed by device id, or only the plain table. All three are accepted.

use bmi_core::error::{BmiError, BmiResult};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MappedImage {
    pub pool: String,
    #[serde(alias = "image")]
    pub name: String,
    #[serde(default)]
    pub snap: String,
    pub device: String,
}

impl MappedImage {
    /// Snapshot mappings are read-only and never exported.
    pub fn is_snapshot(&self) -> bool {
        !self.snap.is_empty() && self.snap != "-"
    }
}

pub fn parse_showmapped(output: &str) -> BmiResult<Vec<MappedImage>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return parse_json(trimmed);
    }
    parse_table(trimmed)
}

fn parse_json(text: &str) -> BmiResult<Vec<MappedImage>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| BmiError::Storage(format!("unreadable rbd showmapped output: {err}")))?;
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(by_id) => by_id.into_iter().map(|(_, row)| row).collect(),
        other => {
            return Err(BmiError::Storage(format!(
                "unexpected rbd showmapped output: {other}"
            )))
        }
    };
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|err| BmiError::Storage(format!("malformed rbd showmapped row: {err}")))
        })
        .collect()
}

fn parse_table(text: &str) -> BmiResult<Vec<MappedImage>> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<&str> = header.split_whitespace().collect();
    let position = |name: &str| {
        columns
            .iter()
            .position(|column| *column == name)
            .ok_or_else(|| BmiError::Storage(format!("rbd showmapped table has no `{name}` column")))
    };
    let pool_col = position("pool")?;
    let image_col = position("image")?;
    let snap_col = position("snap")?;
    let device_col = position("device")?;

    let namespace_col = columns.iter().position(|column| *column == "namespace");

    let mut mapped = Vec::new();
    for line in lines {
        let mut fields: Vec<&str> = line.split_whitespace().collect();
        // The namespace column is blank for the default namespace.
        if let Some(ns) = namespace_col.filter(|_| fields.len() + 1 == columns.len()) {
            fields.insert(ns, "");
        }
        if fields.len() != columns.len() {
            return Err(BmiError::Storage(format!(
                "malformed rbd showmapped line: {line}"
            )));
        }
        mapped.push(MappedImage {
            pool: fields[pool_col].to_string(),
            name: fields[image_col].to_string(),
            snap: fields[snap_col].to_string(),
            device: fields[device_col].to_string(),
        });
    }
    Ok(mapped)
}
