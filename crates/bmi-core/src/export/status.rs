//! Classification of the export service's free-text status output.

use crate::error::{BmiError, BmiResult};
use crate::export::ledger::target_volume;
use once_cell::sync::Lazy;
use regex::Regex;

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b[^m]*m").expect("Invalid ANSI escape regex"));

const ACTIVE_RUNNING: &str = "active(running)";
const INACTIVE_DEAD: &str = "inactive(dead)";
const CREATED_TARGET: &str = "created target";
const DUPLICATED_TARGET: &str = "duplicated target";
const LUN_FAILURE: &str = "unable to create logical unit";

/// Requested end state of the service after a restart or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Running,
    Stopped,
}

/// Typed view of one status report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportServiceState {
    /// `None` when no `Active:` line was reported.
    pub active: Option<bool>,
    pub mount_failures: Vec<String>,
    pub duplicates: Vec<String>,
}

impl ExportServiceState {
    /// Strip terminal escapes and scan status text line by line.
    pub fn classify(raw: &str) -> Self {
        let text = ANSI_ESCAPE.replace_all(raw, "");
        let mut state = Self::default();
        let mut created: Vec<String> = Vec::new();

        for line in text.lines().map(str::trim) {
            if line.starts_with("Active") {
                let words: Vec<&str> = line.split_whitespace().collect();
                if words.len() >= 3 {
                    match format!("{}{}", words[1], words[2]).as_str() {
                        ACTIVE_RUNNING => state.active = Some(true),
                        INACTIVE_DEAD => state.active = Some(false),
                        _ => {}
                    }
                }
            } else if let Some(target) = token_target(line, CREATED_TARGET) {
                created.push(target);
            } else if line.contains(LUN_FAILURE) {
                match created.pop() {
                    Some(target) => state.mount_failures.push(target),
                    None => log::warn!("logical unit failure with no preceding target: {line}"),
                }
            } else if let Some(target) = token_target(line, DUPLICATED_TARGET) {
                state.duplicates.push(target);
            }
        }

        state
    }

    /// Raise the highest-priority failure, if any, for the requested state.
    ///
    /// Mount failures win over duplicates, which win over an active-state
    /// mismatch. A report with no `Active:` line never matches.
    pub fn verify(&self, expected: Expectation) -> BmiResult<()> {
        if !self.mount_failures.is_empty() {
            return Err(BmiError::MountFailure(self.mount_failures.clone()));
        }
        if !self.duplicates.is_empty() {
            return Err(BmiError::DuplicateTarget(self.duplicates.clone()));
        }
        match (expected, self.active) {
            (Expectation::Running, Some(true)) | (Expectation::Stopped, Some(false)) => Ok(()),
            (Expectation::Running, observed) => Err(BmiError::RestartFailed(format!(
                "service reported {}",
                describe(observed)
            ))),
            (Expectation::Stopped, observed) => Err(BmiError::StopFailed(format!(
                "service reported {}",
                describe(observed)
            ))),
        }
    }
}

fn describe(active: Option<bool>) -> &'static str {
    match active {
        Some(true) => "active",
        Some(false) => "inactive",
        None => "no active state",
    }
}

fn token_target(line: &str, token: &str) -> Option<String> {
    let start = line.find(token)?;
    let qualified = line[start + token.len()..].split_whitespace().next()?;
    Some(target_volume(qualified).unwrap_or(qualified).to_string())
}
