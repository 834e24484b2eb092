//! System-backed `StorageBackend` implementation.
//!
//! Every call is one `rbd` invocation against the configured pool. Volume
//! names are passed through untouched; the orchestrator derives them.

use crate::parse::parse_showmapped;
use bmi_core::config::BmiConfig;
use bmi_core::error::{BmiError, BmiResult};
use bmi_core::exec::{CommandOutput, CommandRunner};
use bmi_provider::StorageBackend;
use log::{debug, info};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_RBD_PATHS: &[&str] = &["/usr/bin/rbd", "/bin/rbd", "/usr/local/bin/rbd"];

/// Storage backend that drives a Ceph pool via the host `rbd` binary.
#[derive(Debug, Clone)]
pub struct SystemRbdBackend {
    rbd: CommandRunner,
    pool: String,
}

impl SystemRbdBackend {
    /// Build a backend from configuration, resolving the `rbd` binary and the
    /// cephx identity flags.
    pub fn from_config(config: &BmiConfig) -> BmiResult<Self> {
        let binary = resolve_rbd_path(config.storage.rbd_path.as_deref())?;
        let mut prefix = Vec::new();
        if let Some(user) = non_empty(config.storage.ceph_user.as_deref()) {
            prefix.push("--id".to_string());
            prefix.push(user.to_string());
        }
        if let Some(keyring) = non_empty(config.storage.keyring.as_deref()) {
            prefix.push("--keyring".to_string());
            prefix.push(keyring.to_string());
        }
        let rbd = CommandRunner::new(binary, config.storage_timeout()).with_prefix(prefix);
        Ok(Self::new(rbd, config.storage.pool.trim()))
    }

    pub fn new(rbd: CommandRunner, pool: impl Into<String>) -> Self {
        Self {
            rbd,
            pool: pool.into(),
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    fn spec(&self, volume: &str) -> String {
        format!("{}/{volume}", self.pool)
    }

    fn snap_spec(&self, volume: &str, snapshot: &str) -> String {
        format!("{}/{volume}@{snapshot}", self.pool)
    }

    /// Run `rbd` and turn a non-zero exit into a storage error naming `what`.
    fn run(&self, args: &[&str], what: &str) -> BmiResult<CommandOutput> {
        debug!("rbd {}", args.join(" "));
        let output = self.rbd.run(args, None)?;
        if !output.success() {
            return Err(BmiError::Storage(format!(
                "rbd {what} failed: {}",
                output.describe()
            )));
        }
        Ok(output)
    }
}

impl StorageBackend for SystemRbdBackend {
    type Error = BmiError;

    fn clone_volume(&self, parent: &str, snapshot: &str, child: &str) -> BmiResult<()> {
        let source = self.snap_spec(parent, snapshot);
        let dest = self.spec(child);
        self.run(
            &["clone", &source, &dest],
            &format!("clone {parent}@{snapshot} to {child}"),
        )?;
        info!("cloned {source} to {dest}");
        Ok(())
    }

    fn create_snapshot(&self, volume: &str, snapshot: &str) -> BmiResult<()> {
        let spec = self.snap_spec(volume, snapshot);
        self.run(&["snap", "create", &spec], &format!("snap create {volume}@{snapshot}"))?;
        Ok(())
    }

    fn protect_snapshot(&self, volume: &str, snapshot: &str) -> BmiResult<()> {
        let spec = self.snap_spec(volume, snapshot);
        self.run(&["snap", "protect", &spec], &format!("snap protect {volume}@{snapshot}"))?;
        Ok(())
    }

    fn unprotect_snapshot(&self, volume: &str, snapshot: &str) -> BmiResult<()> {
        let spec = self.snap_spec(volume, snapshot);
        self.run(
            &["snap", "unprotect", &spec],
            &format!("snap unprotect {volume}@{snapshot}"),
        )?;
        Ok(())
    }

    fn remove_snapshot(&self, volume: &str, snapshot: &str) -> BmiResult<()> {
        let spec = self.snap_spec(volume, snapshot);
        self.run(&["snap", "rm", &spec], &format!("snap rm {volume}@{snapshot}"))?;
        Ok(())
    }

    fn flatten(&self, volume: &str) -> BmiResult<()> {
        let spec = self.spec(volume);
        self.run(&["flatten", &spec], &format!("flatten {volume}"))?;
        Ok(())
    }

    fn remove_volume(&self, volume: &str) -> BmiResult<()> {
        let spec = self.spec(volume);
        self.run(&["rm", &spec], &format!("rm {volume}"))?;
        info!("removed {spec}");
        Ok(())
    }

    fn map(&self, volume: &str) -> BmiResult<String> {
        let spec = self.spec(volume);
        let output = self.run(&["map", &spec], &format!("map {volume}"))?;
        let device = output.stdout.trim();
        if device.is_empty() {
            return Err(BmiError::Storage(format!(
                "rbd map {volume} returned no device"
            )));
        }
        info!("mapped {spec} at {device}");
        Ok(device.to_string())
    }

    fn unmap(&self, device: &str) -> BmiResult<()> {
        let output = self.rbd.run(&["unmap", device], None)?;
        if !output.success() {
            return Err(BmiError::UnmapFailed {
                device: device.to_string(),
                reason: output.describe(),
            });
        }
        info!("unmapped {device}");
        Ok(())
    }

    fn showmapped(&self) -> BmiResult<BTreeMap<String, String>> {
        let output = self.run(&["showmapped", "--format", "json"], "showmapped")?;
        Ok(parse_showmapped(&output.stdout)?
            .into_iter()
            .filter(|mapped| mapped.pool == self.pool && !mapped.is_snapshot())
            .map(|mapped| (mapped.name, mapped.device))
            .collect())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn resolve_rbd_path(configured: Option<&str>) -> BmiResult<PathBuf> {
    if let Some(path) = non_empty(configured) {
        let candidate = Path::new(path);
        if !candidate.exists() {
            return Err(BmiError::InvalidConfig(format!(
                "rbd binary not found at {}",
                candidate.display()
            )));
        }
        return Ok(candidate.to_path_buf());
    }

    for candidate in DEFAULT_RBD_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    find_in_path("rbd").ok_or_else(|| {
        BmiError::InvalidConfig(format!(
            "unable to locate rbd binary; tried {:?} and PATH",
            DEFAULT_RBD_PATHS
        ))
    })
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.exists())
}
