//! Configuration model and helpers used by BMI services.

use crate::error::{BmiError, BmiResult};
use crate::naming::VolumeNaming;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bmi/bmi.toml";
pub const CONFIG_PATH_ENV: &str = "BMI_CONFIG";
const MAX_SETTLE_SECS: u64 = 60;

/// Ceph/RBD access and the deployment uid baked into every volume name.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StorageCfg {
    pub uid: String,

    #[serde(default = "default_pool")]
    pub pool: String,

    #[serde(default)]
    pub rbd_path: Option<String>,

    #[serde(default)]
    pub ceph_user: Option<String>,

    #[serde(default)]
    pub keyring: Option<String>,

    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_pool() -> String {
    "rbd".to_string()
}

fn default_storage_timeout_secs() -> u64 {
    10
}

/// Export ledger location and how to drive the export service.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExportCfg {
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    #[serde(default = "default_service_binary")]
    pub service_binary: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// When set, service commands run through `sudo -S` using this binary.
    #[serde(default)]
    pub sudo_path: Option<String>,

    #[serde(default)]
    pub sudo_password: Option<String>,
}

fn default_ledger_path() -> String {
    "/etc/iet/ietd.conf".to_string()
}

fn default_service_binary() -> String {
    "/usr/sbin/service".to_string()
}

fn default_service_name() -> String {
    "iscsitarget".to_string()
}

impl Default for ExportCfg {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            service_binary: default_service_binary(),
            service_name: default_service_name(),
            sudo_path: None,
            sudo_password: None,
        }
    }
}

/// Network fabric endpoint and the delay inserted before compensating detaches.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FabricCfg {
    pub url: String,

    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    #[serde(default = "default_fabric_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_settle_secs() -> u64 {
    5
}

fn default_fabric_timeout_secs() -> u64 {
    30
}

/// Where boot descriptors are written for provisioned nodes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BootCfg {
    #[serde(default = "default_ipxe_dir")]
    pub ipxe_dir: String,

    #[serde(default = "default_pxelinux_dir")]
    pub pxelinux_dir: String,

    pub iscsi_ip: String,
}

fn default_ipxe_dir() -> String {
    "/var/lib/tftpboot/".to_string()
}

fn default_pxelinux_dir() -> String {
    "/var/lib/tftpboot/pxelinux.cfg/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DhcpCfg {
    #[serde(default = "default_leases_path")]
    pub leases_path: String,
}

fn default_leases_path() -> String {
    "/var/lib/misc/dnsmasq.leases".to_string()
}

impl Default for DhcpCfg {
    fn default() -> Self {
        Self {
            leases_path: default_leases_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CatalogCfg {
    #[serde(default = "default_catalog_path")]
    pub path: String,
}

fn default_catalog_path() -> String {
    "/var/lib/bmi/catalog.json".to_string()
}

impl Default for CatalogCfg {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

/// Users that carry the admin flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AuthCfg {
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DaemonCfg {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:7000".to_string()
}

impl Default for DaemonCfg {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BmiConfig {
    pub storage: StorageCfg,

    #[serde(default)]
    pub export: ExportCfg,

    pub fabric: FabricCfg,

    pub boot: BootCfg,

    #[serde(default)]
    pub dhcp: DhcpCfg,

    #[serde(default)]
    pub catalog: CatalogCfg,

    #[serde(default)]
    pub auth: AuthCfg,

    #[serde(default)]
    pub daemon: DaemonCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML so writes preserve format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

impl BmiConfig {
    /// Config path from `BMI_CONFIG`, falling back to the system default.
    pub fn resolve_path() -> PathBuf {
        env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Read a config file from disk, detect format, and reject fatal issues.
    pub fn load<P: AsRef<Path>>(path: P) -> BmiResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => ConfigFormat::Toml,
        };
        let mut cfg = Self::parse(&contents, format)?;
        cfg.path = path.to_path_buf();

        let issues = cfg.validate();
        if !issues.is_empty() {
            return Err(BmiError::InvalidConfig(issues.join("; ")));
        }
        Ok(cfg)
    }

    pub fn parse(contents: &str, format: ConfigFormat) -> BmiResult<Self> {
        let mut cfg = match format {
            ConfigFormat::Toml => toml::from_str::<Self>(contents)?,
            ConfigFormat::Yaml => serde_yaml::from_str::<Self>(contents)?,
        };
        cfg.format = format;
        Ok(cfg)
    }

    /// Perform a validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        let uid = self.storage.uid.trim();
        if uid.is_empty() {
            issues.push("storage.uid must not be empty".to_string());
        }
        if uid.contains("img") {
            issues.push("storage.uid must not contain `img`".to_string());
        }
        if uid.contains('.') || uid.contains(char::is_whitespace) {
            issues.push("storage.uid must not contain dots or whitespace".to_string());
        }
        if self.storage.pool.trim().is_empty() {
            issues.push("storage.pool must not be empty".to_string());
        }
        if self.export.ledger_path.trim().is_empty() {
            issues.push("export.ledger_path must not be empty".to_string());
        }
        if self.export.service_name.trim().is_empty() {
            issues.push("export.service_name must not be empty".to_string());
        }
        if self.export.sudo_path.is_some() && self.export.sudo_password.is_none() {
            issues.push("export.sudo_path is set but export.sudo_password is missing".to_string());
        }
        if self.fabric.url.trim().is_empty() {
            issues.push("fabric.url must not be empty".to_string());
        }
        if self.fabric.settle_secs > MAX_SETTLE_SECS {
            issues.push(format!(
                "fabric.settle_secs must be at most {MAX_SETTLE_SECS}"
            ));
        }
        if self.boot.iscsi_ip.trim().is_empty() {
            issues.push("boot.iscsi_ip must not be empty".to_string());
        }
        if self.daemon.listen.parse::<SocketAddr>().is_err() {
            issues.push(format!(
                "daemon.listen is not a socket address: {}",
                self.daemon.listen
            ));
        }

        issues
    }

    pub fn naming(&self) -> VolumeNaming {
        VolumeNaming::new(self.storage.uid.trim())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.fabric.settle_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.timeout_secs)
    }

    pub fn ledger_path(&self) -> PathBuf {
        PathBuf::from(&self.export.ledger_path)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.auth.admins.iter().any(|admin| admin == username)
    }

    /// Persist the configuration back to its original on-disk format.
    pub fn save(&self) -> BmiResult<()> {
        let payload = match self.format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_config() -> BmiConfig {
    BmiConfig::parse(
        r#"
[storage]
uid = "bmi7"

[fabric]
url = "http://127.0.0.1:5000"
settle_secs = 0

[boot]
iscsi_ip = "10.0.0.2"

[auth]
admins = ["admin"]
"#,
        ConfigFormat::Toml,
    )
    .expect("sample config parses")
}
