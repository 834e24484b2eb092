//! Boot descriptors for provisioned nodes.
//!
//! PXELINUX picks up `01-<mac>` for the node's boot interface and chains into
//! `<node>.ipxe`, which sanboots the node's exported volume.

use crate::config::BootCfg;
use crate::error::{BmiError, BmiResult};
use crate::export::ledger::TARGET_PREFIX;
use crate::persist::write_atomic;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const ISCSI_PORT: u16 = 3260;

pub fn render_ipxe(iscsi_ip: &str, volume: &str) -> String {
    format!(
        r#"#!ipxe
set keep-san 1
dhcp
sanboot iscsi:{iscsi_ip}:tcp:{ISCSI_PORT}:0:{TARGET_PREFIX}.{volume}
"#
    )
}

pub fn render_pxelinux(image: &str, node: &str) -> String {
    format!(
        r#"DEFAULT {image}
PROMPT 0
TIMEOUT 1
LABEL {image}
    KERNEL ipxe.lkrn
    APPEND dhcp && chain {node}.ipxe
"#
    )
}

/// PXELINUX file name for a MAC address (`01-` plus the MAC with dashes).
pub fn mac_file_name(mac_addr: &str) -> String {
    format!("01-{}", mac_addr.trim().to_ascii_lowercase().replace(':', "-"))
}

#[derive(Debug, Clone)]
pub struct BootWriter {
    ipxe_dir: PathBuf,
    pxelinux_dir: PathBuf,
    iscsi_ip: String,
}

impl BootWriter {
    pub fn new(
        ipxe_dir: impl Into<PathBuf>,
        pxelinux_dir: impl Into<PathBuf>,
        iscsi_ip: impl Into<String>,
    ) -> Self {
        Self {
            ipxe_dir: ipxe_dir.into(),
            pxelinux_dir: pxelinux_dir.into(),
            iscsi_ip: iscsi_ip.into(),
        }
    }

    pub fn from_config(cfg: &BootCfg) -> Self {
        Self::new(&cfg.ipxe_dir, &cfg.pxelinux_dir, &cfg.iscsi_ip)
    }

    pub fn ipxe_path(&self, node: &str) -> PathBuf {
        self.ipxe_dir.join(format!("{node}.ipxe"))
    }

    pub fn pxelinux_path(&self, mac_addr: &str) -> PathBuf {
        self.pxelinux_dir.join(mac_file_name(mac_addr))
    }

    /// Write both descriptors for `node`. If the second write fails the first
    /// file is removed again.
    pub fn register(&self, node: &str, image: &str, volume: &str, mac_addr: &str) -> BmiResult<()> {
        let ipxe = self.ipxe_path(node);
        write_atomic(&ipxe, render_ipxe(&self.iscsi_ip, volume).as_bytes(), Some(0o755))
            .map_err(|err| registration_failed(node, &ipxe, err))?;

        let pxelinux = self.pxelinux_path(mac_addr);
        if let Err(err) = write_atomic(&pxelinux, render_pxelinux(image, node).as_bytes(), Some(0o644)) {
            let _ = fs::remove_file(&ipxe);
            return Err(registration_failed(node, &pxelinux, err));
        }

        log::info!(
            "[boot] registered {node}: {} and {}",
            ipxe.display(),
            pxelinux.display()
        );
        Ok(())
    }
}

fn registration_failed(node: &str, path: &Path, err: io::Error) -> BmiError {
    BmiError::Registration {
        node: node.to_string(),
        reason: format!("{}: {err}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn mac_file_name_uses_dashes() {
        assert_eq!(mac_file_name("52:54:00:AA:bb:01"), "01-52-54-00-aa-bb-01");
    }

    #[test]
    fn register_writes_both_files_with_modes() {
        let dir = tempdir().unwrap();
        let writer = BootWriter::new(
            dir.path().join("tftp"),
            dir.path().join("tftp/pxelinux.cfg"),
            "10.0.0.2",
        );

        writer.register("n1", "base", "bmi7img4", "52:54:00:aa:bb:01").unwrap();

        let ipxe = writer.ipxe_path("n1");
        let script = fs::read_to_string(&ipxe).unwrap();
        assert!(script.contains("sanboot iscsi:10.0.0.2:tcp:3260:0:iqn.2016-04:bmi.bmi7img4"));
        assert_eq!(fs::metadata(&ipxe).unwrap().permissions().mode() & 0o777, 0o755);

        let pxe = writer.pxelinux_path("52:54:00:aa:bb:01");
        assert!(pxe.ends_with("pxelinux.cfg/01-52-54-00-aa-bb-01"));
        let menu = fs::read_to_string(&pxe).unwrap();
        assert!(menu.contains("chain n1.ipxe"));
        assert!(menu.contains("LABEL base"));
        assert_eq!(fs::metadata(&pxe).unwrap().permissions().mode() & 0o777, 0o644);
    }

    #[test]
    fn unwritable_pxelinux_dir_cleans_up_ipxe() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a dir").unwrap();
        let writer = BootWriter::new(dir.path(), blocker.join("pxelinux.cfg"), "10.0.0.2");

        let err = writer.register("n1", "base", "v", "aa:bb").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Registration);
        assert!(!writer.ipxe_path("n1").exists());
    }
}
