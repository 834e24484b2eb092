//! Node address lookup from a dnsmasq leases file.
//!
//! Each line is `<expiry> <mac> <ip> <hostname> <client-id>`.

use crate::error::{BmiError, BmiResult};
use bmi_provider::AddressLookup;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub expiry: u64,
    pub mac: String,
    pub ip: String,
    pub hostname: Option<String>,
}

/// Parse leases, skipping lines that do not have at least expiry, MAC and IP.
pub fn parse_leases(contents: &str) -> Vec<Lease> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let expiry = fields.next()?.parse().ok()?;
            let mac = fields.next()?.to_string();
            let ip = fields.next()?.to_string();
            let hostname = fields.next().filter(|h| *h != "*").map(str::to_string);
            Some(Lease {
                expiry,
                mac,
                ip,
                hostname,
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct DnsmasqLeases {
    path: PathBuf,
}

impl DnsmasqLeases {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AddressLookup for DnsmasqLeases {
    type Error = BmiError;

    fn ip_for_mac(&self, mac_addr: &str) -> BmiResult<String> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|err| BmiError::Dhcp(format!("{}: {err}", self.path.display())))?;
        parse_leases(&contents)
            .into_iter()
            .filter(|lease| lease.mac.eq_ignore_ascii_case(mac_addr))
            .max_by_key(|lease| lease.expiry)
            .map(|lease| lease.ip)
            .ok_or_else(|| BmiError::Dhcp(format!("no lease for {mac_addr}")))
    }
}
