//! In-memory collaborators shared by unit tests.

use crate::error::{BmiError, BmiResult};
use bmi_provider::{AddressLookup, FabricClient, ServiceControl, StorageBackend};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Ordered, timestamped record of collaborator calls, shared between fakes.
#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<(Instant, String)>>>);

impl Journal {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push((Instant::now(), entry.into()));
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// When `entry` was first recorded.
    pub(crate) fn recorded_at(&self, entry: &str) -> Option<Instant> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|(_, e)| e == entry)
            .map(|(at, _)| *at)
    }

    pub(crate) fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub(crate) fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeStorage {
    pub volumes: Arc<Mutex<BTreeSet<String>>>,
    /// `volume@snapshot` to protected flag.
    pub snapshots: Arc<Mutex<BTreeMap<String, bool>>>,
    pub mapped: Arc<Mutex<BTreeMap<String, String>>>,
    failing: Arc<Mutex<HashMap<&'static str, String>>>,
    next_device: Arc<Mutex<u32>>,
    pub journal: Journal,
}

impl FakeStorage {
    pub(crate) fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Make `op` fail when called with `arg` (`"*"` matches any argument).
    pub(crate) fn fail_on(&self, op: &'static str, arg: &str) {
        self.failing.lock().unwrap().insert(op, arg.to_string());
    }

    pub(crate) fn heal(&self, op: &'static str) {
        self.failing.lock().unwrap().remove(op);
    }

    pub(crate) fn add_volume(&self, volume: &str) {
        self.volumes.lock().unwrap().insert(volume.to_string());
    }

    pub(crate) fn add_protected_snapshot(&self, volume: &str, snapshot: &str) {
        self.add_volume(volume);
        self.snapshots
            .lock()
            .unwrap()
            .insert(format!("{volume}@{snapshot}"), true);
    }

    pub(crate) fn has_volume(&self, volume: &str) -> bool {
        self.volumes.lock().unwrap().contains(volume)
    }

    pub(crate) fn snapshot_state(&self, volume: &str, snapshot: &str) -> Option<bool> {
        self.snapshots
            .lock()
            .unwrap()
            .get(&format!("{volume}@{snapshot}"))
            .copied()
    }

    pub(crate) fn is_mapped(&self, volume: &str) -> bool {
        self.mapped.lock().unwrap().contains_key(volume)
    }

    fn call(&self, op: &'static str, arg: &str) -> BmiResult<()> {
        self.journal.push(format!("storage.{op}:{arg}"));
        let failing = self.failing.lock().unwrap();
        match failing.get(op) {
            Some(target) if target == "*" || target == arg => {
                if op == "unmap" {
                    Err(BmiError::UnmapFailed {
                        device: arg.to_string(),
                        reason: "device is busy".into(),
                    })
                } else {
                    Err(BmiError::Storage(format!("{op} {arg} failed")))
                }
            }
            _ => Ok(()),
        }
    }
}

impl StorageBackend for FakeStorage {
    type Error = BmiError;

    fn clone_volume(&self, parent: &str, snapshot: &str, child: &str) -> BmiResult<()> {
        self.call("clone", child)?;
        if self.snapshot_state(parent, snapshot) != Some(true) {
            return Err(BmiError::Storage(format!(
                "{parent}@{snapshot} is not a protected snapshot"
            )));
        }
        self.add_volume(child);
        Ok(())
    }

    fn create_snapshot(&self, volume: &str, snapshot: &str) -> BmiResult<()> {
        self.call("snap_create", volume)?;
        self.snapshots
            .lock()
            .unwrap()
            .insert(format!("{volume}@{snapshot}"), false);
        Ok(())
    }

    fn protect_snapshot(&self, volume: &str, snapshot: &str) -> BmiResult<()> {
        self.call("protect", volume)?;
        self.snapshots
            .lock()
            .unwrap()
            .insert(format!("{volume}@{snapshot}"), true);
        Ok(())
    }

    fn unprotect_snapshot(&self, volume: &str, snapshot: &str) -> BmiResult<()> {
        self.call("unprotect", volume)?;
        self.snapshots
            .lock()
            .unwrap()
            .insert(format!("{volume}@{snapshot}"), false);
        Ok(())
    }

    fn remove_snapshot(&self, volume: &str, snapshot: &str) -> BmiResult<()> {
        self.call("snap_rm", volume)?;
        let key = format!("{volume}@{snapshot}");
        if self.snapshots.lock().unwrap().get(&key) == Some(&true) {
            return Err(BmiError::Storage(format!("{key} is protected")));
        }
        self.snapshots.lock().unwrap().remove(&key);
        Ok(())
    }

    fn flatten(&self, volume: &str) -> BmiResult<()> {
        self.call("flatten", volume)
    }

    fn remove_volume(&self, volume: &str) -> BmiResult<()> {
        self.call("rm", volume)?;
        self.volumes.lock().unwrap().remove(volume);
        Ok(())
    }

    fn map(&self, volume: &str) -> BmiResult<String> {
        self.call("map", volume)?;
        let mut next = self.next_device.lock().unwrap();
        let device = format!("/dev/rbd{}", *next);
        *next += 1;
        self.mapped
            .lock()
            .unwrap()
            .insert(volume.to_string(), device.clone());
        Ok(device)
    }

    fn unmap(&self, device: &str) -> BmiResult<()> {
        self.call("unmap", device)?;
        self.mapped.lock().unwrap().retain(|_, d| d != device);
        Ok(())
    }

    fn showmapped(&self) -> BmiResult<BTreeMap<String, String>> {
        self.call("showmapped", "")?;
        Ok(self.mapped.lock().unwrap().clone())
    }
}

/// Export service whose status text follows its running flag unless a
/// scripted report is queued.
#[derive(Clone, Default)]
pub(crate) struct FakeService {
    pub running: Arc<Mutex<bool>>,
    scripted: Arc<Mutex<VecDeque<String>>>,
    fail_restart: Arc<Mutex<bool>>,
    fail_stop: Arc<Mutex<bool>>,
    delay: Arc<Mutex<Duration>>,
    in_flight: Arc<AtomicUsize>,
    overlaps: Arc<AtomicUsize>,
    pub journal: Journal,
}

impl FakeService {
    pub(crate) fn with_journal(journal: Journal) -> Self {
        Self {
            running: Arc::new(Mutex::new(true)),
            journal,
            ..Self::default()
        }
    }

    pub(crate) fn script_status(&self, text: &str) {
        self.scripted.lock().unwrap().push_back(text.to_string());
    }

    pub(crate) fn fail_restart(&self, fail: bool) {
        *self.fail_restart.lock().unwrap() = fail;
    }

    pub(crate) fn fail_stop(&self, fail: bool) {
        *self.fail_stop.lock().unwrap() = fail;
    }

    /// Hold every restart and stop for `delay` so concurrent callers would collide.
    pub(crate) fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Restart or stop calls that began while another was still running.
    pub(crate) fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn restarts(&self) -> usize {
        self.journal
            .entries()
            .iter()
            .filter(|e| e.as_str() == "service.restart")
            .count()
    }
}

impl ServiceControl for FakeService {
    type Error = BmiError;

    fn restart(&self) -> BmiResult<()> {
        self.journal.push("service.restart");
        self.enter();
        let result = if *self.fail_restart.lock().unwrap() {
            Err(BmiError::RestartFailed("exit code 1".into()))
        } else {
            *self.running.lock().unwrap() = true;
            Ok(())
        };
        self.leave();
        result
    }

    fn stop(&self) -> BmiResult<()> {
        self.journal.push("service.stop");
        self.enter();
        let result = if *self.fail_stop.lock().unwrap() {
            Err(BmiError::StopFailed("exit code 1".into()))
        } else {
            *self.running.lock().unwrap() = false;
            Ok(())
        };
        self.leave();
        result
    }

    fn status(&self) -> BmiResult<String> {
        if let Some(text) = self.scripted.lock().unwrap().pop_front() {
            return Ok(text);
        }
        Ok(if *self.running.lock().unwrap() {
            "   Active: active (running) since today\n".to_string()
        } else {
            "   Active: inactive (dead)\n".to_string()
        })
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeFabric {
    pub attached: Arc<Mutex<BTreeSet<(String, String)>>>,
    pub macs: Arc<Mutex<BTreeMap<String, String>>>,
    failing: Arc<Mutex<BTreeSet<&'static str>>>,
    pub journal: Journal,
}

impl FakeFabric {
    pub(crate) fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub(crate) fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub(crate) fn is_attached(&self, node: &str, network: &str) -> bool {
        self.attached
            .lock()
            .unwrap()
            .contains(&(node.to_string(), network.to_string()))
    }

    fn call(&self, op: &'static str, arg: &str) -> BmiResult<()> {
        self.journal.push(format!("fabric.{op}:{arg}"));
        if self.failing.lock().unwrap().contains(op) {
            return Err(BmiError::Fabric(format!("{op} {arg} rejected")));
        }
        Ok(())
    }
}

impl FabricClient for FakeFabric {
    type Error = BmiError;

    fn attach_node(&self, node: &str, network: &str, _nic: &str) -> BmiResult<()> {
        self.call("attach", node)?;
        self.attached
            .lock()
            .unwrap()
            .insert((node.to_string(), network.to_string()));
        Ok(())
    }

    fn detach_node(&self, node: &str, network: &str, _nic: &str) -> BmiResult<()> {
        self.call("detach", node)?;
        self.attached
            .lock()
            .unwrap()
            .remove(&(node.to_string(), network.to_string()));
        Ok(())
    }

    fn node_mac_addr(&self, node: &str) -> BmiResult<String> {
        self.call("mac", node)?;
        self.macs
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .ok_or_else(|| BmiError::Fabric(format!("node {node} unknown")))
    }

    fn validate_project(&self, project: &str) -> BmiResult<()> {
        self.call("validate", project)
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeLeases(pub Arc<Mutex<BTreeMap<String, String>>>);

impl AddressLookup for FakeLeases {
    type Error = BmiError;

    fn ip_for_mac(&self, mac_addr: &str) -> BmiResult<String> {
        self.0
            .lock()
            .unwrap()
            .get(mac_addr)
            .cloned()
            .ok_or_else(|| BmiError::Dhcp(format!("no lease for {mac_addr}")))
    }
}
