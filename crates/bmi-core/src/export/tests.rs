use super::*;
use crate::error::ErrorKind;
use crate::testing::{FakeService, FakeStorage, Journal};
use std::fs;
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

struct Harness {
    _dir: TempDir,
    manager: ExportManager,
    storage: FakeStorage,
    service: FakeService,
    journal: Journal,
}

fn harness() -> Harness {
    let dir = tempdir().unwrap();
    let journal = Journal::default();
    let storage = FakeStorage::with_journal(journal.clone());
    let service = FakeService::with_journal(journal.clone());
    let manager = ExportManager::new(
        ExportLedger::new(dir.path().join("ietd.conf")),
        Arc::new(storage.clone()),
        Arc::new(service.clone()),
    );
    Harness {
        _dir: dir,
        manager,
        storage,
        service,
        journal,
    }
}

const MOUNT_FAILURE: &str = "Active: active (running)\nietd: created target iqn.2016-04:bmi.v1\nietd: unable to create logical unit 0 in target 1\n";

#[test]
fn create_mapping_records_and_restarts() {
    let h = harness();
    h.manager.create_mapping("v1").unwrap();

    let entries = h.manager.show_mappings().unwrap();
    assert_eq!(entries.get("v1").map(String::as_str), Some("/dev/rbd0"));
    assert!(h.storage.is_mapped("v1"));
    assert_eq!(h.service.restarts(), 1);
}

#[test]
fn create_mapping_twice_is_already_in_use_and_touches_nothing() {
    let h = harness();
    h.manager.create_mapping("v1").unwrap();
    let before = fs::read_to_string(h.manager.ledger().path()).unwrap();
    h.journal.clear();

    let err = h.manager.create_mapping("v1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyInUse);
    assert_eq!(fs::read_to_string(h.manager.ledger().path()).unwrap(), before);
    assert!(h.journal.entries().is_empty());
}

#[test]
fn mount_failure_removes_stanza_and_unmaps() {
    let h = harness();
    h.service.script_status(MOUNT_FAILURE);

    let err = h.manager.create_mapping("v1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MountFailure);
    assert!(h.manager.show_mappings().unwrap().is_empty());
    assert!(!h.storage.is_mapped("v1"));
}

#[test]
fn restart_exit_failure_rolls_back_create() {
    let h = harness();
    h.service.fail_restart(true);

    let err = h.manager.create_mapping("v1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RestartFailed);
    assert!(h.manager.show_mappings().unwrap().is_empty());
    assert!(!h.storage.is_mapped("v1"));
}

#[test]
fn ledger_write_failure_unmaps_without_touching_service() {
    let dir = tempdir().unwrap();
    let journal = Journal::default();
    let storage = FakeStorage::with_journal(journal.clone());
    let service = FakeService::with_journal(journal.clone());
    let manager = ExportManager::new(
        ExportLedger::new(dir.path().join("missing/ietd.conf")),
        Arc::new(storage.clone()),
        Arc::new(service.clone()),
    );

    let err = manager.create_mapping("v1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpdateConfigFailed);
    assert!(!storage.is_mapped("v1"));
    assert_eq!(service.restarts(), 0);
}

#[test]
fn delete_mapping_round_trip() {
    let h = harness();
    h.manager.create_mapping("v1").unwrap();
    h.journal.clear();

    h.manager.delete_mapping("v1").unwrap();

    assert!(h.manager.show_mappings().unwrap().is_empty());
    assert!(!h.storage.is_mapped("v1"));
    let stop = h.journal.position("service.stop").unwrap();
    let unmap = h.journal.position("storage.unmap:/dev/rbd0").unwrap();
    let restart = h.journal.position("service.restart").unwrap();
    assert!(stop < unmap && unmap < restart);
}

#[test]
fn delete_unknown_volume_is_already_unmapped() {
    let h = harness();
    let err = h.manager.delete_mapping("ghost").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyUnmapped);
    assert!(h.journal.entries().is_empty());
}

#[test]
fn busy_device_restores_stanza_and_restarts() {
    let h = harness();
    h.manager.create_mapping("v1").unwrap();
    h.storage.fail_on("unmap", "*");
    h.journal.clear();

    let err = h.manager.delete_mapping("v1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnmapFailed);
    assert!(h.manager.show_mappings().unwrap().contains_key("v1"));
    assert_eq!(h.service.restarts(), 1);
    assert!(*h.service.running.lock().unwrap());
}

#[test]
fn stop_that_leaves_service_running_restarts_and_keeps_ledger() {
    let h = harness();
    h.manager.create_mapping("v1").unwrap();
    h.service.script_status("Active: active (running)\n");

    let err = h.manager.delete_mapping("v1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StopFailed);
    assert!(h.manager.show_mappings().unwrap().contains_key("v1"));
    assert!(h.storage.is_mapped("v1"));
    assert_eq!(h.service.restarts(), 2);
}

#[test]
fn failed_final_restart_re_exports_volume() {
    let h = harness();
    h.manager.create_mapping("v1").unwrap();
    // stop verification, then the post-unmap restart verification
    h.service.script_status("Active: inactive (dead)\n");
    h.service.script_status("Active: inactive (dead)\n");

    let err = h.manager.delete_mapping("v1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RestartFailed);
    let entries = h.manager.show_mappings().unwrap();
    assert_eq!(entries.get("v1").map(String::as_str), Some("/dev/rbd1"));
    assert!(h.storage.is_mapped("v1"));
}

#[test]
fn remake_with_nothing_mapped_is_a_no_op() {
    let h = harness();
    fs::write(
        h.manager.ledger().path(),
        ledger::render_stanza("v1", "/dev/rbd7"),
    )
    .unwrap();

    h.manager.remake_mappings().unwrap();

    assert_eq!(h.service.restarts(), 0);
    let entries = h.manager.show_mappings().unwrap();
    assert_eq!(entries.get("v1").map(String::as_str), Some("/dev/rbd7"));
}

#[test]
fn remake_refreshes_devices_and_restarts_once() {
    let h = harness();
    h.manager.create_mapping("v1").unwrap();
    fs::write(
        h.manager.ledger().path(),
        format!(
            "{}{}",
            ledger::render_stanza("v1", "/dev/stale0"),
            ledger::render_stanza("v2", "/dev/stale1")
        ),
    )
    .unwrap();
    h.journal.clear();

    h.manager.remake_mappings().unwrap();

    let entries = h.manager.show_mappings().unwrap();
    assert_eq!(entries.get("v1").map(String::as_str), Some("/dev/rbd0"));
    assert_eq!(entries.get("v2").map(String::as_str), Some("/dev/rbd1"));
    assert_eq!(h.service.restarts(), 1);
}

#[test]
fn concurrent_mappings_are_serialized() {
    let h = harness();
    h.service.slow_down(Duration::from_millis(20));
    let volumes: Vec<String> = (0..8).map(|i| format!("v{i}")).collect();

    let workers: Vec<_> = volumes
        .iter()
        .cloned()
        .map(|volume| {
            let manager = h.manager.clone();
            thread::spawn(move || manager.create_mapping(&volume))
        })
        .collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }

    let entries = h.manager.show_mappings().unwrap();
    assert_eq!(entries.keys().cloned().collect::<Vec<_>>(), volumes);
    let mut devices: Vec<_> = entries.values().cloned().collect();
    devices.sort();
    devices.dedup();
    assert_eq!(devices.len(), volumes.len());
    assert_eq!(h.service.restarts(), volumes.len());
    assert_eq!(h.service.overlaps(), 0);

    let workers: Vec<_> = volumes
        .iter()
        .cloned()
        .map(|volume| {
            let manager = h.manager.clone();
            thread::spawn(move || manager.delete_mapping(&volume))
        })
        .collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }

    assert!(h.manager.show_mappings().unwrap().is_empty());
    assert!(h.storage.mapped.lock().unwrap().is_empty());
    assert_eq!(h.service.overlaps(), 0);
}
