//! Export mapping state machine.
//!
//! The ledger file and the export service process are shared by every caller
//! in the process, so every operation here runs under one process-wide lock.
//! Each exit path leaves the ledger and the live service agreeing on which
//! volumes are exported.

pub mod ledger;
pub mod status;

pub use ledger::{ExportEntries, ExportLedger};
pub use status::{ExportServiceState, Expectation};

use crate::error::{BmiError, BmiResult};
use bmi_provider::{ServiceControl, StorageBackend};
use log::{error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type SharedStorage = Arc<dyn StorageBackend<Error = BmiError> + Send + Sync>;
pub type SharedService = Arc<dyn ServiceControl<Error = BmiError> + Send + Sync>;

static EXPORT_LOCK: Mutex<()> = Mutex::new(());

fn export_lock() -> MutexGuard<'static, ()> {
    EXPORT_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct ExportManager {
    ledger: ExportLedger,
    storage: SharedStorage,
    service: SharedService,
}

impl ExportManager {
    pub fn new(ledger: ExportLedger, storage: SharedStorage, service: SharedService) -> Self {
        Self {
            ledger,
            storage,
            service,
        }
    }

    pub fn ledger(&self) -> &ExportLedger {
        &self.ledger
    }

    /// Entries currently recorded in the ledger.
    pub fn show_mappings(&self) -> BmiResult<ExportEntries> {
        let _guard = export_lock();
        self.ledger.show_mappings()
    }

    /// Classified view of the service's current status text.
    pub fn service_state(&self) -> BmiResult<ExportServiceState> {
        let _guard = export_lock();
        Ok(ExportServiceState::classify(&self.service.status()?))
    }

    /// Export `volume`: map it, record it, restart the service and confirm the
    /// target came up.
    pub fn create_mapping(&self, volume: &str) -> BmiResult<()> {
        let _guard = export_lock();

        if self.ledger.show_mappings()?.contains_key(volume) {
            return Err(BmiError::AlreadyInUse(volume.to_string()));
        }

        let device = self.storage.map(volume)?;

        if let Err(err) = self.ledger.append(volume, &device) {
            warn!("[export] ledger append for {volume} failed ({err}); unmapping {device}");
            self.storage.unmap(&device)?;
            return Err(err);
        }

        if let Err(err) = self.restart_and_verify() {
            warn!("[export] {volume} did not come up ({err}); rolling back ledger and device");
            self.ledger.remove(volume)?;
            self.storage.unmap(&device)?;
            return Err(err);
        }

        info!("[export] {volume} exported from {device}");
        Ok(())
    }

    /// Withdraw the export for `volume` and release its device.
    pub fn delete_mapping(&self, volume: &str) -> BmiResult<()> {
        let _guard = export_lock();

        let recorded = self
            .ledger
            .show_mappings()?
            .remove(volume)
            .ok_or_else(|| BmiError::AlreadyUnmapped(volume.to_string()))?;

        // Until the stanza is gone the ledger still describes the live service,
        // so a restart alone restores consistency.
        let device = match self.stop_and_release(volume, recorded) {
            Ok(device) => device,
            Err(err) => {
                warn!("[export] stopping export of {volume} failed ({err}); restarting service");
                self.compensating_restart()?;
                return Err(err);
            }
        };

        if let Err(err) = self.storage.unmap(&device) {
            warn!("[export] unmap of {device} failed ({err}); restoring {volume} to the ledger");
            self.ledger.append(volume, &device)?;
            self.compensating_restart()?;
            return Err(err);
        }

        if let Err(err) = self.restart_and_verify() {
            warn!("[export] service unhealthy after removing {volume} ({err}); re-exporting it");
            let device = self.storage.map(volume)?;
            self.ledger.append(volume, &device)?;
            self.compensating_restart()?;
            return Err(err);
        }

        info!("[export] {volume} withdrawn; {device} released");
        Ok(())
    }

    /// Re-map every ledger entry after a host restart and rewrite the ledger
    /// with the fresh devices. Does nothing when no devices are mapped.
    pub fn remake_mappings(&self) -> BmiResult<()> {
        let _guard = export_lock();

        let mapped = self.storage.showmapped()?;
        if mapped.is_empty() {
            info!("[export] no mapped devices; skipping remake");
            return Ok(());
        }

        let recorded = self.ledger.show_mappings()?;
        let mut fresh = ExportEntries::new();
        for volume in recorded.keys() {
            let device = match mapped.get(volume) {
                Some(device) => device.clone(),
                None => self.storage.map(volume)?,
            };
            fresh.insert(volume.clone(), device);
        }

        self.ledger.rewrite(&fresh)?;
        self.service.restart()?;
        info!("[export] remapped {} export(s)", fresh.len());
        Ok(())
    }

    fn stop_and_release(&self, volume: &str, recorded: String) -> BmiResult<String> {
        self.service.stop()?;
        ExportServiceState::classify(&self.service.status()?).verify(Expectation::Stopped)?;
        let device = self
            .storage
            .showmapped()?
            .remove(volume)
            .unwrap_or(recorded);
        self.ledger.remove(volume)?;
        Ok(device)
    }

    fn restart_and_verify(&self) -> BmiResult<()> {
        self.service.restart()?;
        ExportServiceState::classify(&self.service.status()?).verify(Expectation::Running)
    }

    /// Restart issued while unwinding. A bad status afterwards is logged and
    /// does not replace the error being unwound.
    fn compensating_restart(&self) -> BmiResult<()> {
        self.service.restart()?;
        let state = ExportServiceState::classify(&self.service.status()?);
        if let Err(err) = state.verify(Expectation::Running) {
            error!("[export] service still unhealthy after compensating restart: {err}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
