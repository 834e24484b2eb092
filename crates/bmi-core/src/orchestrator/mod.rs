//! Provisioning orchestrator.
//!
//! One [`Orchestrator`] is opened per inbound command for the acting user and
//! project. Multi-step operations run as [`Saga`](crate::saga::Saga)s so a
//! failure part-way leaves the fabric, storage, repository and export state as
//! they were before the call.

mod admin;
mod images;
mod provision;

pub use images::ImageListing;

use crate::boot::BootWriter;
use crate::config::BmiConfig;
use crate::error::{BmiError, BmiResult};
use crate::export::{ExportLedger, ExportManager, SharedService, SharedStorage};
use crate::naming::VolumeNaming;
use bmi_provider::{AddressLookup, FabricClient, ImageId, ImageRepository, ProjectId};
use log::debug;
use regex::Regex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub type SharedRepository = Arc<dyn ImageRepository<Error = BmiError> + Send + Sync>;
pub type SharedFabric = Arc<dyn FabricClient<Error = BmiError> + Send + Sync>;
pub type SharedLeases = Arc<dyn AddressLookup<Error = BmiError> + Send + Sync>;

/// Builds a fabric client acting with the session's credentials.
pub type FabricFactory = Arc<dyn Fn(&Session) -> BmiResult<SharedFabric> + Send + Sync>;

/// Long-lived collaborators shared by every request.
#[derive(Clone)]
pub struct Services {
    pub naming: VolumeNaming,
    pub settle: Duration,
    pub admins: Vec<String>,
    pub repository: SharedRepository,
    pub storage: SharedStorage,
    pub exports: ExportManager,
    pub fabric: FabricFactory,
    pub leases: SharedLeases,
    pub boot: BootWriter,
}

impl Services {
    pub fn new(
        config: &BmiConfig,
        repository: SharedRepository,
        storage: SharedStorage,
        service: SharedService,
        fabric: FabricFactory,
        leases: SharedLeases,
    ) -> Self {
        let exports = ExportManager::new(
            ExportLedger::new(config.ledger_path()),
            storage.clone(),
            service,
        );
        Self {
            naming: config.naming(),
            settle: config.settle_delay(),
            admins: config.auth.admins.clone(),
            repository,
            storage,
            exports,
            fabric,
            leases,
            boot: BootWriter::from_config(&config.boot),
        }
    }
}

/// Identity and scope of one request.
#[derive(Clone)]
pub struct Session {
    pub username: String,
    pub password: String,
    pub project: String,
    pub project_id: ProjectId,
    pub is_admin: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("project", &self.project)
            .field("project_id", &self.project_id)
            .field("is_admin", &self.is_admin)
            .finish_non_exhaustive()
    }
}

pub struct Orchestrator {
    services: Arc<Services>,
    session: Session,
    fabric: SharedFabric,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Resolve the acting project and build the session's fabric client.
    pub fn open(
        services: Arc<Services>,
        username: &str,
        password: &str,
        project: &str,
    ) -> BmiResult<Self> {
        let project_id = services
            .repository
            .project_id(project)?
            .ok_or_else(|| BmiError::ProjectNotFound(project.to_string()))?;
        let session = Session {
            username: username.to_string(),
            password: password.to_string(),
            project: project.to_string(),
            project_id,
            is_admin: services.admins.iter().any(|admin| admin == username),
        };
        let fabric = (services.fabric)(&session)?;
        debug!("opened session {session:?}");
        Ok(Self {
            services,
            session,
            fabric,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Rewrite storage errors so they name images rather than derived volumes.
    pub fn humanize(&self, err: BmiError) -> BmiError {
        match err {
            BmiError::Storage(message) => BmiError::Storage(self.swap_volume_names(&message)),
            BmiError::UnmapFailed { device, reason } => BmiError::UnmapFailed {
                device,
                reason: self.swap_volume_names(&reason),
            },
            other => other,
        }
    }

    fn swap_volume_names(&self, message: &str) -> String {
        let pattern = format!(r"\b{}img(\d+)\b", regex::escape(self.naming().uid()));
        let Ok(re) = Regex::new(&pattern) else {
            return message.to_string();
        };
        re.replace_all(message, |caps: &regex::Captures<'_>| {
            let name = caps[1]
                .parse::<ImageId>()
                .ok()
                .and_then(|id| self.repo().image_by_id(id).ok().flatten())
                .map(|(image, _)| image.name);
            name.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
    }

    fn repo(&self) -> &dyn ImageRepository<Error = BmiError> {
        self.services.repository.as_ref()
    }

    fn naming(&self) -> &VolumeNaming {
        &self.services.naming
    }

    fn require_admin(&self, action: &str) -> BmiResult<()> {
        if self.session.is_admin {
            return Ok(());
        }
        Err(BmiError::Authorization(format!(
            "{} may not {action}",
            self.session.username
        )))
    }

    /// Resolve `name` in the acting project to its image id.
    fn image_id(&self, name: &str) -> BmiResult<ImageId> {
        self.image_id_in(&self.session.project, name)
    }

    fn image_id_in(&self, project: &str, name: &str) -> BmiResult<ImageId> {
        self.repo()
            .image(project, name)?
            .map(|image| image.id)
            .ok_or_else(|| BmiError::ImageNotFound(name.to_string()))
    }

    /// Derived volume name for `name` in the acting project.
    fn volume_of(&self, name: &str) -> BmiResult<String> {
        Ok(self.naming().volume_name(self.image_id(name)?))
    }

    fn project_id_of(&self, project: &str) -> BmiResult<ProjectId> {
        self.repo()
            .project_id(project)?
            .ok_or_else(|| BmiError::ProjectNotFound(project.to_string()))
    }

    /// Wait for in-flight fabric operations before undoing them.
    fn settle(&self) {
        if !self.services.settle.is_zero() {
            debug!("settling fabric for {:?}", self.services.settle);
            thread::sleep(self.services.settle);
        }
    }
}
