//! Error taxonomy shared by every BMI crate.
//!
//! Callers branch on [`BmiError::kind`], never on the concrete variant, and the
//! command router turns any error into a `{status_code, kind, message}` reply.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

pub type BmiResult<T> = Result<T, BmiError>;

#[derive(Debug, Error)]
pub enum BmiError {
    #[error("project `{0}` not found")]
    ProjectNotFound(String),

    #[error("image `{0}` not found")]
    ImageNotFound(String),

    #[error("{0} is already mapped to an export target")]
    AlreadyInUse(String),

    #[error("{0} is not mapped to an export target")]
    AlreadyUnmapped(String),

    #[error("export service could not mount target(s): {}", .0.join(", "))]
    MountFailure(Vec<String>),

    #[error("export service reported duplicated target(s): {}", .0.join(", "))]
    DuplicateTarget(Vec<String>),

    #[error("export service failed to restart: {0}")]
    RestartFailed(String),

    #[error("export service failed to stop: {0}")]
    StopFailed(String),

    #[error("failed to read export ledger: {0}")]
    ReadConfigFailed(String),

    #[error("failed to update export ledger: {0}")]
    UpdateConfigFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Storage(String),

    #[error("failed to unmap {device}: {reason}")]
    UnmapFailed { device: String, reason: String },

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("fabric request failed: {0}")]
    Fabric(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("failed to register boot files for {node}: {reason}")]
    Registration { node: String, reason: String },

    #[error("address lookup failed: {0}")]
    Dhcp(String),

    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Discriminant carried on every error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProjectNotFound,
    ImageNotFound,
    AlreadyInUse,
    AlreadyUnmapped,
    MountFailure,
    DuplicateTarget,
    RestartFailed,
    StopFailed,
    ReadConfigFailed,
    UpdateConfigFailed,
    InvalidConfig,
    Storage,
    UnmapFailed,
    Authorization,
    Fabric,
    Repository,
    Registration,
    Dhcp,
    UnknownCommand,
    InvalidArguments,
    Internal,
}

impl BmiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BmiError::ProjectNotFound(_) => ErrorKind::ProjectNotFound,
            BmiError::ImageNotFound(_) => ErrorKind::ImageNotFound,
            BmiError::AlreadyInUse(_) => ErrorKind::AlreadyInUse,
            BmiError::AlreadyUnmapped(_) => ErrorKind::AlreadyUnmapped,
            BmiError::MountFailure(_) => ErrorKind::MountFailure,
            BmiError::DuplicateTarget(_) => ErrorKind::DuplicateTarget,
            BmiError::RestartFailed(_) => ErrorKind::RestartFailed,
            BmiError::StopFailed(_) => ErrorKind::StopFailed,
            BmiError::ReadConfigFailed(_) => ErrorKind::ReadConfigFailed,
            BmiError::UpdateConfigFailed(_) => ErrorKind::UpdateConfigFailed,
            BmiError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            BmiError::Storage(_) => ErrorKind::Storage,
            BmiError::UnmapFailed { .. } => ErrorKind::UnmapFailed,
            BmiError::Authorization(_) => ErrorKind::Authorization,
            BmiError::Fabric(_) => ErrorKind::Fabric,
            BmiError::Repository(_) => ErrorKind::Repository,
            BmiError::Registration { .. } => ErrorKind::Registration,
            BmiError::Dhcp(_) => ErrorKind::Dhcp,
            BmiError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            BmiError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            BmiError::Io(_)
            | BmiError::Toml(_)
            | BmiError::TomlSer(_)
            | BmiError::Yaml(_)
            | BmiError::Json(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-style status code reported to command callers.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::ProjectNotFound | ErrorKind::ImageNotFound => 404,
            ErrorKind::Authorization => 403,
            ErrorKind::AlreadyInUse | ErrorKind::AlreadyUnmapped => 409,
            ErrorKind::UnknownCommand | ErrorKind::InvalidArguments => 400,
            _ => 500,
        }
    }

    /// True for failures raised by the storage backend (including unmap).
    pub fn is_storage(&self) -> bool {
        matches!(self.kind(), ErrorKind::Storage | ErrorKind::UnmapFailed)
    }
}
