//! Provider contract for persistent image/project records.
//!
//! The repository owns uniqueness: project names are unique, and image names
//! are unique within a project. Storage volumes are never stored here; their
//! names are derived from image ids by the caller.

use serde::{Deserialize, Serialize};
use std::error::Error;

pub type ImageId = u64;
pub type ProjectId = u64;

/// Row describing a bootable image, snapshot, or provisioned clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub name: String,
    pub project_id: ProjectId,
    #[serde(default)]
    pub parent_id: Option<ImageId>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_snapshot: bool,
    #[serde(default)]
    pub is_provision_clone: bool,
}

/// Project (tenant) record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub network: String,
}

/// Insert request for an image row. `id` is only set when a row must be
/// recreated with a known id (e.g. to match a surviving storage volume).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewImage {
    pub name: String,
    pub project_id: ProjectId,
    pub parent_id: Option<ImageId>,
    pub is_public: bool,
    pub is_snapshot: bool,
    pub is_provision_clone: bool,
    pub id: Option<ImageId>,
}

impl NewImage {
    pub fn new(name: impl Into<String>, project_id: ProjectId) -> Self {
        Self {
            name: name.into(),
            project_id,
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent_id: Option<ImageId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_id(mut self, id: ImageId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn snapshot(mut self) -> Self {
        self.is_snapshot = true;
        self
    }

    pub fn provision_clone(mut self) -> Self {
        self.is_provision_clone = true;
        self
    }

    pub fn public(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }
}

/// Re-insert request for an existing row, keeping its id and flags.
impl From<&Image> for NewImage {
    fn from(image: &Image) -> Self {
        Self {
            name: image.name.clone(),
            project_id: image.project_id,
            parent_id: image.parent_id,
            is_public: image.is_public,
            is_snapshot: image.is_snapshot,
            is_provision_clone: image.is_provision_clone,
            id: Some(image.id),
        }
    }
}

/// Which subset of a project's images to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFilter {
    /// Plain images: neither snapshots nor provisioned clones.
    Templates,
    Snapshots,
    ProvisionClones,
}

impl ImageFilter {
    pub fn matches(self, image: &Image) -> bool {
        match self {
            ImageFilter::Templates => !image.is_snapshot && !image.is_provision_clone,
            ImageFilter::Snapshots => image.is_snapshot,
            ImageFilter::ProvisionClones => image.is_provision_clone,
        }
    }
}

pub trait ImageRepository {
    type Error: Error + Send + Sync + 'static;

    fn project_id(&self, name: &str) -> Result<Option<ProjectId>, Self::Error>;

    fn insert_project(
        &self,
        name: &str,
        network: &str,
        id: Option<ProjectId>,
    ) -> Result<ProjectId, Self::Error>;

    fn delete_project(&self, name: &str) -> Result<(), Self::Error>;

    fn list_projects(&self) -> Result<Vec<Project>, Self::Error>;

    fn insert_image(&self, image: NewImage) -> Result<ImageId, Self::Error>;

    fn delete_image(&self, project: &str, name: &str) -> Result<(), Self::Error>;

    fn image(&self, project: &str, name: &str) -> Result<Option<Image>, Self::Error>;

    /// Look up a row by id, returning it with its owning project name.
    fn image_by_id(&self, id: ImageId) -> Result<Option<(Image, String)>, Self::Error>;

    fn list_images(&self, project: &str, filter: ImageFilter) -> Result<Vec<Image>, Self::Error>;

    /// Every image with its owning project name.
    fn list_all_images(&self) -> Result<Vec<(Image, String)>, Self::Error>;

    /// Duplicate a row into `dest_project`, optionally renaming it. Returns the new id.
    fn copy_image(
        &self,
        src_project: &str,
        name: &str,
        dest_project: ProjectId,
        new_name: Option<&str>,
    ) -> Result<ImageId, Self::Error>;

    /// Reassign a row to `dest_project`, optionally renaming it. The id is kept.
    fn move_image(
        &self,
        src_project: &str,
        name: &str,
        dest_project: ProjectId,
        new_name: Option<&str>,
    ) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(is_snapshot: bool, is_provision_clone: bool) -> Image {
        Image {
            id: 1,
            name: "img".into(),
            project_id: 1,
            parent_id: None,
            is_public: false,
            is_snapshot,
            is_provision_clone,
        }
    }

    #[test]
    fn filters_partition_rows() {
        let template = image(false, false);
        let snapshot = image(true, false);
        let clone = image(false, true);

        assert!(ImageFilter::Templates.matches(&template));
        assert!(!ImageFilter::Templates.matches(&snapshot));
        assert!(!ImageFilter::Templates.matches(&clone));
        assert!(ImageFilter::Snapshots.matches(&snapshot));
        assert!(ImageFilter::ProvisionClones.matches(&clone));
    }

    #[test]
    fn builder_sets_flags() {
        let row = NewImage::new("n1", 4).with_parent(Some(2)).provision_clone();
        assert_eq!(row.parent_id, Some(2));
        assert!(row.is_provision_clone);
        assert!(!row.is_snapshot);
        assert_eq!(row.id, None);
    }
}
