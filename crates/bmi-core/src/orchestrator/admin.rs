//! Administrative operations. Every entry point here requires the admin flag.

use super::Orchestrator;
use crate::error::BmiResult;
use bmi_provider::{ImageId, NewImage, Project, ProjectId};
use log::info;
use std::collections::BTreeMap;

impl Orchestrator {
    pub fn add_project(&self, name: &str, network: &str, id: Option<ProjectId>) -> BmiResult<ProjectId> {
        self.require_admin("add projects")?;
        let id = self.repo().insert_project(name, network, id)?;
        info!("added project {name} ({id}) on network {network}");
        Ok(id)
    }

    pub fn delete_project(&self, name: &str) -> BmiResult<()> {
        self.require_admin("delete projects")?;
        self.repo().delete_project(name)?;
        info!("deleted project {name}");
        Ok(())
    }

    pub fn list_projects(&self) -> BmiResult<Vec<Project>> {
        self.require_admin("list projects")?;
        self.repo().list_projects()
    }

    /// Register a row for an image that already exists in storage.
    pub fn add_image(
        &self,
        project: &str,
        img: &str,
        id: Option<ImageId>,
        snap: bool,
        parent: Option<&str>,
        public: bool,
    ) -> BmiResult<ImageId> {
        self.require_admin("add images")?;
        let project_id = self.project_id_of(project)?;
        let parent_id = parent
            .map(|parent| self.image_id_in(project, parent))
            .transpose()?;

        let mut row = NewImage::new(img, project_id)
            .with_parent(parent_id)
            .public(public);
        if snap {
            row = row.snapshot();
        }
        if let Some(id) = id {
            row = row.with_id(id);
        }
        let id = self.repo().insert_image(row)?;
        info!("added image {project}/{img} ({id})");
        Ok(id)
    }

    /// Drop the row for `img` without touching storage.
    pub fn delete_image(&self, project: &str, img: &str) -> BmiResult<()> {
        self.require_admin("delete images")?;
        self.repo().delete_image(project, img)?;
        info!("deleted image row {project}/{img}");
        Ok(())
    }

    pub fn mount_image(&self, img: &str) -> BmiResult<()> {
        self.require_admin("mount images")?;
        let volume = self.volume_of(img)?;
        self.services.exports.create_mapping(&volume)
    }

    pub fn umount_image(&self, img: &str) -> BmiResult<()> {
        self.require_admin("unmount images")?;
        let volume = self.volume_of(img)?;
        self.services.exports.delete_mapping(&volume)
    }

    /// Exported images of the acting project, keyed by image name.
    pub fn show_mounted(&self) -> BmiResult<BTreeMap<String, String>> {
        self.require_admin("list mounted images")?;
        let mut mounted = BTreeMap::new();
        for (volume, device) in self.services.exports.show_mappings()? {
            let Some(id) = self.naming().image_id(&volume) else {
                continue;
            };
            if let Some((image, project)) = self.repo().image_by_id(id)? {
                if project == self.session.project {
                    mounted.insert(image.name, device);
                }
            }
        }
        Ok(mounted)
    }

    pub fn remake_mappings(&self) -> BmiResult<()> {
        self.require_admin("remake export mappings")?;
        self.services.exports.remake_mappings()
    }
}
