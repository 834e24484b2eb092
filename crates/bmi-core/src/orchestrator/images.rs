//! Image lifecycle: snapshots, imports/exports, copies, removal and listings.

use super::Orchestrator;
use crate::error::{BmiError, BmiResult};
use crate::naming::DEFAULT_SNAPSHOT;
use crate::saga::Saga;
use bmi_provider::{Image, ImageFilter, ImageId, NewImage, ProjectId};
use log::info;
use serde::Serialize;

/// One row of `list_all_images`, with its derived volume name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageListing {
    pub id: ImageId,
    pub name: String,
    pub project: String,
    pub volume: String,
    pub parent_id: Option<ImageId>,
    pub is_public: bool,
    pub is_snapshot: bool,
    pub is_provision_clone: bool,
}

impl Orchestrator {
    /// Turn the live volume of `node` into a protected template named `snap_name`.
    pub fn create_snapshot(&self, node: &str, snap_name: &str) -> BmiResult<()> {
        self.fabric.validate_project(&self.session.project)?;
        let node_image = self
            .repo()
            .image(&self.session.project, node)?
            .ok_or_else(|| BmiError::ImageNotFound(node.to_string()))?;
        let live = self.naming().volume_name(node_image.id);
        let mut saga = Saga::new(format!("snapshot {node} as {snap_name}"));

        self.snapshot_source(&mut saga, &live, DEFAULT_SNAPSHOT)?;
        let snap_id = self.insert_row(
            &mut saga,
            NewImage::new(snap_name, self.session.project_id)
                .with_parent(node_image.parent_id)
                .snapshot(),
        )?;
        let template = self.naming().volume_name(snap_id);
        self.build_template(&mut saga, &live, DEFAULT_SNAPSHOT, &template)?;
        saga.complete();

        self.release_source(&live, DEFAULT_SNAPSHOT)?;
        info!("snapshot {snap_name} of {node} stored as {template}");
        Ok(())
    }

    /// Adopt an external volume `img` as a template of the acting project.
    pub fn import_ceph_image(&self, img: &str) -> BmiResult<()> {
        let mut saga = Saga::new(format!("import {img}"));

        self.snapshot_source(&mut saga, img, DEFAULT_SNAPSHOT)?;
        let id = self.insert_row(&mut saga, NewImage::new(img, self.session.project_id))?;
        let template = self.naming().volume_name(id);
        self.build_template(&mut saga, img, DEFAULT_SNAPSHOT, &template)?;
        saga.complete();

        self.release_source(img, DEFAULT_SNAPSHOT)?;
        info!("imported {img} as {template}");
        Ok(())
    }

    /// Adopt an existing snapshot `img@snap_name` as a template, protecting it
    /// first when asked.
    pub fn import_ceph_snapshot(&self, img: &str, snap_name: &str, protect: bool) -> BmiResult<()> {
        let storage = &self.services.storage;
        let mut saga = Saga::new(format!("import {img}@{snap_name}"));

        if protect {
            saga.step("protect source snapshot", || {
                storage.protect_snapshot(img, snap_name)
            })?;
            saga.on_failure("unprotect source snapshot", move || {
                storage.unprotect_snapshot(img, snap_name)
            });
        }
        let id = self.insert_row(&mut saga, NewImage::new(img, self.session.project_id))?;
        let template = self.naming().volume_name(id);
        self.build_template(&mut saga, img, snap_name, &template)?;
        saga.complete();

        info!("imported {img}@{snap_name} as {template}");
        Ok(())
    }

    /// Materialise image `img` as a standalone external volume `name`.
    pub fn export_ceph_image(&self, img: &str, name: &str) -> BmiResult<()> {
        let source = self.volume_of(img)?;
        let storage = &self.services.storage;
        let mut saga = Saga::new(format!("export {img} to {name}"));

        saga.step("clone image", || storage.clone_volume(&source, DEFAULT_SNAPSHOT, name))?;
        saga.on_failure("remove exported volume", move || storage.remove_volume(name));
        saga.step("flatten exported volume", || storage.flatten(name))?;
        saga.complete();

        info!("exported {img} to {name}");
        Ok(())
    }

    /// Copy `img` into `dest_project`, optionally renamed, with its own volume.
    pub fn copy_image(&self, img: &str, dest_project: &str, new_name: Option<&str>) -> BmiResult<()> {
        let dest_pid = self.authorize_transfer(dest_project)?;
        let source = self.volume_of(img)?;
        let dest_name = new_name.unwrap_or(img);
        let storage = &self.services.storage;
        let mut saga = Saga::new(format!("copy {img} to {dest_project}"));

        let copy_id = saga.step("copy image row", || {
            self.repo()
                .copy_image(&self.session.project, img, dest_pid, new_name)
        })?;
        saga.on_failure("delete copied row", move || {
            self.repo().delete_image(dest_project, dest_name)
        });

        let target = self.naming().volume_name(copy_id);
        saga.step("clone volume", || {
            storage.clone_volume(&source, DEFAULT_SNAPSHOT, &target)
        })?;
        let cloned = target.clone();
        saga.on_failure("remove copied volume", move || storage.remove_volume(&cloned));
        self.protect_template(&mut saga, &target)?;
        saga.complete();

        info!("copied {img} to {dest_project}/{dest_name} as {target}");
        Ok(())
    }

    /// Reassign `img` to `dest_project`, optionally renamed. The volume is kept.
    pub fn move_image(&self, img: &str, dest_project: &str, new_name: Option<&str>) -> BmiResult<()> {
        let dest_pid = self.authorize_transfer(dest_project)?;
        self.repo()
            .move_image(&self.session.project, img, dest_pid, new_name)?;
        info!(
            "moved {img} to {dest_project}/{}",
            new_name.unwrap_or(img)
        );
        Ok(())
    }

    /// Destroy image `img`: its clone-source snapshot, its volume and its row.
    pub fn remove_image(&self, img: &str) -> BmiResult<()> {
        self.fabric.validate_project(&self.session.project)?;
        let volume = self.volume_of(img)?;
        let storage = &self.services.storage;
        let mut saga = Saga::new(format!("remove {img}"));

        saga.step("unprotect snapshot", || {
            storage.unprotect_snapshot(&volume, DEFAULT_SNAPSHOT)
        })?;
        let reprotect = volume.clone();
        saga.on_failure("re-protect snapshot", move || {
            storage.protect_snapshot(&reprotect, DEFAULT_SNAPSHOT)
        });
        saga.step("remove snapshot", || {
            storage.remove_snapshot(&volume, DEFAULT_SNAPSHOT)
        })?;
        let resnap = volume.clone();
        saga.on_failure("re-create snapshot", move || {
            storage.create_snapshot(&resnap, DEFAULT_SNAPSHOT)
        });
        saga.step("remove volume", || storage.remove_volume(&volume))?;
        saga.complete();

        self.repo().delete_image(&self.session.project, img)?;
        info!("removed {img} ({volume})");
        Ok(())
    }

    pub fn list_images(&self) -> BmiResult<Vec<String>> {
        self.fabric.validate_project(&self.session.project)?;
        self.names(ImageFilter::Templates)
    }

    pub fn list_snapshots(&self) -> BmiResult<Vec<String>> {
        self.fabric.validate_project(&self.session.project)?;
        self.names(ImageFilter::Snapshots)
    }

    pub fn list_provisioned_nodes(&self) -> BmiResult<Vec<String>> {
        self.names(ImageFilter::ProvisionClones)
    }

    pub fn list_all_images(&self) -> BmiResult<Vec<ImageListing>> {
        Ok(self
            .repo()
            .list_all_images()?
            .into_iter()
            .map(|(image, project)| self.listing(image, project))
            .collect())
    }

    /// Address currently leased to the node's boot interface.
    pub fn get_node_ip(&self, node: &str) -> BmiResult<String> {
        let mac_addr = self.fabric.node_mac_addr(node)?;
        self.services.leases.ip_for_mac(&mac_addr)
    }

    fn names(&self, filter: ImageFilter) -> BmiResult<Vec<String>> {
        Ok(self
            .repo()
            .list_images(&self.session.project, filter)?
            .into_iter()
            .map(|image| image.name)
            .collect())
    }

    fn listing(&self, image: Image, project: String) -> ImageListing {
        ImageListing {
            volume: self.naming().volume_name(image.id),
            id: image.id,
            name: image.name,
            project,
            parent_id: image.parent_id,
            is_public: image.is_public,
            is_snapshot: image.is_snapshot,
            is_provision_clone: image.is_provision_clone,
        }
    }

    fn authorize_transfer(&self, dest_project: &str) -> BmiResult<ProjectId> {
        if !self.session.is_admin && self.session.project != dest_project {
            return Err(BmiError::Authorization(format!(
                "{} may not transfer images into {dest_project}",
                self.session.username
            )));
        }
        self.project_id_of(dest_project)
    }

    fn insert_row<'a>(&'a self, saga: &mut Saga<'a>, row: NewImage) -> BmiResult<ImageId> {
        let name = row.name.clone();
        let id = saga.step("insert image row", || self.repo().insert_image(row))?;
        saga.on_failure("delete image row", move || {
            self.repo().delete_image(&self.session.project, &name)
        });
        Ok(id)
    }

    /// Snapshot and protect `source@snapshot` so it can be cloned.
    fn snapshot_source<'a>(&'a self, saga: &mut Saga<'a>, source: &str, snapshot: &'static str) -> BmiResult<()> {
        let storage = &self.services.storage;
        saga.step("snapshot source", || storage.create_snapshot(source, snapshot))?;
        let snapped = source.to_string();
        saga.on_failure("remove source snapshot", move || {
            storage.remove_snapshot(&snapped, snapshot)
        });
        saga.step("protect source snapshot", || storage.protect_snapshot(source, snapshot))?;
        let protected = source.to_string();
        saga.on_failure("unprotect source snapshot", move || {
            storage.unprotect_snapshot(&protected, snapshot)
        });
        Ok(())
    }

    /// Clone `source@snapshot` into `template`, flatten it, and give it its own
    /// protected snapshot so it no longer depends on the source.
    fn build_template<'a>(
        &'a self,
        saga: &mut Saga<'a>,
        source: &str,
        snapshot: &str,
        template: &str,
    ) -> BmiResult<()> {
        let storage = &self.services.storage;
        saga.step("clone template", || storage.clone_volume(source, snapshot, template))?;
        let cloned = template.to_string();
        saga.on_failure("remove template", move || storage.remove_volume(&cloned));
        saga.step("flatten template", || storage.flatten(template))?;
        self.protect_template(saga, template)
    }

    fn protect_template<'a>(&'a self, saga: &mut Saga<'a>, template: &str) -> BmiResult<()> {
        let storage = &self.services.storage;
        saga.step("snapshot template", || {
            storage.create_snapshot(template, DEFAULT_SNAPSHOT)
        })?;
        let snapped = template.to_string();
        saga.on_failure("remove template snapshot", move || {
            storage.remove_snapshot(&snapped, DEFAULT_SNAPSHOT)
        });
        saga.step("protect template snapshot", || {
            storage.protect_snapshot(template, DEFAULT_SNAPSHOT)
        })
    }

    /// Drop the intermediate snapshot once the template stands on its own.
    fn release_source(&self, source: &str, snapshot: &str) -> BmiResult<()> {
        let storage = &self.services.storage;
        storage.unprotect_snapshot(source, snapshot)?;
        storage.remove_snapshot(source, snapshot)
    }
}
