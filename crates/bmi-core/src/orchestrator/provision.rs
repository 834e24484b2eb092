//! Provision and deprovision sagas.

use super::Orchestrator;
use crate::error::{BmiError, BmiResult};
use crate::naming::DEFAULT_SNAPSHOT;
use crate::saga::Saga;
use bmi_provider::NewImage;
use log::info;

impl Orchestrator {
    /// Attach `node` to `network`, give it a clone of `image`, export the clone
    /// and write the node's boot files.
    pub fn provision(&self, node: &str, image: &str, network: &str, nic: &str) -> BmiResult<()> {
        let parent_id = self.image_id(image)?;
        let storage = &self.services.storage;
        let exports = &self.services.exports;
        let mut saga = Saga::new(format!("provision {node}"));

        saga.step("attach network", || self.fabric.attach_node(node, network, nic))?;
        saga.on_failure("detach network", move || {
            self.settle();
            self.fabric.detach_node(node, network, nic)
        });

        let child_id = saga.step("insert image row", || {
            self.repo().insert_image(
                NewImage::new(node, self.session.project_id)
                    .with_parent(Some(parent_id))
                    .provision_clone(),
            )
        })?;
        saga.on_failure("delete image row", move || {
            self.repo().delete_image(&self.session.project, node)
        });

        let parent_volume = self.naming().volume_name(parent_id);
        let child_volume = self.naming().volume_name(child_id);

        saga.step("clone volume", || {
            storage.clone_volume(&parent_volume, DEFAULT_SNAPSHOT, &child_volume)
        })?;
        let cloned = child_volume.clone();
        saga.on_failure("remove volume", move || storage.remove_volume(&cloned));

        saga.step("create export", || exports.create_mapping(&child_volume))?;
        let exported = child_volume.clone();
        saga.on_failure("delete export", move || exports.delete_mapping(&exported));

        saga.step("write boot files", || {
            let mac_addr = self.fabric.node_mac_addr(node)?;
            self.services
                .boot
                .register(node, image, &child_volume, &mac_addr)
        })?;

        saga.complete();
        info!("provisioned {node} from {image} as {child_volume}");
        Ok(())
    }

    /// Detach `node`, drop its row, withdraw its export and destroy its volume.
    pub fn deprovision(&self, node: &str, network: &str, nic: &str) -> BmiResult<()> {
        let record = self
            .repo()
            .image(&self.session.project, node)?
            .ok_or_else(|| BmiError::ImageNotFound(node.to_string()))?;
        let volume = self.naming().volume_name(record.id);
        let storage = &self.services.storage;
        let exports = &self.services.exports;
        let mut saga = Saga::new(format!("deprovision {node}"));

        saga.step("detach network", || self.fabric.detach_node(node, network, nic))?;
        saga.on_failure("re-attach network", move || {
            self.settle();
            self.fabric.attach_node(node, network, nic)
        });

        saga.step("delete image row", || {
            self.repo().delete_image(&self.session.project, node)
        })?;
        let surviving = volume.clone();
        saga.on_failure("restore image row", move || {
            // The volume still exists, so the row must come back with its id.
            let id = self.naming().image_id(&surviving).ok_or_else(|| {
                BmiError::Storage(format!("{surviving} is not a volume managed by this deployment"))
            })?;
            self.repo()
                .insert_image(NewImage::from(&record).with_id(id))
                .map(|_| ())
        });

        saga.step("delete export", || exports.delete_mapping(&volume))?;
        let unexported = volume.clone();
        saga.on_failure("recreate export", move || exports.create_mapping(&unexported));

        saga.step("remove volume", || storage.remove_volume(&volume))?;

        saga.complete();
        info!("deprovisioned {node}; removed {volume}");
        Ok(())
    }
}
