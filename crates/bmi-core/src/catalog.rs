//! JSON-file implementation of [`ImageRepository`].
//!
//! The whole catalog is held in memory behind a mutex and rewritten
//! atomically after every mutation. Ids are never reused.

use crate::error::{BmiError, BmiResult};
use crate::persist::write_atomic;
use bmi_provider::{Image, ImageFilter, ImageId, ImageRepository, NewImage, Project, ProjectId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogState {
    #[serde(default = "first_id")]
    next_project_id: ProjectId,
    #[serde(default = "first_id")]
    next_image_id: ImageId,
    #[serde(default)]
    projects: Vec<Project>,
    #[serde(default)]
    images: Vec<Image>,
}

fn first_id() -> u64 {
    1
}

impl Default for CatalogState {
    fn default() -> Self {
        Self {
            next_project_id: first_id(),
            next_image_id: first_id(),
            projects: Vec::new(),
            images: Vec::new(),
        }
    }
}

impl CatalogState {
    fn project(&self, name: &str) -> BmiResult<&Project> {
        self.projects
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| BmiError::ProjectNotFound(name.to_string()))
    }

    fn project_name(&self, id: ProjectId) -> Option<&str> {
        self.projects
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.name.as_str())
    }

    fn image_index(&self, project: &str, name: &str) -> BmiResult<usize> {
        let pid = self.project(project)?.id;
        self.images
            .iter()
            .position(|img| img.project_id == pid && img.name == name)
            .ok_or_else(|| BmiError::ImageNotFound(name.to_string()))
    }

    fn ensure_name_free(&self, project_id: ProjectId, name: &str) -> BmiResult<()> {
        if self
            .images
            .iter()
            .any(|img| img.project_id == project_id && img.name == name)
        {
            return Err(BmiError::Repository(format!(
                "image `{name}` already exists in project {project_id}"
            )));
        }
        Ok(())
    }

    fn ensure_project_id(&self, project_id: ProjectId) -> BmiResult<()> {
        if self.project_name(project_id).is_none() {
            return Err(BmiError::ProjectNotFound(project_id.to_string()));
        }
        Ok(())
    }

    fn allocate_image_id(&mut self, requested: Option<ImageId>) -> BmiResult<ImageId> {
        let id = match requested {
            Some(id) => {
                if self.images.iter().any(|img| img.id == id) {
                    return Err(BmiError::Repository(format!("image id {id} already in use")));
                }
                id
            }
            None => self.next_image_id,
        };
        self.next_image_id = self.next_image_id.max(successor(id, "image")?);
        Ok(id)
    }
}

fn successor(id: u64, what: &str) -> BmiResult<u64> {
    id.checked_add(1)
        .ok_or_else(|| BmiError::Repository(format!("{what} id {id} leaves no room for further ids")))
}

pub struct FileCatalog {
    path: PathBuf,
    state: Mutex<CatalogState>,
}

impl FileCatalog {
    /// Open the catalog at `path`, starting empty when the file is missing.
    pub fn open(path: impl Into<PathBuf>) -> BmiResult<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => CatalogState::default(),
            Ok(contents) => serde_json::from_str(&contents).map_err(|err| {
                BmiError::Repository(format!("{}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => CatalogState::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` to a copy of the state and keep it only if it persists.
    fn mutate<T>(&self, change: impl FnOnce(&mut CatalogState) -> BmiResult<T>) -> BmiResult<T> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let value = change(&mut next)?;
        let payload = serde_json::to_vec_pretty(&next)?;
        write_atomic(&self.path, &payload, Some(0o600)).map_err(|err| {
            BmiError::Repository(format!("{}: {err}", self.path.display()))
        })?;
        *guard = next;
        Ok(value)
    }
}

impl ImageRepository for FileCatalog {
    type Error = BmiError;

    fn project_id(&self, name: &str) -> BmiResult<Option<ProjectId>> {
        Ok(self.lock().project(name).ok().map(|p| p.id))
    }

    fn insert_project(&self, name: &str, network: &str, id: Option<ProjectId>) -> BmiResult<ProjectId> {
        self.mutate(|state| {
            if state.projects.iter().any(|p| p.name == name) {
                return Err(BmiError::Repository(format!("project `{name}` already exists")));
            }
            let id = id.unwrap_or(state.next_project_id);
            if state.projects.iter().any(|p| p.id == id) {
                return Err(BmiError::Repository(format!("project id {id} already in use")));
            }
            state.next_project_id = state.next_project_id.max(successor(id, "project")?);
            state.projects.push(Project {
                id,
                name: name.to_string(),
                network: network.to_string(),
            });
            Ok(id)
        })
    }

    fn delete_project(&self, name: &str) -> BmiResult<()> {
        self.mutate(|state| {
            let id = state.project(name)?.id;
            if state.images.iter().any(|img| img.project_id == id) {
                return Err(BmiError::Repository(format!(
                    "project `{name}` still owns images"
                )));
            }
            state.projects.retain(|p| p.id != id);
            Ok(())
        })
    }

    fn list_projects(&self) -> BmiResult<Vec<Project>> {
        Ok(self.lock().projects.clone())
    }

    fn insert_image(&self, image: NewImage) -> BmiResult<ImageId> {
        self.mutate(|state| {
            state.ensure_project_id(image.project_id)?;
            state.ensure_name_free(image.project_id, &image.name)?;
            let id = state.allocate_image_id(image.id)?;
            state.images.push(Image {
                id,
                name: image.name,
                project_id: image.project_id,
                parent_id: image.parent_id,
                is_public: image.is_public,
                is_snapshot: image.is_snapshot,
                is_provision_clone: image.is_provision_clone,
            });
            Ok(id)
        })
    }

    fn delete_image(&self, project: &str, name: &str) -> BmiResult<()> {
        self.mutate(|state| {
            let idx = state.image_index(project, name)?;
            state.images.remove(idx);
            Ok(())
        })
    }

    fn image(&self, project: &str, name: &str) -> BmiResult<Option<Image>> {
        let state = self.lock();
        let Ok(pid) = state.project(project).map(|p| p.id) else {
            return Ok(None);
        };
        Ok(state
            .images
            .iter()
            .find(|img| img.project_id == pid && img.name == name)
            .cloned())
    }

    fn image_by_id(&self, id: ImageId) -> BmiResult<Option<(Image, String)>> {
        let state = self.lock();
        Ok(state.images.iter().find(|img| img.id == id).map(|img| {
            let project = state.project_name(img.project_id).unwrap_or_default();
            (img.clone(), project.to_string())
        }))
    }

    fn list_images(&self, project: &str, filter: ImageFilter) -> BmiResult<Vec<Image>> {
        let state = self.lock();
        let pid = state.project(project)?.id;
        Ok(state
            .images
            .iter()
            .filter(|img| img.project_id == pid && filter.matches(img))
            .cloned()
            .collect())
    }

    fn list_all_images(&self) -> BmiResult<Vec<(Image, String)>> {
        let state = self.lock();
        Ok(state
            .images
            .iter()
            .map(|img| {
                let project = state.project_name(img.project_id).unwrap_or_default();
                (img.clone(), project.to_string())
            })
            .collect())
    }

    fn copy_image(
        &self,
        src_project: &str,
        name: &str,
        dest_project: ProjectId,
        new_name: Option<&str>,
    ) -> BmiResult<ImageId> {
        self.mutate(|state| {
            let source = state.images[state.image_index(src_project, name)?].clone();
            state.ensure_project_id(dest_project)?;
            let dest_name = new_name.unwrap_or(name);
            state.ensure_name_free(dest_project, dest_name)?;
            let id = state.allocate_image_id(None)?;
            state.images.push(Image {
                id,
                name: dest_name.to_string(),
                project_id: dest_project,
                ..source
            });
            Ok(id)
        })
    }

    fn move_image(
        &self,
        src_project: &str,
        name: &str,
        dest_project: ProjectId,
        new_name: Option<&str>,
    ) -> BmiResult<()> {
        self.mutate(|state| {
            let idx = state.image_index(src_project, name)?;
            state.ensure_project_id(dest_project)?;
            let dest_name = new_name.unwrap_or(name);
            let unchanged = state.images[idx].project_id == dest_project && dest_name == name;
            if !unchanged {
                state.ensure_name_free(dest_project, dest_name)?;
            }
            let image = &mut state.images[idx];
            image.project_id = dest_project;
            image.name = dest_name.to_string();
            Ok(())
        })
    }
}
