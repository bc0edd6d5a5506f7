use async_recursion::async_recursion;
use tracing::{debug, instrument, trace};

use crate::common::DrivePath;
use crate::fs::engine::{Engine, EngineState};
use crate::fs::fileinfo::{Fileinfo, PERM_READ, PERM_WRITE};
use crate::google_drive::DriveId;
use crate::prelude::*;

/// Numbers a driver reports for `statfs`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FilesystemStats {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
}

//region lookups
impl Engine {
    /// Id behind `path`, walking up to the first cached ancestor on a miss.
    #[async_recursion]
    pub(super) async fn resolve(
        &self,
        state: &mut EngineState,
        path: &DrivePath,
    ) -> EngineResult<DriveId> {
        if let Some(id) = state.cache.lookup_path(&self.drive, path).await? {
            trace!("path cache hit for {}", path);
            return Ok(id);
        }
        let Some(parent) = path.parent() else {
            let root = state.cache.root_id().clone();
            state.cache.add_path(path, root.clone());
            return Ok(root);
        };
        let parent_id = self.resolve(state, &parent).await?;
        let id = self
            .drive
            .child_id(&parent_id, path.basename())
            .await?
            .ok_or_else(|| EngineError::NotFound(path.to_string()))?;
        debug!("resolved {} to {}", path, id);
        state.cache.add_path(path, id.clone());
        Ok(id)
    }

    /// Cached metadata of `id`, refreshed through the change feed when stale.
    pub(super) async fn fileinfo(
        &self,
        state: &mut EngineState,
        id: &DriveId,
    ) -> EngineResult<Fileinfo> {
        let key = state
            .cache
            .get_item(&self.drive, id, true)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Ok(state.node_mut(key)?.fileinfo().clone())
    }

    /// Id of the folder `path`, failing with `NotADirectory` when it is missing or a file.
    pub(super) async fn resolve_folder(
        &self,
        state: &mut EngineState,
        path: &DrivePath,
    ) -> EngineResult<(DriveId, Fileinfo)> {
        let id = match self.resolve(state, path).await {
            Err(EngineError::NotFound(_)) => {
                return Err(EngineError::NotADirectory(path.to_string()))
            }
            other => other?,
        };
        let info = self.fileinfo(state, &id).await?;
        if !info.is_folder() {
            return Err(EngineError::NotADirectory(path.to_string()));
        }
        Ok((id, info))
    }

    #[instrument(skip(self))]
    pub async fn resolve_path(&self, path: &str) -> EngineResult<DriveId> {
        let path = DrivePath::new(path)?;
        let mut state = self.state().await;
        self.resolve(&mut state, &path).await
    }

    #[instrument(skip(self))]
    pub async fn get_attributes(&self, id: &DriveId) -> EngineResult<Fileinfo> {
        let mut state = self.state().await;
        self.fileinfo(&mut state, id).await
    }

    /// Metadata of every child of `folder`, trashed children excluded.
    #[instrument(skip(self))]
    pub async fn list_children(&self, folder: &DriveId) -> EngineResult<Vec<Fileinfo>> {
        let mut state = self.state().await;
        let info = self.fileinfo(&mut state, folder).await?;
        if !info.is_folder() {
            return Err(EngineError::NotADirectory(folder.to_string()));
        }
        if info.effective_permissions(self.settings.access_mode()) & PERM_READ == 0 {
            return Err(EngineError::PermissionDenied(folder.to_string()));
        }
        let resources = self.drive.list_children(folder).await?;
        let folder_paths: Vec<DrivePath> = state
            .cache
            .paths
            .paths_of(folder)
            .iter()
            .filter_map(|path| DrivePath::new(path).ok())
            .collect();
        let mut children = Vec::with_capacity(resources.len());
        for resource in &resources {
            state.cache.cache_listed(resource);
            let info = Fileinfo::from_resource(resource);
            if !info.name.is_empty() && !info.name.contains('/') {
                for folder_path in &folder_paths {
                    state.cache.add_path(&folder_path.join(&info.name), info.id.clone());
                }
            }
            children.push(info);
        }
        if let Some(node) = state
            .cache
            .find(folder)
            .and_then(|key| state.cache.node_mut(key))
        {
            node.fileinfo.child_count = children.len() as u32;
        }
        Ok(children)
    }

    #[instrument(skip(self))]
    pub async fn filesystem_stats(&self) -> EngineResult<FilesystemStats> {
        let mut state = self.state().await;
        let sysinfo = state.cache.refresh_sysinfo(&self.drive).await?;
        let block_size = self.settings.min_chunk_size();
        Ok(FilesystemStats {
            block_size,
            blocks: sysinfo.quota_total / block_size,
            blocks_free: sysinfo.quota_free() / block_size,
        })
    }
}
//endregion

//region changes
impl Engine {
    /// Creates an empty file or folder at `path` and returns its id.
    #[instrument(skip(self))]
    pub async fn create(&self, path: &str, is_folder: bool) -> EngineResult<DriveId> {
        self.require_write_mode()?;
        let path = DrivePath::new(path)?;
        let Some(parent) = path.parent() else {
            return Err(EngineError::IsADirectory(path.to_string()));
        };
        let mut state = self.state().await;
        let (parent_id, parent_info) = self.resolve_folder(&mut state, &parent).await?;
        if parent_info.effective_permissions(self.settings.access_mode()) & PERM_WRITE == 0 {
            return Err(EngineError::PermissionDenied(parent.to_string()));
        }
        match self.resolve(&mut state, &path).await {
            Ok(_) => return Err(EngineError::AlreadyExists(path.to_string())),
            Err(EngineError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let file = self
            .drive
            .create_file(&parent_id, path.basename(), is_folder)
            .await?;
        let id = file
            .id
            .as_deref()
            .map(DriveId::from)
            .ok_or_else(|| EngineError::remote("created file came back without an id"))?;
        state.cache.insert_resource(&file);
        state.cache.invalidate(&parent_id);
        state.cache.add_path(&path, id.clone());
        debug!("created {} as {}", path, id);
        Ok(id)
    }

    /// Removes `id` from `parent`. A file with several parents only loses that link, the last
    /// link moves the file to the trash.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &DriveId, parent: &DriveId) -> EngineResult<()> {
        self.require_write_mode()?;
        let mut state = self.state().await;
        self.remove_in(&mut state, id, parent).await
    }

    /// Makes `id` a child of `new_parent` as well.
    #[instrument(skip(self))]
    pub async fn add_link(&self, id: &DriveId, new_parent: &DriveId) -> EngineResult<()> {
        self.require_write_mode()?;
        let mut state = self.state().await;
        self.add_link_in(&mut state, id, new_parent).await
    }

    #[instrument(skip(self))]
    pub async fn remove_link(&self, id: &DriveId, parent: &DriveId) -> EngineResult<()> {
        self.require_write_mode()?;
        let mut state = self.state().await;
        self.unlink_parent(&mut state, id, parent).await
    }

    /// Renames `id` in place, every link of the file sees the new name.
    #[instrument(skip(self))]
    pub async fn rename_basename(&self, id: &DriveId, new_name: &str) -> EngineResult<()> {
        self.require_write_mode()?;
        let mut state = self.state().await;
        self.rename_in(&mut state, id, new_name).await
    }

    pub(super) async fn remove_in(
        &self,
        state: &mut EngineState,
        id: &DriveId,
        parent: &DriveId,
    ) -> EngineResult<()> {
        let info = self.fileinfo(state, id).await?;
        if info.parent_count > 1 {
            self.unlink_parent(state, id, parent).await
        } else {
            self.drive.trash(id).await?;
            state.cache.delete_identifier(id);
            state.cache.invalidate(parent);
            Ok(())
        }
    }

    pub(super) async fn add_link_in(
        &self,
        state: &mut EngineState,
        id: &DriveId,
        new_parent: &DriveId,
    ) -> EngineResult<()> {
        self.drive.add_parent(id, new_parent).await?;
        // keeps a later remove from trashing a file that still has a link
        if let Some(node) = state.cache.find(id).and_then(|key| state.cache.node_mut(key)) {
            node.fileinfo.parent_count += 1;
        }
        state.cache.invalidate(new_parent);
        Ok(())
    }

    pub(super) async fn unlink_parent(
        &self,
        state: &mut EngineState,
        id: &DriveId,
        parent: &DriveId,
    ) -> EngineResult<()> {
        self.drive.remove_parent(id, parent).await?;
        if let Some(node) = state.cache.find(id).and_then(|key| state.cache.node_mut(key)) {
            node.fileinfo.parent_count = node.fileinfo.parent_count.saturating_sub(1);
        }
        state.cache.paths.remove_id(id);
        state.cache.invalidate(parent);
        Ok(())
    }

    pub(super) async fn rename_in(
        &self,
        state: &mut EngineState,
        id: &DriveId,
        new_name: &str,
    ) -> EngineResult<()> {
        if new_name.is_empty() || new_name.contains('/') {
            return Err(EngineError::InvalidArgument(format!(
                "not a file name: {}",
                new_name
            )));
        }
        self.drive.rename(id, new_name).await?;
        if let Some(node) = state.cache.find(id).and_then(|key| state.cache.node_mut(key)) {
            node.fileinfo.name = new_name.to_string();
        }
        state.cache.paths.remove_id(id);
        Ok(())
    }
}
//endregion
