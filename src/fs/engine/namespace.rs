use google_drive3::chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::common::DrivePath;
use crate::fs::engine::{Engine, EngineState};
use crate::fs::fileinfo::{PERM_EXECUTE, PERM_READ, PERM_WRITE};
use crate::fs::handle_flags::HandleFlags;
use crate::google_drive::DriveId;
use crate::prelude::*;

/// Path based operations a driver maps its namespace calls onto, built from the id based ones.
impl Engine {
    async fn exists(&self, state: &mut EngineState, path: &DrivePath) -> EngineResult<bool> {
        match self.resolve(state, path).await {
            Ok(_) => Ok(true),
            Err(EngineError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Id of the folder holding `path`, `NotFound` when there is none.
    async fn parent_id(&self, state: &mut EngineState, path: &DrivePath) -> EngineResult<DriveId> {
        let parent = path
            .parent()
            .ok_or_else(|| EngineError::Busy(path.to_string()))?;
        self.resolve(state, &parent).await
    }

    /// Checks `mask` (`F_OK` or any of `R_OK`, `W_OK`, `X_OK`) against what this process may
    /// do with `path`.
    #[instrument(skip(self))]
    pub async fn check_access(&self, path: &str, mask: i32) -> EngineResult<()> {
        let path = DrivePath::new(path)?;
        let mut state = self.state().await;
        let id = self.resolve(&mut state, &path).await?;
        let info = self.fileinfo(&mut state, &id).await?;
        if mask == libc::F_OK {
            return Ok(());
        }
        let effective = info.effective_permissions(self.settings.access_mode());
        let denied = (mask & libc::R_OK != 0 && effective & PERM_READ == 0)
            || (mask & libc::W_OK != 0 && effective & PERM_WRITE == 0)
            || (mask & libc::X_OK != 0 && effective & PERM_EXECUTE == 0);
        if denied {
            return Err(EngineError::PermissionDenied(path.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn make_dir(&self, path: &str) -> EngineResult<DriveId> {
        self.create(path, true).await
    }

    /// Removes the empty folder `path`.
    #[instrument(skip(self))]
    pub async fn remove_dir(&self, path: &str) -> EngineResult<()> {
        self.require_write_mode()?;
        let path = DrivePath::new(path)?;
        if path.is_root() {
            return Err(EngineError::Busy(path.to_string()));
        }
        let mut state = self.state().await;
        let id = self.resolve(&mut state, &path).await?;
        let info = self.fileinfo(&mut state, &id).await?;
        if !info.is_folder() {
            return Err(EngineError::NotADirectory(path.to_string()));
        }
        if info.child_count > 0 {
            return Err(EngineError::DirectoryNotEmpty(path.to_string()));
        }
        if info.effective_permissions(self.settings.access_mode()) & PERM_WRITE == 0 {
            return Err(EngineError::PermissionDenied(path.to_string()));
        }
        let parent = self.parent_id(&mut state, &path).await?;
        self.remove_in(&mut state, &id, &parent).await
    }

    /// Removes the file `path`, or just this link of it when it has several parents.
    #[instrument(skip(self))]
    pub async fn unlink(&self, path: &str) -> EngineResult<()> {
        self.require_write_mode()?;
        let path = DrivePath::new(path)?;
        let mut state = self.state().await;
        let id = self.resolve(&mut state, &path).await?;
        if self.fileinfo(&mut state, &id).await?.is_folder() {
            return Err(EngineError::IsADirectory(path.to_string()));
        }
        let parent = self.parent_id(&mut state, &path).await?;
        self.remove_in(&mut state, &id, &parent).await
    }

    /// Adds the file at `from` to the folder of `to`.
    ///
    /// A file has one name in all of its parents, so both paths need the same basename.
    #[instrument(skip(self))]
    pub async fn link(&self, from: &str, to: &str) -> EngineResult<()> {
        self.require_write_mode()?;
        let from = DrivePath::new(from)?;
        let to = DrivePath::new(to)?;
        let mut state = self.state().await;
        if self.exists(&mut state, &to).await? {
            return Err(EngineError::AlreadyExists(to.to_string()));
        }
        if from.basename() != to.basename() {
            return Err(EngineError::NotFound(format!(
                "{} can only be linked under the same name, not as {}",
                from, to
            )));
        }
        let target_folder = to
            .parent()
            .ok_or_else(|| EngineError::Busy(to.to_string()))?;
        let (new_parent, info) = self.resolve_folder(&mut state, &target_folder).await?;
        if info.effective_permissions(self.settings.access_mode()) & PERM_WRITE == 0 {
            return Err(EngineError::PermissionDenied(target_folder.to_string()));
        }
        let id = self.resolve(&mut state, &from).await?;
        self.add_link_in(&mut state, &id, &new_parent).await
    }

    /// Moves and renames `from` to `to`, replacing what was at `to`.
    ///
    /// The replaced file goes to the trash before anything is moved. A move whose second half
    /// fails takes its first half back.
    #[instrument(skip(self))]
    pub async fn rename(&self, from: &str, to: &str) -> EngineResult<()> {
        self.require_write_mode()?;
        let from = DrivePath::new(from)?;
        let to = DrivePath::new(to)?;
        if from.is_root() || to.is_root() {
            return Err(EngineError::Busy(format!("{} -> {}", from, to)));
        }

        let mut state = self.state().await;
        let id = self.resolve(&mut state, &from).await?;
        let replaced = match self.resolve(&mut state, &to).await {
            Ok(existing) => Some(existing),
            Err(EngineError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if let Some(existing) = &replaced {
            if existing == &id {
                debug!("{} and {} are the same file", from, to);
                return Ok(());
            }
            let source = self.fileinfo(&mut state, &id).await?;
            let target = self.fileinfo(&mut state, existing).await?;
            if source.is_folder() {
                if !target.is_folder() {
                    return Err(EngineError::NotADirectory(to.to_string()));
                }
                if target.child_count > 0 {
                    return Err(EngineError::DirectoryNotEmpty(to.to_string()));
                }
            }
            if target.effective_permissions(self.settings.access_mode()) & PERM_WRITE == 0 {
                return Err(EngineError::PermissionDenied(to.to_string()));
            }
        }
        let from_parent = self.parent_id(&mut state, &from).await?;
        let target_folder = to
            .parent()
            .ok_or_else(|| EngineError::Busy(to.to_string()))?;
        let (to_parent, info) = self.resolve_folder(&mut state, &target_folder).await?;
        if info.effective_permissions(self.settings.access_mode()) & PERM_WRITE == 0 {
            return Err(EngineError::PermissionDenied(target_folder.to_string()));
        }

        if let Some(replaced) = &replaced {
            self.remove_in(&mut state, replaced, &to_parent).await?;
        }
        if from_parent != to_parent {
            self.add_link_in(&mut state, &id, &to_parent).await?;
            if let Err(e) = self.unlink_parent(&mut state, &id, &from_parent).await {
                if let Err(undo) = self.unlink_parent(&mut state, &id, &to_parent).await {
                    warn!("{} is left in both {} and {}: {}", from, from_parent, to_parent, undo);
                }
                return Err(e);
            }
        }
        if from.basename() != to.basename() {
            self.rename_in(&mut state, &id, to.basename()).await?;
        }
        Ok(())
    }

    /// Resizes the file at `path` without the caller holding a handle.
    #[instrument(skip(self))]
    pub async fn truncate_path(&self, path: &str, size: u64) -> EngineResult<()> {
        let id = self.resolve_path(path).await?;
        let fh = self.open(&id, HandleFlags::write_only()).await?;
        let result = self.truncate(fh, size).await;
        let closed = self.close(fh).await;
        result.and(closed)
    }

    /// Sets the timestamps of `path` and writes them back right away. `None` stands for now.
    #[instrument(skip(self))]
    pub async fn set_times(
        &self,
        path: &str,
        accessed: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        self.require_write_mode()?;
        let path = DrivePath::new(path)?;
        let mut state = self.state().await;
        let id = self.resolve(&mut state, &path).await?;
        let key = state
            .cache
            .get_item(&self.drive, &id, true)
            .await?
            .ok_or_else(|| EngineError::NotFound(path.to_string()))?;
        let node = state.node_mut(key)?;
        node.fileinfo.set_access_time(accessed);
        node.fileinfo.set_modification_time(modified);
        node.sync_metadata(&self.drive).await
    }
}
