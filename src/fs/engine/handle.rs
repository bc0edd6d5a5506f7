use std::fmt::{Display, Formatter};

use google_drive3::chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::fs::engine::{Engine, OpenFile};
use crate::fs::fileinfo::Fileinfo;
use crate::fs::handle_flags::HandleFlags;
use crate::google_drive::DriveId;
use crate::prelude::*;

/// Opaque token for an open file, handed to the driver by [`Engine::open`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle(pub(super) u64);

impl FileHandle {
    /// Value a driver stores in its own handle field
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for FileHandle {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for FileHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "fh#{}", self.0)
    }
}

//region lifecycle
impl Engine {
    /// Opens the file `id`.
    ///
    /// Tombstoned files can not be opened again, folders can not be opened at all.
    #[instrument(skip(self))]
    pub async fn open(&self, id: &DriveId, flags: HandleFlags) -> EngineResult<FileHandle> {
        let mut state = self.state().await;
        let key = state
            .cache
            .get_item(&self.drive, id, true)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let node = state.node_mut(key)?;
        if node.is_deleted() {
            return Err(EngineError::NotFound(id.to_string()));
        }
        if node.fileinfo().is_folder() {
            return Err(EngineError::IsADirectory(id.to_string()));
        }
        let required = flags.required_permissions();
        let effective = node
            .fileinfo()
            .effective_permissions(self.settings.access_mode());
        if effective & required != required {
            return Err(EngineError::PermissionDenied(id.to_string()));
        }
        if node.is_dirty() && !node.is_open() {
            // left behind by a close whose upload failed
            if let Err(e) = node.sync(&self.drive, &self.settings).await {
                warn!("{} still has changes the drive does not have: {}", id, e);
            }
        }
        if flags.truncates() {
            node.truncate(&self.drive, &self.settings, 0).await?;
        }

        node.open_count += 1;
        if flags.can_write() {
            node.open_write_count += 1;
        }
        let fh = FileHandle(state.next_handle);
        state.next_handle += 1;
        state.handles.insert(
            fh.0,
            OpenFile {
                id: id.clone(),
                flags,
            },
        );
        debug!("opened {} as {}", id, fh);
        Ok(fh)
    }

    /// Closes `fh`, writing back content and timestamps when it was opened for writing.
    ///
    /// The counts are decremented even when the write back fails, the error is returned
    /// afterwards.
    #[instrument(skip(self))]
    pub async fn close(&self, fh: FileHandle) -> EngineResult<()> {
        let mut state = self.state().await;
        let open = state
            .handles
            .remove(&fh.0)
            .ok_or(EngineError::BadHandle(fh.0))?;
        let Some(key) = state.cache.find(&open.id) else {
            warn!("{} was closed after its node disappeared", open.id);
            return Ok(());
        };
        let node = state.node_mut(key)?;

        let mut result = Ok(());
        if open.flags.can_write() {
            result = node.sync(&self.drive, &self.settings).await;
            let metadata = node.sync_metadata(&self.drive).await;
            result = result.and(metadata);
            node.open_write_count = node.open_write_count.saturating_sub(1);
        }
        node.open_count = node.open_count.saturating_sub(1);

        if !node.is_open() {
            if node.is_dirty() {
                warn!("{} keeps unsynced changes until the next open retries", open.id);
            } else {
                node.free_chunks();
            }
            if node.is_deleted() {
                debug!("removing tombstoned {}", open.id);
                state.cache.tree.remove(key);
            }
        }
        result
    }
}
//endregion

//region content
impl Engine {
    /// Reads into `buf` starting at `offset`, short reads happen at the end of the file.
    #[instrument(skip(self, buf), fields(len = buf.len()))]
    pub async fn read(&self, fh: FileHandle, buf: &mut [u8], offset: u64) -> EngineResult<usize> {
        let mut state = self.state().await;
        let (open, node) = state.open_node(fh)?;
        if !open.flags.can_read() {
            return Err(EngineError::BadHandle(fh.0));
        }
        let size = buf.len() as u64;
        node.read(&self.drive, &self.settings, Some(buf), offset, size)
            .await
    }

    #[instrument(skip(self, buf), fields(len = buf.len()))]
    pub async fn write(&self, fh: FileHandle, buf: &[u8], offset: u64) -> EngineResult<usize> {
        let mut state = self.state().await;
        let (open, node) = state.open_node(fh)?;
        if !open.flags.can_write() {
            return Err(EngineError::BadHandle(fh.0));
        }
        node.write(&self.drive, &self.settings, buf, offset).await
    }

    #[instrument(skip(self))]
    pub async fn truncate(&self, fh: FileHandle, size: u64) -> EngineResult<()> {
        let mut state = self.state().await;
        let (open, node) = state.open_node(fh)?;
        if !open.flags.can_write() {
            return Err(EngineError::BadHandle(fh.0));
        }
        node.truncate(&self.drive, &self.settings, size).await
    }

    #[instrument(skip(self))]
    pub async fn sync(&self, fh: FileHandle) -> EngineResult<()> {
        let mut state = self.state().await;
        let (_, node) = state.open_node(fh)?;
        node.sync(&self.drive, &self.settings).await
    }

    #[instrument(skip(self))]
    pub async fn sync_metadata(&self, fh: FileHandle) -> EngineResult<()> {
        let mut state = self.state().await;
        let (_, node) = state.open_node(fh)?;
        node.sync_metadata(&self.drive).await
    }
}
//endregion

//region metadata
impl Engine {
    pub async fn file_info(&self, fh: FileHandle) -> EngineResult<Fileinfo> {
        let mut state = self.state().await;
        let (_, node) = state.open_node(fh)?;
        Ok(node.fileinfo().clone())
    }

    /// `None` stands for now. Written back on the next metadata sync.
    pub async fn set_access_time(
        &self,
        fh: FileHandle,
        time: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let mut state = self.state().await;
        let (_, node) = state.open_node(fh)?;
        node.fileinfo.set_access_time(time);
        Ok(())
    }

    pub async fn set_modification_time(
        &self,
        fh: FileHandle,
        time: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let mut state = self.state().await;
        let (_, node) = state.open_node(fh)?;
        node.fileinfo.set_modification_time(time);
        Ok(())
    }
}
//endregion
