use std::fmt::{Display, Formatter};

use tokio::time::Instant;

use crate::fs::chunk::ChunkList;
use crate::fs::fileinfo::Fileinfo;
use crate::google_drive::DriveId;

/// Cached state of one remote file: its metadata, open handle counts and resident content.
#[derive(Debug)]
pub struct CacheNode {
    pub(crate) fileinfo: Fileinfo,
    /// `None` forces a refresh on the next lookup
    pub(crate) last_update: Option<Instant>,
    pub(crate) open_count: u32,
    pub(crate) open_write_count: u32,
    /// local content differs from the remote content
    pub(crate) dirty: bool,
    /// removed remotely or locally while still open, dropped on the last close
    pub(crate) deleted: bool,
    pub(crate) chunks: ChunkList,
}

impl CacheNode {
    pub fn new(fileinfo: Fileinfo, now: Instant) -> Self {
        Self {
            fileinfo,
            last_update: Some(now),
            open_count: 0,
            open_write_count: 0,
            dirty: false,
            deleted: false,
            chunks: ChunkList::new(),
        }
    }

    // region getters
    pub fn id(&self) -> &DriveId {
        &self.fileinfo.id
    }
    pub fn fileinfo(&self) -> &Fileinfo {
        &self.fileinfo
    }
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }
    pub fn open_count(&self) -> u32 {
        self.open_count
    }
    pub fn open_write_count(&self) -> u32 {
        self.open_write_count
    }
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
    pub fn chunks(&self) -> &ChunkList {
        &self.chunks
    }
    // endregion

    pub fn is_open(&self) -> bool {
        self.open_count > 0
    }

    /// Remote data may be applied without losing local changes
    pub fn accepts_remote_update(&self) -> bool {
        !self.dirty && !self.fileinfo.dirty_metadata
    }

    pub fn free_chunks(&mut self) {
        self.chunks.clear();
    }

    /// Releases the content and resets the metadata of a node leaving the cache.
    pub fn evict(&mut self) {
        self.free_chunks();
        self.fileinfo.clear();
        self.last_update = None;
    }
}

impl Display for CacheNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} open: {}/{} dirty: {} deleted: {} chunks: {}",
            self.fileinfo,
            self.open_count,
            self.open_write_count,
            self.dirty,
            self.deleted,
            self.chunks.len()
        )
    }
}
