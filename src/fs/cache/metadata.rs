use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use crate::fs::cache::{CacheNode, CacheTree, NodeKey, PathCache, PathEntry, Sysinfo};
use crate::fs::fileinfo::Fileinfo;
use crate::google_drive::{ChangeKind, DriveId, FileResource, GoogleDrive};
use crate::prelude::*;

/// Metadata of every file the driver has looked at, kept fresh through the change feed.
#[derive(Debug)]
pub struct MetadataCache {
    pub(crate) tree: CacheTree,
    pub(crate) paths: PathCache,
    ttl: Duration,
    /// last successful pass over the change feed
    last_update: Instant,
    next_change_id: u64,
    sysinfo: Sysinfo,
}

impl MetadataCache {
    #[instrument(skip(drive))]
    pub async fn init(drive: &GoogleDrive, ttl: Duration) -> EngineResult<Self> {
        let about = drive.about().await?;
        let sysinfo = Sysinfo::from_about(&about);
        debug!("starting at change {} with root {}", sysinfo.next_change_id, sysinfo.root_id);
        Ok(Self {
            tree: CacheTree::new(),
            paths: PathCache::new(),
            ttl,
            last_update: Instant::now(),
            next_change_id: sysinfo.next_change_id,
            sysinfo,
        })
    }

    // region getters
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
    pub fn last_update(&self) -> Instant {
        self.last_update
    }
    pub fn next_change_id(&self) -> u64 {
        self.next_change_id
    }
    pub fn sysinfo(&self) -> &Sysinfo {
        &self.sysinfo
    }
    pub fn root_id(&self) -> &DriveId {
        &self.sysinfo.root_id
    }
    pub fn node(&self, key: NodeKey) -> Option<&CacheNode> {
        self.tree.get(key)
    }
    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut CacheNode> {
        self.tree.get_mut(key)
    }
    pub fn find(&self, id: &DriveId) -> Option<NodeKey> {
        self.tree.find(id)
    }
    // endregion

    /// Entries are fresh for the TTL after their own refresh or the last feed pass, whichever
    /// is newer.
    fn is_expired(&self, last_update: Instant, now: Instant) -> bool {
        last_update.max(self.last_update) + self.ttl < now
    }

    /// Refetches quota information once the change feed moved past it.
    pub async fn refresh_sysinfo(&mut self, drive: &GoogleDrive) -> EngineResult<&Sysinfo> {
        if self.sysinfo.next_change_id != self.next_change_id {
            let about = drive.about().await?;
            self.sysinfo = Sysinfo::from_about(&about);
        }
        Ok(&self.sysinfo)
    }

    async fn fetch_fileinfo(drive: &GoogleDrive, id: &DriveId) -> EngineResult<Fileinfo> {
        let file = drive.get_file(id).await?;
        let mut info = Fileinfo::from_resource(&file);
        if info.is_folder() {
            info.child_count = drive.list_children(id).await?.len() as u32;
        }
        Ok(info)
    }

    /// Looks up the node for `id`, fetching it when missing and `allow_create` is set.
    #[instrument(skip(self, drive))]
    pub async fn get_or_create(
        &mut self,
        drive: &GoogleDrive,
        id: &DriveId,
        allow_create: bool,
    ) -> EngineResult<Option<NodeKey>> {
        if let Some(key) = self.tree.find(id) {
            return Ok(Some(key));
        }
        if !allow_create {
            return Ok(None);
        }
        let info = Self::fetch_fileinfo(drive, id).await?;
        let key = self.tree.insert(CacheNode::new(info, Instant::now()));
        trace!("cached {} as {:?}", id, key);
        Ok(Some(key))
    }

    /// Like [`MetadataCache::get_or_create`], but consults the change feed first when the node
    /// is stale.
    #[instrument(skip(self, drive))]
    pub async fn get_item(
        &mut self,
        drive: &GoogleDrive,
        id: &DriveId,
        allow_create: bool,
    ) -> EngineResult<Option<NodeKey>> {
        let Some(key) = self.get_or_create(drive, id, allow_create).await? else {
            return Ok(None);
        };
        let now = Instant::now();
        let stale = match self.tree.get(key).and_then(|node| node.last_update) {
            None => true,
            Some(last_update) => self.is_expired(last_update, now),
        };
        if !stale {
            return Ok(Some(key));
        }

        debug!("{} is stale, checking for changes", id);
        if let Err(e) = self.update(drive).await {
            warn!("could not update from the change feed: {}", e);
        }
        // the feed may have dropped the node, folders in particular
        let Some(key) = self.get_or_create(drive, id, allow_create).await? else {
            return Ok(None);
        };
        let never_updated = self
            .tree
            .get(key)
            .map(|node| node.last_update.is_none())
            .unwrap_or(false);
        if never_updated {
            self.refresh_node(drive, key).await?;
        }
        Ok(Some(key))
    }

    /// Re-reads the metadata of a node that could not simply be dropped.
    async fn refresh_node(&mut self, drive: &GoogleDrive, key: NodeKey) -> EngineResult<()> {
        let Some(id) = self.tree.get(key).map(|node| node.id().clone()) else {
            return Ok(());
        };
        let info = Self::fetch_fileinfo(drive, &id).await?;
        if let Some(node) = self.tree.get_mut(key) {
            if node.accepts_remote_update() {
                node.fileinfo = info;
            } else {
                node.fileinfo.child_count = info.child_count;
            }
            node.last_update = Some(Instant::now());
        }
        Ok(())
    }

    /// Applies every change since the last pass.
    ///
    /// Changed files lose their cached paths, removed files are deleted from the cache and the
    /// parents of changed files are invalidated since their child counts may be off.
    #[instrument(skip(self, drive))]
    pub async fn update(&mut self, drive: &GoogleDrive) -> EngineResult<()> {
        let feed = drive.changes_since(self.next_change_id).await?;
        let now = Instant::now();
        for change in &feed.changes {
            trace!("change for {}: {:?}", change.id, change.kind);
            self.paths.remove_id(&change.id);
            match &change.kind {
                ChangeKind::Removed => self.delete_identifier(&change.id),
                ChangeKind::File(file) => {
                    let node = self
                        .tree
                        .find(&change.id)
                        .and_then(|key| self.tree.get_mut(key));
                    if let Some(node) = node {
                        if node.accepts_remote_update() {
                            node.fileinfo.apply_resource(file);
                            node.last_update = Some(now);
                        } else {
                            debug!("keeping local changes of {}", change.id);
                        }
                    }
                }
            }
            for parent in change.parents() {
                self.invalidate(&parent);
            }
        }
        match feed.largest_change_id {
            Some(largest) => self.next_change_id = largest + 1,
            None => warn!("change feed carried no change id"),
        }
        self.last_update = now;
        Ok(())
    }

    /// Forgets `id`, immediately or once its last handle closes.
    pub fn delete_identifier(&mut self, id: &DriveId) {
        self.paths.remove_id(id);
        if let Some(key) = self.tree.find(id) {
            if !self.tree.mark_deleted(key) {
                debug!("{} is still open, removing it on close", id);
            }
        }
    }

    /// Drops stale data of `id`. Open nodes stay but are refreshed on their next lookup.
    pub fn invalidate(&mut self, id: &DriveId) {
        let Some(key) = self.tree.find(id) else {
            return;
        };
        match self.tree.get_mut(key) {
            Some(node) if node.is_open() => node.last_update = None,
            Some(_) => {
                self.tree.remove(key);
            }
            None => {}
        }
    }

    /// Cached id for `path`.
    ///
    /// An expired entry triggers exactly one pass over the change feed, which drops the entry
    /// if the file changed.
    #[instrument(skip(self, drive))]
    pub async fn lookup_path(
        &mut self,
        drive: &GoogleDrive,
        path: &str,
    ) -> EngineResult<Option<DriveId>> {
        let Some(PathEntry { id, last_update }) = self.paths.get(path).cloned() else {
            return Ok(None);
        };
        if !self.is_expired(last_update, Instant::now()) {
            return Ok(Some(id));
        }
        if let Err(e) = self.update(drive).await {
            warn!("could not update from the change feed: {}", e);
        }
        Ok(self.paths.get(path).map(|entry| entry.id.clone()))
    }

    /// Caches a file whose metadata came back from a create call.
    pub fn insert_resource(&mut self, file: &FileResource) -> NodeKey {
        self.tree
            .insert(CacheNode::new(Fileinfo::from_resource(file), Instant::now()))
    }

    /// Caches a file seen in a folder listing.
    ///
    /// Folders are left out, a listing does not carry their child count. Nodes with local
    /// changes keep their metadata.
    pub fn cache_listed(&mut self, file: &FileResource) {
        let info = Fileinfo::from_resource(file);
        if info.is_folder() || info.id.as_str().is_empty() {
            return;
        }
        let now = Instant::now();
        match self.tree.find(&info.id).and_then(|key| self.tree.get_mut(key)) {
            Some(node) if node.accepts_remote_update() => {
                node.fileinfo.apply_resource(file);
                node.last_update = Some(now);
            }
            Some(_) => trace!("keeping local metadata of {}", info.id),
            None => {
                self.tree.insert(CacheNode::new(info, now));
            }
        }
    }

    pub fn add_path(&mut self, path: &str, id: DriveId) {
        self.paths.add(path, id, Instant::now());
    }

    /// Frees every node and path, used on teardown.
    pub fn clear(&mut self) {
        self.paths.clear();
        self.tree.clear();
    }
}
