use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, instrument};

use crate::config::EngineSettings;
use crate::fs::cache::{CacheNode, MetadataCache, NodeKey};
use crate::fs::handle_flags::HandleFlags;
use crate::google_drive::{DriveId, GoogleDrive};
use crate::prelude::*;

pub use handle::FileHandle;
pub use paths::FilesystemStats;

mod handle;
mod namespace;
mod paths;

/// One open file as seen by the driver.
#[derive(Debug, Clone)]
struct OpenFile {
    id: DriveId,
    flags: HandleFlags,
}

#[derive(Debug)]
struct EngineState {
    cache: MetadataCache,
    handles: HashMap<u64, OpenFile>,
    next_handle: u64,
}

impl EngineState {
    fn open_file(&self, fh: FileHandle) -> EngineResult<&OpenFile> {
        self.handles.get(&fh.0).ok_or(EngineError::BadHandle(fh.0))
    }

    /// Node behind an open handle, open nodes never leave the tree.
    fn open_node(&mut self, fh: FileHandle) -> EngineResult<(OpenFile, &mut CacheNode)> {
        let open = self.open_file(fh)?.clone();
        let node = self
            .cache
            .find(&open.id)
            .and_then(|key| self.cache.node_mut(key))
            .ok_or_else(|| EngineError::NotFound(open.id.to_string()))?;
        Ok((open, node))
    }

    fn node_mut(&mut self, key: NodeKey) -> EngineResult<&mut CacheNode> {
        self.cache
            .node_mut(key)
            .ok_or_else(|| EngineError::NotFound(format!("{:?}", key)))
    }
}

/// Caching layer between a filesystem driver and the drive.
///
/// All operations serialize on one lock that is held across remote transfers, so the counts and
/// flags of a node are never observed half updated and two callers asking for the same missing
/// node cause a single fetch.
#[derive(Debug)]
pub struct Engine {
    drive: GoogleDrive,
    settings: EngineSettings,
    state: Mutex<EngineState>,
}

impl Engine {
    #[instrument(skip(drive))]
    pub async fn new(drive: GoogleDrive, settings: EngineSettings) -> EngineResult<Self> {
        let cache = MetadataCache::init(&drive, settings.cache_ttl()).await?;
        Ok(Self {
            drive,
            settings,
            state: Mutex::new(EngineState {
                cache,
                handles: HashMap::new(),
                next_handle: 1,
            }),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().await
    }

    fn require_write_mode(&self) -> EngineResult<()> {
        if !self.settings.access_mode().can_write() {
            return Err(EngineError::PermissionDenied(format!(
                "access mode {:?} is read only",
                self.settings.access_mode()
            )));
        }
        Ok(())
    }

    /// Drops every cached node, chunk and path. Open handles become invalid.
    #[instrument(skip(self))]
    pub async fn teardown(&self) {
        let mut state = self.state().await;
        if !state.handles.is_empty() {
            debug!("dropping {} open handles", state.handles.len());
        }
        state.handles.clear();
        state.cache.clear();
    }
}

impl Display for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Engine {{ {}, {} }}", self.drive, self.settings)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::AccessMode;
    use crate::google_drive::TransferExecutor;
    use crate::testing::{FakeDrive, StaticCredentials};

    pub const TTL: Duration = Duration::from_secs(30);

    pub async fn engine_with(mode: AccessMode) -> (Arc<FakeDrive>, Engine) {
        crate::tests::init_logs();
        let fake = Arc::new(FakeDrive::new());
        let credentials = Arc::new(StaticCredentials::new(fake.valid_token()));
        // four byte chunks so short contents span several of them
        let settings = EngineSettings::new(TTL, 4, 15, mode)
            .with_retry_policy(3, Duration::from_millis(10));
        let drive = GoogleDrive::new(TransferExecutor::new(
            fake.clone(),
            credentials,
            settings.max_tries(),
            settings.backoff_base(),
        ));
        let engine = Engine::new(drive, settings).await.unwrap();
        (fake, engine)
    }

    pub async fn engine() -> (Arc<FakeDrive>, Engine) {
        engine_with(AccessMode::Write).await
    }

    impl Engine {
        pub(crate) async fn open_count(&self, id: &DriveId) -> Option<(u32, u32)> {
            let state = self.state().await;
            let key = state.cache.find(id)?;
            let node = state.cache.node(key)?;
            Some((node.open_count(), node.open_write_count()))
        }

        pub(crate) async fn is_cached(&self, id: &DriveId) -> bool {
            self.state().await.cache.find(id).is_some()
        }

        pub(crate) async fn update_now(&self) {
            let mut state = self.state().await;
            state.cache.update(&self.drive).await.unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn teardown_invalidates_handles() {
        let (fake, engine) = engine().await;
        let id = fake.add_file(&fake.root_id(), "a", b"abc");
        let fh = engine.open(&id, HandleFlags::read_only()).await.unwrap();

        engine.teardown().await;

        assert!(!engine.is_cached(&id).await);
        assert!(matches!(
            engine.close(fh).await,
            Err(EngineError::BadHandle(_))
        ));
    }
}
