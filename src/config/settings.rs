use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use google_drive3::api::Scope;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::prelude::*;

/// 256 KiB, the granularity the remote accepts for ranged transfers
pub const BASE_CHUNK_SIZE: u64 = 262_144;

/// How much of the drive this process may touch.
///
/// Every level implies the ones before it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// metadata only, enough for listing folders
    Meta,
    Read,
    Write,
}

impl AccessMode {
    pub fn can_read(&self) -> bool {
        *self >= AccessMode::Read
    }
    pub fn can_write(&self) -> bool {
        *self >= AccessMode::Write
    }
    /// OAuth scope that grants this level
    pub fn scope(&self) -> Scope {
        match self {
            AccessMode::Meta => Scope::MetadataReadonly,
            AccessMode::Read => Scope::Readonly,
            AccessMode::Write => Scope::Full,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// How long cached metadata and paths stay fresh before the change feed is consulted
    #[serde(with = "humantime_serde")]
    cache_ttl: Duration,
    /// Chunk sizes are always a multiple of this
    min_chunk_size: u64,
    /// Upper bound for the number of chunks a single file is split into
    max_chunks: u64,
    access_mode: AccessMode,
    /// Attempts per remote request before giving up
    max_tries: u32,
    /// First backoff delay, doubled on every retry
    #[serde(with = "humantime_serde")]
    backoff_base: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            min_chunk_size: BASE_CHUNK_SIZE * 4,
            max_chunks: 15,
            access_mode: AccessMode::Write,
            max_tries: 5,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl EngineSettings {
    pub fn new(
        cache_ttl: Duration,
        min_chunk_size: u64,
        max_chunks: u64,
        access_mode: AccessMode,
    ) -> Self {
        Self {
            cache_ttl,
            min_chunk_size: min_chunk_size.max(1),
            max_chunks: max_chunks.max(1),
            access_mode,
            ..Default::default()
        }
    }

    #[instrument]
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("could not read settings from {}", path.display()))?;
        let mut settings: EngineSettings =
            serde_json::from_str(&content).context("could not parse settings")?;
        settings.min_chunk_size = settings.min_chunk_size.max(1);
        settings.max_chunks = settings.max_chunks.max(1);
        settings.max_tries = settings.max_tries.max(1);
        debug!("loaded settings: {}", settings);
        Ok(settings)
    }

    pub fn with_retry_policy(mut self, max_tries: u32, backoff_base: Duration) -> Self {
        self.max_tries = max_tries.max(1);
        self.backoff_base = backoff_base;
        self
    }
}

// region getters
impl EngineSettings {
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }
    pub fn min_chunk_size(&self) -> u64 {
        self.min_chunk_size
    }
    pub fn max_chunks(&self) -> u64 {
        self.max_chunks
    }
    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }
    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }
}

// endregion
impl Display for EngineSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EngineSettings {{ ttl: {}s, min_chunk_size: {}, max_chunks: {}, access: {:?}, max_tries: {} }}",
            self.cache_ttl.as_secs(),
            self.min_chunk_size,
            self.max_chunks,
            self.access_mode,
            self.max_tries
        )
    }
}
