use std::collections::BTreeMap;

use tokio::time::Instant;
use tracing::trace;

use crate::google_drive::DriveId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub id: DriveId,
    pub last_update: Instant,
}

/// Absolute path to remote id, each entry with its own timestamp.
#[derive(Debug, Default)]
pub struct PathCache {
    entries: BTreeMap<String, PathEntry>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&PathEntry> {
        self.entries.get(path)
    }

    /// Adds or refreshes the entry for `path`.
    pub fn add(&mut self, path: &str, id: DriveId, now: Instant) {
        trace!("caching path {} -> {}", path, id);
        self.entries.insert(
            path.to_string(),
            PathEntry {
                id,
                last_update: now,
            },
        );
    }

    /// Every cached path that resolves to `id`.
    pub fn paths_of(&self, id: &DriveId) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| &entry.id == id)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Drops every path that resolves to `id`, a file with several parents has several paths.
    pub fn remove_id(&mut self, id: &DriveId) {
        self.entries.retain(|_, entry| &entry.id != id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_by_id_drops_every_alias() {
        let now = Instant::now();
        let mut cache = PathCache::new();
        let id = DriveId::from("a");
        cache.add("/one/a", id.clone(), now);
        cache.add("/two/a", id.clone(), now);
        cache.add("/b", DriveId::from("b"), now);

        let mut aliases = cache.paths_of(&id);
        aliases.sort();
        assert_eq!(vec!["/one/a".to_string(), "/two/a".to_string()], aliases);

        cache.remove_id(&id);

        assert_eq!(1, cache.len());
        assert!(cache.get("/one/a").is_none());
        assert_eq!(DriveId::from("b"), cache.get("/b").unwrap().id);
    }

    #[test]
    fn adding_again_refreshes_the_timestamp() {
        let first = Instant::now();
        let mut cache = PathCache::new();
        cache.add("/a", DriveId::from("a"), first);
        let later = first + std::time::Duration::from_secs(5);
        cache.add("/a", DriveId::from("a"), later);
        assert_eq!(later, cache.get("/a").unwrap().last_update);
        assert_eq!(1, cache.len());
    }
}
