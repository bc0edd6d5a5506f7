use crate::fs::chunk::ChunkStore;

/// Resident chunks of one file, ordered by start offset and never overlapping.
///
/// Only this type knows how chunks are laid out, callers address chunks by the index it hands
/// out and must not keep indices across insertions or removals.
#[derive(Debug, Default)]
pub struct ChunkList {
    chunks: Vec<ChunkStore>,
}

impl ChunkList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &ChunkStore> {
        self.chunks.iter()
    }
    pub fn get(&self, index: usize) -> Option<&ChunkStore> {
        self.chunks.get(index)
    }
    pub fn get_mut(&mut self, index: usize) -> Option<&mut ChunkStore> {
        self.chunks.get_mut(index)
    }

    /// Index of the chunk holding `offset`
    pub fn find(&self, offset: u64) -> Option<usize> {
        // last chunk starting at or before the offset
        let candidate = self.chunks.partition_point(|c| c.start() <= offset);
        let index = candidate.checked_sub(1)?;
        self.chunks[index].contains(offset).then_some(index)
    }

    pub fn insert(&mut self, chunk: ChunkStore) -> usize {
        let index = self.chunks.partition_point(|c| c.start() < chunk.start());
        self.chunks.insert(index, chunk);
        index
    }

    pub fn remove(&mut self, index: usize) -> Option<ChunkStore> {
        (index < self.chunks.len()).then(|| self.chunks.remove(index))
    }

    /// Drops every chunk starting after `offset`.
    pub fn delete_after(&mut self, offset: u64) {
        self.chunks.retain(|c| c.start() <= offset);
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Shrinks the window `start..start + len` so it does not overlap any resident chunk.
    ///
    /// Returns the clamped start and length, the length is 0 when nothing is free.
    pub fn free_window(&self, start: u64, len: u64) -> (u64, u64) {
        let mut start = start;
        let mut end = start.saturating_add(len);
        let next = self.chunks.partition_point(|c| c.start() <= start);
        if let Some(previous) = next.checked_sub(1).map(|i| &self.chunks[i]) {
            start = start.max(previous.end_exclusive());
        }
        if let Some(following) = self.chunks.get(next) {
            end = end.min(following.start());
        }
        (start, end.saturating_sub(start))
    }
}
