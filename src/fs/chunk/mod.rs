pub use list::ChunkList;
pub use store::ChunkStore;

mod list;
mod store;

/// Size of a chunk for a file of `file_size` bytes.
///
/// Aims for at most `max_chunks` chunks per file, rounded up to a multiple of `min_chunk_size`.
pub fn chunk_size(file_size: u64, min_chunk_size: u64, max_chunks: u64) -> u64 {
    let file_size = file_size.max(1);
    let min_chunk_size = min_chunk_size.max(1);
    let perfect = file_size.div_ceil(max_chunks.max(1));
    perfect.div_ceil(min_chunk_size) * min_chunk_size
}

/// Chunk aligned window covering `size` bytes starting at `offset`, as `(start, len)`.
pub fn chunk_window(offset: u64, size: u64, chunk_size: u64) -> (u64, u64) {
    let chunk_size = chunk_size.max(1);
    let start = offset / chunk_size * chunk_size;
    let len = ((offset - start) + size).div_ceil(chunk_size) * chunk_size;
    (start, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 1_048_576;

    #[test]
    fn small_files_use_the_minimum() {
        assert_eq!(MIN, chunk_size(0, MIN, 15));
        assert_eq!(MIN, chunk_size(1, MIN, 15));
        assert_eq!(MIN, chunk_size(15 * MIN, MIN, 15));
    }

    #[test]
    fn large_files_are_split_into_at_most_max_chunks() {
        let size = 100 * MIN;
        let chunk = chunk_size(size, MIN, 15);
        assert_eq!(7 * MIN, chunk);
        assert!(size.div_ceil(chunk) <= 15);
    }

    #[test]
    fn windows_are_aligned() {
        assert_eq!((0, 10), chunk_window(3, 4, 10));
        assert_eq!((10, 20), chunk_window(15, 10, 10));
        assert_eq!((20, 10), chunk_window(20, 1, 10));
        assert_eq!((0, 0), chunk_window(0, 0, 10));
    }
}
