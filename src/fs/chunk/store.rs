use std::fmt::{Debug, Formatter};
use std::fs::File;
use std::os::unix::fs::FileExt;

use tracing::{debug, instrument, trace};

use crate::google_drive::{DriveId, GoogleDrive};
use crate::prelude::*;

/// One contiguous byte range of a remote file, held in an anonymous temp file.
///
/// Byte `start + n` of the remote file lives at position `n` of the backing file.
pub struct ChunkStore {
    start: u64,
    len: u64,
    file: File,
}

impl ChunkStore {
    pub fn new(start: u64) -> EngineResult<Self> {
        let file = tempfile::tempfile()?;
        Ok(Self {
            start,
            len: 0,
            file,
        })
    }

    // region getters
    pub fn start(&self) -> u64 {
        self.start
    }
    pub fn len(&self) -> u64 {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    /// First offset after the chunk
    pub fn end_exclusive(&self) -> u64 {
        self.start + self.len
    }
    // endregion

    /// A zero length chunk still owns its start offset.
    pub fn contains(&self, offset: u64) -> bool {
        (self.start <= offset && offset < self.end_exclusive())
            || (offset == self.start && self.len == 0)
    }

    /// Downloads `requested_len` bytes starting at the chunk start.
    ///
    /// Afterwards the chunk covers exactly the bytes received, which is less than requested at
    /// the end of the file.
    #[instrument(skip(self, drive), fields(start = self.start))]
    pub async fn fill(
        &mut self,
        drive: &GoogleDrive,
        id: &DriveId,
        requested_len: u64,
    ) -> EngineResult<()> {
        if requested_len == 0 {
            return Ok(());
        }
        let end = self.start + requested_len - 1;
        let target = self.file.try_clone()?;
        let received = drive.download_range(id, self.start, end, target).await?;
        debug!("filled chunk at {} with {} bytes", self.start, received);
        self.len = received;
        Ok(())
    }

    /// Copies up to `size` bytes at `offset` into `buf`.
    ///
    /// Without a buffer nothing is copied and the number of bytes that would have been read is
    /// returned.
    pub fn read(&self, buf: Option<&mut [u8]>, offset: u64, size: usize) -> EngineResult<usize> {
        if !self.contains(offset) {
            return Ok(0);
        }
        let position = offset - self.start;
        let available = self.len - position;
        let count = (size as u64).min(available) as usize;
        if let Some(buf) = buf {
            let count = count.min(buf.len());
            self.file.read_exact_at(&mut buf[..count], position)?;
            trace!("read {} bytes at {}", count, offset);
            return Ok(count);
        }
        Ok(count)
    }

    /// Writes `buf` at `offset`.
    ///
    /// Unless `extend` is set the write stops at the end of the chunk. The chunk grows when the
    /// write goes past its current end.
    pub fn write(&mut self, buf: &[u8], offset: u64, extend: bool) -> EngineResult<usize> {
        if offset < self.start || (!extend && !self.contains(offset)) {
            return Ok(0);
        }
        let position = offset - self.start;
        let count = if extend {
            buf.len()
        } else {
            (buf.len() as u64).min(self.len - position) as usize
        };
        self.file.write_all_at(&buf[..count], position)?;
        self.len = self.len.max(position + count as u64);
        trace!("wrote {} bytes at {}", count, offset);
        Ok(count)
    }

    /// Resizes the chunk so that it ends right before `new_size`.
    pub fn truncate(&mut self, new_size: u64) -> EngineResult<()> {
        let len = new_size.saturating_sub(self.start);
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }
}

impl Debug for ChunkStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChunkStore {{ start: {}, len: {} }}", self.start, self.len)
    }
}
