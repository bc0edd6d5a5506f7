use bytes::Bytes;
use md5::{Digest, Md5};
use tracing::{debug, instrument, trace, warn};

use crate::config::EngineSettings;
use crate::fs::cache::CacheNode;
use crate::fs::chunk::{chunk_size, chunk_window, ChunkStore};
use crate::fs::fileinfo::{PERM_READ, PERM_WRITE};
use crate::google_drive::GoogleDrive;
use crate::prelude::*;

//region chunks
impl CacheNode {
    fn chunk_size(&self, settings: &EngineSettings) -> u64 {
        chunk_size(
            self.fileinfo.size,
            settings.min_chunk_size(),
            settings.max_chunks(),
        )
    }

    fn require(&self, settings: &EngineSettings, bits: u32) -> EngineResult<()> {
        let effective = self.fileinfo.effective_permissions(settings.access_mode());
        if effective & bits != bits {
            return Err(EngineError::PermissionDenied(self.fileinfo.id.to_string()));
        }
        Ok(())
    }

    /// Creates a chunk for the aligned window around `offset..offset + size` and downloads its
    /// content when `fill` is set. Returns the index of the new chunk.
    ///
    /// The window is shrunk to stay clear of resident chunks. A chunk whose download fails is
    /// dropped again.
    async fn create_chunk(
        &mut self,
        drive: &GoogleDrive,
        settings: &EngineSettings,
        offset: u64,
        size: u64,
        fill: bool,
    ) -> EngineResult<usize> {
        let (start, len) = chunk_window(offset, size.max(1), self.chunk_size(settings));
        let (start, len) = self.chunks.free_window(start, len);
        if len == 0 || start > offset || start + len <= offset {
            return Err(EngineError::InvalidArgument(format!(
                "no room for a chunk at {} of {}",
                offset, self.fileinfo.id
            )));
        }
        let mut chunk = ChunkStore::new(start)?;
        if fill {
            chunk.fill(drive, &self.fileinfo.id, len).await?;
        }
        trace!("new chunk {:?} for {}", chunk, self.fileinfo.id);
        Ok(self.chunks.insert(chunk))
    }

    async fn find_or_fill(
        &mut self,
        drive: &GoogleDrive,
        settings: &EngineSettings,
        offset: u64,
        size: u64,
    ) -> EngineResult<usize> {
        match self.chunks.find(offset) {
            Some(index) => Ok(index),
            None => self.create_chunk(drive, settings, offset, size, true).await,
        }
    }
}
//endregion

//region content
impl CacheNode {
    /// Reads up to `size` bytes at `offset`, never past the end of the file.
    ///
    /// Without a buffer nothing is copied, the missing chunks are still downloaded and the
    /// number of bytes that would have been read is returned.
    #[instrument(skip(self, drive, settings, buf), fields(id = %self.fileinfo.id))]
    pub async fn read(
        &mut self,
        drive: &GoogleDrive,
        settings: &EngineSettings,
        buf: Option<&mut [u8]>,
        offset: u64,
        size: u64,
    ) -> EngineResult<usize> {
        self.require(settings, PERM_READ)?;
        self.read_range(drive, settings, buf, offset, size).await
    }

    async fn read_range(
        &mut self,
        drive: &GoogleDrive,
        settings: &EngineSettings,
        mut buf: Option<&mut [u8]>,
        offset: u64,
        size: u64,
    ) -> EngineResult<usize> {
        let file_size = self.fileinfo.size;
        if offset >= file_size {
            return Ok(0);
        }
        let mut size = size.min(file_size - offset);
        if let Some(buf) = &buf {
            size = size.min(buf.len() as u64);
        }

        let mut done: u64 = 0;
        while done < size {
            let position = offset + done;
            let remaining = size - done;
            let index = self.find_or_fill(drive, settings, position, remaining).await?;
            let Some(chunk) = self.chunks.get(index) else {
                break;
            };
            let target = buf.as_deref_mut().map(|b| &mut b[done as usize..]);
            let count = chunk.read(target, position, remaining as usize)?;
            if count == 0 {
                debug!("chunk at {} ran dry at {}", chunk.start(), position);
                break;
            }
            done += count as u64;
        }
        Ok(done as usize)
    }

    /// Writes `buf` at `offset`, growing the file when the write goes past its end.
    #[instrument(skip(self, drive, settings, buf), fields(id = %self.fileinfo.id, len = buf.len()))]
    pub async fn write(
        &mut self,
        drive: &GoogleDrive,
        settings: &EngineSettings,
        buf: &[u8],
        offset: u64,
    ) -> EngineResult<usize> {
        self.require(settings, PERM_READ | PERM_WRITE)?;
        if buf.is_empty() {
            return Ok(0);
        }
        if offset.checked_add(buf.len() as u64).is_none() {
            return Err(EngineError::InvalidArgument(format!(
                "{} bytes at {} run past the largest offset",
                buf.len(),
                offset
            )));
        }
        if offset > self.fileinfo.size {
            // the gap reads as zeros
            self.truncate(drive, settings, offset).await?;
        }

        // make sure the byte before an appending write is resident, so the write extends it
        let size = self.fileinfo.size;
        let len = buf.len() as u64;
        if offset == size && size > 0 {
            self.read_range(drive, settings, None, offset - 1, len + 1)
                .await?;
        } else if offset < size {
            self.read_range(drive, settings, None, offset, len).await?;
        }

        let mut done = 0usize;
        while done < buf.len() {
            let position = offset + done as u64;
            let extend = position >= self.fileinfo.size;
            let probe = if extend && position > 0 {
                position - 1
            } else {
                position
            };
            let index = match self.chunks.find(probe) {
                Some(index) => index,
                None if self.fileinfo.size == 0 => {
                    self.create_chunk(drive, settings, 0, 1, false).await?
                }
                None => {
                    warn!("no resident chunk at {} after warming", probe);
                    return Err(EngineError::InvalidArgument(format!(
                        "offset {} of {} is not cached",
                        probe, self.fileinfo.id
                    )));
                }
            };
            let Some(chunk) = self.chunks.get_mut(index) else {
                break;
            };
            let count = chunk.write(&buf[done..], position, extend)?;
            if count == 0 {
                break;
            }
            done += count;
            self.fileinfo.size = self.fileinfo.size.max(position + count as u64);
        }
        if done > 0 {
            self.dirty = true;
        }
        Ok(done)
    }

    /// Resizes the file to `new_size`, new bytes read as zeros.
    #[instrument(skip(self, drive, settings), fields(id = %self.fileinfo.id))]
    pub async fn truncate(
        &mut self,
        drive: &GoogleDrive,
        settings: &EngineSettings,
        new_size: u64,
    ) -> EngineResult<()> {
        self.require(settings, PERM_WRITE)?;
        let size = self.fileinfo.size;
        if new_size == size {
            return Ok(());
        }

        if new_size == 0 {
            self.chunks.clear();
        } else if new_size > size {
            // grow the chunk holding the old last byte
            let anchor = size.saturating_sub(1);
            let index = match self.chunks.find(anchor) {
                Some(index) => index,
                None if size == 0 => self.create_chunk(drive, settings, 0, 1, false).await?,
                None => self.create_chunk(drive, settings, anchor, 1, true).await?,
            };
            if let Some(chunk) = self.chunks.get_mut(index) {
                chunk.truncate(new_size)?;
            }
        } else {
            let last = new_size - 1;
            self.find_or_fill(drive, settings, last, 1).await?;
            self.chunks.delete_after(last);
            if let Some(chunk) = self.chunks.find(last).and_then(|i| self.chunks.get_mut(i)) {
                chunk.truncate(new_size)?;
            }
        }

        debug!("resized from {} to {}", size, new_size);
        self.fileinfo.size = new_size;
        self.dirty = true;
        Ok(())
    }
}
//endregion

//region sync
impl CacheNode {
    /// Uploads the whole content when it changed locally.
    ///
    /// The node stays dirty unless the remote confirms the upload with a matching checksum.
    #[instrument(skip(self, drive, settings), fields(id = %self.fileinfo.id))]
    pub async fn sync(&mut self, drive: &GoogleDrive, settings: &EngineSettings) -> EngineResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.require(settings, PERM_WRITE)?;

        let size = usize::try_from(self.fileinfo.size).map_err(|_| EngineError::OutOfMemory)?;
        let mut content = Vec::new();
        content.try_reserve_exact(size)?;
        content.resize(size, 0);
        let read = self
            .read_range(drive, settings, Some(&mut content[..]), 0, size as u64)
            .await?;
        content.truncate(read);

        let checksum = format!("{:x}", Md5::digest(&content));
        let remote_checksum = drive
            .upload_content(
                &self.fileinfo.id,
                Bytes::from(content),
                self.fileinfo.mime_type.as_deref(),
            )
            .await?;
        match remote_checksum {
            Some(remote) if remote != checksum => {
                warn!("checksum mismatch: local {} remote {}", checksum, remote);
                Err(EngineError::remote(format!(
                    "checksum mismatch after upload of {}",
                    self.fileinfo.id
                )))
            }
            remote => {
                if remote.is_none() {
                    debug!("upload response carried no checksum");
                }
                self.dirty = false;
                Ok(())
            }
        }
    }

    /// Writes locally changed timestamps back.
    #[instrument(skip(self, drive), fields(id = %self.fileinfo.id))]
    pub async fn sync_metadata(&mut self, drive: &GoogleDrive) -> EngineResult<()> {
        if !self.fileinfo.dirty_metadata {
            return Ok(());
        }
        drive
            .patch_metadata(
                &self.fileinfo.id,
                &self.fileinfo.name,
                self.fileinfo.accessed,
                self.fileinfo.modified,
            )
            .await?;
        self.fileinfo.dirty_metadata = false;
        Ok(())
    }
}
//endregion
