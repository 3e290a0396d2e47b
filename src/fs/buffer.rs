//! The per-inode write-back block cache. Writes land in an in-memory
//! sparse buffer and reach the `extents` table in batched, single-
//! transaction flushes; reads flush first so every reader observes prior
//! writes on the same instance.

use crate::db::DbHandle;
use crate::fs::errors::FsResult;
use crate::fs::inode::InodeId;
use crate::fs::store::{ExtentStore, MetadataStore};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Sparse mapping from block index to its (possibly short) byte string.
/// A short entry's missing tail is a hole.
#[derive(Debug, Default)]
pub struct BlockBuffer {
    blocks: BTreeMap<i64, Vec<u8>>,
}

impl BlockBuffer {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Process-wide inode → buffer map. Each buffer has its own mutex held for
/// the duration of one write, flush or truncate; the map itself is only
/// touched to fetch the `Arc`.
pub struct BlockCache {
    db: DbHandle,
    metadata: MetadataStore,
    extents: ExtentStore,
    buffers: DashMap<InodeId, Arc<Mutex<BlockBuffer>>>,
    block_size: usize,
    flush_threshold: usize,
}

impl BlockCache {
    pub fn new(db: DbHandle, metadata: MetadataStore, extents: ExtentStore) -> Self {
        let block_size = db.dialect().block_size();
        let flush_threshold = db.dialect().flush_threshold();
        Self {
            db,
            metadata,
            extents,
            buffers: DashMap::new(),
            block_size,
            flush_threshold,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn buffer(&self, ino: InodeId) -> Arc<Mutex<BlockBuffer>> {
        Arc::clone(
            self.buffers
                .entry(ino)
                .or_insert_with(|| Arc::new(Mutex::new(BlockBuffer::default())))
                .value(),
        )
    }

    /// Splice `data` into the buffer at `offset`, block by block. Sub-block
    /// writes read the existing extent first so surrounding bytes survive;
    /// intra-block holes appear as zero padding. Crossing the flush
    /// threshold forces a write-back before returning.
    pub async fn write(&self, ino: InodeId, data: &[u8], offset: u64) -> FsResult<u32> {
        if data.is_empty() {
            return Ok(0);
        }

        let bs = self.block_size as u64;
        let handle = self.buffer(ino);
        let mut buf = handle.lock().await;

        let mut block = (offset / bs) as i64;
        let mut in_block = (offset % bs) as usize;
        let mut written = 0usize;

        while written < data.len() {
            let count = (data.len() - written).min(self.block_size - in_block);
            let sub_block = in_block > 0 || count < self.block_size;

            if !buf.blocks.contains_key(&block) {
                let existing = if sub_block {
                    self.extents
                        .get(self.db.pool(), ino, block)
                        .await?
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                buf.blocks.insert(block, existing);
            }
            let entry = buf.blocks.get_mut(&block).expect("entry just inserted");

            if entry.len() < in_block + count {
                entry.resize(in_block + count, 0);
            }
            entry[in_block..in_block + count].copy_from_slice(&data[written..written + count]);

            written += count;
            block += 1;
            in_block = 0;
        }

        if buf.len() > self.flush_threshold {
            debug!(ino, buffered = buf.len(), "flush threshold crossed");
            self.flush_locked(ino, &mut buf).await?;
        }

        Ok(data.len() as u32)
    }

    /// Write back one inode's buffered blocks. Inodes that never wrote
    /// have no buffer and nothing to do.
    pub async fn flush(&self, ino: InodeId) -> FsResult<()> {
        let handle = self.buffers.get(&ino).map(|entry| Arc::clone(entry.value()));
        match handle {
            Some(handle) => {
                let mut buf = handle.lock().await;
                self.flush_locked(ino, &mut buf).await
            }
            None => Ok(()),
        }
    }

    /// Write back every inode that currently has buffered blocks.
    pub async fn flush_all(&self) -> FsResult<()> {
        let inodes: Vec<InodeId> = self.buffers.iter().map(|entry| *entry.key()).collect();
        for ino in inodes {
            self.flush(ino).await?;
        }
        Ok(())
    }

    /// One transaction: upsert every buffered block, then raise the file
    /// length to the high-water mark and stamp mtime. The buffer is only
    /// cleared after commit, so a failed flush can be retried.
    async fn flush_locked(&self, ino: InodeId, buf: &mut BlockBuffer) -> FsResult<()> {
        if buf.is_empty() {
            return Ok(());
        }

        let bs = self.block_size as i64;
        let mut tx = self.db.begin().await?;
        let mut hwm = 0i64;

        for (&block, contents) in &buf.blocks {
            self.extents
                .write_block(&mut *tx, ino, block, contents)
                .await?;
            hwm = hwm.max(block * bs + contents.len() as i64);
        }
        self.metadata.raise_length(&mut *tx, ino, hwm).await?;
        tx.commit().await.map_err(crate::fs::errors::FsError::from)?;

        debug!(ino, blocks = buf.len(), hwm, "flushed block buffer");
        buf.blocks.clear();
        Ok(())
    }

    /// Read `count` bytes at `offset`, reconstructing holes as zeros. The
    /// inode's buffer is flushed first; the request is clamped to the
    /// file's length.
    pub async fn read(&self, ino: InodeId, offset: u64, count: u32) -> FsResult<Bytes> {
        self.flush(ino).await?;

        let row = self.metadata.get(self.db.pool(), ino).await?;
        let length = row.length as u64;
        if offset >= length || count == 0 {
            return Ok(Bytes::new());
        }
        let end = length.min(offset + count as u64);

        let bs = self.block_size as u64;
        let first = (offset / bs) as i64;
        let last = ((end - 1) / bs) as i64;

        let rows = self.extents.range(self.db.pool(), ino, first, last).await?;
        let row_count = rows.len();

        let mut stream: Vec<u8> = Vec::with_capacity((end - offset) as usize + self.block_size);
        let mut next_block = first;
        for (idx, (block, mut contents)) in rows.into_iter().enumerate() {
            let gap = (block - next_block) as usize;
            if gap > 0 {
                stream.resize(stream.len() + gap * self.block_size, 0);
            }
            // A short blob that is not the last selected block is a
            // hole-tail; pad it back out to a full block.
            if contents.len() < self.block_size && idx != row_count - 1 {
                contents.resize(self.block_size, 0);
            }
            stream.extend_from_slice(&contents);
            next_block = block + 1;
        }

        let want = (end - first as u64 * bs) as usize;
        if stream.len() < want {
            stream.resize(want, 0);
        }
        let skip = (offset - first as u64 * bs) as usize;
        let data = Bytes::copy_from_slice(&stream[skip..want]);

        // POSIX approximation: record one access per modification instead
        // of one write per read on hot files.
        if !data.is_empty() && row.atime < row.mtime {
            self.metadata.set_atime_now(self.db.pool(), ino).await?;
        }

        Ok(data)
    }

    /// Set the file's length. Shrinking deletes extents past the end and
    /// trims the tail block inside one transaction; growing only raises
    /// `length` and the new tail reads as a hole.
    pub async fn truncate(&self, ino: InodeId, new_len: u64) -> FsResult<()> {
        let handle = self.buffer(ino);
        let mut buf = handle.lock().await;
        self.flush_locked(ino, &mut buf).await?;

        let row = self.metadata.get(self.db.pool(), ino).await?;
        let new_len = new_len as i64;
        if new_len >= row.length {
            if new_len != row.length {
                self.metadata.set_length(self.db.pool(), ino, new_len).await?;
            }
            return Ok(());
        }

        let bs = self.block_size as i64;
        let mut tx = self.db.begin().await?;
        if new_len == 0 {
            self.extents.delete_all(&mut *tx, ino).await?;
        } else {
            let keep = (new_len % bs) as usize;
            if keep == 0 {
                self.extents.delete_after(&mut *tx, ino, new_len / bs - 1).await?;
            } else {
                let tail = new_len / bs;
                self.extents.delete_after(&mut *tx, ino, tail).await?;
                self.extents.trim_block(&mut *tx, ino, tail, keep).await?;
            }
        }
        self.metadata.set_length(&mut *tx, ino, new_len).await?;
        tx.commit().await.map_err(crate::fs::errors::FsError::from)?;

        debug!(ino, new_len, "truncated");
        Ok(())
    }

    /// Drop any buffered blocks without writing them back; used when the
    /// inode itself is being destroyed.
    pub async fn discard(&self, ino: InodeId) {
        if let Some((_, handle)) = self.buffers.remove(&ino) {
            let mut buf = handle.lock().await;
            buf.blocks.clear();
        }
    }

    /// Number of buffered blocks for an inode, for tests and diagnostics.
    pub async fn buffered_blocks(&self, ino: InodeId) -> usize {
        let handle = self.buffers.get(&ino).map(|entry| Arc::clone(entry.value()));
        match handle {
            Some(handle) => handle.lock().await.len(),
            None => 0,
        }
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("block_size", &self.block_size)
            .field("flush_threshold", &self.flush_threshold)
            .field("buffered_inodes", &self.buffers.len())
            .finish()
    }
}
