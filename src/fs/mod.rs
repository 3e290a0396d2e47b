pub mod buffer;
pub mod errors;
pub mod inode;
pub mod permissions;
pub mod resolver;
pub mod store;
pub mod types;

use crate::db::{Database, DbHandle};
use crate::fs::buffer::BlockCache;
use crate::fs::errors::{FsError, FsResult};
use crate::fs::inode::{
    validate_name, FileKind, InodeId, InodeRow, ROOT_INODE, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG,
};
use crate::fs::permissions::{
    check_access, check_chown, check_ownership, check_set_times, open_access_mask, Credentials,
    GroupCache, ACCESS_EXECUTE, ACCESS_READ, ACCESS_WRITE,
};
use crate::fs::resolver::{ResolvedPath, Resolver};
use crate::fs::store::{ExtentStore, MetadataStore, PathStore};
use crate::fs::types::{unix_now, DirEntry, RequestContext, ID_UNCHANGED, MAX_PATH_LEN};
use bytes::Bytes;
use sqlx::{Any, Transaction};
use std::sync::Arc;
use tracing::{debug, warn};

/// Options fixed at mount time.
#[derive(Debug, Clone, Default)]
pub struct SqlFsOptions {
    /// Skip every permission check (single-user convenience mounts).
    pub ignore_permissions: bool,
}

/// The operation surface: roughly the two dozen entry points the FUSE
/// dispatcher invokes, each taking an absolute path (or an open handle)
/// plus request-specific arguments.
pub struct SqlFs {
    db: DbHandle,
    metadata: MetadataStore,
    paths: PathStore,
    extents: ExtentStore,
    cache: BlockCache,
    resolver: Resolver,
    groups: GroupCache,
    options: SqlFsOptions,
}

impl SqlFs {
    pub fn new(db: Database, options: SqlFsOptions) -> Self {
        let db: DbHandle = Arc::new(db);
        let metadata = MetadataStore::new(db.clone());
        let paths = PathStore::new(db.clone());
        let extents = ExtentStore::new(db.clone());
        let cache = BlockCache::new(db.clone(), metadata.clone(), extents.clone());
        let resolver = Resolver::new(db.clone(), options.ignore_permissions);
        Self {
            db,
            metadata,
            paths,
            extents,
            cache,
            resolver,
            groups: GroupCache::new(),
            options,
        }
    }

    pub fn block_size(&self) -> usize {
        self.cache.block_size()
    }

    #[cfg(test)]
    pub async fn new_in_memory() -> anyhow::Result<Self> {
        use crate::db::DataSource;
        let source = DataSource::in_memory();
        let db = Database::connect(&source).await?;
        // umask 0 so the root directory is world-writable for test users.
        store::schema::initialize(&db, &RequestContext::new(0, 0, 0)).await?;
        Ok(Self::new(db, SqlFsOptions::default()))
    }

    #[cfg(test)]
    pub fn pool(&self) -> &sqlx::AnyPool {
        self.db.pool()
    }

    fn credentials(&self, ctx: &RequestContext) -> Credentials {
        self.groups.credentials(ctx)
    }

    fn enforcing(&self) -> bool {
        !self.options.ignore_permissions
    }

    fn check(&self, row: &InodeRow, creds: &Credentials, mask: u32) -> FsResult<()> {
        if self.enforcing() {
            check_access(row, creds, mask)?;
        }
        Ok(())
    }

    async fn resolve(&self, path: &str, creds: &Credentials) -> FsResult<ResolvedPath> {
        self.resolver.resolve(path, creds).await
    }

    async fn resolve_row(
        &self,
        path: &str,
        creds: &Credentials,
    ) -> FsResult<(ResolvedPath, InodeRow)> {
        let resolved = self.resolve(path, creds).await?;
        let row = self.metadata.get(self.db.pool(), resolved.inode).await?;
        Ok((resolved, row))
    }

    /// Resolve the directory that will hold a new entry, verify it is a
    /// writable directory for this caller, and validate the name.
    async fn resolve_parent_for_entry<'p>(
        &self,
        path: &'p str,
        creds: &Credentials,
    ) -> FsResult<(InodeId, InodeRow, &'p str)> {
        let (parent_path, name) = Resolver::split_parent(path)?;
        validate_name(name)?;
        let parent = self.resolve(&parent_path, creds).await?;
        let parent_row = self.metadata.get(self.db.pool(), parent.inode).await?;
        if !parent_row.is_directory() {
            return Err(FsError::NotDirectory);
        }
        self.check(&parent_row, creds, ACCESS_WRITE | ACCESS_EXECUTE)?;
        Ok((parent.inode, parent_row, name))
    }

    /// Create an inode together with its first path entry, atomically.
    /// Returns the new inode number.
    async fn create_inode(
        &self,
        parent: InodeId,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        rdev: u32,
    ) -> FsResult<InodeId> {
        let is_dir = mode & S_IFMT == S_IFDIR;
        let links = if is_dir { 2 } else { 1 };

        if self.paths.exists(self.db.pool(), parent, name).await? {
            return Err(FsError::Exists);
        }

        let mut tx = self.db.begin().await?;
        let ino = self
            .metadata
            .insert(&mut *tx, mode, uid, gid, rdev, links, 0)
            .await?;
        self.paths.insert(&mut *tx, Some(parent), name, ino).await?;
        if is_dir {
            self.metadata.adjust_links(&mut *tx, parent, 1).await?;
        }
        self.metadata.touch(&mut *tx, parent).await?;
        tx.commit().await.map_err(FsError::from)?;

        debug!(ino, parent, name, mode, "created inode");
        Ok(ino)
    }

    /// Delete the metadata row and extents of an inode nothing references
    /// any longer. Runs inside the caller's transaction so the I3
    /// invariant holds at every commit boundary.
    async fn collect_if_orphan(
        &self,
        tx: &mut Transaction<'static, Any>,
        ino: InodeId,
    ) -> FsResult<bool> {
        let row = self.metadata.get(&mut **tx, ino).await?;
        if row.links + row.inuse > 0 {
            return Ok(false);
        }
        self.extents.delete_all(tx, ino).await?;
        self.metadata.delete(tx, ino).await?;
        debug!(ino, "collected orphan inode");
        Ok(true)
    }

    // ── Metadata operations ─────────────────────────────────────────────

    pub async fn getattr(&self, ctx: &RequestContext, path: &str) -> FsResult<InodeRow> {
        let creds = self.credentials(ctx);
        let resolved = self.resolve(path, &creds).await?;
        self.cache.flush(resolved.inode).await?;
        self.metadata.get(self.db.pool(), resolved.inode).await
    }

    /// getattr by open handle; skips path resolution entirely.
    pub async fn fgetattr(&self, handle: u64) -> FsResult<InodeRow> {
        let ino = handle as InodeId;
        self.cache.flush(ino).await?;
        self.metadata.get(self.db.pool(), ino).await
    }

    pub async fn access(&self, ctx: &RequestContext, path: &str, mask: u32) -> FsResult<()> {
        let creds = self.credentials(ctx);
        let (_, row) = self.resolve_row(path, &creds).await?;
        self.check(&row, &creds, mask & 7)
    }

    pub async fn chmod(&self, ctx: &RequestContext, path: &str, mode: u32) -> FsResult<()> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        if self.enforcing() {
            check_ownership(&row, &creds)?;
        }
        let new_mode = (row.mode & S_IFMT) | (mode & 0o7777);
        self.metadata
            .set_mode(self.db.pool(), resolved.inode, new_mode)
            .await
    }

    /// uid/gid of [`ID_UNCHANGED`] leave the respective field alone.
    pub async fn chown(
        &self,
        ctx: &RequestContext,
        path: &str,
        uid: u32,
        gid: u32,
    ) -> FsResult<()> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        if self.enforcing() {
            check_chown(&creds, uid, gid)?;
        }
        let new_uid = if uid == ID_UNCHANGED { row.uid } else { uid };
        let new_gid = if gid == ID_UNCHANGED { row.gid } else { gid };
        self.metadata
            .set_owner(self.db.pool(), resolved.inode, new_uid, new_gid)
            .await
    }

    /// `None` means "now" for either timestamp.
    pub async fn utime(
        &self,
        ctx: &RequestContext,
        path: &str,
        atime: Option<i64>,
        mtime: Option<i64>,
    ) -> FsResult<()> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        let setting_to_now = atime.is_none() && mtime.is_none();
        if self.enforcing() {
            check_set_times(&row, &creds, setting_to_now)?;
        }
        let now = unix_now();
        self.metadata
            .set_times(
                self.db.pool(),
                resolved.inode,
                atime.unwrap_or(now),
                mtime.unwrap_or(now),
            )
            .await
    }

    // ── Directory operations ────────────────────────────────────────────

    pub async fn mkdir(&self, ctx: &RequestContext, path: &str, mode: u32) -> FsResult<InodeId> {
        let creds = self.credentials(ctx);
        let (parent, _, name) = self.resolve_parent_for_entry(path, &creds).await?;
        let final_mode = S_IFDIR | (mode & 0o7777 & !ctx.umask);
        self.create_inode(parent, name, final_mode, ctx.uid, ctx.gid, 0)
            .await
    }

    pub async fn mknod(
        &self,
        ctx: &RequestContext,
        path: &str,
        mode: u32,
        rdev: u32,
    ) -> FsResult<InodeId> {
        let creds = self.credentials(ctx);
        let (parent, _, name) = self.resolve_parent_for_entry(path, &creds).await?;
        let file_type = if mode & S_IFMT == 0 { S_IFREG } else { mode & S_IFMT };
        if file_type == S_IFDIR {
            return Err(FsError::InvalidArgument);
        }
        let final_mode = file_type | (mode & 0o7777 & !ctx.umask);
        self.create_inode(parent, name, final_mode, ctx.uid, ctx.gid, rdev)
            .await
    }

    /// Always yields `.` and `..` followed by the child names.
    pub async fn getdir(&self, ctx: &RequestContext, path: &str) -> FsResult<Vec<DirEntry>> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        if !row.is_directory() {
            return Err(FsError::NotDirectory);
        }
        self.check(&row, &creds, ACCESS_READ)?;

        let children = self.paths.children(self.db.pool(), resolved.inode).await?;
        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(DirEntry {
            inode: resolved.inode,
            name: ".".to_string(),
        });
        entries.push(DirEntry {
            inode: resolved.parent.unwrap_or(ROOT_INODE),
            name: "..".to_string(),
        });
        for child in children {
            entries.push(DirEntry {
                inode: child.inode,
                name: child.name,
            });
        }
        Ok(entries)
    }

    /// Like getdir but joined with each child's mode, which is what a
    /// readdir that must report entry types wants.
    pub async fn getdir_plus(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> FsResult<Vec<(InodeId, String, FileKind)>> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        if !row.is_directory() {
            return Err(FsError::NotDirectory);
        }
        self.check(&row, &creds, ACCESS_READ)?;

        let children = self.paths.children(self.db.pool(), resolved.inode).await?;
        Ok(children
            .into_iter()
            .map(|c| (c.inode, c.name, FileKind::from_mode(c.mode)))
            .collect())
    }

    pub async fn rmdir(&self, ctx: &RequestContext, path: &str) -> FsResult<()> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        if !row.is_directory() {
            return Err(FsError::NotDirectory);
        }
        if resolved.inode == ROOT_INODE {
            return Err(FsError::InvalidArgument);
        }
        let parent = resolved.parent.ok_or(FsError::InvalidArgument)?;
        let parent_row = self.metadata.get(self.db.pool(), parent).await?;
        self.check(&parent_row, &creds, ACCESS_WRITE | ACCESS_EXECUTE)?;

        let mut tx = self.db.begin().await?;
        if self.paths.count_children(&mut *tx, resolved.inode).await? > 0 {
            return Err(FsError::NotEmpty);
        }
        self.paths.remove(&mut *tx, parent, &resolved.name).await?;
        // Both conceptual references ("." and the parent entry) go away.
        self.metadata.adjust_links(&mut *tx, resolved.inode, -2).await?;
        self.metadata.adjust_links(&mut *tx, parent, -1).await?;
        self.metadata.touch(&mut *tx, parent).await?;
        self.collect_if_orphan(&mut tx, resolved.inode).await?;
        tx.commit().await.map_err(FsError::from)?;
        Ok(())
    }

    // ── Entry lifecycle ─────────────────────────────────────────────────

    pub async fn unlink(&self, ctx: &RequestContext, path: &str) -> FsResult<()> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        if row.is_directory() {
            return Err(FsError::IsDirectory);
        }
        let parent = resolved.parent.ok_or(FsError::InvalidArgument)?;
        let parent_row = self.metadata.get(self.db.pool(), parent).await?;
        self.check(&parent_row, &creds, ACCESS_WRITE | ACCESS_EXECUTE)?;

        let mut tx = self.db.begin().await?;
        self.paths.remove(&mut *tx, parent, &resolved.name).await?;
        self.metadata.adjust_links(&mut *tx, resolved.inode, -1).await?;
        self.metadata.touch(&mut *tx, parent).await?;
        let collected = self.collect_if_orphan(&mut tx, resolved.inode).await?;
        tx.commit().await.map_err(FsError::from)?;

        if collected {
            self.cache.discard(resolved.inode).await;
        }
        Ok(())
    }

    /// Insert a second directory entry for an existing inode.
    pub async fn link(&self, ctx: &RequestContext, oldpath: &str, newpath: &str) -> FsResult<()> {
        let creds = self.credentials(ctx);
        let (old, old_row) = self.resolve_row(oldpath, &creds).await?;
        if old_row.is_directory() {
            return Err(FsError::IsDirectory);
        }
        let (parent, _, name) = self.resolve_parent_for_entry(newpath, &creds).await?;
        if self.paths.exists(self.db.pool(), parent, name).await? {
            return Err(FsError::Exists);
        }

        let mut tx = self.db.begin().await?;
        self.paths.insert(&mut *tx, Some(parent), name, old.inode).await?;
        self.metadata.adjust_links(&mut *tx, old.inode, 1).await?;
        self.metadata.touch(&mut *tx, parent).await?;
        tx.commit().await.map_err(FsError::from)?;
        Ok(())
    }

    /// Hard-link construction: the new entry is inserted before the old
    /// one is removed, inside one transaction, so the inode is never
    /// unreferenced. An existing destination is replaced.
    pub async fn rename(&self, ctx: &RequestContext, oldpath: &str, newpath: &str) -> FsResult<()> {
        let creds = self.credentials(ctx);
        let (old, old_row) = self.resolve_row(oldpath, &creds).await?;
        if old.inode == ROOT_INODE {
            return Err(FsError::InvalidArgument);
        }
        let old_parent = old.parent.ok_or(FsError::InvalidArgument)?;
        let old_parent_row = self.metadata.get(self.db.pool(), old_parent).await?;
        self.check(&old_parent_row, &creds, ACCESS_WRITE | ACCESS_EXECUTE)?;

        let (new_parent, _, new_name) = self.resolve_parent_for_entry(newpath, &creds).await?;

        // A directory cannot move into its own subtree.
        if old_row.is_directory() && self.is_ancestor(old.inode, new_parent).await? {
            return Err(FsError::InvalidArgument);
        }

        let mut tx = self.db.begin().await?;

        match self.paths.lookup(&mut *tx, new_parent, new_name).await {
            Ok(existing) if existing == old.inode => {
                return Ok(());
            }
            Ok(existing) => {
                let existing_row = self.metadata.get(&mut *tx, existing).await?;
                if existing_row.is_directory() {
                    if !old_row.is_directory() {
                        return Err(FsError::IsDirectory);
                    }
                    if self.paths.count_children(&mut *tx, existing).await? > 0 {
                        return Err(FsError::NotEmpty);
                    }
                    self.paths.remove(&mut *tx, new_parent, new_name).await?;
                    self.metadata.adjust_links(&mut *tx, existing, -2).await?;
                    self.metadata.adjust_links(&mut *tx, new_parent, -1).await?;
                } else {
                    self.paths.remove(&mut *tx, new_parent, new_name).await?;
                    self.metadata.adjust_links(&mut *tx, existing, -1).await?;
                }
                self.collect_if_orphan(&mut tx, existing).await?;
            }
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }

        self.paths
            .insert(&mut *tx, Some(new_parent), new_name, old.inode)
            .await?;
        self.paths.remove(&mut *tx, old_parent, &old.name).await?;
        if old_row.is_directory() && old_parent != new_parent {
            self.metadata.adjust_links(&mut *tx, old_parent, -1).await?;
            self.metadata.adjust_links(&mut *tx, new_parent, 1).await?;
        }
        self.metadata.touch(&mut *tx, old_parent).await?;
        if old_parent != new_parent {
            self.metadata.touch(&mut *tx, new_parent).await?;
        }
        tx.commit().await.map_err(FsError::from)?;
        Ok(())
    }

    async fn is_ancestor(&self, ancestor: InodeId, mut current: InodeId) -> FsResult<bool> {
        loop {
            if current == ancestor {
                return Ok(true);
            }
            if current == ROOT_INODE {
                return Ok(false);
            }
            let entries = self.paths.entries_for(self.db.pool(), current).await?;
            match entries.first().and_then(|(parent, _)| *parent) {
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
    }

    // ── Symlinks ────────────────────────────────────────────────────────

    /// Symlink contents ride the ordinary write path; the target-path byte
    /// length becomes the inode's length.
    pub async fn symlink(
        &self,
        ctx: &RequestContext,
        target: &str,
        linkpath: &str,
    ) -> FsResult<InodeId> {
        let creds = self.credentials(ctx);
        if target.len() > MAX_PATH_LEN {
            return Err(FsError::NameTooLong);
        }
        let (parent, _, name) = self.resolve_parent_for_entry(linkpath, &creds).await?;
        let ino = self
            .create_inode(parent, name, S_IFLNK | 0o777, ctx.uid, ctx.gid, 0)
            .await?;
        self.cache.write(ino, target.as_bytes(), 0).await?;
        self.cache.flush(ino).await?;
        Ok(ino)
    }

    pub async fn readlink(&self, ctx: &RequestContext, path: &str) -> FsResult<Bytes> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        if !row.is_symlink() {
            return Err(FsError::InvalidArgument);
        }
        self.cache
            .read(resolved.inode, 0, MAX_PATH_LEN as u32)
            .await
    }

    // ── File lifecycle and I/O ──────────────────────────────────────────

    /// Permission-check, bump `inuse`, hand back the inode as the opaque
    /// handle. The handle stays valid after the last path entry goes away.
    pub async fn open(&self, ctx: &RequestContext, path: &str, flags: i32) -> FsResult<u64> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        let mask = open_access_mask(flags);
        if row.is_directory() && mask & ACCESS_WRITE != 0 {
            return Err(FsError::IsDirectory);
        }
        self.check(&row, &creds, mask)?;

        self.metadata
            .adjust_inuse(self.db.pool(), resolved.inode, 1)
            .await?;

        if flags & libc::O_TRUNC != 0 && mask & ACCESS_WRITE != 0 {
            self.cache.truncate(resolved.inode, 0).await?;
        }

        debug!(ino = resolved.inode, flags, "opened");
        Ok(resolved.inode as u64)
    }

    /// mknod-then-open as one operation; fails if the entry exists.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        path: &str,
        mode: u32,
        _flags: i32,
    ) -> FsResult<u64> {
        let ino = self.mknod(ctx, path, mode & !S_IFMT, 0).await?;
        self.metadata.adjust_inuse(self.db.pool(), ino, 1).await?;
        Ok(ino as u64)
    }

    /// Flush the handle's buffer, drop the `inuse` reference, and destroy
    /// the inode if nothing references it anymore.
    pub async fn release(&self, handle: u64) -> FsResult<()> {
        let ino = handle as InodeId;
        self.cache.flush(ino).await?;

        let mut tx = self.db.begin().await?;
        let row = self.metadata.get(&mut *tx, ino).await?;
        if row.inuse <= 0 {
            return Err(FsError::InvalidArgument);
        }
        self.metadata.adjust_inuse(&mut *tx, ino, -1).await?;
        let collected = match self.collect_if_orphan(&mut tx, ino).await {
            Ok(collected) => collected,
            Err(e) => {
                warn!(ino, error = %e, "orphan collection failed on release");
                false
            }
        };
        tx.commit().await.map_err(FsError::from)?;

        if collected {
            self.cache.discard(ino).await;
        }
        Ok(())
    }

    pub async fn flush_handle(&self, handle: u64) -> FsResult<()> {
        self.cache.flush(handle as InodeId).await
    }

    /// Write back every buffered inode.
    pub async fn flush_all(&self) -> FsResult<()> {
        self.cache.flush_all().await
    }

    pub async fn read(
        &self,
        ctx: &RequestContext,
        path: &str,
        count: u32,
        offset: u64,
    ) -> FsResult<Bytes> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        if row.is_directory() {
            return Err(FsError::IsDirectory);
        }
        self.check(&row, &creds, ACCESS_READ)?;
        self.cache.read(resolved.inode, offset, count).await
    }

    /// Read by open handle; access was checked at `open`.
    pub async fn read_handle(&self, handle: u64, count: u32, offset: u64) -> FsResult<Bytes> {
        self.cache.read(handle as InodeId, offset, count).await
    }

    pub async fn write(
        &self,
        ctx: &RequestContext,
        path: &str,
        data: &[u8],
        offset: u64,
    ) -> FsResult<u32> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        if row.is_directory() {
            return Err(FsError::IsDirectory);
        }
        self.check(&row, &creds, ACCESS_WRITE)?;
        self.cache.write(resolved.inode, data, offset).await
    }

    /// Write by open handle; stays valid after unlink.
    pub async fn write_handle(&self, handle: u64, data: &[u8], offset: u64) -> FsResult<u32> {
        self.cache.write(handle as InodeId, data, offset).await
    }

    pub async fn truncate(&self, ctx: &RequestContext, path: &str, length: u64) -> FsResult<()> {
        let creds = self.credentials(ctx);
        let (resolved, row) = self.resolve_row(path, &creds).await?;
        if row.is_directory() {
            return Err(FsError::IsDirectory);
        }
        self.check(&row, &creds, ACCESS_WRITE)?;
        self.cache.truncate(resolved.inode, length).await
    }

    pub async fn truncate_handle(&self, handle: u64, length: u64) -> FsResult<()> {
        self.cache.truncate(handle as InodeId, length).await
    }
}
