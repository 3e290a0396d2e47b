//! The seam between the kernel's FUSE protocol and the operation surface.
//! fuser's callbacks are inode-addressed and synchronous; this adapter
//! keeps an inode-to-path cache and drives the async core with
//! `Runtime::block_on`. Typed errors become negative errno values here and
//! nowhere else.

use crate::fs::errors::FsError;
use crate::fs::inode::{FileKind, InodeRow, ROOT_INODE};
use crate::fs::types::{RequestContext, ID_UNCHANGED};
use crate::fs::SqlFs;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Runtime;
use tracing::debug;

/// The database may be shared with other mounts, so cached attributes go
/// stale; keep kernel caching short.
const TTL: Duration = Duration::from_secs(1);

pub struct SqlFsFuse {
    fs: SqlFs,
    runtime: Runtime,
    /// inode → absolute path, maintained from lookup/readdir results the
    /// same way a dcache is.
    path_cache: Mutex<HashMap<u64, String>>,
}

impl SqlFsFuse {
    pub fn new(fs: SqlFs, runtime: Runtime) -> Self {
        let path_cache = Mutex::new(HashMap::from([(ROOT_INODE as u64, "/".to_string())]));
        Self {
            fs,
            runtime,
            path_cache,
        }
    }

    fn get_path(&self, ino: u64) -> Option<String> {
        self.path_cache.lock().unwrap().get(&ino).cloned()
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let cache = self.path_cache.lock().unwrap();
        let parent_path = cache.get(&parent)?;
        let name = name.to_str()?;
        Some(if parent_path == "/" {
            format!("/{name}")
        } else {
            format!("{parent_path}/{name}")
        })
    }

    fn add_path(&self, ino: u64, path: String) {
        self.path_cache.lock().unwrap().insert(ino, path);
    }

    fn drop_path(&self, ino: u64) {
        self.path_cache.lock().unwrap().remove(&ino);
    }

    fn ctx(req: &Request<'_>, umask: u32) -> RequestContext {
        RequestContext::new(req.uid(), req.gid(), umask)
    }
}

fn epoch_time(secs: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
}

fn time_or_now(t: TimeOrNow) -> Option<i64> {
    match t {
        TimeOrNow::SpecificTime(t) => Some(
            t.duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        ),
        TimeOrNow::Now => None,
    }
}

fn file_type(mode: u32) -> FileType {
    match FileKind::from_mode(mode) {
        FileKind::Directory => FileType::Directory,
        FileKind::Regular => FileType::RegularFile,
        FileKind::Symlink => FileType::Symlink,
        FileKind::Special => match mode & 0o170000 {
            0o020000 => FileType::CharDevice,
            0o060000 => FileType::BlockDevice,
            0o010000 => FileType::NamedPipe,
            0o140000 => FileType::Socket,
            _ => FileType::RegularFile,
        },
    }
}

fn fill_attr(row: &InodeRow) -> FileAttr {
    FileAttr {
        ino: row.inode as u64,
        size: row.length as u64,
        blocks: (row.length as u64).div_ceil(512),
        atime: epoch_time(row.atime),
        mtime: epoch_time(row.mtime),
        ctime: epoch_time(row.ctime),
        crtime: epoch_time(row.ctime),
        kind: file_type(row.mode),
        perm: row.perm() as u16,
        nlink: row.links.max(0) as u32,
        uid: row.uid,
        gid: row.gid,
        rdev: row.rdev,
        flags: 0,
        blksize: 512,
    }
}

macro_rules! reply_error {
    ($reply:expr, $err:expr) => {{
        $reply.error($err.to_errno());
        return;
    }};
}

impl Filesystem for SqlFsFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        debug!("filesystem initialized");
        Ok(())
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, 0);
        match self.runtime.block_on(self.fs.getattr(&ctx, &path)) {
            Ok(row) => {
                self.add_path(row.inode as u64, path);
                reply.entry(&TTL, &fill_attr(&row), 0);
            }
            Err(e) => reply_error!(reply, e),
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        let result = if let Some(fh) = fh {
            self.runtime.block_on(self.fs.fgetattr(fh))
        } else {
            let Some(path) = self.get_path(ino) else {
                reply_error!(reply, FsError::NotFound);
            };
            let ctx = Self::ctx(req, 0);
            self.runtime.block_on(self.fs.getattr(&ctx, &path))
        };
        match result {
            Ok(row) => reply.attr(&TTL, &fill_attr(&row)),
            Err(e) => reply_error!(reply, e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.get_path(ino) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, 0);

        let result = self.runtime.block_on(async {
            if let Some(mode) = mode {
                self.fs.chmod(&ctx, &path, mode).await?;
            }
            if uid.is_some() || gid.is_some() {
                self.fs
                    .chown(
                        &ctx,
                        &path,
                        uid.unwrap_or(ID_UNCHANGED),
                        gid.unwrap_or(ID_UNCHANGED),
                    )
                    .await?;
            }
            if let Some(size) = size {
                match fh {
                    Some(fh) => self.fs.truncate_handle(fh, size).await?,
                    None => self.fs.truncate(&ctx, &path, size).await?,
                }
            }
            if atime.is_some() || mtime.is_some() {
                self.fs
                    .utime(
                        &ctx,
                        &path,
                        atime.and_then(time_or_now),
                        mtime.and_then(time_or_now),
                    )
                    .await?;
            }
            self.fs.getattr(&ctx, &path).await
        });

        match result {
            Ok(row) => reply.attr(&TTL, &fill_attr(&row)),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.get_path(ino) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, 0);
        match self.runtime.block_on(self.fs.readlink(&ctx, &path)) {
            Ok(target) => reply.data(&target),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, umask);
        let result = self.runtime.block_on(async {
            self.fs.mknod(&ctx, &path, mode, rdev).await?;
            self.fs.getattr(&ctx, &path).await
        });
        match result {
            Ok(row) => {
                self.add_path(row.inode as u64, path);
                reply.entry(&TTL, &fill_attr(&row), 0);
            }
            Err(e) => reply_error!(reply, e),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, umask);
        let result = self.runtime.block_on(async {
            self.fs.mkdir(&ctx, &path, mode).await?;
            self.fs.getattr(&ctx, &path).await
        });
        match result {
            Ok(row) => {
                self.add_path(row.inode as u64, path);
                reply.entry(&TTL, &fill_attr(&row), 0);
            }
            Err(e) => reply_error!(reply, e),
        }
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, 0);
        match self.runtime.block_on(self.fs.unlink(&ctx, &path)) {
            Ok(()) => reply.ok(),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, 0);
        match self.runtime.block_on(self.fs.rmdir(&ctx, &path)) {
            Ok(()) => reply.ok(),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, link_name) else {
            reply_error!(reply, FsError::NotFound);
        };
        let Some(target) = target.to_str() else {
            reply_error!(reply, FsError::InvalidArgument);
        };
        let ctx = Self::ctx(req, 0);
        let result = self.runtime.block_on(async {
            self.fs.symlink(&ctx, target, &path).await?;
            self.fs.getattr(&ctx, &path).await
        });
        match result {
            Ok(row) => {
                self.add_path(row.inode as u64, path);
                reply.entry(&TTL, &fill_attr(&row), 0);
            }
            Err(e) => reply_error!(reply, e),
        }
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(from), Some(to)) = (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, 0);
        match self.runtime.block_on(self.fs.rename(&ctx, &from, &to)) {
            Ok(()) => {
                // The moved inode's cached path is stale; the next lookup
                // repopulates it.
                let mut cache = self.path_cache.lock().unwrap();
                cache.retain(|_, p| p != &from && !p.starts_with(&format!("{from}/")));
                reply.ok();
            }
            Err(e) => reply_error!(reply, e),
        }
    }

    fn link(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let (Some(old), Some(new)) = (self.get_path(ino), self.child_path(newparent, newname))
        else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, 0);
        let result = self.runtime.block_on(async {
            self.fs.link(&ctx, &old, &new).await?;
            self.fs.getattr(&ctx, &new).await
        });
        match result {
            Ok(row) => reply.entry(&TTL, &fill_attr(&row), 0),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.get_path(ino) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, 0);
        match self.runtime.block_on(self.fs.open(&ctx, &path, flags)) {
            Ok(handle) => reply.opened(handle, 0),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, umask);
        let result = self.runtime.block_on(async {
            let handle = self.fs.create(&ctx, &path, mode, flags).await?;
            let row = self.fs.fgetattr(handle).await?;
            Ok::<_, FsError>((handle, row))
        });
        match result {
            Ok((handle, row)) => {
                self.add_path(row.inode as u64, path);
                reply.created(&TTL, &fill_attr(&row), 0, handle, 0);
            }
            Err(e) => reply_error!(reply, e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self
            .runtime
            .block_on(self.fs.read_handle(fh, size, offset.max(0) as u64))
        {
            Ok(data) => reply.data(&data),
            Err(e) => reply_error!(reply, e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self
            .runtime
            .block_on(self.fs.write_handle(fh, data, offset.max(0) as u64))
        {
            Ok(written) => reply.written(written),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.runtime.block_on(self.fs.flush_handle(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.runtime.block_on(self.fs.flush_handle(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.runtime.block_on(self.fs.release(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.get_path(ino) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, 0);

        let result = self.runtime.block_on(async {
            let dir = self.fs.getattr(&ctx, &path).await?;
            let children = self.fs.getdir_plus(&ctx, &path).await?;
            Ok::<_, FsError>((dir, children))
        });
        let (dir, children) = match result {
            Ok(ok) => ok,
            Err(e) => reply_error!(reply, e),
        };

        let parent_ino = if ino == ROOT_INODE as u64 {
            ino
        } else {
            Path::new(&path)
                .parent()
                .and_then(|p| {
                    let s = p.to_string_lossy();
                    let cache = self.path_cache.lock().unwrap();
                    cache
                        .iter()
                        .find(|(_, v)| v.as_str() == s)
                        .map(|(k, _)| *k)
                })
                .unwrap_or(ROOT_INODE as u64)
        };

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (dir.inode as u64, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for (child_ino, name, kind) in children {
            let child_path = if path == "/" {
                format!("/{name}")
            } else {
                format!("{path}/{name}")
            };
            self.add_path(child_ino as u64, child_path);
            let ft = match kind {
                FileKind::Directory => FileType::Directory,
                FileKind::Symlink => FileType::Symlink,
                _ => FileType::RegularFile,
            };
            entries.push((child_ino as u64, ft, name));
        }

        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset.max(0) as usize)
        {
            if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.get_path(ino) else {
            reply_error!(reply, FsError::NotFound);
        };
        let ctx = Self::ctx(req, 0);
        match self
            .runtime
            .block_on(self.fs.access(&ctx, &path, mask.max(0) as u32))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply_error!(reply, e),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        if ino != ROOT_INODE as u64 {
            self.drop_path(ino);
        }
    }
}

/// Parse one comma-joined `-o` option list into fuser mount options.
/// Unknown options are reported back as errors rather than ignored.
pub fn parse_mount_options(spec: &str) -> anyhow::Result<Vec<MountOption>> {
    let mut options = Vec::new();
    for opt in spec.split(',').filter(|o| !o.is_empty()) {
        let parsed = match opt {
            "allow_other" => MountOption::AllowOther,
            "allow_root" => MountOption::AllowRoot,
            "default_permissions" => MountOption::DefaultPermissions,
            "auto_unmount" => MountOption::AutoUnmount,
            "ro" => MountOption::RO,
            "rw" => MountOption::RW,
            "nonempty" | "use_ino" | "direct_io" | "hard_remove" | "nohard_remove" => {
                MountOption::CUSTOM(opt.to_string())
            }
            other => match other.strip_prefix("fsname=") {
                Some(name) => MountOption::FSName(name.to_string()),
                None => anyhow::bail!("unrecognized mount option '{other}'"),
            },
        };
        options.push(parsed);
    }
    Ok(options)
}

/// Install the filesystem at `mountpoint` and serve until unmounted.
pub fn mount(
    fs: SqlFs,
    runtime: Runtime,
    mountpoint: &Path,
    mut options: Vec<MountOption>,
) -> anyhow::Result<()> {
    if !options
        .iter()
        .any(|o| matches!(o, MountOption::FSName(_)))
    {
        options.push(MountOption::FSName("sqlfs".to_string()));
    }
    let adapter = SqlFsFuse::new(fs, runtime);
    fuser::mount2(adapter, mountpoint, &options)?;
    Ok(())
}
