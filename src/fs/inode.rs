use crate::fs::errors::{FsError, FsResult};
use sqlx::any::AnyRow;
use sqlx::Row;

pub type InodeId = i64;

/// The root directory's inode, created at schema initialization.
pub const ROOT_INODE: InodeId = 1;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Special,
}

impl FileKind {
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => FileKind::Directory,
            S_IFREG => FileKind::Regular,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::Special,
        }
    }
}

/// One row of the `metadata` table: the full identity of a filesystem
/// object. `links` counts directory entries, `inuse` counts open handles;
/// the row lives until both reach zero.
#[derive(Debug, Clone)]
pub struct InodeRow {
    pub inode: InodeId,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub links: i64,
    pub inuse: i64,
    pub length: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub atime: i64,
}

impl InodeRow {
    pub fn from_row(row: &AnyRow) -> FsResult<Self> {
        Ok(Self {
            inode: row.try_get::<i64, _>("inode")?,
            mode: row.try_get::<i64, _>("mode")? as u32,
            uid: row.try_get::<i64, _>("uid")? as u32,
            gid: row.try_get::<i64, _>("gid")? as u32,
            rdev: row.try_get::<i64, _>("rdev")? as u32,
            links: row.try_get::<i64, _>("links")?,
            inuse: row.try_get::<i64, _>("inuse")?,
            length: row.try_get::<i64, _>("length")?,
            mtime: row.try_get::<i64, _>("mtime")?,
            ctime: row.try_get::<i64, _>("ctime")?,
            atime: row.try_get::<i64, _>("atime")?,
        })
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn is_regular(&self) -> bool {
        self.kind() == FileKind::Regular
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == FileKind::Symlink
    }

    /// True once nothing references the inode: no directory entry and no
    /// open handle. Such a row must not survive the current transaction.
    pub fn is_orphan(&self) -> bool {
        self.links + self.inuse == 0
    }

    /// Permission and special bits, type stripped.
    pub fn perm(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Reject names FUSE should never send but library callers might.
pub fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::InvalidArgument);
    }
    if name.len() > crate::fs::types::NAME_MAX {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_mode_bits() {
        assert_eq!(FileKind::from_mode(0o040755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(0o100644), FileKind::Regular);
        assert_eq!(FileKind::from_mode(0o120777), FileKind::Symlink);
        assert_eq!(FileKind::from_mode(0o020600), FileKind::Special);
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("ok").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert_eq!(validate_name(&"x".repeat(256)), Err(FsError::NameTooLong));
        assert!(validate_name(&"x".repeat(255)).is_ok());
    }
}
