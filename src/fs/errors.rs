use thiserror::Error;

/// Filesystem error kinds. The FUSE adapter turns these into negative
/// errno values at the dispatch boundary; inside the core they stay typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    Exists,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotDirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("name too long")]
    NameTooLong,
    #[error("i/o error")]
    Io,
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    pub fn to_errno(self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::Exists => libc::EEXIST,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::PermissionDenied => libc::EACCES,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::Io => libc::EIO,
        }
    }
}

impl From<sqlx::Error> for FsError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => FsError::NotFound,
            other => {
                tracing::error!("database error: {other}");
                FsError::Io
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NotFound.to_errno(), libc::ENOENT);
        assert_eq!(FsError::IsDirectory.to_errno(), libc::EISDIR);
        assert_eq!(FsError::NotDirectory.to_errno(), libc::ENOTDIR);
        assert_eq!(FsError::NotEmpty.to_errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::PermissionDenied.to_errno(), libc::EACCES);
        assert_eq!(FsError::InvalidArgument.to_errno(), libc::EINVAL);
    }
}
