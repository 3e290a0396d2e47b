use crate::fs::inode::InodeId;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest permitted entry name, in bytes.
pub const NAME_MAX: usize = 255;

/// Longest symlink target read back by `readlink`.
pub const MAX_PATH_LEN: usize = 4096;

/// Leave-unchanged sentinel for `chown` uid/gid arguments.
pub const ID_UNCHANGED: u32 = 0xFFFF_FFFF;

/// Identity of the process a request is performed on behalf of. Under a
/// mount it comes from the kernel's request context; for direct library
/// use [`RequestContext::current`] falls back to the calling process.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub uid: u32,
    pub gid: u32,
    pub umask: u32,
}

impl RequestContext {
    pub fn new(uid: u32, gid: u32, umask: u32) -> Self {
        Self { uid, gid, umask }
    }

    /// The calling process's effective identity and umask.
    pub fn current() -> Self {
        Self {
            uid: unsafe { libc::geteuid() },
            gid: unsafe { libc::getegid() },
            umask: process_umask(),
        }
    }

    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            umask: 0o022,
        }
    }
}

/// umask(2) is write-only: read it by setting and restoring. Serialized so
/// two concurrent readers cannot observe each other's temporary zero.
fn process_umask() -> u32 {
    static UMASK_LOCK: Mutex<()> = Mutex::new(());
    let _guard = UMASK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        let mask = libc::umask(0);
        libc::umask(mask);
        mask as u32
    }
}

/// One `getdir` result entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: InodeId,
    pub name: String,
}

/// Current UNIX time at the one-second resolution the schema stores.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
