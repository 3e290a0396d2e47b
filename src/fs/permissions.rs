use crate::fs::errors::{FsError, FsResult};
use crate::fs::inode::InodeRow;
use crate::fs::types::{RequestContext, ID_UNCHANGED};
use dashmap::DashMap;
use std::ffi::CStr;
use std::sync::{Arc, Mutex};

pub const ACCESS_READ: u32 = 4;
pub const ACCESS_WRITE: u32 = 2;
pub const ACCESS_EXECUTE: u32 = 1;

/// Effective identity of a caller: uid, primary gid and the full
/// supplementary group set.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub groups: Arc<Vec<u32>>,
}

impl Credentials {
    pub fn is_member_of(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.iter().any(|g| *g == gid)
    }
}

/// Supplementary groups per uid, computed once by walking the group
/// database and kept for the lifetime of the process. Entries are only
/// ever added; a race between two threads computes identical values.
pub struct GroupCache {
    by_uid: DashMap<u32, Arc<Vec<u32>>>,
}

impl GroupCache {
    pub fn new() -> Self {
        Self {
            by_uid: DashMap::new(),
        }
    }

    pub fn credentials(&self, ctx: &RequestContext) -> Credentials {
        let groups = Arc::clone(
            self.by_uid
                .entry(ctx.uid)
                .or_insert_with(|| Arc::new(enumerate_groups(ctx.uid)))
                .value(),
        );
        Credentials {
            uid: ctx.uid,
            gid: ctx.gid,
            groups,
        }
    }
}

impl Default for GroupCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the group database once, retaining every group whose member list
/// names the uid's login user. The user's primary group is always present.
fn enumerate_groups(uid: u32) -> Vec<u32> {
    let Some((login, primary_gid)) = lookup_passwd(uid) else {
        return Vec::new();
    };
    let mut groups = vec![primary_gid];

    // getgrent(3) walks global iterator state.
    static GRENT_LOCK: Mutex<()> = Mutex::new(());
    let _guard = GRENT_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    unsafe {
        libc::setgrent();
        loop {
            let grp = libc::getgrent();
            if grp.is_null() {
                break;
            }
            let gid = (*grp).gr_gid as u32;
            if groups.contains(&gid) {
                continue;
            }
            let mut member = (*grp).gr_mem;
            while !member.is_null() && !(*member).is_null() {
                if CStr::from_ptr(*member).to_bytes() == login.as_slice() {
                    groups.push(gid);
                    break;
                }
                member = member.add(1);
            }
        }
        libc::endgrent();
    }

    groups
}

fn lookup_passwd(uid: u32) -> Option<(Vec<u8>, u32)> {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0i8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }
    let login = unsafe { CStr::from_ptr(pwd.pw_name) }.to_bytes().to_vec();
    Some((login, pwd.pw_gid as u32))
}

/// Evaluate a raw mode word for one caller. The triplet is selected by
/// identity (owner, group, other); the requested mask must be a subset of
/// it. Root is always allowed.
pub fn check_access_bits(
    mode: u32,
    owner_uid: u32,
    owner_gid: u32,
    creds: &Credentials,
    mask: u32,
) -> FsResult<()> {
    if creds.uid == 0 || mask == 0 {
        return Ok(());
    }

    let triplet = if creds.uid == owner_uid {
        (mode >> 6) & 7
    } else if creds.is_member_of(owner_gid) {
        (mode >> 3) & 7
    } else {
        mode & 7
    };

    if mask & !triplet != 0 {
        return Err(FsError::PermissionDenied);
    }
    Ok(())
}

pub fn check_access(row: &InodeRow, creds: &Credentials, mask: u32) -> FsResult<()> {
    check_access_bits(row.mode, row.uid, row.gid, creds, mask)
}

/// The access mask `open` implies, derived from the flag word's low two
/// bits (O_RDONLY / O_WRONLY / O_RDWR).
pub fn open_access_mask(flags: i32) -> u32 {
    match flags & libc::O_ACCMODE {
        libc::O_RDONLY => ACCESS_READ,
        libc::O_WRONLY => ACCESS_WRITE,
        _ => ACCESS_READ | ACCESS_WRITE,
    }
}

/// Only the owner (or root) may change an inode's mode.
pub fn check_ownership(row: &InodeRow, creds: &Credentials) -> FsResult<()> {
    if creds.uid == 0 || creds.uid == row.uid {
        Ok(())
    } else {
        Err(FsError::PermissionDenied)
    }
}

/// chown rules: a real uid change needs root; a gid change needs root or
/// membership in the target group. [`ID_UNCHANGED`] means leave alone.
pub fn check_chown(creds: &Credentials, new_uid: u32, new_gid: u32) -> FsResult<()> {
    if new_uid != ID_UNCHANGED && creds.uid != 0 {
        return Err(FsError::PermissionDenied);
    }
    if new_gid != ID_UNCHANGED && creds.uid != 0 && !creds.is_member_of(new_gid) {
        return Err(FsError::PermissionDenied);
    }
    Ok(())
}

/// Arbitrary timestamps require ownership; touching to "now" only needs
/// write access.
pub fn check_set_times(
    row: &InodeRow,
    creds: &Credentials,
    setting_to_now: bool,
) -> FsResult<()> {
    if creds.uid == 0 || creds.uid == row.uid {
        return Ok(());
    }
    if setting_to_now {
        return check_access(row, creds, ACCESS_WRITE);
    }
    Err(FsError::PermissionDenied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::inode::S_IFREG;

    fn row(mode: u32, uid: u32, gid: u32) -> InodeRow {
        InodeRow {
            inode: 42,
            mode: S_IFREG | mode,
            uid,
            gid,
            rdev: 0,
            links: 1,
            inuse: 0,
            length: 0,
            mtime: 0,
            ctime: 0,
            atime: 0,
        }
    }

    fn creds(uid: u32, gid: u32, extra: &[u32]) -> Credentials {
        Credentials {
            uid,
            gid,
            groups: Arc::new(extra.to_vec()),
        }
    }

    #[test]
    fn owner_triplet_applies() {
        let r = row(0o640, 1000, 1000);
        let c = creds(1000, 1000, &[]);
        assert!(check_access(&r, &c, ACCESS_READ | ACCESS_WRITE).is_ok());
        assert_eq!(
            check_access(&r, &c, ACCESS_EXECUTE),
            Err(FsError::PermissionDenied)
        );
    }

    #[test]
    fn group_triplet_applies_via_supplementary_set() {
        let r = row(0o640, 0, 500);
        let c = creds(1000, 1000, &[500]);
        assert!(check_access(&r, &c, ACCESS_READ).is_ok());
        assert_eq!(
            check_access(&r, &c, ACCESS_WRITE),
            Err(FsError::PermissionDenied)
        );
    }

    #[test]
    fn other_triplet_applies() {
        let r = row(0o604, 0, 0);
        let c = creds(1000, 1000, &[]);
        assert!(check_access(&r, &c, ACCESS_READ).is_ok());
        assert_eq!(
            check_access(&r, &c, ACCESS_READ | ACCESS_WRITE),
            Err(FsError::PermissionDenied)
        );
    }

    #[test]
    fn root_bypasses_mode() {
        let r = row(0o000, 1000, 1000);
        let c = creds(0, 0, &[]);
        assert!(check_access(&r, &c, ACCESS_READ | ACCESS_WRITE | ACCESS_EXECUTE).is_ok());
    }

    #[test]
    fn owner_match_shadows_group_and_other() {
        // Owner triplet denies write even though "other" would grant it.
        let r = row(0o407, 1000, 1000);
        let c = creds(1000, 1000, &[]);
        assert_eq!(
            check_access(&r, &c, ACCESS_WRITE),
            Err(FsError::PermissionDenied)
        );
    }

    #[test]
    fn open_flags_to_mask() {
        assert_eq!(open_access_mask(libc::O_RDONLY), ACCESS_READ);
        assert_eq!(open_access_mask(libc::O_WRONLY), ACCESS_WRITE);
        assert_eq!(open_access_mask(libc::O_RDWR), ACCESS_READ | ACCESS_WRITE);
    }

    #[test]
    fn chown_rules() {
        let c = creds(1000, 1000, &[500]);
        assert_eq!(
            check_chown(&c, 1001, ID_UNCHANGED),
            Err(FsError::PermissionDenied)
        );
        assert!(check_chown(&c, ID_UNCHANGED, 500).is_ok());
        assert_eq!(
            check_chown(&c, ID_UNCHANGED, 777),
            Err(FsError::PermissionDenied)
        );
        let root = creds(0, 0, &[]);
        assert!(check_chown(&root, 1234, 1234).is_ok());
    }

    #[test]
    fn group_cache_is_stable_per_uid() {
        let cache = GroupCache::new();
        let ctx = RequestContext::current();
        let first = cache.credentials(&ctx);
        let second = cache.credentials(&ctx);
        assert_eq!(first.groups, second.groups);
    }
}
