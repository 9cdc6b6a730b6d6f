//
//  Dropping setuid/setgid privileges, once, early, for good.
//
//  If we were installed setuid or setgid (to read the shadow file, say),
//  the effective ids are lowered to the real ids before anything else
//  happens. Then we make sure the identity we ended up with is a real
//  person's account: running a locker as root or as a service account
//  would make the lock meaningless.
//
use std::error::Error;
use std::fmt;
use std::io;

use libc::{gid_t, uid_t};

use crate::unixuser::User;

// Some historic libcs treat an id of -1 as "leave unchanged".
const ID_NONE: u32 = 0xffffffff;
const ID_NOBODY: u32 = 0xfffffffe;

// Accounts we refuse to run as.
const DENYLIST: &[&str] = &["root", "nobody", "noaccess", "operator", "daemon", "bin", "adm", "sys", "games"];

/// The OS calls the privilege drop is made of.
///
/// `Process` is the real thing; tests substitute their own.
pub trait Credentials {
    fn getuid(&self) -> uid_t;
    fn geteuid(&self) -> uid_t;
    fn getgid(&self) -> gid_t;
    fn getegid(&self) -> gid_t;
    fn getgroups(&self) -> io::Result<Vec<gid_t>>;
    fn setgroups(&mut self, groups: &[gid_t]) -> io::Result<()>;
    fn setgid(&mut self, gid: gid_t) -> io::Result<()>;
    fn setuid(&mut self, uid: uid_t) -> io::Result<()>;
    fn lookup_uid(&self, uid: uid_t) -> Option<User>;
}

/// The credentials of this process.
pub struct Process;

impl Credentials for Process {
    fn getuid(&self) -> uid_t {
        unsafe { libc::getuid() }
    }

    fn geteuid(&self) -> uid_t {
        unsafe { libc::geteuid() }
    }

    fn getgid(&self) -> gid_t {
        unsafe { libc::getgid() }
    }

    fn getegid(&self) -> gid_t {
        unsafe { libc::getegid() }
    }

    fn getgroups(&self) -> io::Result<Vec<gid_t>> {
        let n = unsafe { libc::getgroups(0, std::ptr::null_mut()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut groups: Vec<gid_t> = vec![0; n as usize];
        let n = unsafe { libc::getgroups(n, groups.as_mut_ptr()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        groups.truncate(n as usize);
        Ok(groups)
    }

    fn setgroups(&mut self, groups: &[gid_t]) -> io::Result<()> {
        match unsafe { libc::setgroups(groups.len() as _, groups.as_ptr()) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    fn setgid(&mut self, gid: gid_t) -> io::Result<()> {
        match unsafe { libc::setgid(gid) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    fn setuid(&mut self, uid: uid_t) -> io::Result<()> {
        match unsafe { libc::setuid(uid) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    fn lookup_uid(&self, uid: uid_t) -> Option<User> {
        User::by_uid(uid).ok()
    }
}

/// Why the privilege drop failed.
///
/// There is no way to recover from any of these: the only correct
/// response is to print the error and exit.
#[derive(Debug)]
pub enum FatalPrivilegeError {
    SetGroups(gid_t, io::Error),
    SetGid(gid_t, io::Error),
    SetUid(uid_t, io::Error),
    NoPasswdEntry(uid_t),
    PrivilegedUid(uid_t),
    EmptyName(uid_t),
    Denylisted(String, uid_t),
}

impl fmt::Display for FatalPrivilegeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FatalPrivilegeError::SetGroups(gid, e) => write!(f, "setgroups({}) failed: {}", gid, e),
            FatalPrivilegeError::SetGid(gid, e) => write!(f, "setgid({}) failed: {}", gid, e),
            FatalPrivilegeError::SetUid(uid, e) => write!(f, "setuid({}) failed: {}", uid, e),
            FatalPrivilegeError::NoPasswdEntry(uid) => write!(f, "running as unknown uid {}", uid),
            FatalPrivilegeError::PrivilegedUid(uid) => {
                write!(f, "running as uid {}: refusing to lock the screen as a privileged user", *uid as i32)
            },
            FatalPrivilegeError::EmptyName(uid) => write!(f, "uid {} has an empty user name", uid),
            FatalPrivilegeError::Denylisted(name, uid) => {
                write!(f, "running as user \"{}\" ({}): refusing to lock the screen as a system account", name, uid)
            },
        }
    }
}

impl Error for FatalPrivilegeError {}

fn fix_id(id: u32) -> u32 {
    if id == ID_NONE {
        ID_NOBODY
    } else {
        id
    }
}

fn privileged_id(id: u32) -> bool {
    id == 0 || id == ID_NONE || id == ID_NOBODY
}

/// Lower the effective uid/gid of this process to the real uid/gid.
pub fn disavow_privileges() -> Result<(), FatalPrivilegeError> {
    disavow_privileges_with(&mut Process)
}

pub fn disavow_privileges_with<C: Credentials>(creds: &mut C) -> Result<(), FatalPrivilegeError> {
    let uid = creds.getuid();
    let gid = creds.getgid();
    let euid = creds.geteuid();
    let egid = creds.getegid();

    if uid != euid || gid != egid {
        let uid = fix_id(uid);
        let gid = fix_id(gid);
        debug!("disavow_privileges: uid {} euid {} gid {} egid {}", uid, euid, gid, egid);

        // groups first: once the uid is gone we may not change them anymore.
        let single = match creds.getgroups() {
            Ok(groups) => groups.len() == 1 && groups[0] == gid,
            Err(_) => false,
        };
        if !single {
            creds.setgroups(&[gid]).map_err(|e| FatalPrivilegeError::SetGroups(gid, e))?;
        }
        creds.setgid(gid).map_err(|e| FatalPrivilegeError::SetGid(gid, e))?;
        creds.setuid(uid).map_err(|e| FatalPrivilegeError::SetUid(uid, e))?;
        info!("changed uid/gid to {}/{}", uid, gid);
    }

    check_identity(creds)
}

// Refuse to continue as root, as -1/-2, or as a system account.
fn check_identity<C: Credentials>(creds: &C) -> Result<(), FatalPrivilegeError> {
    let uid = creds.getuid();
    if privileged_id(uid) {
        return Err(FatalPrivilegeError::PrivilegedUid(uid));
    }
    let user = creds.lookup_uid(uid).ok_or(FatalPrivilegeError::NoPasswdEntry(uid))?;
    if privileged_id(user.uid) {
        return Err(FatalPrivilegeError::PrivilegedUid(user.uid));
    }
    if user.name.is_empty() {
        return Err(FatalPrivilegeError::EmptyName(uid));
    }
    if DENYLIST.contains(&user.name.as_str()) {
        return Err(FatalPrivilegeError::Denylisted(user.name, uid));
    }
    debug!("running as {} ({})", user.name, uid);
    Ok(())
}
