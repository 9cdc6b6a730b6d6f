use std::ffi::{CStr, CString};
use std::io;

use libc::{c_char, getpwnam_r, getpwuid_r};

#[derive(Debug, Clone)]
pub struct User {
    pub name:   String,
    pub passwd: String,
    pub uid:    u32,
}

unsafe fn cptr_to_string(c: *const c_char) -> String {
    if c.is_null() {
        return String::new();
    }
    CStr::from_ptr(c).to_string_lossy().into_owned()
}

unsafe fn to_passwd(pwd: &libc::passwd) -> User {
    User {
        name:   cptr_to_string(pwd.pw_name),
        passwd: cptr_to_string(pwd.pw_passwd),
        uid:    pwd.pw_uid,
    }
}

// getpw*_r want a scratch buffer; grow it on ERANGE.
fn lookup<F>(mut getpw: F) -> Result<User, io::Error>
where F: FnMut(&mut libc::passwd, &mut [c_char], &mut *mut libc::passwd) -> libc::c_int {
    let mut size = 1024;
    loop {
        let mut buf: Vec<c_char> = vec![0; size];
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let ret = getpw(&mut pwd, &mut buf[..], &mut result);
        if ret == libc::ERANGE && size < 65536 {
            size *= 4;
            continue;
        }
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
        if result.is_null() {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        return Ok(unsafe { to_passwd(&pwd) });
    }
}

impl User {
    pub fn by_name(name: &str) -> Result<User, io::Error> {
        let cname = match CString::new(name) {
            Ok(un) => un,
            Err(_) => return Err(io::Error::from_raw_os_error(libc::ENOENT)),
        };
        lookup(|pwd, buf, result| unsafe {
            getpwnam_r(cname.as_ptr(), pwd, buf.as_mut_ptr(), buf.len() as libc::size_t, result)
        })
    }

    pub fn by_uid(uid: u32) -> Result<User, io::Error> {
        lookup(|pwd, buf, result| unsafe {
            getpwuid_r(uid, pwd, buf.as_mut_ptr(), buf.len() as libc::size_t, result)
        })
    }

    /// The user this process is running as (real uid).
    pub fn current() -> Result<User, io::Error> {
        User::by_uid(unsafe { libc::getuid() })
    }
}

/// Read the encrypted password from the shadow database.
///
/// This only works while we still have the privileges to read it.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn shadow_passwd(name: &str) -> Result<String, io::Error> {
    let cname = match CString::new(name) {
        Ok(un) => un,
        Err(_) => return Err(io::Error::from_raw_os_error(libc::ENOENT)),
    };
    let mut buf: Vec<c_char> = vec![0; 4096];
    let mut spwd: libc::spwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::spwd = std::ptr::null_mut();
    let ret = unsafe {
        libc::getspnam_r(
            cname.as_ptr(),
            &mut spwd as *mut _,
            buf.as_mut_ptr(),
            buf.len() as libc::size_t,
            &mut result as *mut _,
        )
    };
    if ret != 0 {
        return Err(io::Error::from_raw_os_error(ret));
    }
    if result.is_null() {
        return Err(io::Error::from_raw_os_error(libc::ENOENT));
    }
    Ok(unsafe { cptr_to_string(spwd.sp_pwdp) })
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn shadow_passwd(_name: &str) -> Result<String, io::Error> {
    Err(io::Error::from_raw_os_error(libc::ENOSYS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_by_uid() {
        // uid 0 exists everywhere we build.
        let root = User::by_uid(0).unwrap();
        assert_eq!(root.uid, 0);
        assert!(!root.name.is_empty());
        let again = User::by_name(&root.name).unwrap();
        assert_eq!(again.uid, 0);
    }

    #[test]
    fn test_unknown_user() {
        let err = User::by_name("no-such-user-xyzzy").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        assert!(User::by_name("nul\0byte").is_err());
    }
}
