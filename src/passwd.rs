//
//  The "pwent" backend: check the typed password against the encrypted
//  password from the password or shadow database.
//
//  The encrypted password is read during the privileged phase, because
//  the shadow file is usually only readable by root or group shadow.
//
use std::ffi::{CStr, CString};
use std::sync::Mutex;

use libc::c_char;

use crate::auth::{secret_cstring, AuthContext, Method, PasswordMethod};
use crate::unixuser::{self, User};

#[link(name = "crypt")]
extern "C" {
    fn crypt(key: *const c_char, salt: *const c_char) -> *mut c_char;
}

// crypt(3) returns a pointer to a static buffer.
lazy_static! {
    static ref CRYPT_LOCK: Mutex<()> = Mutex::new(());
}

fn crypt_string(key: &str, salt: &str) -> Option<String> {
    let c_key = secret_cstring(key)?;
    let c_salt = CString::new(salt).ok()?;
    let _guard = CRYPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        let res = crypt(c_key.as_ptr() as *const c_char, c_salt.as_ptr());
        // some implementations return "*0" or "*1" instead of NULL.
        if res.is_null() || *res == b'*' as c_char {
            return None;
        }
        Some(CStr::from_ptr(res).to_string_lossy().into_owned())
    }
}

// Don't leak how much of the hash matched.
fn time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub struct Pwent {
    encrypted: Option<String>,
}

impl Pwent {
    pub fn new() -> Pwent {
        Pwent { encrypted: None }
    }
}

// Placeholders that mean "the real hash lives in the shadow file",
// or "this account has no usable password".
fn placeholder(pw: &str) -> bool {
    pw.len() < 13 && !pw.starts_with('$')
}

/// Does this look like something crypt(3) produced?
pub fn plausible_hash(pw: &str) -> bool {
    if pw.starts_with('$') {
        // $id$[params$]salt$hash
        return pw.split('$').filter(|s| !s.is_empty()).count() >= 3;
    }
    pw.len() >= 13 && !pw.starts_with('*') && !pw.starts_with('!')
}

impl Method for Pwent {
    fn name(&self) -> &'static str {
        "pwent"
    }

    fn priv_init(&mut self, ctx: &AuthContext) -> bool {
        let user = match User::by_name(&ctx.user) {
            Ok(user) => user,
            Err(e) => {
                debug!("pwent: getpwnam({}): {}", ctx.user, e);
                return false;
            },
        };
        let mut pw = user.passwd;
        if placeholder(&pw) {
            match unixuser::shadow_passwd(&ctx.user) {
                Ok(spw) => pw = spw,
                Err(e) => debug!("pwent: getspnam({}): {}", ctx.user, e),
            }
        }
        self.encrypted = Some(pw);
        true
    }

    fn init(&mut self, ctx: &AuthContext) -> bool {
        match self.encrypted {
            Some(ref pw) if plausible_hash(pw) => true,
            _ => {
                if ctx.verbose {
                    warn!("pwent: couldn't get password of \"{}\"", ctx.user);
                }
                self.encrypted = None;
                false
            },
        }
    }
}

impl PasswordMethod for Pwent {
    fn valid_p(&self, _ctx: &AuthContext, password: &str) -> bool {
        match self.encrypted {
            Some(ref hash) if !password.is_empty() => match crypt_string(password, hash) {
                Some(h) => time_compare(&h, hash),
                None => false,
            },
            _ => false,
        }
    }
}
