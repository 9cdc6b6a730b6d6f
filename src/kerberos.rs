//
//  The Kerberos backend (MIT krb5).
//
//  A password is right if the KDC hands out an initial ticket for it.
//  The ticket is stored in a private FILE: ccache, which is destroyed
//  right away; we only want the verdict.
//
use std::ffi::{CStr, CString};
use std::fmt;
use std::path::PathBuf;
use std::ptr;

use crate::auth::{secret_cstring, AuthContext, Method, PasswordMethod};
use crate::config;

#[allow(non_camel_case_types)]
mod ffi {
    use std::os::raw::{c_char, c_uint, c_void};

    pub type krb5_error_code = i32;
    pub type krb5_context = *mut c_void;
    pub type krb5_principal = *mut c_void;
    pub type krb5_ccache = *mut c_void;

    #[repr(C)]
    pub struct krb5_keyblock {
        pub magic:    i32,
        pub enctype:  i32,
        pub length:   c_uint,
        pub contents: *mut u8,
    }

    #[repr(C)]
    pub struct krb5_ticket_times {
        pub authtime:   i32,
        pub starttime:  i32,
        pub endtime:    i32,
        pub renew_till: i32,
    }

    #[repr(C)]
    pub struct krb5_data {
        pub magic:  i32,
        pub length: c_uint,
        pub data:   *mut c_char,
    }

    #[repr(C)]
    pub struct krb5_creds {
        pub magic:         i32,
        pub client:        krb5_principal,
        pub server:        krb5_principal,
        pub keyblock:      krb5_keyblock,
        pub times:         krb5_ticket_times,
        pub is_skey:       c_uint,
        pub ticket_flags:  i32,
        pub addresses:     *mut *mut c_void,
        pub ticket:        krb5_data,
        pub second_ticket: krb5_data,
        pub authdata:      *mut *mut c_void,
    }

    #[link(name = "krb5")]
    extern "C" {
        pub fn krb5_init_context(ctx: *mut krb5_context) -> krb5_error_code;
        pub fn krb5_free_context(ctx: krb5_context);
        pub fn krb5_parse_name(ctx: krb5_context, name: *const c_char, princ: *mut krb5_principal) -> krb5_error_code;
        pub fn krb5_free_principal(ctx: krb5_context, princ: krb5_principal);
        pub fn krb5_get_init_creds_password(
            ctx: krb5_context,
            creds: *mut krb5_creds,
            client: krb5_principal,
            password: *const c_char,
            prompter: *const c_void,
            data: *mut c_void,
            start_time: i32,
            in_tkt_service: *const c_char,
            options: *mut c_void,
        ) -> krb5_error_code;
        pub fn krb5_free_cred_contents(ctx: krb5_context, creds: *mut krb5_creds);
        pub fn krb5_cc_resolve(ctx: krb5_context, name: *const c_char, cache: *mut krb5_ccache) -> krb5_error_code;
        pub fn krb5_cc_initialize(ctx: krb5_context, cache: krb5_ccache, princ: krb5_principal) -> krb5_error_code;
        pub fn krb5_cc_store_cred(ctx: krb5_context, cache: krb5_ccache, creds: *mut krb5_creds) -> krb5_error_code;
        pub fn krb5_cc_destroy(ctx: krb5_context, cache: krb5_ccache) -> krb5_error_code;
        pub fn krb5_get_error_message(ctx: krb5_context, code: krb5_error_code) -> *const c_char;
        pub fn krb5_free_error_message(ctx: krb5_context, msg: *const c_char);
    }
}

use self::ffi::*;

#[derive(Debug)]
pub struct KrbError {
    code: krb5_error_code,
    msg:  String,
}

impl fmt::Display for KrbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.msg, self.code)
    }
}

impl std::error::Error for KrbError {}

struct Context(krb5_context);

impl Context {
    fn new() -> Result<Context, KrbError> {
        let mut ctx = ptr::null_mut();
        let ret = unsafe { krb5_init_context(&mut ctx) };
        if ret != 0 {
            return Err(KrbError { code: ret, msg: "krb5_init_context failed".to_string() });
        }
        Ok(Context(ctx))
    }

    fn check(&self, what: &str, ret: krb5_error_code) -> Result<(), KrbError> {
        if ret == 0 {
            return Ok(());
        }
        let msg = unsafe {
            let m = krb5_get_error_message(self.0, ret);
            if m.is_null() {
                what.to_string()
            } else {
                let s = format!("{}: {}", what, CStr::from_ptr(m).to_string_lossy());
                krb5_free_error_message(self.0, m);
                s
            }
        };
        Err(KrbError { code: ret, msg })
    }

    fn parse_name(&self, name: &str) -> Result<Principal, KrbError> {
        let c_name = CString::new(name).map_err(|_| KrbError { code: 0, msg: "NUL in name".to_string() })?;
        let mut princ = ptr::null_mut();
        self.check("krb5_parse_name", unsafe { krb5_parse_name(self.0, c_name.as_ptr(), &mut princ) })?;
        Ok(Principal { ctx: self.0, princ })
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { krb5_free_context(self.0) }
    }
}

struct Principal {
    ctx:   krb5_context,
    princ: krb5_principal,
}

impl Drop for Principal {
    fn drop(&mut self) {
        unsafe { krb5_free_principal(self.ctx, self.princ) }
    }
}

// Private ccache name for one check.
fn ccache_name(dir: &PathBuf) -> String {
    format!("FILE:{}/xss-lockcore-krb5cc-{}", dir.display(), std::process::id())
}

// Fields drop in order: the principal must go before its context.
pub struct Kerberos {
    ccache_dir: PathBuf,
    principal:  Option<Principal>,
    ctx:        Option<Context>,
}

impl Kerberos {
    pub fn new(cfg: &config::Kerberos) -> Kerberos {
        let ccache_dir = match cfg.ccache_dir {
            Some(ref d) => PathBuf::from(d),
            None => std::env::var_os("TMPDIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp")),
        };
        Kerberos {
            ccache_dir,
            principal: None,
            ctx: None,
        }
    }

    fn verify(&self, password: &str) -> Result<(), KrbError> {
        let (ctx, princ) = match (self.ctx.as_ref(), self.principal.as_ref()) {
            (Some(c), Some(p)) => (c, p),
            _ => return Err(KrbError { code: 0, msg: "not initialized".to_string() }),
        };
        let c_pw = secret_cstring(password).ok_or_else(|| KrbError { code: 0, msg: "NUL in password".to_string() })?;
        let c_cache = CString::new(ccache_name(&self.ccache_dir))
            .map_err(|_| KrbError { code: 0, msg: "NUL in ccache name".to_string() })?;

        unsafe {
            let mut creds: krb5_creds = std::mem::zeroed();
            ctx.check(
                "krb5_get_init_creds_password",
                krb5_get_init_creds_password(
                    ctx.0,
                    &mut creds,
                    princ.princ,
                    c_pw.as_ptr() as *const std::os::raw::c_char,
                    ptr::null(),
                    ptr::null_mut(),
                    0,
                    ptr::null(),
                    ptr::null_mut(),
                ),
            )?;

            let mut cache = ptr::null_mut();
            let res = ctx
                .check("krb5_cc_resolve", krb5_cc_resolve(ctx.0, c_cache.as_ptr(), &mut cache))
                .and_then(|_| ctx.check("krb5_cc_initialize", krb5_cc_initialize(ctx.0, cache, princ.princ)))
                .and_then(|_| ctx.check("krb5_cc_store_cred", krb5_cc_store_cred(ctx.0, cache, &mut creds)));
            if !cache.is_null() {
                krb5_cc_destroy(ctx.0, cache);
            }
            krb5_free_cred_contents(ctx.0, &mut creds);
            res
        }
    }
}

impl Method for Kerberos {
    fn name(&self) -> &'static str {
        "kerberos"
    }

    fn init(&mut self, ctx: &AuthContext) -> bool {
        let res = Context::new().and_then(|c| {
            let p = c.parse_name(&ctx.user)?;
            Ok((c, p))
        });
        match res {
            Ok((c, p)) => {
                self.principal = Some(p);
                self.ctx = Some(c);
                true
            },
            Err(e) => {
                if ctx.verbose {
                    warn!("kerberos: {}", e);
                }
                false
            },
        }
    }
}

impl PasswordMethod for Kerberos {
    fn valid_p(&self, _ctx: &AuthContext, password: &str) -> bool {
        if password.is_empty() {
            return false;
        }
        match self.verify(password) {
            Ok(()) => true,
            Err(e) => {
                debug!("kerberos: {}", e);
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ccache_dir() {
        let cfg = config::Kerberos { ccache_dir: Some("/run/user/1000".to_string()) };
        let k = Kerberos::new(&cfg);
        assert!(ccache_name(&k.ccache_dir).starts_with("FILE:/run/user/1000/xss-lockcore-krb5cc-"));
    }

    #[test]
    fn test_uninitialized_refuses() {
        let k = Kerberos::new(&config::Kerberos::default());
        let ctx = AuthContext { user: "alice".to_string(), display: ":0".to_string(), verbose: false };
        assert!(!k.valid_p(&ctx, "secret"));
        assert!(!k.valid_p(&ctx, ""));
    }
}
