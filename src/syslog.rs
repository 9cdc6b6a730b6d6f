// Audit trail for failed unlock attempts.
use std::ffi::CString;
use std::sync::Once;

/// Where failed unlock attempts get recorded.
pub trait AuditSink {
    fn failed(&mut self, display: &str, user: &str, count: u32);
}

/// Records failures via syslog(3), facility AUTHPRIV.
pub struct Syslog;

// openlog(3) keeps the ident pointer around.
lazy_static! {
    static ref IDENT: CString = CString::new(crate::progname()).unwrap_or_default();
}

static OPENLOG: Once = Once::new();

pub fn failure_message(display: &str, user: &str, count: u32) -> String {
    format!("FAILED LOGIN {} ON DISPLAY \"{}\", FOR \"{}\"", count, display, user)
}

impl AuditSink for Syslog {
    fn failed(&mut self, display: &str, user: &str, count: u32) {
        let msg = failure_message(display, user, count);
        warn!("{}", msg);
        let cmsg = match CString::new(msg) {
            Ok(c) => c,
            Err(_) => return,
        };
        unsafe {
            OPENLOG.call_once(|| libc::openlog(IDENT.as_ptr(), libc::LOG_PID, libc::LOG_AUTHPRIV));
            libc::syslog(libc::LOG_NOTICE | libc::LOG_AUTHPRIV, b"%s\0".as_ptr() as *const libc::c_char, cmsg.as_ptr());
        }
    }
}
