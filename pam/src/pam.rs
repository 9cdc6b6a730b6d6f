use std::error::Error;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};

// Linux-PAM return codes we care about.
pub const PAM_SUCCESS: c_int = 0;
pub const PAM_NEW_AUTHTOK_REQD: c_int = 12;
pub const PAM_CONV_ERR: c_int = 19;

// Item types for pam_set_item.
pub const PAM_TTY: c_int = 3;

// Message styles.
pub const PAM_PROMPT_ECHO_OFF: c_int = 1;
pub const PAM_PROMPT_ECHO_ON: c_int = 2;
pub const PAM_ERROR_MSG: c_int = 3;
pub const PAM_TEXT_INFO: c_int = 4;

// Flags.
pub const PAM_REINITIALIZE_CRED: c_int = 0x0008;
pub const PAM_CHANGE_EXPIRED_AUTHTOK: c_int = 0x0020;

pub(crate) const ERR_NUL_BYTE: i32 = 414243;
pub(crate) const ERR_TEST_MODE: i32 = 414244;

#[repr(C)]
pub(crate) struct PamMessageC {
    pub msg_style: c_int,
    pub msg:       *const c_char,
}

#[repr(C)]
pub(crate) struct PamResponseC {
    pub resp:         *mut c_char,
    pub resp_retcode: c_int,
}

pub(crate) type ConvFn = extern "C" fn(
    num_msg: c_int,
    msg: *mut *const PamMessageC,
    resp: *mut *mut PamResponseC,
    appdata_ptr: *mut c_void,
) -> c_int;

#[repr(C)]
pub(crate) struct PamConvC {
    pub conv:        Option<ConvFn>,
    pub appdata_ptr: *mut c_void,
}

pub(crate) enum PamHandleT {}

extern "C" {
    pub(crate) fn pam_start(
        service: *const c_char,
        user: *const c_char,
        conv: *const PamConvC,
        pamh: *mut *mut PamHandleT,
    ) -> c_int;
    pub(crate) fn pam_end(pamh: *mut PamHandleT, status: c_int) -> c_int;
    pub(crate) fn pam_set_item(pamh: *mut PamHandleT, item_type: c_int, item: *const c_void) -> c_int;
    pub(crate) fn pam_authenticate(pamh: *mut PamHandleT, flags: c_int) -> c_int;
    pub(crate) fn pam_acct_mgmt(pamh: *mut PamHandleT, flags: c_int) -> c_int;
    pub(crate) fn pam_chauthtok(pamh: *mut PamHandleT, flags: c_int) -> c_int;
    pub(crate) fn pam_setcred(pamh: *mut PamHandleT, flags: c_int) -> c_int;
    fn pam_strerror(pamh: *mut PamHandleT, errnum: c_int) -> *const c_char;
}

/// Error returned if a PAM call fails.
///
/// It's best not to try to interpret this, and handle all errors
/// as "authentication failed". The one exception is `new_authtok_reqd()`,
/// which callers use to decide on running `pam_chauthtok`.
#[derive(Debug, Clone, PartialEq)]
pub struct PamError(pub(crate) i32);

impl PamError {
    /// The raw PAM status code.
    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn new_authtok_reqd(&self) -> bool {
        self.0 == PAM_NEW_AUTHTOK_REQD
    }
}

impl std::fmt::Display for PamError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.0 {
            ERR_NUL_BYTE => write!(f, "embedded 0 byte in string"),
            ERR_TEST_MODE => write!(f, "test mode: authentication refused"),
            _ => {
                let errnum = self.0 as c_int;
                let errstr = unsafe {
                    let s = pam_strerror(std::ptr::null_mut(), errnum);
                    if s.is_null() {
                        return write!(f, "PAM error {}", errnum);
                    }
                    CStr::from_ptr(s).to_string_lossy()
                };
                write!(f, "PAM error: {} ({})", errstr, errnum)
            },
        }
    }
}

impl Error for PamError {}

impl From<std::ffi::NulError> for PamError {
    fn from(_e: std::ffi::NulError) -> Self {
        PamError(ERR_NUL_BYTE)
    }
}

pub(crate) fn check(ret: c_int) -> Result<(), PamError> {
    match ret {
        PAM_SUCCESS => Ok(()),
        errnum => Err(PamError(errnum)),
    }
}
