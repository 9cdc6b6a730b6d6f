use std::ffi::CString;
use std::marker::PhantomData;
use std::os::raw::{c_int, c_void};
use std::sync::atomic::Ordering;

use crate::conv::{conv_bridge, ConvData, Conversation, Message, Style};
use crate::pam::*;
use crate::TEST_MODE;

/// An open PAM transaction.
///
/// All calls are synchronous: libpam calls back into the `Conversation`
/// on the calling thread, as often as the module stack wants.
/// `pam_end` is called when the handle is dropped.
pub struct PamHandle<'a> {
    pamh:   *mut PamHandleT,
    conv:   *mut PamConvC,
    data:   *mut ConvData<'a>,
    status: c_int,
    test:   Option<String>,
    _conv:  PhantomData<&'a mut dyn Conversation>,
}

impl<'a> PamHandle<'a> {
    /// Start a transaction for `user` with PAM service `service`.
    pub fn start(service: &str, user: &str, conv: &'a mut dyn Conversation) -> Result<PamHandle<'a>, PamError> {
        let c_service = CString::new(service)?;
        let c_user = CString::new(user)?;

        let data = Box::into_raw(Box::new(ConvData { conv }));
        let pconv = Box::into_raw(Box::new(PamConvC {
            conv:        Some(conv_bridge),
            appdata_ptr: data as *mut c_void,
        }));
        let mut handle = PamHandle {
            pamh:   std::ptr::null_mut(),
            conv:   pconv,
            data,
            status: PAM_SUCCESS,
            test:   None,
            _conv:  PhantomData,
        };

        if TEST_MODE.load(Ordering::SeqCst) != 0 {
            trace!("PamHandle::start: test mode, service {} user {}", service, user);
            handle.test = Some(user.to_string());
            return Ok(handle);
        }

        let ret = unsafe { pam_start(c_service.as_ptr(), c_user.as_ptr(), pconv, &mut handle.pamh) };
        handle.status = ret;
        check(ret)?;
        debug!("pam_start(\"{}\", \"{}\") ok", service, user);
        Ok(handle)
    }

    fn record(&mut self, what: &str, ret: c_int) -> Result<(), PamError> {
        self.status = ret;
        let res = check(ret);
        match res {
            Ok(()) => debug!("{} ok", what),
            Err(ref e) => debug!("{} => {}", what, e),
        }
        res
    }

    /// Set PAM_TTY, which for an X11 locker is the display name.
    pub fn set_tty(&mut self, tty: &str) -> Result<(), PamError> {
        if self.test.is_some() {
            return Ok(());
        }
        let c_tty = CString::new(tty)?;
        let ret = unsafe { pam_set_item(self.pamh, PAM_TTY, c_tty.as_ptr() as *const c_void) };
        self.record("pam_set_item(PAM_TTY)", ret)
    }

    pub fn authenticate(&mut self, flags: c_int) -> Result<(), PamError> {
        if let Some(user) = self.test.clone() {
            return self.test_authenticate(&user);
        }
        let ret = unsafe { pam_authenticate(self.pamh, flags) };
        self.record("pam_authenticate", ret)
    }

    pub fn acct_mgmt(&mut self, flags: c_int) -> Result<(), PamError> {
        if self.test.is_some() {
            return Ok(());
        }
        let ret = unsafe { pam_acct_mgmt(self.pamh, flags) };
        self.record("pam_acct_mgmt", ret)
    }

    pub fn chauthtok(&mut self, flags: c_int) -> Result<(), PamError> {
        if self.test.is_some() {
            return Ok(());
        }
        let ret = unsafe { pam_chauthtok(self.pamh, flags) };
        self.record("pam_chauthtok", ret)
    }

    pub fn setcred(&mut self, flags: c_int) -> Result<(), PamError> {
        if self.test.is_some() {
            return Ok(());
        }
        let ret = unsafe { pam_setcred(self.pamh, flags) };
        self.record("pam_setcred", ret)
    }

    // In test mode user "test" with password "test" is accepted,
    // everyone else is refused. The conversation still runs.
    fn test_authenticate(&mut self, user: &str) -> Result<(), PamError> {
        let msgs = [Message { style: Style::PromptEchoOff, text: "Password: ".to_string() }];
        let answers = unsafe { (*self.data).conv.converse(&msgs) };
        let answer = match answers {
            Some(ref a) if a.len() == 1 => a[0].as_ref().map(|s| s.as_str()),
            _ => return Err(PamError(PAM_CONV_ERR)),
        };
        if user == "test" && answer == Some("test") {
            Ok(())
        } else {
            Err(PamError(ERR_TEST_MODE))
        }
    }
}

impl<'a> Drop for PamHandle<'a> {
    fn drop(&mut self) {
        unsafe {
            if !self.pamh.is_null() {
                let ret = pam_end(self.pamh, self.status);
                if ret != PAM_SUCCESS {
                    debug!("pam_end returned {}", ret);
                }
            }
            drop(Box::from_raw(self.conv));
            drop(Box::from_raw(self.data));
        }
    }
}
