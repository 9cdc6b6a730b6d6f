// The bridge between libpam's C conversation callback and a Rust
// `Conversation` implementation.
//
// libpam calls `conv_bridge` synchronously from inside pam_authenticate()
// and friends, on the same thread. The responses are allocated with the
// C allocator because libpam frees them.
//
use std::ffi::CStr;
#[cfg(test)]
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};

use zeroize::Zeroizing;

use crate::pam::*;

/// The kind of message libpam wants shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Info,
    Error,
    PromptEchoOff,
    PromptEchoOn,
}

impl Style {
    pub(crate) fn from_raw(style: c_int) -> Option<Style> {
        match style {
            PAM_TEXT_INFO => Some(Style::Info),
            PAM_ERROR_MSG => Some(Style::Error),
            PAM_PROMPT_ECHO_OFF => Some(Style::PromptEchoOff),
            PAM_PROMPT_ECHO_ON => Some(Style::PromptEchoOn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub style: Style,
    pub text:  String,
}

/// One round of conversation: N messages in, exactly N responses out.
///
/// Returning `None`, or a vector of the wrong length, fails the
/// round with PAM_CONV_ERR. Answers are wiped once they are copied
/// into libpam's buffers.
pub trait Conversation {
    fn converse(&mut self, msgs: &[Message]) -> Option<Vec<Option<Zeroizing<String>>>>;
}

impl<F> Conversation for F
where F: FnMut(&[Message]) -> Option<Vec<Option<Zeroizing<String>>>>
{
    fn converse(&mut self, msgs: &[Message]) -> Option<Vec<Option<Zeroizing<String>>>> {
        (self)(msgs)
    }
}

// The appdata pointer handed to libpam points at one of these.
pub(crate) struct ConvData<'a> {
    pub conv: &'a mut dyn Conversation,
}

pub(crate) extern "C" fn conv_bridge(
    num_msg: c_int,
    msg: *mut *const PamMessageC,
    resp: *mut *mut PamResponseC,
    appdata_ptr: *mut c_void,
) -> c_int
{
    if num_msg <= 0 || msg.is_null() || resp.is_null() || appdata_ptr.is_null() {
        return PAM_CONV_ERR;
    }
    // never unwind into libpam.
    let res = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        let data = &mut *(appdata_ptr as *mut ConvData);
        let msgs = read_messages(num_msg as usize, msg)?;
        let answers = data.conv.converse(&msgs)?;
        if answers.len() != msgs.len() {
            debug!("conv_bridge: {} messages but {} responses", msgs.len(), answers.len());
            return None;
        }
        alloc_responses(&answers)
    }));
    match res {
        Ok(Some(ptr)) => {
            unsafe { *resp = ptr };
            PAM_SUCCESS
        },
        Ok(None) => PAM_CONV_ERR,
        Err(_) => {
            error!("conv_bridge: conversation function panicked");
            PAM_CONV_ERR
        },
    }
}

// Linux-PAM passes an array of pointers to messages.
unsafe fn read_messages(n: usize, msg: *mut *const PamMessageC) -> Option<Vec<Message>> {
    let mut msgs = Vec::with_capacity(n);
    for i in 0..n {
        let m = *msg.add(i);
        if m.is_null() {
            return None;
        }
        let style = match Style::from_raw((*m).msg_style) {
            Some(style) => style,
            None => {
                debug!("conv_bridge: unknown message style {}", (*m).msg_style);
                return None;
            },
        };
        let text = if (*m).msg.is_null() {
            String::new()
        } else {
            CStr::from_ptr((*m).msg).to_string_lossy().into_owned()
        };
        msgs.push(Message { style, text });
    }
    Some(msgs)
}

unsafe fn alloc_responses(answers: &[Option<Zeroizing<String>>]) -> Option<*mut PamResponseC> {
    let size = std::mem::size_of::<PamResponseC>();
    let arr = libc::calloc(answers.len(), size) as *mut PamResponseC;
    if arr.is_null() {
        return None;
    }
    for (i, answer) in answers.iter().enumerate() {
        let slot = &mut *arr.add(i);
        slot.resp_retcode = 0;
        slot.resp = match answer {
            None => std::ptr::null_mut(),
            Some(text) => match c_copy(text.as_bytes()) {
                Some(dup) => dup,
                None => {
                    free_responses(arr, i);
                    return None;
                },
            },
        };
    }
    Some(arr)
}

// Copy straight into a malloc'ed C string, so no intermediate
// copy of the answer is left behind.
unsafe fn c_copy(bytes: &[u8]) -> Option<*mut c_char> {
    if bytes.contains(&0) {
        return None;
    }
    let dup = libc::malloc(bytes.len() + 1) as *mut c_char;
    if dup.is_null() {
        return None;
    }
    std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, dup, bytes.len());
    *dup.add(bytes.len()) = 0;
    Some(dup)
}

unsafe fn free_responses(arr: *mut PamResponseC, filled: usize) {
    for i in 0..filled {
        let slot = &mut *arr.add(i);
        if !slot.resp.is_null() {
            let len = libc::strlen(slot.resp);
            std::ptr::write_bytes(slot.resp, 0, len);
            libc::free(slot.resp as *mut c_void);
        }
    }
    libc::free(arr as *mut c_void);
}

// Run a single round through the bridge the way libpam would, so the
// marshalling can be tested without a PAM stack.
#[cfg(test)]
pub(crate) fn bridge_round(conv: &mut dyn Conversation, msgs: &[(c_int, &str)]) -> Result<Vec<Option<String>>, c_int> {
    let texts: Vec<CString> = msgs.iter().map(|(_, t)| CString::new(*t).unwrap()).collect();
    let cmsgs: Vec<PamMessageC> = msgs
        .iter()
        .zip(texts.iter())
        .map(|((style, _), t)| PamMessageC { msg_style: *style, msg: t.as_ptr() })
        .collect();
    let mut ptrs: Vec<*const PamMessageC> = cmsgs.iter().map(|m| m as *const _).collect();
    let mut data = ConvData { conv };
    let mut resp: *mut PamResponseC = std::ptr::null_mut();
    let ret = conv_bridge(
        ptrs.len() as c_int,
        ptrs.as_mut_ptr(),
        &mut resp,
        &mut data as *mut ConvData as *mut c_void,
    );
    if ret != PAM_SUCCESS {
        return Err(ret);
    }
    let mut out = Vec::new();
    unsafe {
        for i in 0..msgs.len() {
            let slot = &*resp.add(i);
            if slot.resp.is_null() {
                out.push(None);
            } else {
                out.push(Some(CStr::from_ptr(slot.resp as *const c_char).to_string_lossy().into_owned()));
            }
        }
        free_responses(resp, msgs.len());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_round() {
        let mut seen = Vec::new();
        let mut conv = |msgs: &[Message]| -> Option<Vec<Option<Zeroizing<String>>>> {
            seen.extend(msgs.iter().map(|m| m.style));
            Some(msgs.iter().map(|m| match m.style {
                Style::PromptEchoOff => Some(Zeroizing::new("secret".to_string())),
                _ => None,
            }).collect())
        };
        let res = bridge_round(&mut conv, &[
            (PAM_TEXT_INFO, "hello"),
            (PAM_PROMPT_ECHO_OFF, "Password: "),
        ]);
        assert_eq!(res, Ok(vec![None, Some("secret".to_string())]));
        assert_eq!(seen, vec![Style::Info, Style::PromptEchoOff]);
    }

    #[test]
    fn test_bridge_short_answer() {
        let mut conv = |_msgs: &[Message]| -> Option<Vec<Option<Zeroizing<String>>>> {
            Some(vec![Some(Zeroizing::new("x".to_string()))])
        };
        let res = bridge_round(&mut conv, &[
            (PAM_ERROR_MSG, "oops"),
            (PAM_PROMPT_ECHO_ON, "Login: "),
        ]);
        assert_eq!(res, Err(PAM_CONV_ERR));
    }

    #[test]
    fn test_bridge_cancel() {
        let mut conv = |_msgs: &[Message]| -> Option<Vec<Option<Zeroizing<String>>>> { None };
        let res = bridge_round(&mut conv, &[(PAM_PROMPT_ECHO_OFF, "Password: ")]);
        assert_eq!(res, Err(PAM_CONV_ERR));
    }

    #[test]
    fn test_bridge_nul_in_answer() {
        let mut conv = |_msgs: &[Message]| -> Option<Vec<Option<Zeroizing<String>>>> {
            Some(vec![Some(Zeroizing::new("se\0cret".to_string()))])
        };
        let res = bridge_round(&mut conv, &[(PAM_PROMPT_ECHO_OFF, "Password: ")]);
        assert_eq!(res, Err(PAM_CONV_ERR));
    }

    #[test]
    fn test_bridge_bad_style() {
        let mut conv = |msgs: &[Message]| -> Option<Vec<Option<Zeroizing<String>>>> { Some(vec![None; msgs.len()]) };
        let res = bridge_round(&mut conv, &[(99, "??")]);
        assert_eq!(res, Err(PAM_CONV_ERR));
    }
}
