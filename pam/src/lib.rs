//! Synchronous PAM authentication with a conversation function.
//!
//! This is a small binding to libpam for programs that drive the PAM
//! conversation themselves, such as a screen locker that shows each
//! PAM prompt in its own dialog and blocks until the user answers.
//!
//! Use it as follows:
//! ```no_run
//! use pam_conv::{Message, PamHandle};
//! use zeroize::Zeroizing;
//!
//! let mut conv = |msgs: &[Message]| -> Option<Vec<Option<Zeroizing<String>>>> {
//!     Some(msgs.iter().map(|_| Some(Zeroizing::new("secret".to_string()))).collect())
//! };
//! let mut pam = PamHandle::start("login", "user", &mut conv).unwrap();
//! let ok = pam.authenticate(0).is_ok();
//! ```
#[macro_use]
extern crate log;

mod conv;
mod handle;
mod pam;

use std::sync::atomic::{AtomicUsize, Ordering};

pub use crate::conv::{Conversation, Message, Style};
pub use crate::handle::PamHandle;
pub use crate::pam::{PamError, PAM_CHANGE_EXPIRED_AUTHTOK, PAM_CONV_ERR, PAM_REINITIALIZE_CRED};

pub(crate) static TEST_MODE: AtomicUsize = AtomicUsize::new(0);

// See bin/main.rs, mod tests.
#[doc(hidden)]
pub fn test_mode(enabled: bool) {
    let val = if enabled { 1 } else { 0 };
    TEST_MODE.store(val, Ordering::SeqCst);
}
