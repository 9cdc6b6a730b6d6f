//
//  The PAM backend. PAM runs its own conversation, possibly over several
//  rounds, so this is an interactive method: every PAM message batch is
//  passed through to the caller's conversation function.
//
use std::path::Path;

use pam_conv::{PamHandle, PAM_CHANGE_EXPIRED_AUTHTOK, PAM_REINITIALIZE_CRED};
use zeroize::Zeroizing;

use crate::auth::{AuthContext, Conversation, InteractiveMethod, Message, MessageKind, Method};
use crate::config;

pub struct Pam {
    service: String,
}

impl Pam {
    pub fn new(cfg: &config::Pam) -> Pam {
        Pam { service: cfg.service.clone() }
    }
}

fn to_message(m: &pam_conv::Message) -> Message {
    let kind = match m.style {
        pam_conv::Style::Info => MessageKind::Info,
        pam_conv::Style::Error => MessageKind::Error,
        pam_conv::Style::PromptEchoOff => MessageKind::PromptNoEcho,
        pam_conv::Style::PromptEchoOn => MessageKind::PromptEcho,
    };
    Message::new(kind, m.text.clone())
}

impl Method for Pam {
    fn name(&self) -> &'static str {
        "pam"
    }

    // Nothing needs privileges here, but a missing service file silently
    // falls back to "other", which is often "deny everything".
    fn priv_init(&mut self, ctx: &AuthContext) -> bool {
        let dir = Path::new("/etc/pam.d");
        let file = dir.join(&self.service);
        if dir.is_dir() {
            if !file.exists() && ctx.verbose {
                warn!("pam: {:?} does not exist; authentication might fail", file);
            }
        } else if !Path::new("/etc/pam.conf").exists() && ctx.verbose {
            warn!("pam: neither /etc/pam.d nor /etc/pam.conf exist; authentication might fail");
        }
        true
    }
}

impl InteractiveMethod for Pam {
    fn try_unlock(&mut self, ctx: &AuthContext, conv: &mut dyn Conversation) -> bool {
        let mut bridge = |msgs: &[pam_conv::Message]| -> Option<Vec<Option<Zeroizing<String>>>> {
            let msgs: Vec<Message> = msgs.iter().map(to_message).collect();
            match conv.converse(&msgs) {
                Ok(mut resp) => Some(resp.iter_mut().map(|r| r.take()).collect()),
                Err(e) => {
                    debug!("pam: conversation: {}", e);
                    None
                },
            }
        };

        let mut pamh = match PamHandle::start(&self.service, &ctx.user, &mut bridge) {
            Ok(h) => h,
            Err(e) => {
                warn!("pam: pam_start(\"{}\", \"{}\"): {}", self.service, ctx.user, e);
                return false;
            },
        };

        if let Err(e) = pamh.set_tty(&ctx.display) {
            debug!("pam: can't set PAM_TTY: {}", e);
        }

        if let Err(e) = pamh.authenticate(0) {
            debug!("pam: authentication for {} failed: {}", ctx.user, e);
            return false;
        }

        // an expired password can be changed right here, through the same dialog.
        if let Err(e) = pamh.acct_mgmt(0) {
            if !e.new_authtok_reqd() {
                debug!("pam: pam_acct_mgmt: {}", e);
                return false;
            }
            if let Err(e) = pamh.chauthtok(PAM_CHANGE_EXPIRED_AUTHTOK) {
                debug!("pam: pam_chauthtok: {}", e);
                return false;
            }
        }

        // Kerberos tickets and the like; not fatal if it doesn't work.
        if let Err(e) = pamh.setcred(PAM_REINITIALIZE_CRED) {
            if ctx.verbose {
                warn!("pam: pam_setcred: {}", e);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, Response};

    #[test]
    fn test_message_kinds() {
        let m = pam_conv::Message { style: pam_conv::Style::PromptEchoOn, text: "Login:".to_string() };
        let m = to_message(&m);
        assert_eq!(m.kind, MessageKind::PromptEcho);
        assert_eq!(m.text, "Login:");
    }

    #[test]
    fn test_try_unlock_test_mode() {
        pam_conv::test_mode(true);
        let ctx = AuthContext { user: "test".to_string(), display: ":0".to_string(), verbose: false };
        let mut pam = Pam { service: "xyzzy-test-test".to_string() };

        let mut good = |msgs: &[Message]| -> Result<Vec<Response>, AuthError> {
            Ok(msgs.iter().map(|_| Response::text("test".to_string())).collect())
        };
        assert!(pam.try_unlock(&ctx, &mut good));

        let mut bad = |msgs: &[Message]| -> Result<Vec<Response>, AuthError> {
            Ok(msgs.iter().map(|_| Response::text("nope".to_string())).collect())
        };
        assert!(!pam.try_unlock(&ctx, &mut bad));
    }
}
