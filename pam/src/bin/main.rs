use std::io::{self, Write};

use pam_conv::{Message, PamHandle, Style};
use zeroize::Zeroizing;

fn prompt(s: &str) -> io::Result<String> {
    print!("{}", s);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let service = std::env::args().nth(1).unwrap_or_else(|| "other".to_string());
    let name = prompt("What's your login? ")?;

    let mut conv = |msgs: &[Message]| -> Option<Vec<Option<Zeroizing<String>>>> {
        let mut answers = Vec::with_capacity(msgs.len());
        for m in msgs {
            match m.style {
                Style::Info | Style::Error => {
                    println!("{}", m.text);
                    answers.push(None);
                },
                Style::PromptEchoOn | Style::PromptEchoOff => {
                    answers.push(Some(Zeroizing::new(prompt(&m.text).ok()?)));
                },
            }
        }
        Some(answers)
    };

    let mut pam = PamHandle::start(&service, &name, &mut conv)?;
    match pam.authenticate(0) {
        Ok(()) => println!("pam.authenticate returned Ok"),
        Err(e) => println!("pam.authenticate returned error: {}", e),
    }
    Ok(())
}

// These run libpam in test mode, so they don't need a configured PAM stack.
#[cfg(test)]
mod tests {
    use pam_conv::{test_mode, Message, PamHandle};
    use zeroize::Zeroizing;

    fn answer(pw: &'static str) -> impl FnMut(&[Message]) -> Option<Vec<Option<Zeroizing<String>>>> {
        move |msgs: &[Message]| -> Option<Vec<Option<Zeroizing<String>>>> {
            Some(msgs.iter().map(|_| Some(Zeroizing::new(pw.to_string()))).collect())
        }
    }

    #[test]
    fn test_auth() {
        test_mode(true);

        let mut good = answer("test");
        let mut pam = PamHandle::start("xyzzy-test-test", "test", &mut good).unwrap();
        assert!(pam.authenticate(0).is_ok());
        assert!(pam.acct_mgmt(0).is_ok());
        drop(pam);

        let mut bad = answer("wrong");
        let mut pam = PamHandle::start("xyzzy-test-test", "test", &mut bad).unwrap();
        assert!(pam.authenticate(0).is_err());
        drop(pam);

        let mut good = answer("test");
        let mut pam = PamHandle::start("xyzzy-test-test", "unknown", &mut good).unwrap();
        assert!(pam.authenticate(0).is_err());
    }

    #[test]
    fn test_cancelled_conversation() {
        test_mode(true);

        let mut cancel = |_msgs: &[Message]| -> Option<Vec<Option<Zeroizing<String>>>> { None };
        let mut pam = PamHandle::start("xyzzy-test-test", "test", &mut cancel).unwrap();
        let err = pam.authenticate(0).unwrap_err();
        assert_eq!(err.code(), pam_conv::PAM_CONV_ERR);
    }
}
