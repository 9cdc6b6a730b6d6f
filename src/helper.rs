//
//  The "helper" backend: let an external program check the password.
//
//  The helper is run with the user name as its only argument and the
//  password on stdin, followed by a newline. Exit status 0 means the
//  password is right. This is how a locker that isn't setuid can still
//  check shadow passwords: the helper is the one with the privileges.
//
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use zeroize::Zeroizing;

use crate::auth::{AuthContext, Method, PasswordMethod};
use crate::config;

pub struct Helper {
    program: PathBuf,
}

impl Helper {
    pub fn new(cfg: &config::Helper) -> Helper {
        Helper { program: PathBuf::from(&cfg.program) }
    }

    fn run(&self, user: &str, password: &str) -> std::io::Result<bool> {
        let mut child = Command::new(&self.program)
            .arg(user)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            let mut buf = Zeroizing::new(Vec::with_capacity(password.len() + 1));
            buf.extend_from_slice(password.as_bytes());
            buf.push(b'\n');
            let res = stdin.write_all(&buf);
            // a helper that exits early closes the pipe on us; the exit
            // status is what counts.
            if let Err(e) = res {
                debug!("helper: writing password: {}", e);
            }
        }
        let status = child.wait()?;
        debug!("helper: {:?} exited with {}", self.program, status);
        Ok(status.success())
    }
}

impl Method for Helper {
    fn name(&self) -> &'static str {
        "helper"
    }

    fn init(&mut self, ctx: &AuthContext) -> bool {
        let ok = match std::fs::metadata(&self.program) {
            Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        };
        if !ok && ctx.verbose {
            warn!("helper: {:?} is not an executable", self.program);
        }
        ok
    }
}

impl PasswordMethod for Helper {
    fn valid_p(&self, ctx: &AuthContext, password: &str) -> bool {
        match self.run(&ctx.user, password) {
            Ok(ok) => ok,
            Err(e) => {
                warn!("helper: running {:?}: {}", self.program, e);
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ctx() -> AuthContext {
        AuthContext { user: "alice".to_string(), display: ":0".to_string(), verbose: false }
    }

    fn write_helper(name: &str, script: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("xss-lockcore-{}-{}", name, std::process::id()));
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_helper_verdict() {
        let path = write_helper(
            "check",
            "#!/bin/sh\nread pw\n[ \"$1\" = alice ] && [ \"$pw\" = hunter2 ]\n",
        );
        let mut helper = Helper { program: path.clone() };
        assert!(helper.init(&ctx()));
        assert!(helper.valid_p(&ctx(), "hunter2"));
        assert!(!helper.valid_p(&ctx(), "hunter3"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_helper_missing() {
        let mut helper = Helper { program: PathBuf::from("/nonexistent/xss-lockcore-helper") };
        assert!(!helper.init(&ctx()));
        assert!(!helper.valid_p(&ctx(), "whatever"));
    }

    #[test]
    fn test_helper_not_executable() {
        let path = write_helper("noexec", "#!/bin/sh\nexit 0\n");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let mut helper = Helper { program: path.clone() };
        assert!(!helper.init(&ctx()));
        fs::remove_file(&path).ok();
    }
}
