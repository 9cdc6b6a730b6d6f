//
//  A conversation on the controlling terminal, for `--unlock`.
//
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::auth::{AuthError, Conversation, Message, MessageKind, Response};

pub struct Tty {
    input:  BufReader<File>,
    output: File,
}

// Restores the terminal mode when dropped.
struct NoEcho {
    fd:    RawFd,
    saved: libc::termios,
}

impl NoEcho {
    fn new(fd: RawFd) -> io::Result<NoEcho> {
        unsafe {
            let mut saved: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut saved) < 0 {
                return Err(io::Error::last_os_error());
            }
            let mut t = saved;
            t.c_lflag &= !libc::ECHO;
            t.c_lflag |= libc::ECHONL;
            if libc::tcsetattr(fd, libc::TCSAFLUSH, &t) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(NoEcho { fd, saved })
        }
    }
}

impl Drop for NoEcho {
    fn drop(&mut self) {
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSAFLUSH, &self.saved);
        }
    }
}

// One line without the line ending. None at end of file.
fn read_answer(r: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    if r.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

impl Tty {
    pub fn open() -> io::Result<Tty> {
        let tty = OpenOptions::new().read(true).write(true).open("/dev/tty")?;
        let output = tty.try_clone()?;
        Ok(Tty {
            input: BufReader::new(tty),
            output,
        })
    }

    fn ask(&mut self, m: &Message) -> io::Result<Response> {
        write!(self.output, "{}", m.text)?;
        if !m.text.ends_with(' ') {
            write!(self.output, " ")?;
        }
        self.output.flush()?;
        let answer = match m.kind {
            MessageKind::PromptNoEcho => {
                let _guard = NoEcho::new(self.input.get_ref().as_raw_fd())?;
                read_answer(&mut self.input)?
            },
            _ => read_answer(&mut self.input)?,
        };
        match answer {
            Some(a) => Ok(Response::text(a)),
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of input")),
        }
    }
}

impl Conversation for Tty {
    fn converse(&mut self, msgs: &[Message]) -> Result<Vec<Response>, AuthError> {
        let mut resp = Vec::with_capacity(msgs.len());
        for m in msgs {
            if m.kind.is_prompt() {
                match self.ask(m) {
                    Ok(r) => resp.push(r),
                    Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(AuthError::Cancelled),
                    Err(e) => return Err(AuthError::Backend(e.to_string())),
                }
            } else {
                if let Err(e) = writeln!(self.output, "{}", m.text) {
                    return Err(AuthError::Backend(e.to_string()));
                }
                resp.push(Response::none());
            }
        }
        Ok(resp)
    }
}
