//
//  The authentication dispatcher.
//
//  Holds the ordered list of credential backends, initializes them in two
//  phases around the privilege drop, and drives exactly one backend per
//  unlock attempt.
//
use std::error::Error;
use std::fmt;
use std::marker::PhantomData;

use zeroize::Zeroizing;

use crate::config::Config;
use crate::syslog::AuditSink;

/// What a message asks of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Error,
    PromptNoEcho,
    PromptEcho,
}

impl MessageKind {
    pub fn is_prompt(self) -> bool {
        self == MessageKind::PromptNoEcho || self == MessageKind::PromptEcho
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
}

impl Message {
    pub fn new(kind: MessageKind, text: impl Into<String>) -> Message {
        Message { kind, text: text.into() }
    }
}

/// The answer to one message. Prompts get `Some(text)`, the rest `None`.
///
/// The text is wiped when the response is dropped.
#[derive(Default)]
pub struct Response(Option<Zeroizing<String>>);

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "Response(<hidden>)"),
            None => write!(f, "Response(None)"),
        }
    }
}

impl Response {
    pub fn none() -> Response {
        Response(None)
    }

    pub fn text(text: String) -> Response {
        Response(Some(Zeroizing::new(text)))
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_ref().map(|s| s.as_str())
    }

    /// Move the text out, still wrapped so it is wiped wherever it ends up.
    pub fn take(&mut self) -> Option<Zeroizing<String>> {
        self.0.take()
    }
}

/// A NUL-terminated copy of a password for C code. Wiped on drop.
#[cfg(any(feature = "pwent", feature = "kerberos"))]
pub fn secret_cstring(s: &str) -> Option<Zeroizing<Vec<u8>>> {
    if s.as_bytes().contains(&0) {
        return None;
    }
    let mut buf = Zeroizing::new(Vec::with_capacity(s.len() + 1));
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Some(buf)
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// The user cancelled the dialog or it timed out.
    Cancelled,
    /// The conversation returned the wrong number of responses.
    Arity { expected: usize, got: usize },
    /// The backend itself failed.
    Backend(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::Cancelled => write!(f, "conversation cancelled"),
            AuthError::Arity { expected, got } => {
                write!(f, "conversation returned {} responses for {} messages", got, expected)
            },
            AuthError::Backend(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for AuthError {}

/// The GUI side of an unlock attempt.
///
/// Given N messages, return exactly N responses. This blocks the calling
/// thread until the user answers; cancelling is `Err(AuthError::Cancelled)`.
pub trait Conversation {
    fn converse(&mut self, msgs: &[Message]) -> Result<Vec<Response>, AuthError>;
}

impl<F> Conversation for F
where F: FnMut(&[Message]) -> Result<Vec<Response>, AuthError>
{
    fn converse(&mut self, msgs: &[Message]) -> Result<Vec<Response>, AuthError> {
        (self)(msgs)
    }
}

// Wraps the caller's conversation so no backend ever sees a response
// vector that doesn't line up with its messages.
struct Checked<'a> {
    inner: &'a mut dyn Conversation,
}

impl<'a> Conversation for Checked<'a> {
    fn converse(&mut self, msgs: &[Message]) -> Result<Vec<Response>, AuthError> {
        let resp = self.inner.converse(msgs)?;
        if resp.len() != msgs.len() {
            return Err(AuthError::Arity { expected: msgs.len(), got: resp.len() });
        }
        Ok(resp)
    }
}

/// Who is being authenticated, and where.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user:    String,
    pub display: String,
    pub verbose: bool,
}

/// Initialization hooks every backend has. Absent means "nothing to do".
pub trait Method {
    fn name(&self) -> &'static str;

    /// Runs before privileges are dropped.
    fn priv_init(&mut self, _ctx: &AuthContext) -> bool {
        true
    }

    /// Runs after privileges are dropped.
    fn init(&mut self, _ctx: &AuthContext) -> bool {
        true
    }
}

/// A backend that can only check a typed password.
pub trait PasswordMethod: Method {
    fn valid_p(&self, ctx: &AuthContext, password: &str) -> bool;
}

/// A backend that runs its own, possibly multi-round, conversation.
pub trait InteractiveMethod: Method {
    fn try_unlock(&mut self, ctx: &AuthContext, conv: &mut dyn Conversation) -> bool;
}

/// A backend is one or the other, never both and never neither.
pub enum Backend {
    Password(Box<dyn PasswordMethod>),
    Interactive(Box<dyn InteractiveMethod>),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Password(m) => m.name(),
            Backend::Interactive(m) => m.name(),
        }
    }

    fn priv_init(&mut self, ctx: &AuthContext) -> bool {
        match self {
            Backend::Password(m) => m.priv_init(ctx),
            Backend::Interactive(m) => m.priv_init(ctx),
        }
    }

    fn init(&mut self, ctx: &AuthContext) -> bool {
        match self {
            Backend::Password(m) => m.init(ctx),
            Backend::Interactive(m) => m.init(ctx),
        }
    }

    fn unlock(&mut self, ctx: &AuthContext, conv: &mut dyn Conversation) -> bool {
        let mut conv = Checked { inner: conv };
        match self {
            Backend::Interactive(m) => m.try_unlock(ctx, &mut conv),
            Backend::Password(m) => {
                // a single-round "Password:" conversation around valid_p.
                let msgs = [Message::new(MessageKind::PromptNoEcho, "Password:")];
                let resp = match conv.converse(&msgs) {
                    Ok(resp) => resp,
                    Err(e) => {
                        debug!("{}: conversation failed: {}", m.name(), e);
                        return false;
                    },
                };
                match resp[0].as_str() {
                    Some(pw) => m.valid_p(ctx, pw),
                    None => false,
                }
            },
        }
    }
}

struct Slot {
    backend:      Backend,
    priv_initted: bool,
    initted:      bool,
}

/// Phase marker: nothing initialized yet.
pub enum Fresh {}
/// Phase marker: privileged init done, privileges not yet dropped.
pub enum PrivInitDone {}
/// Phase marker: fully initialized, unlock attempts allowed.
pub enum Ready {}

/// The dispatcher, typed by initialization phase.
pub struct Dispatcher<P> {
    slots:    Vec<Slot>,
    ctx:      AuthContext,
    audit:    Box<dyn AuditSink>,
    failures: u32,
    _phase:   PhantomData<P>,
}

impl<P> Dispatcher<P> {
    fn into_phase<Q>(self) -> Dispatcher<Q> {
        Dispatcher {
            slots:    self.slots,
            ctx:      self.ctx,
            audit:    self.audit,
            failures: self.failures,
            _phase:   PhantomData,
        }
    }

    pub fn context(&self) -> &AuthContext {
        &self.ctx
    }

    /// Names of the backends still in the running, in preference order.
    pub fn usable(&self) -> Vec<&'static str> {
        self.slots.iter().filter(|s| s.initted).map(|s| s.backend.name()).collect()
    }
}

impl Dispatcher<Fresh> {
    pub fn new(backends: Vec<Backend>, ctx: AuthContext, audit: Box<dyn AuditSink>) -> Dispatcher<Fresh> {
        let slots = backends
            .into_iter()
            .map(|backend| Slot { backend, priv_initted: false, initted: false })
            .collect();
        Dispatcher {
            slots,
            ctx,
            audit,
            failures: 0,
            _phase: PhantomData,
        }
    }

    /// Call this before privileges are dropped. Returns the dispatcher
    /// for the next phase, and whether any backend survived.
    pub fn lock_priv_init(mut self) -> (Dispatcher<PrivInitDone>, bool) {
        let mut any = false;
        for slot in self.slots.iter_mut() {
            slot.priv_initted = slot.backend.priv_init(&self.ctx);
            if slot.priv_initted {
                any = true;
            } else if self.ctx.verbose {
                warn!("{}: initialization failed (privileged)", slot.backend.name());
            } else {
                debug!("{}: priv_init failed", slot.backend.name());
            }
        }
        (self.into_phase(), any)
    }
}

impl Dispatcher<PrivInitDone> {
    /// Call this after privileges are dropped.
    pub fn lock_init(mut self) -> (Dispatcher<Ready>, bool) {
        let mut any = false;
        for slot in self.slots.iter_mut() {
            if !slot.priv_initted {
                continue;
            }
            slot.initted = slot.backend.init(&self.ctx);
            if slot.initted {
                any = true;
            } else if self.ctx.verbose {
                warn!("{}: initialization failed", slot.backend.name());
            } else {
                debug!("{}: init failed", slot.backend.name());
            }
        }
        (self.into_phase(), any)
    }
}

impl Dispatcher<Ready> {
    /// Run one unlock attempt through the first usable backend.
    ///
    /// We never fall through to a second backend: it would ask again
    /// for the password the first one just rejected. `finished` is
    /// called exactly once with the verdict, which is also returned.
    pub fn xscreensaver_auth<F>(&mut self, conv: &mut dyn Conversation, finished: F) -> bool
    where F: FnOnce(bool) {
        let mut ok = false;
        let mut tried = None;
        for slot in self.slots.iter_mut() {
            if !slot.initted {
                continue;
            }
            ok = slot.backend.unlock(&self.ctx, conv);
            tried = Some(slot.backend.name());
            break;
        }

        match tried {
            Some(name) => debug!("{}: authentication {}", name, if ok { "succeeded" } else { "failed" }),
            None => debug!("no usable authentication method"),
        }

        if ok {
            if self.failures > 0 {
                info!(
                    "unlocked by \"{}\" on display \"{}\" after {} failure(s)",
                    self.ctx.user, self.ctx.display, self.failures
                );
            }
            self.failures = 0;
        } else {
            self.failures += 1;
            self.audit.failed(&self.ctx.display, &self.ctx.user, self.failures);
        }

        finished(ok);
        ok
    }
}

/// Build the backend list from the compiled-in features, in preference
/// order, restricted and reordered by `[lock] methods` when set.
pub fn backends(config: &Config) -> Vec<Backend> {
    let mut all: Vec<Backend> = Vec::new();

    #[cfg(feature = "kerberos")]
    all.push(Backend::Password(Box::new(crate::kerberos::Kerberos::new(&config.kerberos))));

    #[cfg(feature = "pam")]
    all.push(Backend::Interactive(Box::new(crate::pam_auth::Pam::new(&config.pam))));

    #[cfg(feature = "helper")]
    all.push(Backend::Password(Box::new(crate::helper::Helper::new(&config.helper))));

    #[cfg(feature = "pwent")]
    all.push(Backend::Password(Box::new(crate::passwd::Pwent::new())));

    match config.lock.methods {
        None => all,
        Some(ref names) => {
            let mut picked = Vec::new();
            for name in names {
                if let Some(idx) = all.iter().position(|b| b.name() == name.as_str()) {
                    picked.push(all.remove(idx));
                }
            }
            picked
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Mock {
        name:      &'static str,
        priv_ok:   bool,
        init_ok:   bool,
        password:  &'static str,
        log:       Log,
    }

    impl Mock {
        fn new(name: &'static str, log: &Log) -> Mock {
            Mock { name, priv_ok: true, init_ok: true, password: "secret", log: log.clone() }
        }
    }

    impl Method for Mock {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priv_init(&mut self, _ctx: &AuthContext) -> bool {
            self.log.borrow_mut().push(format!("{}:priv_init", self.name));
            self.priv_ok
        }
        fn init(&mut self, _ctx: &AuthContext) -> bool {
            self.log.borrow_mut().push(format!("{}:init", self.name));
            self.init_ok
        }
    }

    impl PasswordMethod for Mock {
        fn valid_p(&self, _ctx: &AuthContext, password: &str) -> bool {
            self.log.borrow_mut().push(format!("{}:valid_p", self.name));
            password == self.password
        }
    }

    struct MockPam {
        log: Log,
    }

    impl Method for MockPam {
        fn name(&self) -> &'static str {
            "pam"
        }
    }

    impl InteractiveMethod for MockPam {
        fn try_unlock(&mut self, _ctx: &AuthContext, conv: &mut dyn Conversation) -> bool {
            self.log.borrow_mut().push("pam:try_unlock".to_string());
            // two rounds, like a PAM stack asking for a token and a password.
            let round1 = [
                Message::new(MessageKind::Info, "Touch your token"),
                Message::new(MessageKind::PromptEcho, "Token:"),
            ];
            let token = match conv.converse(&round1) {
                Ok(r) => r[1].as_str() == Some("123456"),
                Err(_) => return false,
            };
            let round2 = [Message::new(MessageKind::PromptNoEcho, "Password:")];
            match conv.converse(&round2) {
                Ok(r) => token && r[0].as_str() == Some("secret"),
                Err(_) => false,
            }
        }
    }

    #[derive(Default, Clone)]
    struct MemAudit(Rc<RefCell<Vec<(String, String, u32)>>>);

    impl AuditSink for MemAudit {
        fn failed(&mut self, display: &str, user: &str, count: u32) {
            self.0.borrow_mut().push((display.to_string(), user.to_string(), count));
        }
    }

    fn ctx() -> AuthContext {
        AuthContext { user: "alice".to_string(), display: ":0".to_string(), verbose: false }
    }

    fn ready(backends: Vec<Backend>, audit: &MemAudit) -> Dispatcher<Ready> {
        let d = Dispatcher::new(backends, ctx(), Box::new(audit.clone()));
        let (d, _) = d.lock_priv_init();
        let (d, _) = d.lock_init();
        d
    }

    fn answer(pw: &'static str) -> impl FnMut(&[Message]) -> Result<Vec<Response>, AuthError> {
        move |msgs: &[Message]| -> Result<Vec<Response>, AuthError> {
            Ok(msgs
                .iter()
                .map(|m| if m.kind.is_prompt() { Response::text(pw.to_string()) } else { Response::none() })
                .collect())
        }
    }

    #[test]
    fn test_single_backend_per_attempt() {
        let log = Log::default();
        let audit = MemAudit::default();
        let mut d = ready(
            vec![
                Backend::Password(Box::new(Mock::new("first", &log))),
                Backend::Password(Box::new(Mock::new("second", &log))),
            ],
            &audit,
        );
        log.borrow_mut().clear();

        let mut verdict = None;
        let ok = d.xscreensaver_auth(&mut answer("wrong"), |ok| verdict = Some(ok));
        assert!(!ok);
        assert_eq!(verdict, Some(false));
        assert_eq!(*log.borrow(), vec!["first:valid_p"]);
        assert_eq!(*audit.0.borrow(), vec![(":0".to_string(), "alice".to_string(), 1)]);

        let ok = d.xscreensaver_auth(&mut answer("secret"), |_| ());
        assert!(ok);
        assert_eq!(*log.borrow(), vec!["first:valid_p", "first:valid_p"]);
        assert_eq!(audit.0.borrow().len(), 1);
    }

    #[test]
    fn test_priv_init_failure_excludes_backend() {
        let log = Log::default();
        let audit = MemAudit::default();
        let mut bad = Mock::new("bad", &log);
        bad.priv_ok = false;
        let d = Dispatcher::new(
            vec![Backend::Password(Box::new(bad)), Backend::Password(Box::new(Mock::new("good", &log)))],
            ctx(),
            Box::new(audit.clone()),
        );
        let (d, any) = d.lock_priv_init();
        assert!(any);
        let (mut d, any) = d.lock_init();
        assert!(any);
        assert_eq!(*log.borrow(), vec!["bad:priv_init", "good:priv_init", "good:init"]);
        assert_eq!(d.usable(), vec!["good"]);

        assert!(d.xscreensaver_auth(&mut answer("secret"), |_| ()));
        assert!(!log.borrow().iter().any(|l| l == "bad:valid_p"));
    }

    #[test]
    fn test_nothing_initialized() {
        let log = Log::default();
        let audit = MemAudit::default();
        let mut m = Mock::new("only", &log);
        m.init_ok = false;
        let d = Dispatcher::new(vec![Backend::Password(Box::new(m))], ctx(), Box::new(audit.clone()));
        let (d, any) = d.lock_priv_init();
        assert!(any);
        let (mut d, any) = d.lock_init();
        assert!(!any);

        let mut called = 0;
        assert!(!d.xscreensaver_auth(&mut answer("secret"), |ok| {
            assert!(!ok);
            called += 1;
        }));
        assert_eq!(called, 1);
        assert_eq!(audit.0.borrow().len(), 1);
    }

    #[test]
    fn test_response_arity() {
        let log = Log::default();
        let audit = MemAudit::default();
        let mut d = ready(vec![Backend::Password(Box::new(Mock::new("pw", &log)))], &audit);
        log.borrow_mut().clear();

        let mut none = |_msgs: &[Message]| -> Result<Vec<Response>, AuthError> { Ok(Vec::new()) };
        assert!(!d.xscreensaver_auth(&mut none, |_| ()));

        let mut many = |_msgs: &[Message]| -> Result<Vec<Response>, AuthError> {
            Ok(vec![Response::text("secret".to_string()), Response::text("secret".to_string())])
        };
        assert!(!d.xscreensaver_auth(&mut many, |_| ()));

        let mut cancel = |_msgs: &[Message]| -> Result<Vec<Response>, AuthError> { Err(AuthError::Cancelled) };
        assert!(!d.xscreensaver_auth(&mut cancel, |_| ()));

        let mut empty = |msgs: &[Message]| -> Result<Vec<Response>, AuthError> {
            Ok(msgs.iter().map(|_| Response::none()).collect())
        };
        assert!(!d.xscreensaver_auth(&mut empty, |_| ()));

        // valid_p never ran: every one of those failed in the conversation.
        assert!(log.borrow().is_empty());
        assert_eq!(audit.0.borrow().last().map(|a| a.2), Some(4));
    }

    #[test]
    fn test_response_take() {
        let mut r = Response::text("secret".to_string());
        assert_eq!(format!("{:?}", r), "Response(<hidden>)");
        let text = r.take();
        assert_eq!(text.as_ref().map(|s| s.as_str()), Some("secret"));
        assert_eq!(r.as_str(), None);
        assert_eq!(format!("{:?}", r), "Response(None)");
    }

    #[cfg(any(feature = "pwent", feature = "kerberos"))]
    #[test]
    fn test_secret_cstring() {
        assert_eq!(secret_cstring("pw").map(|b| b.to_vec()), Some(b"pw\0".to_vec()));
        assert_eq!(secret_cstring("").map(|b| b.to_vec()), Some(b"\0".to_vec()));
        assert!(secret_cstring("p\0w").is_none());
    }

    #[test]
    fn test_interactive_backend() {
        let log = Log::default();
        let audit = MemAudit::default();
        let mut d = ready(
            vec![
                Backend::Interactive(Box::new(MockPam { log: log.clone() })),
                Backend::Password(Box::new(Mock::new("pwent", &log))),
            ],
            &audit,
        );
        log.borrow_mut().clear();

        let mut rounds = 0;
        let mut conv = |msgs: &[Message]| -> Result<Vec<Response>, AuthError> {
            rounds += 1;
            Ok(msgs
                .iter()
                .map(|m| match m.kind {
                    MessageKind::PromptEcho => Response::text("123456".to_string()),
                    MessageKind::PromptNoEcho => Response::text("secret".to_string()),
                    _ => Response::none(),
                })
                .collect())
        };
        assert!(d.xscreensaver_auth(&mut conv, |_| ()));
        assert_eq!(rounds, 2);

        // a short answer in the first round fails PAM, and pwent is not asked.
        let mut short = |_msgs: &[Message]| -> Result<Vec<Response>, AuthError> { Ok(vec![Response::none()]) };
        assert!(!d.xscreensaver_auth(&mut short, |_| ()));
        assert_eq!(*log.borrow(), vec!["pam:try_unlock", "pam:try_unlock"]);
    }

    #[test]
    fn test_backend_selection_from_config() {
        let mut config = Config::default();
        config.lock.methods = Some(vec!["no-such-method".to_string()]);
        assert!(backends(&config).is_empty());

        let config = Config::default();
        let names: Vec<_> = backends(&config).iter().map(|b| b.name()).collect();
        #[cfg(feature = "pwent")]
        assert_eq!(names.last(), Some(&"pwent"));
        #[cfg(feature = "helper")]
        assert!(names.contains(&"helper"));
        let _ = names;
    }
}
