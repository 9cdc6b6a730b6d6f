//
//  xss-lockcore: the privileged core of a screen locker.
//
//  Initializes the authentication backends while we still have
//  privileges, disavows them for good, and then either describes the
//  monitor layout or runs an unlock attempt on the terminal.
//
#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod auth;
mod config;
#[cfg(feature = "helper")]
mod helper;
#[cfg(feature = "kerberos")]
mod kerberos;
#[cfg(feature = "pam")]
mod pam_auth;
#[cfg(feature = "pwent")]
mod passwd;
mod screens;
mod suid;
mod syslog;
mod tty;
mod unixuser;
mod x11;

use std::io;
use std::path::Path;
use std::process::exit;

use crate::auth::{AuthContext, Dispatcher};
use crate::screens::{describe_monitor_layout, scan_monitors, update_monitor_layout};
use crate::syslog::Syslog;
use crate::unixuser::User;

lazy_static! {
    static ref PROGNAME: String = std::env::args()
        .next()
        .as_ref()
        .and_then(|a| Path::new(a).file_name())
        .map(|a| a.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xss-lockcore".to_string());
}

pub fn progname() -> &'static str {
    PROGNAME.as_str()
}

/// Prefix for diagnostics on stderr.
pub fn blurb() -> String {
    format!("{}: ", progname())
}

fn main() {
    let matches = clap_app!(xss_lockcore =>
        (version: "0.1")
        (@arg CFG: -c --config +takes_value "configuration file (/etc/xss-lockcore.toml)")
        (@arg VERBOSE: -v --verbose "report what the backends and monitor scan are doing")
        (@arg MONITORS: --monitors "scan the monitor layout and describe it")
        (@arg WATCH: --("watch-monitors") "describe the monitor layout again whenever it changes")
        (@arg FAKE: --("fake-monitors") +takes_value "pretend the monitors are WxH+X+Y,...")
        (@arg UNLOCK: --unlock "run one unlock attempt on the terminal")
    )
    .get_matches();

    // read config.
    let (cfg_name, must_exist) = match matches.value_of("CFG") {
        Some(name) => (name, true),
        None => (config::DEFAULT_CONFIG, false),
    };
    let mut config = if must_exist || Path::new(cfg_name).exists() {
        match config::read(cfg_name) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}{}: {}", blurb(), cfg_name, e);
                exit(1);
            },
        }
    } else {
        config::Config::default()
    };
    if let Some(fake) = matches.value_of("FAKE") {
        config.monitors.fake = Some(fake.to_string());
    }
    config::check(cfg_name, &config);

    let verbose = matches.is_present("VERBOSE") || config.lock.verbose;
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let user = match User::current() {
        Ok(user) => user.name,
        Err(e) => {
            eprintln!("{}can't determine who we are: {}", blurb(), e);
            exit(1);
        },
    };
    let ctx = AuthContext {
        user,
        display: std::env::var("DISPLAY").unwrap_or_default(),
        verbose,
    };

    // privileged part.
    let dispatcher = Dispatcher::new(auth::backends(&config), ctx, Box::new(Syslog));
    let (dispatcher, _) = dispatcher.lock_priv_init();

    // and never again.
    if let Err(e) = suid::disavow_privileges() {
        eprintln!("{}{}", blurb(), e);
        exit(1);
    }

    let (mut dispatcher, any) = dispatcher.lock_init();
    if !any {
        eprintln!("{}no authentication methods available", blurb());
    } else if verbose {
        eprintln!("{}authentication methods: {}", blurb(), dispatcher.usable().join(", "));
    }

    let watch = matches.is_present("WATCH");
    if matches.is_present("MONITORS") || watch {
        let mut src = match x11::X11Source::connect(None) {
            Ok(src) => src,
            Err(e) => {
                eprintln!("{}can't open display: {}", blurb(), e);
                exit(1);
            },
        };
        let mut layout = scan_monitors(&mut src, &config.monitors);
        if let Err(e) = describe_monitor_layout(&layout, &mut io::stderr()) {
            error!("writing monitor layout: {}", e);
        }
        if watch {
            if let Err(e) = src.select_screen_changes() {
                eprintln!("{}can't watch for screen changes: {}", blurb(), e);
                exit(1);
            }
            loop {
                if let Err(e) = src.wait_for_screen_change() {
                    eprintln!("{}lost the display: {}", blurb(), e);
                    exit(1);
                }
                if let Some(new) = update_monitor_layout(&layout, &mut src, &config.monitors) {
                    if let Err(e) = describe_monitor_layout(&new, &mut io::stderr()) {
                        error!("writing monitor layout: {}", e);
                    }
                    layout = new;
                }
            }
        }
    }

    if matches.is_present("UNLOCK") {
        let mut tty = match tty::Tty::open() {
            Ok(tty) => tty,
            Err(e) => {
                eprintln!("{}/dev/tty: {}", blurb(), e);
                exit(1);
            },
        };
        let user = dispatcher.context().user.clone();
        let ok = dispatcher.xscreensaver_auth(&mut tty, |ok| {
            if ok {
                eprintln!("{}unlocked for {}", blurb(), user);
            } else {
                eprintln!("{}authentication failed", blurb());
            }
        });
        exit(if ok { 0 } else { 1 });
    }
}
