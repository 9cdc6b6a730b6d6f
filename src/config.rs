use std::path::Path;
use std::process::exit;
use std::{fs, io};

use serde::{Deserialize, Deserializer};
use toml;

pub const DEFAULT_CONFIG: &str = "/etc/xss-lockcore.toml";

/// Names accepted in `[lock] methods`.
pub const METHODS: &[&str] = &["kerberos", "pam", "helper", "pwent"];

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub lock: Lock,
    #[serde(default)]
    pub pam: Pam,
    #[serde(default)]
    pub helper: Helper,
    #[serde(default)]
    pub kerberos: Kerberos,
    #[serde(default)]
    pub monitors: Monitors,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Lock {
    #[serde(default)]
    pub verbose: bool,
    #[serde(deserialize_with = "deserialize_methods", default)]
    pub methods: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Pam {
    #[serde(default = "default_pam_service")]
    pub service: String,
}

impl Default for Pam {
    fn default() -> Pam {
        Pam { service: default_pam_service() }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Helper {
    #[serde(default = "default_helper_program")]
    pub program: String,
}

impl Default for Helper {
    fn default() -> Helper {
        Helper { program: default_helper_program() }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Kerberos {
    #[serde(rename = "ccache-dir", default)]
    pub ccache_dir: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Monitors {
    #[serde(default = "default_true")]
    pub randr: bool,
    #[serde(default = "default_true")]
    pub xinerama: bool,
    #[serde(default)]
    pub fake: Option<String>,
}

impl Default for Monitors {
    fn default() -> Monitors {
        Monitors {
            randr:    true,
            xinerama: true,
            fake:     None,
        }
    }
}

fn default_pam_service() -> String {
    "xscreensaver".to_string()
}

fn default_helper_program() -> String {
    "/usr/libexec/xscreensaver-auth-helper".to_string()
}

fn default_true() -> bool {
    true
}

// "methods" can be a single string or a list of strings.
pub fn deserialize_methods<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where D: Deserializer<'de> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    let m = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    };
    Ok(Some(m))
}

// Read the TOML config into a config::Config struct.
pub fn read(toml_file: impl AsRef<Path>) -> io::Result<Config> {
    let buffer = fs::read_to_string(&toml_file)?;
    parse(&buffer)
}

pub fn parse(buffer: &str) -> io::Result<Config> {
    match toml::from_str(buffer) {
        Ok(v) => Ok(v),
        Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
    }
}

// Returns the first problem found, as "[section]: problem".
pub fn problem(config: &Config) -> Option<String> {
    if let Some(ref methods) = config.lock.methods {
        for m in methods {
            if !METHODS.contains(&m.as_str()) {
                return Some(format!("[lock]: methods: unknown method \"{}\"", m));
            }
        }
    }
    if config.pam.service == "" {
        return Some("[pam]: service: empty".to_string());
    }
    if config.helper.program == "" {
        return Some("[helper]: program: empty".to_string());
    }
    if let Some(ref geom) = config.monitors.fake {
        if let Err(e) = crate::screens::parse_geometry_list(geom) {
            return Some(format!("[monitors]: fake: {}", e));
        }
    }
    None
}

pub fn check(cfg: &str, config: &Config) {
    if let Some(p) = problem(config) {
        eprintln!("{}{}: {}", crate::blurb(), cfg, p);
        exit(1);
    }
}
