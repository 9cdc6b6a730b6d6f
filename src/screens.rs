//
//  Monitor layout.
//
//  The X server can describe the monitor layout in up to three ways:
//  RANDR (1.0: one rectangle per X screen, 1.2 and up: one per output),
//  Xinerama (a flat list of rectangles on the default screen) and the
//  plain core protocol (the size of each X screen). None of them can be
//  fully trusted. `scan_monitors` asks them in order of preference,
//  settles disagreements between RANDR and Xinerama, and marks entries
//  that are duplicated, enclosed, overlapping or off screen.
//
use std::fmt;
use std::io::{self, Write};

use regex::Regex;

use crate::config;

// Coordinates this large are X server garbage.
const MAX_COORD: i64 = 0x7FFF;

/// Verdict of the sanity check on one monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sanity {
    Sane,
    Enclosed,
    Duplicate,
    Overlap,
    Offscreen,
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Monitor {
    pub id:     i32,
    pub screen: usize,
    pub x:      i32,
    pub y:      i32,
    pub width:  i32,
    pub height: i32,
    pub desc:   Option<String>,
    pub sanity: Sanity,
    /// Index of the monitor that caused a non-Sane verdict.
    pub enemy:  usize,
}

impl Monitor {
    pub fn new(id: i32, screen: usize, rect: Rect) -> Monitor {
        Monitor {
            id,
            screen,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            desc: None,
            sanity: Sanity::Sane,
            enemy: 0,
        }
    }

    fn geometry(&self) -> String {
        format!("{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }

    // Edges in i64: the fake geometry can hold anything up to i32::MAX.
    fn left(&self) -> i64 {
        i64::from(self.x)
    }

    fn top(&self) -> i64 {
        i64::from(self.y)
    }

    fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }
}

/// Result of a scan: the monitors, the size of each X screen, and the
/// warnings collected while talking to the server.
#[derive(Debug, Clone, Default)]
pub struct MonitorLayout {
    pub monitors: Vec<Monitor>,
    pub screens:  Vec<(i32, i32)>,
    pub warning:  Option<String>,
}

impl MonitorLayout {
    /// The monitors that should get a window.
    pub fn sane(&self) -> impl Iterator<Item = &Monitor> {
        self.monitors.iter().filter(|m| m.sanity == Sanity::Sane)
    }

    pub fn sane_count(&self) -> usize {
        self.sane().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x:      i32,
    pub y:      i32,
    pub width:  i32,
    pub height: i32,
}

/// One RANDR 1.2 output. `crtc` is None if no CRTC drives it.
#[derive(Debug, Clone)]
pub struct RandrOutput {
    pub name:      String,
    pub connected: bool,
    pub crtc:      Option<Rect>,
}

/// The current configuration of one X screen, RANDR 1.0 style.
#[derive(Debug, Clone)]
pub struct RandrScreenConfig {
    pub sizes:   Vec<(i32, i32)>,
    pub current: usize,
    /// Rotated by 90 or 270 degrees.
    pub rotated: bool,
}

/// What the X server says about its screens and monitors.
///
/// Every call is a fresh round trip; nothing is cached. Errors are
/// reported as "not available" (None or empty).
pub trait GeometrySource {
    /// Width and height of every X screen, in screen order.
    fn screens(&mut self) -> Vec<(i32, i32)>;
    fn default_screen(&self) -> usize;
    fn randr_version(&mut self) -> Option<(u32, u32)>;
    fn randr_screen_config(&mut self, screen: usize) -> Option<RandrScreenConfig>;
    fn randr_outputs(&mut self, screen: usize) -> Vec<RandrOutput>;
    /// None unless Xinerama is present and active.
    fn xinerama_screens(&mut self) -> Option<Vec<Rect>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryError(pub String);

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "bad geometry \"{}\" (want WxH+X+Y)", self.0)
    }
}

impl std::error::Error for GeometryError {}

/// Parse "WxH+X+Y,WxH+X+Y,..." into a list of monitors on screen 0.
pub fn parse_geometry_list(list: &str) -> Result<Vec<Monitor>, GeometryError> {
    lazy_static! {
        static ref GEOM: Regex = Regex::new(r"^(\d+)x(\d+)\+(-?\d+)\+(-?\d+)$").unwrap();
    }
    let mut monitors = Vec::new();
    for token in list.split(',') {
        let token = token.trim();
        let bad = || GeometryError(token.to_string());
        let caps = GEOM.captures(token).ok_or_else(bad)?;
        let num = |i: usize| caps[i].parse::<i32>().map_err(|_| bad());
        let rect = Rect {
            width:  num(1)?,
            height: num(2)?,
            x:      num(3)?,
            y:      num(4)?,
        };
        monitors.push(Monitor::new(monitors.len() as i32, 0, rect));
    }
    Ok(monitors)
}

// Note that the right/bottom edge of `a` is inclusive but that of `b`
// is not. That decides which of two touching monitors is flagged.
pub fn monitors_overlap_p(a: &Monitor, b: &Monitor) -> bool {
    let maxleft = a.left().max(b.left());
    let maxtop = a.top().max(b.top());
    let minright = (a.right() - 1).min(b.right());
    let minbot = (a.bottom() - 1).min(b.bottom());
    maxtop < minbot && maxleft < minright
}

// Is `inner` entirely within `outer`.
fn encloses(outer: &Monitor, inner: &Monitor) -> bool {
    inner.left() >= outer.left() &&
        inner.top() >= outer.top() &&
        inner.right() <= outer.right() &&
        inner.bottom() <= outer.bottom()
}

fn same_rect(a: &Monitor, b: &Monitor) -> bool {
    a.x == b.x && a.y == b.y && a.width == b.width && a.height == b.height
}

/// Mark the monitors that should not get a window of their own.
///
/// Only monitors that are still Sane take part in each pass, so a
/// monitor is never blamed on one that was already rejected.
pub fn check_monitor_sanity(monitors: &mut [Monitor]) {
    let count = monitors.len();
    let sane = |m: &Monitor| m.sanity == Sanity::Sane;

    // Enclosed or duplicated.
    for i in 0..count {
        for j in 0..count {
            if i == j || !sane(&monitors[i]) || !sane(&monitors[j]) {
                continue;
            }
            if monitors[i].screen != monitors[j].screen {
                continue;
            }
            if encloses(&monitors[i], &monitors[j]) {
                monitors[j].sanity = if same_rect(&monitors[i], &monitors[j]) {
                    Sanity::Duplicate
                } else {
                    Sanity::Enclosed
                };
                monitors[j].enemy = i;
            }
        }
    }

    // Overlapping; the later one loses.
    for i in 0..count {
        for j in 0..i {
            if !sane(&monitors[i]) || !sane(&monitors[j]) {
                continue;
            }
            if monitors[i].screen != monitors[j].screen {
                continue;
            }
            if monitors_overlap_p(&monitors[i], &monitors[j]) {
                monitors[i].sanity = Sanity::Overlap;
                monitors[i].enemy = j;
            }
        }
    }

    // Off screen, or garbage.
    for m in monitors.iter_mut().filter(|m| m.sanity == Sanity::Sane) {
        if m.x < 0 ||
            m.y < 0 ||
            m.width <= 0 ||
            m.height <= 0 ||
            m.right() >= MAX_COORD ||
            m.bottom() >= MAX_COORD
        {
            m.sanity = Sanity::Offscreen;
            m.enemy = 0;
        }
    }
}

/// False if there is exactly one monitor and it is so wide that it is
/// probably two monitors glued together by a lying X server.
pub fn plausible_aspect_ratio_p(monitors: &[Monitor]) -> bool {
    match monitors {
        [m] if m.height != 0 => (m.width as f64 / m.height as f64) < 1.9,
        _ => true,
    }
}

/// Compares screen, geometry and verdict of every monitor.
pub fn monitor_layouts_differ_p(a: &[Monitor], b: &[Monitor]) -> bool {
    if a.len() != b.len() {
        return true;
    }
    a.iter().zip(b.iter()).any(|(a, b)| {
        a.screen != b.screen ||
            a.x != b.x ||
            a.y != b.y ||
            a.width != b.width ||
            a.height != b.height ||
            a.sanity != b.sanity
    })
}

fn n_screens(n: usize) -> String {
    if n == 1 {
        "1 screen".to_string()
    } else {
        format!("{} screens", n)
    }
}

/// RANDR and Xinerama both answered. Identical answers: RANDR. Different
/// answers: whoever reports more monitors, RANDR on a tie. Some drivers
/// fuse all heads into one RANDR output but get Xinerama right.
pub fn randr_versus_xinerama_fight(
    randr: Vec<Monitor>,
    xinerama: Option<Vec<Monitor>>,
    warnings: &mut Vec<String>,
) -> Vec<Monitor>
{
    let xinerama = match xinerama {
        Some(x) => x,
        None => return randr,
    };
    if !monitor_layouts_differ_p(&randr, &xinerama) {
        return randr;
    }
    if xinerama.len() > randr.len() {
        warnings.push(format!(
            "WARNING: RANDR reports {} but Xinerama\n\t\treports {}.  Believing Xinerama.",
            n_screens(randr.len()),
            n_screens(xinerama.len()),
        ));
        xinerama
    } else {
        warnings.push("WARNING: RANDR and Xinerama report different\n\t\tscreen layouts!  Believing RANDR.".to_string());
        randr
    }
}

fn randr_scan_monitors(
    src: &mut dyn GeometrySource,
    screens: &[(i32, i32)],
    warnings: &mut Vec<String>,
) -> Option<Vec<Monitor>>
{
    let (major, minor) = src.randr_version()?;
    if major == 0 {
        return None;
    }
    let new_randr = major > 1 || (major == 1 && minor >= 2);
    debug!("screens: RANDR version {}.{}", major, minor);

    let mut monitors = Vec::new();
    if !new_randr {
        for (i, &(width, height)) in screens.iter().enumerate() {
            let mut rect = Rect::default();
            if let Some(rrc) = src.randr_screen_config(i) {
                let (w, h) = match rrc.sizes.get(rrc.current) {
                    None => (width, height),
                    Some(&(w, h)) if rrc.rotated => (h, w),
                    Some(&(w, h)) => (w, h),
                };
                rect.width = w;
                rect.height = h;
            }
            monitors.push(Monitor::new(i as i32, i, rect));
        }
    } else {
        let mut j = 0;
        for i in 0..screens.len() {
            for output in src.randr_outputs(i) {
                let mut m = Monitor::new((i * 1000 + j) as i32, i, output.crtc.unwrap_or_default());
                m.desc = Some(output.name);
                if !output.connected {
                    m.sanity = Sanity::Disabled;
                }
                monitors.push(m);
                j += 1;
            }
        }
    }

    if monitors.is_empty() {
        warnings.push("WARNING: RANDR reported no screens!  Ignoring it.".to_string());
        return None;
    }
    if !monitors.iter().any(|m| m.width != 0 && m.height != 0) {
        warnings.push("WARNING: RANDR says all screens are 0x0!  Ignoring it.".to_string());
        return None;
    }
    Some(monitors)
}

fn xinerama_scan_monitors(src: &mut dyn GeometrySource) -> Option<Vec<Monitor>> {
    let rects = src.xinerama_screens()?;
    if rects.is_empty() {
        return None;
    }
    let screen = src.default_screen();
    Some(
        rects
            .into_iter()
            .enumerate()
            .map(|(i, r)| Monitor::new(i as i32, screen, r))
            .collect(),
    )
}

fn basic_scan_monitors(screens: &[(i32, i32)]) -> Vec<Monitor> {
    screens
        .iter()
        .enumerate()
        .map(|(i, &(width, height))| Monitor::new(i as i32, i, Rect { x: 0, y: 0, width, height }))
        .collect()
}

/// Ask the server (or the fake geometry from the config) what the
/// monitors are, and check them. The result always has at least one
/// sane monitor if the display has at least one screen.
pub fn scan_monitors(src: &mut dyn GeometrySource, cfg: &config::Monitors) -> MonitorLayout {
    let mut warnings = Vec::new();
    let screens = src.screens();
    let mut monitors = None;

    if let Some(ref fake) = cfg.fake {
        match parse_geometry_list(fake) {
            Ok(m) => monitors = Some(m),
            Err(e) => warnings.push(format!("WARNING: fake monitors: {}", e)),
        }
    }

    if monitors.is_none() && cfg.randr {
        monitors = randr_scan_monitors(src, &screens, &mut warnings);
        if cfg.xinerama {
            if let Some(randr) = monitors.take() {
                let xinerama = xinerama_scan_monitors(src);
                monitors = Some(randr_versus_xinerama_fight(randr, xinerama, &mut warnings));
            }
        }
    }

    if monitors.is_none() && cfg.xinerama {
        monitors = xinerama_scan_monitors(src);
    }

    let mut monitors = match monitors {
        Some(m) => m,
        None => basic_scan_monitors(&screens),
    };

    check_monitor_sanity(&mut monitors);

    // Keep the rejects for the diagnostics, but make sure there is
    // something to draw on.
    if !monitors.is_empty() && !monitors.iter().any(|m| m.sanity == Sanity::Sane) {
        warnings.push("WARNING: no usable screens!  Using the whole X screen.".to_string());
        monitors.extend(basic_scan_monitors(&screens));
    }

    let warning = if warnings.is_empty() {
        None
    } else {
        Some(warnings.join("\n"))
    };
    MonitorLayout { monitors, screens, warning }
}

/// Rescan after the X server reported a change. Returns None if the
/// monitors are the same as in `prev`, so the caller can keep its
/// windows; otherwise the new layout.
pub fn update_monitor_layout(
    prev: &MonitorLayout,
    src: &mut dyn GeometrySource,
    cfg: &config::Monitors,
) -> Option<MonitorLayout>
{
    let layout = scan_monitors(src, cfg);
    if !monitor_layouts_differ_p(&prev.monitors, &layout.monitors) {
        debug!("screens: layout unchanged");
        return None;
    }
    debug!(
        "screens: layout changed, {} monitors ({} sane)",
        layout.monitors.len(),
        layout.sane_count()
    );
    Some(layout)
}

fn describe_monitor(m: &Monitor) -> String {
    let mut s = format!(" {:3}/{}: {}", m.id, m.screen, m.geometry());
    if let Some(ref desc) = m.desc {
        if !desc.is_empty() {
            s.push_str(&format!(" ({})", desc));
        }
    }
    s
}

/// Write the layout in human readable form, one line per monitor,
/// preceded by any warnings from the scan.
pub fn describe_monitor_layout(layout: &MonitorLayout, w: &mut dyn Write) -> io::Result<()> {
    let blurb = crate::blurb();
    let monitors = &layout.monitors;

    if let Some(ref warning) = layout.warning {
        for line in warning.split('\n').filter(|l| !l.is_empty()) {
            writeln!(w, "{}{}", blurb, line)?;
        }
    }

    if monitors.is_empty() {
        writeln!(w, "{}no screens!", blurb)?;
        return Ok(());
    }

    let good = layout.sane_count();
    let bad = monitors.len() - good;

    writeln!(w, "{}screens in use: {}", blurb, good)?;
    for m in layout.sane() {
        writeln!(w, "{}{}", blurb, describe_monitor(m))?;
    }

    if bad > 0 {
        writeln!(w, "{}rejected screens: {}", blurb, bad)?;
        for m in monitors.iter().filter(|m| m.sanity != Sanity::Sane) {
            let e = monitors.get(m.enemy).unwrap_or(m);
            let why = match m.sanity {
                Sanity::Sane => unreachable!(),
                Sanity::Enclosed => format!("enclosed by {} ({})", e.id, e.geometry()),
                Sanity::Duplicate => format!("duplicate of {}", e.id),
                Sanity::Overlap => format!("overlaps {} ({})", e.id, e.geometry()),
                Sanity::Offscreen => {
                    let (sw, sh) = layout.screens.get(e.screen).cloned().unwrap_or((0, 0));
                    format!("off screen ({}x{})", sw, sh)
                },
                Sanity::Disabled => "output disabled".to_string(),
            };
            writeln!(w, "{}{} -- {}", blurb, describe_monitor(m), why)?;
        }
    }

    if !plausible_aspect_ratio_p(monitors) {
        let m = &monitors[0];
        writeln!(
            w,
            "{}WARNING: single screen aspect ratio is {}x{} = {:.2}",
            blurb,
            m.width,
            m.height,
            m.width as f64 / m.height as f64
        )?;
        writeln!(w, "{}         probable X server bug in Xinerama/RANDR!", blurb)?;
    }
    Ok(())
}
