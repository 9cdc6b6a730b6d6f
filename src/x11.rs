//
//  GeometrySource on top of a real X server, via x11rb.
//
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ConnectError, ConnectionError, ReplyError};
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xinerama::{self, ConnectionExt as _};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::screens::{GeometrySource, RandrOutput, RandrScreenConfig, Rect};

pub struct X11Source {
    conn:       RustConnection,
    screen_num: usize,
}

impl X11Source {
    /// Connect to `display`, or to $DISPLAY if None.
    pub fn connect(display: Option<&str>) -> Result<X11Source, ConnectError> {
        let (conn, screen_num) = RustConnection::connect(display)?;
        debug!("x11: connected, default screen {}", screen_num);
        Ok(X11Source { conn, screen_num })
    }

    /// Ask for RANDR screen change events on every root window.
    pub fn select_screen_changes(&self) -> Result<(), ReplyError> {
        for screen in &self.conn.setup().roots {
            self.conn
                .randr_select_input(screen.root, randr::NotifyMask::SCREEN_CHANGE)?
                .check()?;
        }
        Ok(())
    }

    /// Block until the server reports a screen change.
    pub fn wait_for_screen_change(&self) -> Result<(), ConnectionError> {
        loop {
            match self.conn.wait_for_event()? {
                Event::RandrScreenChangeNotify(_) | Event::RandrNotify(_) => return Ok(()),
                ev => debug!("x11: ignoring {:?}", ev),
            }
        }
    }

    fn has_extension(&self, name: &'static str) -> bool {
        match self.conn.extension_information(name) {
            Ok(info) => info.is_some(),
            Err(e) => {
                debug!("x11: QueryExtension({}): {}", name, e);
                false
            },
        }
    }

    fn root(&self, screen: usize) -> Option<u32> {
        self.conn.setup().roots.get(screen).map(|s| s.root)
    }

    fn screen_config(&self, root: u32) -> Result<RandrScreenConfig, ReplyError> {
        let reply = self.conn.randr_get_screen_info(root)?.reply()?;
        let rot = u16::from(reply.rotation);
        let sideways = u16::from(randr::Rotation::ROTATE90) | u16::from(randr::Rotation::ROTATE270);
        Ok(RandrScreenConfig {
            sizes:   reply
                .sizes
                .iter()
                .map(|s| (i32::from(s.width), i32::from(s.height)))
                .collect(),
            current: usize::from(reply.size_id),
            rotated: rot & sideways != 0,
        })
    }

    fn outputs(&self, root: u32) -> Result<Vec<RandrOutput>, ReplyError> {
        let res = self.conn.randr_get_screen_resources(root)?.reply()?;
        let mut outputs = Vec::with_capacity(res.outputs.len());
        for &output in &res.outputs {
            let info = self.conn.randr_get_output_info(output, res.config_timestamp)?.reply()?;
            let crtc = if info.crtc != 0 {
                Some(info.crtc)
            } else {
                info.crtcs.first().cloned()
            };
            let crtc = match crtc {
                Some(crtc) => {
                    let c = self.conn.randr_get_crtc_info(crtc, res.config_timestamp)?.reply()?;
                    Some(Rect {
                        x:      i32::from(c.x),
                        y:      i32::from(c.y),
                        width:  i32::from(c.width),
                        height: i32::from(c.height),
                    })
                },
                None => None,
            };
            outputs.push(RandrOutput {
                name: String::from_utf8_lossy(&info.name).into_owned(),
                connected: info.connection != randr::Connection::DISCONNECTED,
                crtc,
            });
        }
        Ok(outputs)
    }

    fn xinerama(&self) -> Result<Option<Vec<Rect>>, ReplyError> {
        if self.conn.xinerama_is_active()?.reply()?.state == 0 {
            return Ok(None);
        }
        let reply = self.conn.xinerama_query_screens()?.reply()?;
        let rects = reply
            .screen_info
            .iter()
            .map(|s| Rect {
                x:      i32::from(s.x_org),
                y:      i32::from(s.y_org),
                width:  i32::from(s.width),
                height: i32::from(s.height),
            })
            .collect();
        Ok(Some(rects))
    }
}

impl GeometrySource for X11Source {
    fn screens(&mut self) -> Vec<(i32, i32)> {
        self.conn
            .setup()
            .roots
            .iter()
            .map(|s| (i32::from(s.width_in_pixels), i32::from(s.height_in_pixels)))
            .collect()
    }

    fn default_screen(&self) -> usize {
        self.screen_num
    }

    fn randr_version(&mut self) -> Option<(u32, u32)> {
        if !self.has_extension(randr::X11_EXTENSION_NAME) {
            return None;
        }
        let reply = self.conn.randr_query_version(1, 6).map_err(ReplyError::from).and_then(|c| c.reply());
        match reply {
            Ok(r) => Some((r.major_version, r.minor_version)),
            Err(e) => {
                debug!("x11: RRQueryVersion: {}", e);
                None
            },
        }
    }

    fn randr_screen_config(&mut self, screen: usize) -> Option<RandrScreenConfig> {
        let root = self.root(screen)?;
        match self.screen_config(root) {
            Ok(c) => Some(c),
            Err(e) => {
                debug!("x11: RRGetScreenInfo(screen {}): {}", screen, e);
                None
            },
        }
    }

    fn randr_outputs(&mut self, screen: usize) -> Vec<RandrOutput> {
        let root = match self.root(screen) {
            Some(root) => root,
            None => return Vec::new(),
        };
        match self.outputs(root) {
            Ok(o) => o,
            Err(e) => {
                debug!("x11: RANDR outputs of screen {}: {}", screen, e);
                Vec::new()
            },
        }
    }

    fn xinerama_screens(&mut self) -> Option<Vec<Rect>> {
        if !self.has_extension(xinerama::X11_EXTENSION_NAME) {
            return None;
        }
        match self.xinerama() {
            Ok(r) => r,
            Err(e) => {
                debug!("x11: Xinerama: {}", e);
                None
            },
        }
    }
}
