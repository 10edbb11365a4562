//! Connection and monitor enumeration

use dimmer_core::MonitorId;
use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as RandrConnectionExt;
use x11rb::protocol::xproto::{ConnectionExt as XprotoConnectionExt, ImageFormat, Screen, Window};
use x11rb::rust_connection::RustConnection;

use crate::capture::{mean_luminance, scanline_offsets};
use crate::error::X11Error;

/// Rectangle of a monitor in root window coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Geometry {
    /// Grow the rectangle by `by` pixels on every edge.
    pub fn inflate(&self, by: u16) -> Geometry {
        let delta = by as i16;
        Geometry {
            x: self.x.saturating_sub(delta),
            y: self.y.saturating_sub(delta),
            width: self.width.saturating_add(by.saturating_mul(2)),
            height: self.height.saturating_add(by.saturating_mul(2)),
        }
    }
}

/// A connected monitor as reported by RandR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInfo {
    pub id: MonitorId,
    pub name: String,
    pub primary: bool,
    pub geometry: Geometry,
}

/// Connection to an X display
pub struct Display {
    conn: RustConnection,
    screen_num: usize,
}

impl Display {
    /// Connect to `name`, or to `$DISPLAY` when `None`.
    pub fn connect(name: Option<&str>) -> Result<Self, X11Error> {
        let (conn, screen_num) = x11rb::connect(name)?;
        tracing::debug!("Connected to X server, screen {}", screen_num);
        Ok(Self { conn, screen_num })
    }

    pub fn connection(&self) -> &RustConnection {
        &self.conn
    }

    pub fn screen(&self) -> &Screen {
        &self.conn.setup().roots[self.screen_num]
    }

    pub fn root(&self) -> Window {
        self.screen().root
    }

    /// Active monitors in server order. Ids are assigned 1, 2, ... in that order.
    pub fn monitors(&self) -> Result<Vec<MonitorInfo>, X11Error> {
        let reply = self.conn.randr_get_monitors(self.root(), true)?.reply()?;

        let mut list = Vec::with_capacity(reply.monitors.len());
        for (index, monitor) in reply.monitors.iter().enumerate() {
            let Some(id) = MonitorId::new(index as u32 + 1) else {
                continue;
            };
            let name = match self.conn.get_atom_name(monitor.name)?.reply() {
                Ok(atom) => String::from_utf8_lossy(&atom.name).into_owned(),
                Err(_) => format!("monitor-{}", id),
            };
            list.push(MonitorInfo {
                id,
                name,
                primary: monitor.primary,
                geometry: Geometry {
                    x: monitor.x,
                    y: monitor.y,
                    width: monitor.width,
                    height: monitor.height,
                },
            });
        }
        Ok(list)
    }

    /// Look up a single monitor by id.
    pub fn monitor(&self, id: MonitorId) -> Result<MonitorInfo, X11Error> {
        let monitors = self.monitors()?;
        let available = monitors.len();
        monitors
            .into_iter()
            .find(|m| m.id == id)
            .ok_or(X11Error::MonitorNotFound {
                monitor: id,
                available,
            })
    }

    /// Mean luminance (0-255) of `geometry` estimated from `rows` scanlines.
    ///
    /// All scanline requests are sent before the first reply is awaited, so
    /// the capture costs one round trip.
    pub fn sample_luminance(&self, geometry: Geometry, rows: u16) -> Result<f64, X11Error> {
        if geometry.width == 0 || geometry.height == 0 {
            return Ok(0.0);
        }

        let root = self.root();
        let cookies = scanline_offsets(geometry.height, rows)
            .into_iter()
            .map(|row| {
                self.conn.get_image(
                    ImageFormat::Z_PIXMAP,
                    root,
                    geometry.x,
                    geometry.y.saturating_add(row as i16),
                    geometry.width,
                    1,
                    u32::MAX,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut sum = 0.0;
        let mut count = 0usize;
        for cookie in cookies {
            let reply = cookie.reply()?;
            let bytes_per_pixel = self.bytes_per_pixel(reply.depth)?;
            sum += mean_luminance(&reply.data, bytes_per_pixel);
            count += 1;
        }

        Ok(if count == 0 { 0.0 } else { sum / count as f64 })
    }

    fn bytes_per_pixel(&self, depth: u8) -> Result<usize, X11Error> {
        let bits_per_pixel = self
            .conn
            .setup()
            .pixmap_formats
            .iter()
            .find(|format| format.depth == depth)
            .map(|format| format.bits_per_pixel)
            .unwrap_or(0);

        match bits_per_pixel {
            32 if depth >= 24 => Ok(4),
            _ => Err(X11Error::UnsupportedFormat {
                depth,
                bits_per_pixel,
            }),
        }
    }
}
