//! X11 overlay window
//!
//! A black, override-redirect window over one monitor. Input passes through
//! (empty XFixes input region), and the tint is set with
//! `_NET_WM_WINDOW_OPACITY`, which a compositing manager turns into
//! translucency. The window is unmapped while the alpha is 0.

use anyhow::{Context, Result};
use dimmer_core::MonitorId;
use dimmer_x11::{Display, Geometry, MonitorInfo};
use x11rb::connection::Connection;
use x11rb::errors::{ConnectionError, ReplyError};
use x11rb::protocol::shape::SK;
use x11rb::protocol::xfixes::ConnectionExt as XfixesConnectionExt;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ConfigureWindowAux, ConnectionExt as XprotoConnectionExt, CreateWindowAux,
    EventMask, PropMode, StackMode, Visibility, Window, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::wrapper::ConnectionExt as WrapperConnectionExt;

use crate::worker::{OverlaySurface, SurfaceError, SurfaceStatus};

/// Pixels added on each edge so neighbouring overlays leave no seam.
const EDGE_INFLATE: u16 = 1;

struct Atoms {
    wm_protocols: Atom,
    wm_delete_window: Atom,
    net_wm_window_opacity: Atom,
}

impl Atoms {
    fn intern(display: &Display) -> Result<Self> {
        let conn = display.connection();
        let intern = |name: &[u8]| -> Result<Atom> {
            let atom = conn
                .intern_atom(false, name)?
                .reply()
                .with_context(|| format!("Failed to intern {}", String::from_utf8_lossy(name)))?
                .atom;
            Ok(atom)
        };

        Ok(Self {
            wm_protocols: intern(b"WM_PROTOCOLS")?,
            wm_delete_window: intern(b"WM_DELETE_WINDOW")?,
            net_wm_window_opacity: intern(b"_NET_WM_WINDOW_OPACITY")?,
        })
    }
}

impl From<ConnectionError> for SurfaceError {
    fn from(e: ConnectionError) -> Self {
        SurfaceError::Disconnected(Box::new(e))
    }
}

impl From<ReplyError> for SurfaceError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::ConnectionError(e) => e.into(),
            e @ ReplyError::X11Error(_) => SurfaceError::Request(Box::new(e)),
        }
    }
}

/// Scale an 8-bit alpha to the 32-bit `_NET_WM_WINDOW_OPACITY` range.
fn opacity_cardinal(alpha: u8) -> u32 {
    (u64::from(alpha) * u64::from(u32::MAX) / 255) as u32
}

pub struct X11Overlay {
    display: Display,
    window: Window,
    atoms: Atoms,
    mapped: bool,
    destroyed: bool,
}

impl X11Overlay {
    /// Resolve `monitor` on the display and create its overlay window.
    pub fn open(display_name: Option<&str>, monitor: MonitorId) -> Result<Self> {
        let display = Display::connect(display_name).context("Failed to connect to X server")?;
        let info = display
            .monitor(monitor)
            .with_context(|| format!("Failed to resolve geometry for monitor {}", monitor))?;
        Self::create(display, &info)
    }

    fn create(display: Display, info: &MonitorInfo) -> Result<Self> {
        let atoms = Atoms::intern(&display)?;
        let geometry: Geometry = info.geometry.inflate(EDGE_INFLATE);
        let conn = display.connection();
        let screen = display.screen();

        let window = conn.generate_id()?;
        let aux = CreateWindowAux::new()
            .background_pixel(screen.black_pixel)
            .border_pixel(screen.black_pixel)
            .override_redirect(1)
            .event_mask(EventMask::STRUCTURE_NOTIFY | EventMask::VISIBILITY_CHANGE);
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            screen.root,
            geometry.x,
            geometry.y,
            geometry.width,
            geometry.height,
            0,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &aux,
        )?;

        conn.change_property8(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            format!("dimmer-overlay {}", info.name).as_bytes(),
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms.wm_protocols,
            AtomEnum::ATOM,
            &[atoms.wm_delete_window],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms.net_wm_window_opacity,
            AtomEnum::CARDINAL,
            &[0],
        )?;

        // An empty input region lets every click fall through to the windows below.
        conn.xfixes_query_version(5, 0)?
            .reply()
            .context("XFixes extension is not available")?;
        let region = conn.generate_id()?;
        conn.xfixes_create_region(region, &[])?;
        conn.xfixes_set_window_shape_region(window, SK::INPUT, 0, 0, region)?;
        conn.xfixes_destroy_region(region)?;
        conn.flush()?;

        tracing::info!(
            monitor = %info.id,
            "Created overlay window {:#x} at {}x{}+{}+{}",
            window,
            geometry.width,
            geometry.height,
            geometry.x,
            geometry.y
        );

        Ok(Self {
            display,
            window,
            atoms,
            mapped: false,
            destroyed: false,
        })
    }

    fn raise(&self) -> Result<(), SurfaceError> {
        let conn = self.display.connection();
        conn.configure_window(
            self.window,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        conn.flush()?;
        Ok(())
    }
}

impl OverlaySurface for X11Overlay {
    fn set_alpha(&mut self, alpha: u8) -> Result<(), SurfaceError> {
        let conn = self.display.connection();
        conn.change_property32(
            PropMode::REPLACE,
            self.window,
            self.atoms.net_wm_window_opacity,
            AtomEnum::CARDINAL,
            &[opacity_cardinal(alpha)],
        )?
        .check()?;

        match (alpha, self.mapped) {
            (0, true) => {
                conn.unmap_window(self.window)?;
                self.mapped = false;
            }
            (1..=255, false) => {
                conn.map_window(self.window)?.check()?;
                conn.configure_window(
                    self.window,
                    &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
                )?;
                self.mapped = true;
            }
            _ => {}
        }

        conn.flush()?;
        Ok(())
    }

    fn pump(&mut self) -> Result<SurfaceStatus, SurfaceError> {
        while let Some(event) = self.display.connection().poll_for_event()? {
            match event {
                Event::DestroyNotify(e) if e.window == self.window => {
                    self.destroyed = true;
                    return Ok(SurfaceStatus::Closed);
                }
                Event::ClientMessage(e)
                    if e.window == self.window
                        && e.format == 32
                        && e.data.as_data32()[0] == self.atoms.wm_delete_window =>
                {
                    return Ok(SurfaceStatus::Closed);
                }
                Event::VisibilityNotify(e)
                    if e.window == self.window && e.state != Visibility::UNOBSCURED =>
                {
                    self.raise()?;
                }
                Event::Error(e) => {
                    tracing::warn!("X11 error: {:?}", e);
                }
                _ => {}
            }
        }
        Ok(SurfaceStatus::Open)
    }

    fn close(&mut self) -> Result<(), SurfaceError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        let conn = self.display.connection();
        conn.destroy_window(self.window)?;
        conn.flush()?;
        tracing::debug!("Destroyed overlay window {:#x}", self.window);
        Ok(())
    }
}

impl Drop for X11Overlay {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!("Failed to destroy overlay window: {}", e);
        }
    }
}
