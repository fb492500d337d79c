// SPDX-License-Identifier: MPL-2.0

//! Root window backend for X11 sessions.
//!
//! X11 has no per-output surfaces. Every paint reads the offscreen target
//! back and installs it as the root window background, published through
//! `_XROOTPMAP_ID` so that compositors and terminals pick it up.

pub mod compose;

use compose::RootCanvas;

use std::{borrow::Cow, ffi::c_void};

use eyre::{WrapErr, eyre};
use x11rb::{
    connection::Connection,
    image::{BitsPerPixel, Image, ImageOrder, ScanlinePad},
    protocol::{
        randr::{self, ConnectionExt as _},
        xproto::{
            AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, CreateGCAux, Pixmap, PropMode,
            Window,
        },
    },
    wrapper::ConnectionExt as _,
    xcb_ffi::XCBConnection,
};

use crate::{
    display::{DisplayBackend, Output},
    render::{NativeDisplay, OffscreenTarget, SharedRenderer},
};

x11rb::atom_manager! {
    Atoms: AtomsCookie {
        _XROOTPMAP_ID,
        ESETROOT_PMAP_ID,
    }
}

/// Name of the single output reported when RandR is unavailable.
const SCREEN_OUTPUT: &str = "Screen";

/// The whole screen as one output.
fn screen_output(width: u16, height: u16) -> Output {
    Output {
        name: SCREEN_OUTPUT.to_owned(),
        x: 0,
        y: 0,
        width: u32::from(width),
        height: u32::from(height),
        scale: 1,
        primary: true,
        ready: true,
    }
}

/// The X connection and root window a wallpaper is installed on.
pub struct RootWindow {
    conn: XCBConnection,
    screen: usize,
    root: Window,
    depth: u8,
    width: u16,
    height: u16,
    atoms: Atoms,
    /// pixmap currently published in the root properties
    property_pixmap: Option<Pixmap>,
}

impl RootWindow {
    pub fn connect() -> eyre::Result<Self> {
        let (conn, screen) =
            XCBConnection::connect(None).wrap_err("failed to connect to the X server")?;

        let (root, depth, width, height) = {
            let info = conn
                .setup()
                .roots
                .get(screen)
                .ok_or_else(|| eyre!("X server has no screen {screen}"))?;
            (
                info.root,
                info.root_depth,
                info.width_in_pixels,
                info.height_in_pixels,
            )
        };

        let atoms = Atoms::new(&conn)?
            .reply()
            .wrap_err("failed to intern root pixmap atoms")?;

        tracing::debug!(screen, depth, width, height, "Connected to X server");

        Ok(Self {
            conn,
            screen,
            root,
            depth,
            width,
            height,
            atoms,
            property_pixmap: None,
        })
    }

    /// Connected RandR outputs that drive a CRTC.
    fn randr_outputs(&self) -> eyre::Result<Vec<Output>> {
        let conn = &self.conn;
        let version = conn
            .randr_query_version(1, 5)?
            .reply()
            .wrap_err("RandR unavailable")?;
        tracing::debug!(
            major = version.major_version,
            minor = version.minor_version,
            "RandR version"
        );

        let resources = conn
            .randr_get_screen_resources_current(self.root)?
            .reply()?;
        let primary = conn.randr_get_output_primary(self.root)?.reply()?.output;

        let mut outputs = Vec::new();
        for &output in &resources.outputs {
            let info = conn
                .randr_get_output_info(output, resources.config_timestamp)?
                .reply()?;
            if info.connection != randr::Connection::CONNECTED || info.crtc == 0 {
                continue;
            }

            let crtc = conn
                .randr_get_crtc_info(info.crtc, resources.config_timestamp)?
                .reply()?;

            outputs.push(Output {
                name: String::from_utf8_lossy(&info.name).into_owned(),
                x: i32::from(crtc.x),
                y: i32::from(crtc.y),
                width: u32::from(crtc.width),
                height: u32::from(crtc.height),
                scale: 1,
                primary: output == primary,
                ready: true,
            });
        }

        Ok(outputs)
    }

    pub fn outputs(&self) -> Vec<Output> {
        match self.randr_outputs() {
            Ok(outputs) if !outputs.is_empty() => outputs,
            Ok(_) => {
                tracing::warn!("RandR reported no active outputs, using the whole screen");
                vec![screen_output(self.width, self.height)]
            }
            Err(why) => {
                tracing::warn!("Output enumeration failed ({why:#}), using the whole screen");
                vec![screen_output(self.width, self.height)]
            }
        }
    }
}

impl RootCanvas for RootWindow {
    fn install(&mut self, width: u32, height: u32, bgra: &[u8]) -> eyre::Result<()> {
        let conn = &self.conn;
        let w = u16::try_from(width).wrap_err("pixmap width exceeds the X11 limit")?;
        let h = u16::try_from(height).wrap_err("pixmap height exceeds the X11 limit")?;

        let image = Image::new(
            w,
            h,
            ScanlinePad::Pad32,
            self.depth,
            BitsPerPixel::B32,
            ImageOrder::LsbFirst,
            Cow::Borrowed(bgra),
        )?;
        let image = image.native(conn.setup())?;

        let pixmap = conn.generate_id()?;
        conn.create_pixmap(self.depth, pixmap, self.root, w, h)?;
        let gc = conn.generate_id()?;
        conn.create_gc(gc, pixmap, &CreateGCAux::new())?;

        // splits into as many PutImage requests as the server needs
        image.put(conn, pixmap, gc, 0, 0)?;

        conn.change_window_attributes(
            self.root,
            &ChangeWindowAttributesAux::new().background_pixmap(pixmap),
        )?;
        conn.clear_area(false, self.root, 0, 0, 0, 0)?;

        let property = conn.generate_id()?;
        conn.create_pixmap(self.depth, property, self.root, w, h)?;
        conn.copy_area(pixmap, property, gc, 0, 0, 0, 0, w, h)?;
        for atom in [self.atoms._XROOTPMAP_ID, self.atoms.ESETROOT_PMAP_ID] {
            conn.change_property32(
                PropMode::REPLACE,
                self.root,
                atom,
                AtomEnum::PIXMAP,
                &[property],
            )?;
        }
        if let Some(previous) = self.property_pixmap.replace(property) {
            conn.free_pixmap(previous)?;
        }

        conn.free_gc(gc)?;
        conn.free_pixmap(pixmap)?;
        conn.flush()?;

        Ok(())
    }

    fn native_display(&self) -> NativeDisplay {
        NativeDisplay::Xcb {
            connection: self.conn.get_raw_xcb_connection().cast::<c_void>(),
            screen: self.screen as i32,
        }
    }

    fn pump_events(&mut self) -> bool {
        loop {
            match self.conn.poll_for_event() {
                Ok(Some(event)) => tracing::trace!(?event, "X11 event"),
                Ok(None) => return true,
                Err(why) => {
                    tracing::error!(%why, "X11 connection lost");
                    return false;
                }
            }
        }
    }
}

/// Display backend painting the X11 root window.
pub struct X11Backend<C = RootWindow> {
    renderer: Option<SharedRenderer>,
    canvas: C,
    outputs: Vec<Output>,
    per_output_noticed: bool,
    shutdown: bool,
}

impl X11Backend<RootWindow> {
    pub fn connect() -> eyre::Result<Self> {
        let window = RootWindow::connect()?;
        let outputs = window.outputs();

        for output in &outputs {
            tracing::info!(
                output = %output.name,
                x = output.x,
                y = output.y,
                width = output.width,
                height = output.height,
                primary = output.primary,
                "X11 output"
            );
        }

        Ok(Self::with_canvas(window, outputs))
    }
}

impl<C: RootCanvas> X11Backend<C> {
    pub fn with_canvas(canvas: C, outputs: Vec<Output>) -> Self {
        Self {
            renderer: None,
            canvas,
            outputs,
            per_output_noticed: false,
            shutdown: false,
        }
    }
}

impl<C: RootCanvas> DisplayBackend for X11Backend<C> {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn outputs(&self) -> Vec<Output> {
        self.outputs.clone()
    }

    fn paint_output(&mut self, name: &str, target: &OffscreenTarget) -> bool {
        if !self.per_output_noticed {
            tracing::info!(
                output = name,
                "X11 cannot paint a single output, painting the whole root window"
            );
            self.per_output_noticed = true;
        }

        if !self.outputs.iter().any(|output| output.name == name) {
            tracing::debug!(output = name, "Unknown X11 output");
        }

        self.paint_all(target)
    }

    fn paint_all(&mut self, target: &OffscreenTarget) -> bool {
        compose::paint_root(self.renderer.as_ref(), target, &mut self.canvas)
    }

    fn native_display(&self) -> NativeDisplay {
        self.canvas.native_display()
    }

    fn pump_events(&mut self) {
        if !self.canvas.pump_events() {
            self.shutdown = true;
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    fn bind_renderer(&mut self, renderer: SharedRenderer) {
        self.renderer = Some(renderer);
    }
}

impl<C> Drop for X11Backend<C> {
    fn drop(&mut self) {
        // GPU resources go before the connection EGL was created on
        self.renderer.take();
    }
}
