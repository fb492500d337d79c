// SPDX-License-Identifier: MPL-2.0

//! Output enumeration and painting, independent of the display protocol.

use std::env;

use universal_wallpaper_config::Output as OutputSelector;

use crate::render::{NativeDisplay, OffscreenTarget, SharedRenderer};

/// One physical display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Output {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub scale: i32,
    pub primary: bool,
    pub ready: bool,
}

/// Operations every display protocol backend provides.
pub trait DisplayBackend {
    fn name(&self) -> &'static str;

    fn outputs(&self) -> Vec<Output>;

    /// Paint `target` onto the output called `name`.
    fn paint_output(&mut self, name: &str, target: &OffscreenTarget) -> bool;

    fn paint_all(&mut self, target: &OffscreenTarget) -> bool;

    /// Display handle the GPU context is created against.
    fn native_display(&self) -> NativeDisplay;

    /// Dispatch pending protocol events without blocking.
    fn pump_events(&mut self);

    fn shutdown_requested(&self) -> bool;

    fn bind_renderer(&mut self, renderer: SharedRenderer);

    fn paint(&mut self, output: &OutputSelector, target: &OffscreenTarget) -> bool {
        match output {
            OutputSelector::All => self.paint_all(target),
            OutputSelector::Name(name) => self.paint_output(name, target),
        }
    }
}

/// The output flagged primary, or the first one.
pub fn primary_output(outputs: &[Output]) -> Option<&Output> {
    outputs
        .iter()
        .find(|output| output.primary)
        .or_else(|| outputs.first())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Wayland,
    X11,
}

impl Protocol {
    fn other(self) -> Self {
        match self {
            Protocol::Wayland => Protocol::X11,
            Protocol::X11 => Protocol::Wayland,
        }
    }
}

/// Display server hints from the process environment.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub wayland_display: bool,
    pub session_type_wayland: bool,
    pub x_display: bool,
}

impl Session {
    pub fn from_env() -> Self {
        let set = |key: &str| env::var_os(key).is_some_and(|value| !value.is_empty());
        Self {
            wayland_display: set("WAYLAND_DISPLAY"),
            session_type_wayland: env::var("XDG_SESSION_TYPE")
                .is_ok_and(|value| value.eq_ignore_ascii_case("wayland")),
            x_display: set("DISPLAY"),
        }
    }

    pub fn is_wayland(&self) -> bool {
        self.wayland_display || self.session_type_wayland
    }

    pub fn is_x11(&self) -> bool {
        self.x_display
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("cannot force both the Wayland and the X11 backend")]
    BothForced,
    #[error("no display server detected (neither WAYLAND_DISPLAY nor DISPLAY is set)")]
    NoSession,
}

/// Backends to try, in order. The second entry is the fallback.
pub fn select_protocols(
    force_wayland: bool,
    force_x11: bool,
    session: &Session,
) -> Result<[Protocol; 2], SelectError> {
    let first = match (force_wayland, force_x11) {
        (true, true) => return Err(SelectError::BothForced),
        (true, false) => Protocol::Wayland,
        (false, true) => Protocol::X11,
        (false, false) if session.is_wayland() => Protocol::Wayland,
        (false, false) if session.is_x11() => Protocol::X11,
        (false, false) => return Err(SelectError::NoSession),
    };

    Ok([first, first.other()])
}

/// Connect to the display server and return the active backend.
///
/// # Errors
///
/// Fails if both backends are forced, no session is detected, or neither
/// backend can connect.
pub fn initialize(force_wayland: bool, force_x11: bool) -> eyre::Result<Box<dyn DisplayBackend>> {
    let session = Session::from_env();
    let [first, fallback] = select_protocols(force_wayland, force_x11, &session)?;

    match connect(first) {
        Ok(backend) => Ok(backend),
        Err(why) => {
            tracing::warn!(
                ?first,
                ?fallback,
                "Backend failed to initialize ({why:#}), trying fallback"
            );
            connect(fallback).map_err(|fallback_why| {
                fallback_why.wrap_err(format!("no display backend available ({first:?}: {why:#})"))
            })
        }
    }
}

fn connect(protocol: Protocol) -> eyre::Result<Box<dyn DisplayBackend>> {
    let backend: Box<dyn DisplayBackend> = match protocol {
        Protocol::Wayland => Box::new(crate::wayland::WaylandBackend::connect()?),
        Protocol::X11 => Box::new(crate::x11::X11Backend::connect()?),
    };

    tracing::info!(backend = backend.name(), "Display backend initialized");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(name: &str, primary: bool) -> Output {
        Output {
            name: name.into(),
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
            scale: 1,
            primary,
            ready: true,
        }
    }

    #[test]
    fn test_forcing_both_is_rejected() {
        let session = Session::default();
        assert_eq!(
            select_protocols(true, true, &session),
            Err(SelectError::BothForced)
        );
    }

    #[test]
    fn test_forced_backend_falls_back_to_other() {
        let session = Session::default();
        assert_eq!(
            select_protocols(false, true, &session),
            Ok([Protocol::X11, Protocol::Wayland])
        );
        assert_eq!(
            select_protocols(true, false, &session),
            Ok([Protocol::Wayland, Protocol::X11])
        );
    }

    #[test]
    fn test_wayland_preferred_over_x11() {
        let session = Session {
            wayland_display: true,
            session_type_wayland: false,
            x_display: true,
        };
        assert_eq!(
            select_protocols(false, false, &session),
            Ok([Protocol::Wayland, Protocol::X11])
        );

        let session = Session {
            x_display: true,
            ..Session::default()
        };
        assert_eq!(
            select_protocols(false, false, &session),
            Ok([Protocol::X11, Protocol::Wayland])
        );
    }

    #[test]
    fn test_no_session_is_an_error() {
        assert_eq!(
            select_protocols(false, false, &Session::default()),
            Err(SelectError::NoSession)
        );
    }

    #[test]
    fn test_primary_output_prefers_flag() {
        let outputs = vec![output("DP-1", false), output("DP-2", true)];
        assert_eq!(
            primary_output(&outputs).map(|o| o.name.as_str()),
            Some("DP-2")
        );

        let outputs = vec![output("DP-1", false), output("DP-2", false)];
        assert_eq!(
            primary_output(&outputs).map(|o| o.name.as_str()),
            Some("DP-1")
        );

        assert!(primary_output(&[]).is_none());
    }

    #[test]
    fn test_paint_dispatches_selector() {
        use crate::testing::{FakeBackend, fake_target};

        let mut backend = FakeBackend::with_outputs(vec![output("DP-1", true)]);
        let target = fake_target(1920, 1080);

        assert!(backend.paint(&OutputSelector::All, &target));
        assert!(backend.paint(&OutputSelector::Name("DP-1".into()), &target));
        assert!(!backend.paint(&OutputSelector::Name("HDMI-A-9".into()), &target));

        assert_eq!(backend.paint_all_calls, 1);
        assert_eq!(backend.painted, vec!["DP-1".to_owned()]);
    }
}
