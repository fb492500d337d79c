// SPDX-License-Identifier: MPL-2.0

//! Detects fullscreen windows through EWMH properties on X11.
//!
//! Wayland offers clients no way to inspect other windows, so there the
//! monitor always reports false.

use std::time::Duration;

use eyre::eyre;
use x11rb::{
    connection::Connection,
    errors::ReplyError,
    protocol::xproto::{AtomEnum, ConnectionExt as _, MapState, Setup, Window},
    rust_connection::RustConnection,
};

use super::{FullscreenSignal, Poller};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on property lengths read, in 32-bit units.
const PROPERTY_LENGTH: u32 = 1024;

x11rb::atom_manager! {
    Atoms: AtomsCookie {
        _NET_CLIENT_LIST,
        _NET_WM_STATE,
        _NET_WM_STATE_FULLSCREEN,
    }
}

/// What the probe learned about one managed window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowState {
    pub viewable: bool,
    pub states: Vec<u32>,
}

pub fn any_fullscreen(windows: &[WindowState], fullscreen: u32) -> bool {
    windows
        .iter()
        .any(|window| window.viewable && window.states.contains(&fullscreen))
}

fn root_window(setup: &Setup, screen: usize) -> eyre::Result<Window> {
    setup
        .roots
        .get(screen)
        .map(|info| info.root)
        .ok_or_else(|| eyre!("X server has no screen {screen}"))
}

fn managed_windows(
    conn: &RustConnection,
    root: Window,
    atoms: &Atoms,
) -> Result<Vec<WindowState>, ReplyError> {
    let list = conn
        .get_property(
            false,
            root,
            atoms._NET_CLIENT_LIST,
            AtomEnum::WINDOW,
            0,
            PROPERTY_LENGTH,
        )?
        .reply()?;
    let Some(windows) = list.value32() else {
        return Ok(Vec::new());
    };

    let mut states = Vec::new();
    for window in windows {
        // windows may vanish between the list and the query
        let Ok(attributes) = conn.get_window_attributes(window)?.reply() else {
            continue;
        };
        let viewable = attributes.map_state == MapState::VIEWABLE;
        if !viewable {
            continue;
        }

        let Ok(state) = conn
            .get_property(
                false,
                window,
                atoms._NET_WM_STATE,
                AtomEnum::ATOM,
                0,
                PROPERTY_LENGTH,
            )?
            .reply()
        else {
            continue;
        };

        states.push(WindowState {
            viewable,
            states: state.value32().map(Iterator::collect).unwrap_or_default(),
        });
    }

    Ok(states)
}

pub struct FullscreenMonitor {
    enabled: bool,
    poller: Option<Poller>,
}

impl FullscreenMonitor {
    pub fn start(enabled: bool, wayland: bool) -> Self {
        if !enabled {
            tracing::debug!("Fullscreen monitor disabled");
            return Self::off();
        }

        if wayland {
            tracing::info!("Fullscreen detection is unavailable on Wayland");
            return Self {
                enabled: true,
                poller: None,
            };
        }

        match Self::spawn_x11() {
            Ok(poller) => {
                tracing::info!("Fullscreen monitor started");
                Self {
                    enabled: true,
                    poller: Some(poller),
                }
            }
            Err(why) => {
                tracing::error!("Failed to start fullscreen monitor: {why:#}");
                Self::off()
            }
        }
    }

    fn off() -> Self {
        Self {
            enabled: false,
            poller: None,
        }
    }

    fn spawn_x11() -> eyre::Result<Poller> {
        let (conn, screen) = x11rb::connect(None)?;
        let root = root_window(conn.setup(), screen)?;
        let atoms = Atoms::new(&conn)?.reply()?;

        let mut was_fullscreen = false;
        let mut failed = false;
        let poller = Poller::spawn("fullscreen-monitor", POLL_INTERVAL, move || {
            let fullscreen = match managed_windows(&conn, root, &atoms) {
                Ok(windows) => {
                    failed = false;
                    any_fullscreen(&windows, atoms._NET_WM_STATE_FULLSCREEN)
                }
                Err(why) => {
                    if !failed {
                        tracing::warn!(?why, "Fullscreen query failed");
                        failed = true;
                    }
                    false
                }
            };

            if fullscreen != was_fullscreen {
                if fullscreen {
                    tracing::info!("Fullscreen window detected");
                } else {
                    tracing::info!("Fullscreen window gone");
                }
                was_fullscreen = fullscreen;
            }

            fullscreen
        })?;

        Ok(poller)
    }
}

impl FullscreenSignal for FullscreenMonitor {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_fullscreen_active(&self) -> bool {
        self.poller.as_ref().is_some_and(Poller::is_active)
    }
}
