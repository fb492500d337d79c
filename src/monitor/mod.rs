// SPDX-License-Identifier: MPL-2.0

//! Background monitors whose only output is a boolean flag.
//!
//! Each monitor owns one polling thread that is the single writer of its
//! flag. The main loop reads the flag once per tick.

mod audio;
mod fullscreen;

pub use audio::AudioMonitor;
pub use fullscreen::FullscreenMonitor;

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

pub trait AudioSignal {
    fn is_enabled(&self) -> bool;

    /// Another application is playing sound.
    fn is_other_audio_active(&self) -> bool;
}

pub trait FullscreenSignal {
    fn is_enabled(&self) -> bool;

    /// A fullscreen window covers the wallpaper.
    fn is_fullscreen_active(&self) -> bool;
}

/// How often a sleeping poller checks for shutdown.
const STOP_CHECK: Duration = Duration::from_millis(50);

/// A thread running `probe` every `interval` and publishing its result.
pub struct Poller {
    active: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn spawn<F>(name: &str, interval: Duration, mut probe: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let active = Arc::clone(&active);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(name.to_owned())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        active.store(probe(), Ordering::Release);

                        let started = Instant::now();
                        while started.elapsed() < interval && !stop.load(Ordering::Acquire) {
                            thread::sleep(STOP_CHECK.min(interval));
                        }
                    }
                })?
        };

        Ok(Self {
            active,
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Monitor thread panicked");
            }
        }
    }
}
