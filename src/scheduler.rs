// SPDX-License-Identifier: MPL-2.0

//! Frame pacing for the main loop.
//!
//! The scheduler never sleeps or reads the clock itself: each call to
//! [`FrameScheduler::tick`] receives the current instant and returns how long
//! the caller should wait before the next one.

use std::time::{Duration, Instant};

use universal_wallpaper_config::{Output as OutputSelector, clamp_fps};

use crate::{
    display::DisplayBackend,
    monitor::{AudioSignal, FullscreenSignal},
    playback::Playback,
    render::{OffscreenTarget, SharedRenderer},
};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const MIN_SLEEP: Duration = Duration::from_millis(1);

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// how often display and playback events are pumped
    pub event_interval: Duration,
    /// how often the audio monitor is consulted
    pub audio_interval: Duration,
    pub frame_interval: Duration,
    /// shortest gap between renders that have no new frame to show
    pub min_render_gap: Duration,
    pub pause_sleep: Duration,
    pub static_check_interval: Duration,
    /// render gap for static content without new frames
    pub static_grace: Duration,
    /// media shorter than this many seconds counts as static
    pub static_threshold: f64,
    pub waiting_log_period: u32,
    pub adaptive_fps: bool,
}

impl SchedulerConfig {
    pub fn with_fps(fps: u32) -> Self {
        Self {
            event_interval: Duration::from_millis(16),
            audio_interval: Duration::from_millis(100),
            frame_interval: Duration::from_millis(u64::from(1000 / clamp_fps(fps))),
            min_render_gap: Duration::from_millis(16),
            pause_sleep: Duration::from_millis(100),
            static_check_interval: Duration::from_secs(5),
            static_grace: Duration::from_millis(500),
            static_threshold: 0.1,
            waiting_log_period: 60,
            adaptive_fps: true,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::with_fps(universal_wallpaper_config::DEFAULT_FPS)
    }
}

/// Everything a tick touches, borrowed for the duration of the tick.
pub struct Stage<'a> {
    pub display: &'a mut dyn DisplayBackend,
    pub renderer: &'a SharedRenderer,
    pub playback: &'a mut dyn Playback,
    pub audio: &'a dyn AudioSignal,
    pub fullscreen: &'a dyn FullscreenSignal,
    pub outputs: &'a [OutputSelector],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickOutcome {
    /// time to wait before the next tick
    pub sleep: Duration,
    pub rendered: bool,
    pub painted: bool,
}

pub struct FrameScheduler {
    config: SchedulerConfig,
    target_size: (u32, u32),
    last_render: Instant,
    last_events: Instant,
    last_audio: Instant,
    last_static_check: Instant,
    last_frame: Instant,
    needs_redraw: bool,
    /// `None` until the media has been classified once
    static_content: Option<bool>,
    muted: bool,
    paused: bool,
    waiting_ticks: u32,
}

impl FrameScheduler {
    /// `target_size` is the size frames are rendered at, normally the
    /// primary output's.
    pub fn new(config: SchedulerConfig, target_size: (u32, u32), now: Instant) -> Self {
        Self {
            config,
            target_size,
            last_render: now,
            last_events: now,
            last_audio: now,
            last_static_check: now,
            last_frame: now,
            needs_redraw: true,
            static_content: None,
            muted: false,
            paused: false,
            waiting_ticks: 0,
        }
    }

    #[cfg(test)]
    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    #[cfg(test)]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn tick(&mut self, now: Instant, stage: &mut Stage<'_>) -> TickOutcome {
        let paused = stage.fullscreen.is_enabled() && stage.fullscreen.is_fullscreen_active();
        if paused != self.paused {
            self.paused = paused;
            if paused {
                tracing::info!("Fullscreen window active, pausing");
            } else {
                tracing::info!("Fullscreen window gone, resuming");
                self.needs_redraw = true;
            }
        }
        if paused {
            return TickOutcome {
                sleep: self.config.pause_sleep,
                rendered: false,
                painted: false,
            };
        }

        if now.duration_since(self.last_events) >= self.config.event_interval {
            self.last_events = now;
            stage.display.pump_events();
            stage.playback.pump_events();
        }

        if now.duration_since(self.last_audio) >= self.config.audio_interval {
            self.last_audio = now;
            if stage.audio.is_enabled() {
                let other_audio = stage.audio.is_other_audio_active();
                if other_audio != self.muted {
                    self.muted = other_audio;
                    tracing::info!(muted = other_audio, "Other audio changed, updating mute");
                    stage.playback.set_muted(other_audio);
                }
            }
        }

        let has_new_frame = stage.playback.has_new_frame();
        let since_render = now.duration_since(self.last_render);
        let should_render = (self.needs_redraw || has_new_frame)
            && (has_new_frame || since_render >= self.config.min_render_gap);

        let mut rendered = false;
        let mut painted = false;
        if should_render && now.duration_since(self.last_frame) >= self.config.frame_interval {
            let is_static = self.classify(now, &*stage.playback);
            let throttled = self.config.adaptive_fps
                && is_static
                && !has_new_frame
                && since_render < self.config.static_grace;

            if !throttled {
                self.last_render = now;
                self.last_frame = now;
                (rendered, painted) = self.render(stage);
            }
        }

        TickOutcome {
            sleep: self.sleep_after(now),
            rendered,
            painted,
        }
    }

    /// Whether the media is static, re-evaluated every static check interval.
    fn classify(&mut self, now: Instant, playback: &dyn Playback) -> bool {
        let due = now.duration_since(self.last_static_check) >= self.config.static_check_interval;
        match self.static_content {
            Some(is_static) if !due => is_static,
            previous => {
                self.last_static_check = now;
                let is_static = playback.duration() < self.config.static_threshold;
                if previous != Some(is_static) {
                    tracing::debug!(is_static, "Classified media content");
                }
                self.static_content = Some(is_static);
                is_static
            }
        }
    }

    /// Render into the offscreen target and paint it. Returns whether the
    /// frame was rendered and whether any output was painted.
    ///
    /// Outputs keep their previous picture when nothing was rendered, and
    /// the redraw stays pending for the next tick.
    fn render(&mut self, stage: &mut Stage<'_>) -> (bool, bool) {
        let Some((target, rendered)) = self.render_target(stage) else {
            return (false, false);
        };

        if !rendered {
            tracing::trace!("No frame rendered, skipping paint");
            return (false, false);
        }
        stage.playback.report_presented();

        if !(stage.playback.is_playing() && stage.playback.has_video_track()) {
            if self.waiting_ticks % self.config.waiting_log_period.max(1) == 0 {
                tracing::info!("Waiting for playback to start");
            }
            self.waiting_ticks = self.waiting_ticks.wrapping_add(1);
            return (true, false);
        }

        self.waiting_ticks = 0;
        let mut painted = false;
        for selector in stage.outputs {
            // the backend borrows the renderer itself
            painted |= stage.display.paint(selector, &target);
        }
        self.needs_redraw = false;

        (true, painted)
    }

    fn render_target(&self, stage: &mut Stage<'_>) -> Option<(OffscreenTarget, bool)> {
        let Ok(mut renderer) = stage.renderer.try_borrow_mut() else {
            tracing::warn!("Renderer busy, skipping frame");
            return None;
        };

        if !renderer.make_current() {
            return None;
        }

        let (width, height) = self.target_size;
        let target = renderer.get_or_create_target(width, height)?;
        renderer.bind_target(&target);
        renderer.clear(CLEAR_COLOR);
        let rendered = stage.playback.render_into(&mut renderer, &target);
        renderer.bind_default();

        Some((target, rendered))
    }

    /// Half the time to the nearest deadline, skipping an overdue frame
    /// deadline since nothing was ready to render for it.
    fn sleep_after(&self, now: Instant) -> Duration {
        let remaining =
            |last: Instant, interval: Duration| (last + interval).saturating_duration_since(now);

        let frame = remaining(self.last_frame, self.config.frame_interval);
        let nearest = [
            remaining(self.last_events, self.config.event_interval),
            remaining(self.last_audio, self.config.audio_interval),
        ]
        .into_iter()
        .chain((!frame.is_zero()).then_some(frame))
        .min()
        .unwrap_or(MIN_SLEEP);

        (nearest / 2).max(MIN_SLEEP)
    }
}
