// SPDX-License-Identifier: MPL-2.0

mod cli;
mod display;
mod monitor;
mod playback;
mod render;
mod scheduler;
mod wayland;
mod x11;

#[cfg(test)]
mod testing;

use std::{path::Path, time::Instant};

use calloop::{
    EventLoop,
    signals::{Signal, Signals},
};
use clap::Parser;
use eyre::{WrapErr, eyre};
use tracing_subscriber::EnvFilter;
use universal_wallpaper_config::Config;

use crate::{
    cli::{Cli, Settings},
    monitor::{AudioMonitor, FullscreenMonitor},
    playback::{GstPlayback, PlaybackOptions},
    render::Renderer,
    scheduler::{FrameScheduler, SchedulerConfig, Stage},
};

/// State the signal handler shares with the main loop.
struct LoopState {
    running: bool,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let (config, config_error) = match load_config(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(why) => (Config::default(), Some(why)),
    };
    let mut settings = cli.into_settings(config)?;

    init_logging(&settings);
    if let Some(why) = config_error {
        tracing::warn!(?why, "Config file error, falling back to defaults");
    }

    settings.media = settings
        .media
        .canonicalize()
        .wrap_err_with(|| format!("media file not found: {}", settings.media.display()))?;
    if !settings.media.is_file() {
        return Err(eyre!(
            "media path is not a file: {}",
            settings.media.display()
        ));
    }

    if settings.daemon {
        // before any thread or connection exists
        nix::unistd::daemon(false, false).wrap_err("failed to daemonize")?;
    }

    run(&settings)
}

fn load_config(path: Option<&Path>) -> Result<Config, universal_wallpaper_config::Error> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!settings.daemon)
        .init();
}

fn run(settings: &Settings) -> eyre::Result<()> {
    let config = &settings.config;

    // blocks the signals for every thread spawned after this point
    let mut event_loop: EventLoop<LoopState> = EventLoop::try_new()?;
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])?;
    event_loop
        .handle()
        .insert_source(signals, |event, _, state: &mut LoopState| {
            tracing::info!(signal = ?event.signal(), "Shutting down");
            state.running = false;
        })
        .map_err(|why| eyre!("failed to register signal handler: {}", why.error))?;

    let mut display = display::initialize(settings.force_wayland(), settings.force_x11())?;

    let outputs = display.outputs();
    let primary = display::primary_output(&outputs)
        .ok_or_else(|| eyre!("{} backend reported no outputs", display.name()))?;
    let target_size = (primary.width, primary.height);
    tracing::info!(
        outputs = outputs.len(),
        primary = %primary.name,
        width = target_size.0,
        height = target_size.1,
        "Rendering at primary output size"
    );

    let renderer = Renderer::acquire_context(display.native_display())
        .wrap_err("failed to create a GPU context")?
        .into_shared();
    display.bind_renderer(renderer.clone());

    let audio = AudioMonitor::start(settings.audio_monitor_enabled());
    let fullscreen =
        FullscreenMonitor::start(config.pause_on_fullscreen, display.name() == "wayland");

    let mut playback = GstPlayback::new(
        &settings.media,
        &PlaybackOptions::from_config(config, target_size),
    )?;

    let selectors = settings.selectors();
    let scheduler_config = SchedulerConfig {
        adaptive_fps: config.adaptive_fps,
        ..SchedulerConfig::with_fps(config.fps)
    };
    let mut scheduler = FrameScheduler::new(scheduler_config, target_size, Instant::now());

    let mut state = LoopState { running: true };
    while state.running && !display.shutdown_requested() {
        let mut stage = Stage {
            display: display.as_mut(),
            renderer: &renderer,
            playback: &mut playback,
            audio: &audio,
            fullscreen: &fullscreen,
            outputs: &selectors,
        };
        let outcome = scheduler.tick(Instant::now(), &mut stage);

        event_loop
            .dispatch(Some(outcome.sleep), &mut state)
            .wrap_err("event loop failed")?;
    }

    if display.shutdown_requested() {
        let backend = display.name();
        tracing::info!(backend, "Display connection closed");
    }

    // decoder threads first, then the monitors, then GPU resources before
    // the display connection they were created on
    drop(playback);
    drop(fullscreen);
    drop(audio);
    drop(renderer);
    drop(display);

    tracing::info!("Exited cleanly");
    Ok(())
}
