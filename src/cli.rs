// SPDX-License-Identifier: MPL-2.0

//! Command line flags, merged over the config file.

use std::{fmt, path::PathBuf};

use clap::{Parser, ValueEnum};
use eyre::eyre;
use universal_wallpaper_config::{
    Backend, Config, Output as OutputSelector, ScalingMode, clamp_fps, normalize_volume,
};

#[derive(Parser, Debug)]
#[command(
    name = "universal-wallpaper",
    version,
    about = "Live video wallpaper for Wayland and X11"
)]
pub struct Cli {
    /// Video or image to play
    #[arg(value_name = "MEDIA")]
    pub media: Option<PathBuf>,

    /// Media to play when MEDIA is not given
    #[arg(short = 'b', long = "bg", value_name = "PATH")]
    pub bg: Option<PathBuf>,

    /// Output to paint, repeatable. ALL paints every output
    #[arg(short = 'o', long = "output", value_name = "NAME")]
    pub outputs: Vec<String>,

    /// Paint only this output
    #[arg(short = 'r', long = "screen-root", value_name = "NAME")]
    pub screen_root: Option<String>,

    /// Target frame rate, 1 to 240
    #[arg(short, long)]
    pub fps: Option<u32>,

    /// Never play the audio track
    #[arg(short, long)]
    pub silent: bool,

    /// Keep playing sound while other applications do
    #[arg(long = "noautomute")]
    pub no_auto_mute: bool,

    /// How frames are fitted to the output: stretch, fit, fill or default
    #[arg(long)]
    pub scaling: Option<ScalingMode>,

    /// Stop at the end of the media instead of looping
    #[arg(long)]
    pub no_loop: bool,

    /// Decode in software only
    #[arg(long)]
    pub no_hardware_decode: bool,

    /// Volume as 0.0 to 1.0, or a percentage
    #[arg(long)]
    pub volume: Option<f64>,

    #[arg(long, conflicts_with = "force_wayland")]
    pub force_x11: bool,

    #[arg(long)]
    pub force_wayland: bool,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    /// Detach from the terminal
    #[arg(short, long)]
    pub daemon: bool,

    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Render static media at the full frame rate
    #[arg(long)]
    pub no_adaptive_fps: bool,

    /// Keep rendering under fullscreen windows
    #[arg(long)]
    pub no_fullscreen_pause: bool,

    /// Config file to read instead of the default one
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

/// Everything `main` needs after merging flags and file.
#[derive(Debug)]
pub struct Settings {
    pub media: PathBuf,
    pub config: Config,
    pub verbose: bool,
    pub daemon: bool,
}

impl Cli {
    /// Apply the flags that were given over `config`.
    pub fn merge(&self, mut config: Config) -> Config {
        if let Some(media) = self.media.as_ref().or(self.bg.as_ref()) {
            config.media = Some(media.clone());
        }

        if let Some(root) = &self.screen_root {
            config.outputs = vec![OutputSelector::parse(root)];
        } else if !self.outputs.is_empty() {
            config.outputs = self
                .outputs
                .iter()
                .map(|name| OutputSelector::parse(name))
                .collect();
        }

        if let Some(fps) = self.fps {
            config.fps = clamp_fps(fps);
        }
        if let Some(scaling) = self.scaling {
            config.scaling = scaling;
        }
        if let Some(volume) = self.volume {
            config.volume = normalize_volume(volume);
        }
        if let Some(level) = self.log_level {
            config.log_level = Some(level.to_string());
        }

        config.silent |= self.silent;
        config.auto_mute &= !self.no_auto_mute;
        config.looping &= !self.no_loop;
        config.hardware_decode &= !self.no_hardware_decode;
        config.adaptive_fps &= !self.no_adaptive_fps;
        config.pause_on_fullscreen &= !self.no_fullscreen_pause;

        if self.force_x11 {
            config.backend = Backend::X11;
        } else if self.force_wayland {
            config.backend = Backend::Wayland;
        }

        config.normalized()
    }

    /// # Errors
    ///
    /// Fails when neither the flags nor the config name a media file.
    pub fn into_settings(self, config: Config) -> eyre::Result<Settings> {
        let config = self.merge(config);
        let media = config.media.clone().ok_or_else(|| {
            eyre!("no media given, pass a path or set `media` in the config file")
        })?;

        Ok(Settings {
            media,
            config,
            verbose: self.verbose,
            daemon: self.daemon,
        })
    }
}

impl Settings {
    /// Output selectors painted every frame. `ALL` absorbs named outputs.
    pub fn selectors(&self) -> Vec<OutputSelector> {
        if self.config.paints_all() {
            return vec![OutputSelector::All];
        }

        let mut selectors = Vec::with_capacity(self.config.outputs.len());
        for output in &self.config.outputs {
            if !selectors.contains(output) {
                selectors.push(output.clone());
            }
        }
        selectors
    }

    /// Default tracing directive when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> String {
        match &self.config.log_level {
            Some(level) => level.clone(),
            None if self.verbose => "debug".to_owned(),
            None => "info".to_owned(),
        }
    }

    pub fn force_wayland(&self) -> bool {
        self.config.backend == Backend::Wayland
    }

    pub fn force_x11(&self) -> bool {
        self.config.backend == Backend::X11
    }

    /// The audio monitor has nothing to mute when playback is silent.
    pub fn audio_monitor_enabled(&self) -> bool {
        self.config.auto_mute && !self.config.silent
    }
}
