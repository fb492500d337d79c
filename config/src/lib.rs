// SPDX-License-Identifier: MPL-2.0-only

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

pub const NAME: &str = "universal-wallpaper";
pub const CONFIG_FILE: &str = "config.ron";

pub const DEFAULT_FPS: u32 = 30;
pub const MAX_FPS: u32 = 240;
pub const DEFAULT_VOLUME: f64 = 0.5;

/// Errors produced while loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

/// Output a wallpaper is painted on
#[derive(Debug, Deserialize, Serialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(deny_unknown_fields)]
#[must_use]
pub enum Output {
    /// paint a specific output
    Name(String),
    /// paint every output
    All,
}

impl Output {
    /// Interprets a user-supplied output name. `ALL` matches in any case.
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        if name.eq_ignore_ascii_case("all") {
            Output::All
        } else {
            Output::Name(name.to_owned())
        }
    }
}

impl FromStr for Output {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::All => f.write_str("ALL"),
            Output::Name(name) => f.write_str(name),
        }
    }
}

/// Video scaling mode
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScalingMode {
    /// Stretch the video ignoring any aspect ratio to fill the output
    Stretch,
    /// Fit the video inside the output, adding black borders
    #[default]
    Fit,
    /// Crop the video so that it fills the whole output
    Fill,
    /// Keep the decoder's native size and scale while drawing
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid scaling mode `{0}`, expected one of: stretch, fit, fill, default")]
pub struct ScalingModeError(String);

impl FromStr for ScalingMode {
    type Err = ScalingModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stretch" => Ok(ScalingMode::Stretch),
            "fit" => Ok(ScalingMode::Fit),
            "fill" => Ok(ScalingMode::Fill),
            "default" => Ok(ScalingMode::Default),
            _ => Err(ScalingModeError(s.to_owned())),
        }
    }
}

impl fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScalingMode::Stretch => "stretch",
            ScalingMode::Fit => "fit",
            ScalingMode::Fill => "fill",
            ScalingMode::Default => "default",
        })
    }
}

/// Display protocol preference
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    // pick from the session environment
    #[default]
    Auto,
    Wayland,
    X11,
}

/// Persistent defaults, overridden by command line flags.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Setters)]
#[serde(default, deny_unknown_fields)]
#[must_use]
pub struct Config {
    /// media shown when none is given on the command line
    #[setters(strip_option)]
    pub media: Option<PathBuf>,
    /// outputs the wallpaper is painted on
    pub outputs: Vec<Output>,
    /// target frame rate
    pub fps: u32,
    /// throttle rendering of media without motion
    pub adaptive_fps: bool,
    /// how decoded frames are fitted to the output
    pub scaling: ScalingMode,
    /// restart playback at end of stream
    pub looping: bool,
    /// allow hardware video decoders
    pub hardware_decode: bool,
    /// never play the audio track
    pub silent: bool,
    /// mute while another application plays audio
    pub auto_mute: bool,
    /// playback volume in `0.0..=1.0`
    pub volume: f64,
    /// stop rendering while a fullscreen window is shown
    pub pause_on_fullscreen: bool,
    /// preferred display protocol
    pub backend: Backend,
    /// tracing filter directive such as `debug` or `warn`
    #[setters(strip_option)]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media: None,
            outputs: vec![Output::All],
            fps: DEFAULT_FPS,
            adaptive_fps: true,
            scaling: ScalingMode::default(),
            looping: true,
            hardware_decode: true,
            silent: false,
            auto_mute: true,
            volume: DEFAULT_VOLUME,
            pause_on_fullscreen: true,
            backend: Backend::default(),
            log_level: None,
        }
    }
}

impl Config {
    /// Location of the user's config file, if a config directory exists.
    #[must_use]
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(NAME).join(CONFIG_FILE))
    }

    /// Load the user's config file, or defaults if there is none.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, Error> {
        match Self::path() {
            Some(path) => Self::load_or_default(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load a config file, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(path)
    }

    /// Load a config file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or contains invalid RON.
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_ron(&contents).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a config from RON text. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Fails on malformed RON or unknown fields.
    pub fn from_ron(contents: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str::<Self>(contents).map(Self::normalized)
    }

    /// Clamp numeric fields into their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.fps = clamp_fps(self.fps);
        self.volume = normalize_volume(self.volume);
        if self.outputs.is_empty() {
            self.outputs.push(Output::All);
        }
        self
    }

    /// Whether the wallpaper should be painted on every output.
    #[must_use]
    pub fn paints_all(&self) -> bool {
        self.outputs.iter().any(|output| *output == Output::All)
    }
}

/// Keeps the frame rate inside `1..=MAX_FPS`.
#[must_use]
pub fn clamp_fps(fps: u32) -> u32 {
    fps.clamp(1, MAX_FPS)
}

/// Accepts both `0.0..=1.0` and percent values, clamped to `0.0..=1.0`.
#[must_use]
pub fn normalize_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        return DEFAULT_VOLUME;
    }

    let volume = if volume > 1.0 { volume / 100.0 } else { volume };
    volume.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_output_parse_all_any_case() {
        assert_eq!(Output::parse("ALL"), Output::All);
        assert_eq!(Output::parse("all"), Output::All);
        assert_eq!(Output::parse(" All "), Output::All);
        assert_eq!(Output::parse("DP-1"), Output::Name("DP-1".into()));
        assert_eq!(Output::All.to_string(), "ALL");
    }

    #[test]
    fn test_scaling_mode_from_str() {
        assert_eq!("fit".parse(), Ok(ScalingMode::Fit));
        assert_eq!("Stretch".parse(), Ok(ScalingMode::Stretch));
        assert_eq!("fill".parse(), Ok(ScalingMode::Fill));
        assert_eq!("default".parse(), Ok(ScalingMode::Default));
        assert!("zoom".parse::<ScalingMode>().is_err());
    }

    #[test]
    fn test_volume_normalization() {
        assert_eq!(normalize_volume(0.8), 0.8);
        assert_eq!(normalize_volume(80.0), 0.8);
        assert_eq!(normalize_volume(250.0), 1.0);
        assert_eq!(normalize_volume(-1.0), 0.0);
        assert_eq!(normalize_volume(f64::NAN), DEFAULT_VOLUME);
    }

    #[test]
    fn test_fps_clamped() {
        assert_eq!(clamp_fps(0), 1);
        assert_eq!(clamp_fps(60), 60);
        assert_eq!(clamp_fps(1000), MAX_FPS);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config = Config::from_ron("(fps: 60, scaling: Fill, volume: 50.0)").unwrap();
        assert_eq!(config.fps, 60);
        assert_eq!(config.scaling, ScalingMode::Fill);
        assert_eq!(config.volume, 0.5);
        assert!(config.looping);
        assert_eq!(config.outputs, vec![Output::All]);
    }

    #[test]
    fn test_ron_outputs_and_backend() {
        let config =
            Config::from_ron(r#"(outputs: [Name("DP-1"), Name("HDMI-A-1")], backend: X11)"#)
                .unwrap();
        assert_eq!(config.backend, Backend::X11);
        assert!(!config.paints_all());
        assert_eq!(config.outputs.len(), 2);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Config::from_ron("(fps: 30, shuffle: true)").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.ron")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "(media: Some(\"/tmp/clip.mp4\"), adaptive_fps: false)"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.media, Some(PathBuf::from("/tmp/clip.mp4")));
        assert!(!config.adaptive_fps);
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "(fps: ").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_setters_chain() {
        let config = Config::default()
            .fps(12)
            .silent(true)
            .media(PathBuf::from("a.webm"));
        assert_eq!(config.fps, 12);
        assert!(config.silent);
        assert_eq!(config.media, Some(PathBuf::from("a.webm")));
    }
}
