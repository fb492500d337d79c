// SPDX-License-Identifier: MPL-2.0

//! Media playback feeding decoded frames into the offscreen target.

pub mod frame_queue;
mod pipeline;

pub use pipeline::GstPlayback;

use std::path::Path;

use universal_wallpaper_config::{Config, ScalingMode};

use crate::render::{OffscreenTarget, Renderer};

/// Operations the frame scheduler needs from a playback engine.
pub trait Playback {
    /// A decoded frame is waiting to be rendered.
    fn has_new_frame(&self) -> bool;

    /// Upload the newest frame (or the last one again) into `target`,
    /// which the caller has bound and cleared.
    fn render_into(&mut self, renderer: &mut Renderer, target: &OffscreenTarget) -> bool;

    /// The last rendered frame reached the outputs.
    fn report_presented(&mut self);

    /// Media duration in seconds, `0.0` for still images or when unknown.
    fn duration(&self) -> f64;

    fn is_playing(&self) -> bool;

    fn has_video_track(&self) -> bool;

    /// Handle pending engine messages without blocking.
    fn pump_events(&mut self);

    fn set_muted(&mut self, muted: bool);
}

/// Container extensions played as video. GIF is animated, so it is one too.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "webm", "m4v", "wmv", "flv", "ogv", "3gp", "gif",
];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp", "svg"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Classify by extension. Unknown files are handed to the decoder as video.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str())
            || image::ImageFormat::from_extension(&ext).is_some()
        {
            MediaKind::Image
        } else {
            tracing::debug!(
                path = %path.display(),
                "Unrecognized media extension, trying as video"
            );
            MediaKind::Video
        }
    }
}

/// Everything the engine needs to build its pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackOptions {
    pub scaling: ScalingMode,
    pub looping: bool,
    pub hardware_decode: bool,
    pub silent: bool,
    pub volume: f64,
    /// size frames are scaled to, normally the primary output's
    pub target_size: (u32, u32),
}

impl PlaybackOptions {
    pub fn from_config(config: &Config, target_size: (u32, u32)) -> Self {
        Self {
            scaling: config.scaling,
            looping: config.looping,
            hardware_decode: config.hardware_decode,
            silent: config.silent,
            volume: config.volume,
            target_size,
        }
    }
}
