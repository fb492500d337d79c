// SPDX-License-Identifier: MPL-2.0

//! GStreamer `playbin` engine.
//!
//! Video is routed into a sink bin that converts, scales and caps frames to
//! tightly packed RGBA at the target size:
//!
//! ```text
//! playbin video-sink = [ videoconvert ! <scaling> ! capsfilter ! appsink ]
//! ```
//!
//! The appsink callback runs on the streaming thread and only pushes into
//! the bounded [`FrameQueue`]; everything else happens on the main thread.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use gstreamer::prelude::*;
use gstreamer_video::prelude::*;
use tracing::{debug, error, info, warn};
use universal_wallpaper_config::ScalingMode;

use super::{
    MediaKind, Playback, PlaybackOptions,
    frame_queue::{DEFAULT_QUEUE_CAPACITY, Frame, FrameQueue, SharedFrameQueue},
};
use crate::render::{FramePlacement, OffscreenTarget, Renderer};

/// Decoders known to register without a working CUDA runtime.
const NVIDIA_DECODERS: &[&str] = &[
    "nvh264dec",
    "nvh265dec",
    "nvvp9dec",
    "nvav1dec",
    "nvmpegvideodec",
    "nvmpeg4videodec",
];

/// Progress is logged once per this many presented frames.
const PROGRESS_INTERVAL: u64 = 600;

pub struct GstPlayback {
    playbin: gstreamer::Element,
    queue: SharedFrameQueue,
    kind: MediaKind,
    looping: bool,
    placement: FramePlacement,
    decoded: Arc<AtomicU64>,
    presented: u64,
    loops: u32,
}

impl GstPlayback {
    /// Build the pipeline for `path` and start playing it.
    ///
    /// # Errors
    ///
    /// Fails if GStreamer cannot be initialized, a required element is
    /// missing, or the pipeline refuses to start.
    pub fn new(path: &Path, options: &PlaybackOptions) -> eyre::Result<Self> {
        gstreamer::init()?;

        adjust_decoder_ranks(options.hardware_decode);

        let kind = MediaKind::from_path(path);
        let uri = gstreamer::glib::filename_to_uri(path, None)
            .map_err(|why| eyre::eyre!("invalid media path {}: {why}", path.display()))?;

        debug!(%uri, ?kind, ?options, "Creating playbin");

        let playbin = gstreamer::ElementFactory::make("playbin")
            .name("wallpaper")
            .property("uri", uri.as_str())
            .build()?;

        let queue: SharedFrameQueue = Arc::new(FrameQueue::new(DEFAULT_QUEUE_CAPACITY));
        let decoded = Arc::new(AtomicU64::new(0));
        let sink = video_sink_bin(options, Arc::clone(&queue), Arc::clone(&decoded))?;
        playbin.set_property("video-sink", &sink);

        if options.silent {
            let fakesink = gstreamer::ElementFactory::make("fakesink")
                .property("sync", true)
                .build()?;
            playbin.set_property("audio-sink", &fakesink);
            playbin.set_property("mute", true);
        } else {
            playbin.set_property("volume", options.volume.clamp(0.0, 1.0));
        }

        playbin
            .set_state(gstreamer::State::Playing)
            .map_err(|why| {
                eyre::eyre!("failed to start playback of {}: {why:?}", path.display())
            })?;

        info!(path = %path.display(), ?kind, scaling = %options.scaling, "Playback started");

        Ok(Self {
            playbin,
            queue,
            kind,
            looping: options.looping && kind == MediaKind::Video,
            placement: match options.scaling {
                ScalingMode::Fit | ScalingMode::Default => FramePlacement::Letterbox,
                ScalingMode::Stretch | ScalingMode::Fill => FramePlacement::Stretch,
            },
            decoded,
            presented: 0,
            loops: 0,
        })
    }

    fn seek_to_start(&mut self) {
        let flags = gstreamer::SeekFlags::FLUSH | gstreamer::SeekFlags::KEY_UNIT;
        match self.playbin.seek_simple(flags, gstreamer::ClockTime::ZERO) {
            Ok(()) => {
                self.loops += 1;
                debug!(loops = self.loops, "End of stream, looping");
            }
            Err(why) => error!(?why, "Failed to seek to start for loop"),
        }
    }
}

impl Playback for GstPlayback {
    fn has_new_frame(&self) -> bool {
        !self.queue.is_empty()
    }

    fn render_into(&mut self, renderer: &mut Renderer, target: &OffscreenTarget) -> bool {
        let Some(frame) = self.queue.current() else {
            return false;
        };

        renderer.upload_frame(
            target,
            frame.width,
            frame.height,
            &frame.pixels,
            self.placement,
        )
    }

    fn report_presented(&mut self) {
        self.presented += 1;
        if self.presented % PROGRESS_INTERVAL == 0 {
            let stats = self.queue.stats();
            debug!(
                presented = self.presented,
                decoded = self.decoded.load(Ordering::Relaxed),
                queued = self.queue.len(),
                dropped = stats.dropped,
                reused = stats.reused,
                loops = self.loops,
                "Playback progress"
            );
        }
    }

    fn duration(&self) -> f64 {
        if self.kind == MediaKind::Image {
            return 0.0;
        }

        self.playbin
            .query_duration::<gstreamer::ClockTime>()
            .map_or(0.0, |duration| duration.nseconds() as f64 / 1e9)
    }

    fn is_playing(&self) -> bool {
        !self.queue.is_stopped() && self.playbin.current_state() == gstreamer::State::Playing
    }

    fn has_video_track(&self) -> bool {
        self.playbin.property::<i32>("n-video") > 0
    }

    fn pump_events(&mut self) {
        let Some(bus) = self.playbin.bus() else {
            return;
        };

        while let Some(msg) = bus.pop() {
            use gstreamer::MessageView;

            match msg.view() {
                MessageView::Eos(_) => {
                    if self.looping {
                        self.seek_to_start();
                    } else {
                        debug!(kind = ?self.kind, "End of stream, holding last frame");
                    }
                }
                MessageView::Error(err) => {
                    error!(
                        src = ?err.src().map(|s| s.path_string()),
                        error = %err.error(),
                        debug = ?err.debug(),
                        "GStreamer pipeline error"
                    );
                    self.queue.stop();
                }
                MessageView::Warning(warning) => {
                    warn!(
                        src = ?warning.src().map(|s| s.path_string()),
                        error = %warning.error(),
                        "GStreamer pipeline warning"
                    );
                }
                MessageView::StateChanged(state) => {
                    if state.src().is_some_and(|src| src == &self.playbin) {
                        debug!(
                            old = ?state.old(),
                            new = ?state.current(),
                            "Pipeline state changed"
                        );
                    }
                }
                _ => {}
            }
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.playbin.set_property("mute", muted);
        debug!(muted, "Playback mute changed");
    }
}

impl Drop for GstPlayback {
    fn drop(&mut self) {
        self.queue.stop();
        if let Err(why) = self.playbin.set_state(gstreamer::State::Null) {
            error!(?why, "Failed to stop playback pipeline");
        }
    }
}

/// `videoconvert ! <scaling> ! capsfilter ! appsink` wrapped in a bin with a
/// ghost sink pad.
fn video_sink_bin(
    options: &PlaybackOptions,
    queue: SharedFrameQueue,
    decoded: Arc<AtomicU64>,
) -> eyre::Result<gstreamer::Element> {
    let (width, height) = options.target_size;

    let mut caps =
        gstreamer_video::VideoCapsBuilder::new().format(gstreamer_video::VideoFormat::Rgba);
    if options.scaling != ScalingMode::Default && width > 0 && height > 0 {
        caps = caps
            .width(width as i32)
            .height(height as i32)
            .pixel_aspect_ratio(gstreamer::Fraction::new(1, 1));
    }
    let caps = caps.build();

    let mut elements = vec![gstreamer::ElementFactory::make("videoconvert").build()?];

    match options.scaling {
        ScalingMode::Fit => elements.push(
            gstreamer::ElementFactory::make("videoscale")
                .property("add-borders", true)
                .build()?,
        ),
        ScalingMode::Stretch => elements.push(
            gstreamer::ElementFactory::make("videoscale")
                .property("add-borders", false)
                .build()?,
        ),
        ScalingMode::Fill => {
            elements.push(
                gstreamer::ElementFactory::make("aspectratiocrop")
                    .property(
                        "aspect-ratio",
                        gstreamer::Fraction::new(width.max(1) as i32, height.max(1) as i32),
                    )
                    .build()?,
            );
            elements.push(
                gstreamer::ElementFactory::make("videoscale")
                    .property("add-borders", false)
                    .build()?,
            );
        }
        ScalingMode::Default => {}
    }

    elements.push(
        gstreamer::ElementFactory::make("capsfilter")
            .property("caps", &caps)
            .build()?,
    );

    let appsink = gstreamer_app::AppSink::builder()
        .caps(&caps)
        .max_buffers(2)
        .drop(true)
        .sync(true)
        .build();
    appsink.set_callbacks(
        gstreamer_app::AppSinkCallbacks::builder()
            .new_sample(move |appsink| handle_sample(appsink, &queue, &decoded))
            .build(),
    );
    elements.push(appsink.upcast());

    let bin = gstreamer::Bin::builder()
        .name("wallpaper-video-sink")
        .build();
    bin.add_many(&elements)?;
    gstreamer::Element::link_many(&elements)?;

    let pad = elements[0]
        .static_pad("sink")
        .ok_or_else(|| eyre::eyre!("videoconvert has no sink pad"))?;
    let ghost = gstreamer::GhostPad::with_target(&pad)?;
    ghost.set_active(true)?;
    bin.add_pad(&ghost)?;

    Ok(bin.upcast())
}

fn handle_sample(
    appsink: &gstreamer_app::AppSink,
    queue: &FrameQueue,
    decoded: &AtomicU64,
) -> Result<gstreamer::FlowSuccess, gstreamer::FlowError> {
    let sample = match appsink.pull_sample() {
        Ok(sample) => sample,
        Err(why) => {
            warn!(?why, "Callback pull_sample failed");
            return Ok(gstreamer::FlowSuccess::Ok);
        }
    };

    let (Some(buffer), Some(caps)) = (sample.buffer(), sample.caps()) else {
        return Ok(gstreamer::FlowSuccess::Ok);
    };

    let Ok(info) = gstreamer_video::VideoInfo::from_caps(caps) else {
        return Ok(gstreamer::FlowSuccess::Ok);
    };

    let Ok(video_frame) = gstreamer_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
    else {
        tracing::trace!("Skipped frame: buffer map failed");
        return Ok(gstreamer::FlowSuccess::Ok);
    };

    let (width, height) = (info.width(), info.height());
    let stride = video_frame.plane_stride()[0].max(0) as usize;
    let Ok(data) = video_frame.plane_data(0) else {
        return Ok(gstreamer::FlowSuccess::Ok);
    };

    let Some(pixels) = pack_rows(data, width as usize * 4, stride, height as usize) else {
        warn!(
            width,
            height,
            stride,
            len = data.len(),
            "Decoded frame smaller than its caps"
        );
        return Ok(gstreamer::FlowSuccess::Ok);
    };

    let pts_ns = buffer.pts().map(|pts| pts.nseconds());
    if !queue.push(Frame::new(pixels, width, height, pts_ns)) {
        return Err(gstreamer::FlowError::Flushing);
    }

    decoded.fetch_add(1, Ordering::Relaxed);
    Ok(gstreamer::FlowSuccess::Ok)
}

/// Copy `rows` rows of `row_bytes` out of a buffer with `stride` bytes per row.
fn pack_rows(data: &[u8], row_bytes: usize, stride: usize, rows: usize) -> Option<Vec<u8>> {
    if stride < row_bytes || rows == 0 {
        return None;
    }

    let needed = stride * (rows - 1) + row_bytes;
    if data.len() < needed {
        return None;
    }

    if stride == row_bytes {
        return Some(data[..row_bytes * rows].to_vec());
    }

    let mut pixels = Vec::with_capacity(row_bytes * rows);
    for row in data.chunks(stride).take(rows) {
        pixels.extend_from_slice(&row[..row_bytes]);
    }
    Some(pixels)
}

/// Keep decodebin away from decoders that cannot work here.
///
/// With hardware decoding disabled every hardware decoder is demoted.
/// Otherwise only NVIDIA decoders that fail to instantiate are.
fn adjust_decoder_ranks(hardware_decode: bool) {
    static ADJUSTED: std::sync::Once = std::sync::Once::new();

    ADJUSTED.call_once(|| {
        if !hardware_decode {
            let factories = gstreamer::ElementFactory::factories_with_type(
                gstreamer::ElementFactoryType::DECODER | gstreamer::ElementFactoryType::HARDWARE,
                gstreamer::Rank::NONE,
            );
            for factory in factories {
                debug!(decoder = %factory.name(), "Hardware decoding disabled, demoting");
                factory.set_rank(gstreamer::Rank::NONE);
            }
            return;
        }

        for name in NVIDIA_DECODERS {
            let Some(factory) = gstreamer::ElementFactory::find(name) else {
                continue;
            };
            if factory.create().build().is_err() {
                warn!(
                    decoder = name,
                    "NVIDIA decoder failed to instantiate (CUDA unavailable?), demoting"
                );
                factory.set_rank(gstreamer::Rank::NONE);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rows_strips_padding() {
        // 2 pixels per row, stride padded to 12 bytes
        let mut data = Vec::new();
        data.extend_from_slice(&[1; 8]);
        data.extend_from_slice(&[0xEE; 4]);
        data.extend_from_slice(&[2; 8]);

        let packed = pack_rows(&data, 8, 12, 2).unwrap();
        assert_eq!(packed.len(), 16);
        assert!(packed[..8].iter().all(|&b| b == 1));
        assert!(packed[8..].iter().all(|&b| b == 2));
    }

    #[test]
    fn test_pack_rows_tight_buffer_is_copied() {
        let data = [5u8; 32];
        assert_eq!(pack_rows(&data, 16, 16, 2).unwrap(), data.to_vec());
    }

    #[test]
    fn test_pack_rows_rejects_short_buffers() {
        assert!(pack_rows(&[0; 10], 8, 8, 2).is_none());
        assert!(pack_rows(&[0; 16], 8, 4, 2).is_none());
        assert!(pack_rows(&[0; 16], 8, 8, 0).is_none());
    }
}
