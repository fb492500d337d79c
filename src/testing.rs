// SPDX-License-Identifier: MPL-2.0

//! In-memory stand-ins for the GPU, display server, playback engine and
//! monitors.

use std::{cell::RefCell, ffi::c_void, num::NonZeroU32, rc::Rc};

use crate::{
    display::{DisplayBackend, Output},
    monitor::{AudioSignal, FullscreenSignal},
    playback::Playback,
    render::{
        Framebuffer, GpuDevice, GpuError, NativeDisplay, OffscreenTarget, Renderer, SharedRenderer,
        SurfaceId, Texture, Viewport,
    },
    x11::compose::RootCanvas,
};

fn name(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap()
}

pub fn fake_target(width: u32, height: u32) -> OffscreenTarget {
    OffscreenTarget {
        framebuffer: Framebuffer(name(1)),
        texture: Texture(name(1)),
        width,
        height,
    }
}

/// Everything a [`FakeGpu`] was asked to do.
#[derive(Debug, Default)]
pub struct GpuLog {
    pub targets_created: usize,
    pub targets_destroyed: usize,
    pub uploads: usize,
    pub scaled_draws: Vec<Viewport>,
    pub clears: usize,
    pub readbacks: usize,
    pub surfaces_created: usize,
    pub surfaces_destroyed: usize,
    pub paints: Vec<SurfaceId>,
    pub fail_target_creation: bool,
    pub fail_readback: bool,
    pub fail_paint: bool,
}

#[derive(Default)]
pub struct FakeGpu {
    log: Rc<RefCell<GpuLog>>,
    next_name: u32,
}

impl FakeGpu {
    pub fn log(&self) -> Rc<RefCell<GpuLog>> {
        Rc::clone(&self.log)
    }

    fn allocate(&mut self) -> NonZeroU32 {
        self.next_name += 1;
        name(self.next_name)
    }
}

impl GpuDevice for FakeGpu {
    fn make_current(&mut self) -> Result<(), GpuError> {
        Ok(())
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<OffscreenTarget, GpuError> {
        if self.log.borrow().fail_target_creation {
            return Err(GpuError::Resource("out of memory".into()));
        }

        self.log.borrow_mut().targets_created += 1;
        Ok(OffscreenTarget {
            framebuffer: Framebuffer(self.allocate()),
            texture: Texture(self.allocate()),
            width,
            height,
        })
    }

    fn destroy_target(&mut self, _target: &OffscreenTarget) {
        self.log.borrow_mut().targets_destroyed += 1;
    }

    fn bind_target(&mut self, _target: &OffscreenTarget) {}

    fn bind_default(&mut self) {}

    fn clear(&mut self, _rgba: [f32; 4]) {
        self.log.borrow_mut().clears += 1;
    }

    fn upload_rgba(
        &mut self,
        _texture: Texture,
        _width: u32,
        _height: u32,
        _pixels: &[u8],
    ) -> Result<(), GpuError> {
        self.log.borrow_mut().uploads += 1;
        Ok(())
    }

    fn draw_rgba(
        &mut self,
        _width: u32,
        _height: u32,
        _pixels: &[u8],
        viewport: Viewport,
    ) -> Result<(), GpuError> {
        self.log.borrow_mut().scaled_draws.push(viewport);
        Ok(())
    }

    /// Opaque red, or an error when `fail_readback` is set.
    fn read_target(&mut self, target: &OffscreenTarget) -> Result<Vec<u8>, GpuError> {
        let mut log = self.log.borrow_mut();
        log.readbacks += 1;
        if log.fail_readback {
            return Err(GpuError::Gl {
                code: 0x0502,
                during: "readback",
            });
        }

        Ok([255, 0, 0, 255].repeat(target.width as usize * target.height as usize))
    }

    fn create_window_surface(&mut self, _window: *mut c_void) -> Result<SurfaceId, GpuError> {
        let mut log = self.log.borrow_mut();
        log.surfaces_created += 1;
        Ok(SurfaceId(log.surfaces_created as u64))
    }

    fn destroy_window_surface(&mut self, _surface: SurfaceId) {
        self.log.borrow_mut().surfaces_destroyed += 1;
    }

    fn paint_texture_onto(
        &mut self,
        surface: SurfaceId,
        _texture: Texture,
        _width: u32,
        _height: u32,
    ) -> Result<(), GpuError> {
        let mut log = self.log.borrow_mut();
        if log.fail_paint {
            return Err(GpuError::UnknownSurface(surface));
        }
        log.paints.push(surface);
        Ok(())
    }
}

/// Display backend that records paints.
#[derive(Default)]
pub struct FakeBackend {
    pub outputs: Vec<Output>,
    pub paint_all_calls: usize,
    pub painted: Vec<String>,
    pub pumps: usize,
    pub shutdown: bool,
    pub renderer: Option<SharedRenderer>,
}

impl FakeBackend {
    pub fn with_outputs(outputs: Vec<Output>) -> Self {
        Self {
            outputs,
            ..Self::default()
        }
    }

    fn assert_renderer_free(&self) {
        if let Some(renderer) = &self.renderer {
            assert!(
                renderer.try_borrow_mut().is_ok(),
                "renderer still borrowed while painting"
            );
        }
    }
}

impl DisplayBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn outputs(&self) -> Vec<Output> {
        self.outputs.clone()
    }

    fn paint_output(&mut self, name: &str, _target: &OffscreenTarget) -> bool {
        self.assert_renderer_free();
        if !self.outputs.iter().any(|output| output.name == name) {
            return false;
        }
        self.painted.push(name.to_owned());
        true
    }

    fn paint_all(&mut self, _target: &OffscreenTarget) -> bool {
        self.assert_renderer_free();
        self.paint_all_calls += 1;
        true
    }

    fn native_display(&self) -> NativeDisplay {
        NativeDisplay::Default
    }

    fn pump_events(&mut self) {
        self.pumps += 1;
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    fn bind_renderer(&mut self, renderer: SharedRenderer) {
        self.renderer = Some(renderer);
    }
}

/// Playback engine driven by its public fields.
#[derive(Debug, Default)]
pub struct FakePlayback {
    pub pending_frames: usize,
    pub playing: bool,
    pub video: bool,
    pub duration: f64,
    pub fail_render: bool,
    pub renders: usize,
    pub presented: usize,
    pub mute_calls: Vec<bool>,
    pub pumps: usize,
}

impl FakePlayback {
    /// A playing video with `frames` decoded frames waiting.
    pub fn playing_video(frames: usize) -> Self {
        Self {
            pending_frames: frames,
            playing: true,
            video: true,
            duration: 30.0,
            ..Self::default()
        }
    }
}

impl Playback for FakePlayback {
    fn has_new_frame(&self) -> bool {
        self.pending_frames > 0
    }

    fn render_into(&mut self, _renderer: &mut Renderer, _target: &OffscreenTarget) -> bool {
        self.renders += 1;
        if self.fail_render {
            return false;
        }
        self.pending_frames = self.pending_frames.saturating_sub(1);
        true
    }

    fn report_presented(&mut self) {
        self.presented += 1;
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn has_video_track(&self) -> bool {
        self.video
    }

    fn pump_events(&mut self) {
        self.pumps += 1;
    }

    fn set_muted(&mut self, muted: bool) {
        self.mute_calls.push(muted);
    }
}

#[derive(Debug)]
pub struct Install {
    pub width: u32,
    pub height: u32,
    pub bgra: Vec<u8>,
}

/// Root canvas keeping every installed image.
#[derive(Debug, Default)]
pub struct FakeRootCanvas {
    pub installs: Vec<Install>,
    pub fail: bool,
    pub disconnected: bool,
    pub pumps: usize,
}

impl RootCanvas for FakeRootCanvas {
    fn install(&mut self, width: u32, height: u32, bgra: &[u8]) -> eyre::Result<()> {
        if self.fail {
            eyre::bail!("BadAlloc");
        }
        self.installs.push(Install {
            width,
            height,
            bgra: bgra.to_vec(),
        });
        Ok(())
    }

    fn pump_events(&mut self) -> bool {
        self.pumps += 1;
        !self.disconnected
    }
}

/// Monitor whose answer is set by the test.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedSignal {
    pub enabled: bool,
    pub active: bool,
}

impl FixedSignal {
    pub fn off() -> Self {
        Self::default()
    }

    pub fn on(active: bool) -> Self {
        Self {
            enabled: true,
            active,
        }
    }
}

impl AudioSignal for FixedSignal {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_other_audio_active(&self) -> bool {
        self.active
    }
}

impl FullscreenSignal for FixedSignal {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_fullscreen_active(&self) -> bool {
        self.active
    }
}
