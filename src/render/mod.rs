// SPDX-License-Identifier: MPL-2.0

//! GPU context ownership and the offscreen target cache.
//!
//! Every frame is rendered into an [`OffscreenTarget`] sized to the primary
//! output, then either blitted onto per-output window surfaces or read back
//! for the root window. Targets are cached by size and live until they are
//! purged explicitly or the [`Renderer`] is dropped.

mod egl;
mod quad;

pub use egl::EglDevice;

use std::{cell::RefCell, collections::HashMap, ffi::c_void, num::NonZeroU32, rc::Rc};

/// GL texture name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Texture(pub NonZeroU32);

/// GL framebuffer name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Framebuffer(pub NonZeroU32);

/// Window surface created by a [`GpuDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// Framebuffer with an RGBA8 color texture attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffscreenTarget {
    pub framebuffer: Framebuffer,
    pub texture: Texture,
    pub width: u32,
    pub height: u32,
}

/// Region of the bound framebuffer to draw into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Largest centered region of `dst` with the aspect ratio of `src`.
    pub fn letterbox(src: (u32, u32), dst: (u32, u32)) -> Self {
        let (sw, sh) = (u64::from(src.0.max(1)), u64::from(src.1.max(1)));
        let (dw, dh) = (u64::from(dst.0), u64::from(dst.1));

        let (width, height) = if sw * dh > sh * dw {
            (dw, sh * dw / sw)
        } else {
            (sw * dh / sh, dh)
        };

        Self {
            x: ((dw - width) / 2) as i32,
            y: ((dh - height) / 2) as i32,
            width: width as u32,
            height: height as u32,
        }
    }
}

/// How a frame whose size differs from the target is placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePlacement {
    Stretch,
    Letterbox,
}

/// Native display handed to EGL.
#[derive(Clone, Copy, Debug)]
pub enum NativeDisplay {
    Wayland(*mut c_void),
    Xcb {
        connection: *mut c_void,
        screen: i32,
    },
    Default,
}

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("{call} failed: {source}")]
    Egl {
        call: &'static str,
        #[source]
        source: khronos_egl::Error,
    },
    #[error("no EGL display could be opened")]
    NoDisplay,
    #[error("no EGL config supports OpenGL rendering")]
    NoConfig,
    #[error("no OpenGL context of any version could be created")]
    NoContext,
    #[error("neither a pbuffer nor a surfaceless context could be made current")]
    NoSurface,
    #[error("GL error {code:#x} during {during}")]
    Gl { code: u32, during: &'static str },
    #[error("GL object creation failed: {0}")]
    Resource(String),
    #[error("shader build failed: {0}")]
    Shader(String),
    #[error("framebuffer incomplete: status {0:#x}")]
    IncompleteFramebuffer(u32),
    #[error("unknown window surface {0:?}")]
    UnknownSurface(SurfaceId),
    #[error("pixel buffer holds {len} bytes, {width}x{height} RGBA needs {needed}")]
    ShortBuffer {
        len: usize,
        needed: usize,
        width: u32,
        height: u32,
    },
}

/// Primitive GPU operations the renderer is built from.
pub trait GpuDevice {
    /// Make the context current with its offscreen surface.
    fn make_current(&mut self) -> Result<(), GpuError>;

    fn create_target(&mut self, width: u32, height: u32) -> Result<OffscreenTarget, GpuError>;

    fn destroy_target(&mut self, target: &OffscreenTarget);

    /// Bind `target` for drawing with a viewport covering it.
    fn bind_target(&mut self, target: &OffscreenTarget);

    fn bind_default(&mut self);

    fn clear(&mut self, rgba: [f32; 4]);

    /// Replace the contents of `texture`, rows ordered top to bottom.
    fn upload_rgba(
        &mut self,
        texture: Texture,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), GpuError>;

    /// Draw an RGBA image into `viewport` of the bound framebuffer.
    fn draw_rgba(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
        viewport: Viewport,
    ) -> Result<(), GpuError>;

    /// Read the target back as tightly packed RGBA, top row first.
    fn read_target(&mut self, target: &OffscreenTarget) -> Result<Vec<u8>, GpuError>;

    fn create_window_surface(&mut self, window: *mut c_void) -> Result<SurfaceId, GpuError>;

    fn destroy_window_surface(&mut self, surface: SurfaceId);

    /// Clear `surface`, draw `texture` over it and present it.
    fn paint_texture_onto(
        &mut self,
        surface: SurfaceId,
        texture: Texture,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError>;
}

/// Renderer shared by the scheduler and the active display backend.
pub type SharedRenderer = Rc<RefCell<Renderer>>;

/// Owns the GPU device and the offscreen targets rendered into.
pub struct Renderer {
    device: Box<dyn GpuDevice>,
    targets: HashMap<(u32, u32), OffscreenTarget>,
}

impl Renderer {
    pub fn new(device: Box<dyn GpuDevice>) -> Self {
        Self {
            device,
            targets: HashMap::new(),
        }
    }

    /// Create an EGL context on `display`.
    ///
    /// # Errors
    ///
    /// Fails if no OpenGL context of any version can be made current.
    pub fn acquire_context(display: NativeDisplay) -> Result<Self, GpuError> {
        let device = EglDevice::new(display)?;
        Ok(Self::new(Box::new(device)))
    }

    pub fn into_shared(self) -> SharedRenderer {
        Rc::new(RefCell::new(self))
    }

    pub fn make_current(&mut self) -> bool {
        match self.device.make_current() {
            Ok(()) => true,
            Err(why) => {
                tracing::error!(%why, "Failed to make GL context current");
                false
            }
        }
    }

    /// Return the cached target for `(width, height)`, creating it on first use.
    pub fn get_or_create_target(&mut self, width: u32, height: u32) -> Option<OffscreenTarget> {
        if width == 0 || height == 0 {
            tracing::warn!(width, height, "Refusing to create an empty render target");
            return None;
        }

        if let Some(target) = self.targets.get(&(width, height)) {
            return Some(*target);
        }

        match self.device.create_target(width, height) {
            Ok(target) => {
                tracing::debug!(
                    width,
                    height,
                    cached = self.targets.len() + 1,
                    "Created render target"
                );
                self.targets.insert((width, height), target);
                Some(target)
            }
            Err(why) => {
                tracing::error!(%why, width, height, "Failed to create render target");
                None
            }
        }
    }

    #[cfg(test)]
    pub fn cached_targets(&self) -> usize {
        self.targets.len()
    }

    /// Release every cached target.
    pub fn purge_targets(&mut self) {
        if self.targets.is_empty() {
            return;
        }

        let _ = self.device.make_current();
        for (_, target) in self.targets.drain() {
            self.device.destroy_target(&target);
        }
    }

    pub fn bind_target(&mut self, target: &OffscreenTarget) {
        self.device.bind_target(target);
    }

    pub fn bind_default(&mut self) {
        self.device.bind_default();
    }

    pub fn clear(&mut self, rgba: [f32; 4]) {
        self.device.clear(rgba);
    }

    /// Put a decoded RGBA frame into `target`, which must be bound.
    pub fn upload_frame(
        &mut self,
        target: &OffscreenTarget,
        width: u32,
        height: u32,
        pixels: &[u8],
        placement: FramePlacement,
    ) -> bool {
        let result = if (width, height) == (target.width, target.height) {
            self.device
                .upload_rgba(target.texture, width, height, pixels)
        } else {
            let viewport = match placement {
                FramePlacement::Stretch => Viewport::full(target.width, target.height),
                FramePlacement::Letterbox => {
                    Viewport::letterbox((width, height), (target.width, target.height))
                }
            };
            self.device.draw_rgba(width, height, pixels, viewport)
        };

        match result {
            Ok(()) => true,
            Err(why) => {
                tracing::warn!(%why, width, height, "Failed to upload frame");
                false
            }
        }
    }

    /// # Errors
    ///
    /// Fails if the pixels cannot be read back from the GPU.
    pub fn read_target(&mut self, target: &OffscreenTarget) -> Result<Vec<u8>, GpuError> {
        self.device.read_target(target)
    }

    pub fn create_window_surface(&mut self, window: *mut c_void) -> Option<SurfaceId> {
        match self.device.create_window_surface(window) {
            Ok(surface) => Some(surface),
            Err(why) => {
                tracing::error!(%why, "Failed to create window surface");
                None
            }
        }
    }

    pub fn release_window_surface(&mut self, surface: SurfaceId) {
        self.device.destroy_window_surface(surface);
    }

    /// Blit `texture` onto a window surface and present it.
    pub fn paint_texture_onto(
        &mut self,
        surface: SurfaceId,
        texture: Texture,
        width: u32,
        height: u32,
    ) -> bool {
        match self
            .device
            .paint_texture_onto(surface, texture, width, height)
        {
            Ok(()) => true,
            Err(why) => {
                tracing::warn!(%why, ?surface, width, height, "Failed to paint surface");
                false
            }
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.purge_targets();
    }
}
