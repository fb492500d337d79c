// SPDX-License-Identifier: MPL-2.0

//! EGL + OpenGL implementation of [`GpuDevice`].

use std::{collections::HashMap, ffi::c_void};

use glow::HasContext;
use khronos_egl as egl;
use tracing::{debug, info, warn};

use super::{
    Framebuffer, GpuDevice, GpuError, NativeDisplay, OffscreenTarget, SurfaceId, Texture, Viewport,
    quad::{QuadProgram, ShaderDialect},
};

const PLATFORM_WAYLAND_KHR: egl::Enum = 0x31D8;
const PLATFORM_XCB_EXT: egl::Enum = 0x31DC;
const PLATFORM_XCB_SCREEN_EXT: egl::Attrib = 0x31DE;

/// Config requests, most capable first.
const CONFIG_ATTRIBS: [&[egl::Int]; 3] = [
    &[
        egl::SURFACE_TYPE,
        egl::WINDOW_BIT | egl::PBUFFER_BIT,
        egl::RENDERABLE_TYPE,
        egl::OPENGL_BIT,
        egl::RED_SIZE,
        8,
        egl::GREEN_SIZE,
        8,
        egl::BLUE_SIZE,
        8,
        egl::NONE,
    ],
    &[
        egl::SURFACE_TYPE,
        egl::PBUFFER_BIT,
        egl::RENDERABLE_TYPE,
        egl::OPENGL_BIT,
        egl::NONE,
    ],
    &[egl::RENDERABLE_TYPE, egl::OPENGL_BIT, egl::NONE],
];

/// Context requests, most featureful first.
const CONTEXT_ATTRIBS: [(&str, &[egl::Int]); 3] = [
    (
        "3.3 core",
        &[
            egl::CONTEXT_MAJOR_VERSION,
            3,
            egl::CONTEXT_MINOR_VERSION,
            3,
            egl::CONTEXT_OPENGL_PROFILE_MASK,
            egl::CONTEXT_OPENGL_CORE_PROFILE_BIT,
            egl::NONE,
        ],
    ),
    (
        "3.0",
        &[
            egl::CONTEXT_MAJOR_VERSION,
            3,
            egl::CONTEXT_MINOR_VERSION,
            0,
            egl::NONE,
        ],
    ),
    ("default", &[egl::NONE]),
];

fn egl_call(call: &'static str) -> impl FnOnce(egl::Error) -> GpuError {
    move |source| GpuError::Egl { call, source }
}

/// OpenGL context on an EGL display, current on the scheduler thread.
pub struct EglDevice {
    egl: egl::Instance<egl::Static>,
    display: egl::Display,
    config: egl::Config,
    context: egl::Context,
    /// 1x1 pbuffer, or `None` when the context runs surfaceless
    offscreen: Option<egl::Surface>,
    surfaces: HashMap<SurfaceId, egl::Surface>,
    next_surface: u64,
    gl: glow::Context,
    quad: Option<QuadProgram>,
    /// texture for frames that do not match the target size
    scratch: Option<(glow::NativeTexture, u32, u32)>,
}

impl EglDevice {
    /// # Errors
    ///
    /// Fails if EGL cannot be initialized or no context can be made current.
    pub fn new(native: NativeDisplay) -> Result<Self, GpuError> {
        let egl = egl::Instance::new(egl::Static);

        let display = open_display(&egl, native)?;
        let (major, minor) = egl.initialize(display).map_err(egl_call("eglInitialize"))?;

        let vendor = egl.query_string(Some(display), egl::VENDOR).ok();
        info!(
            major,
            minor,
            vendor = ?vendor,
            "EGL initialized"
        );

        let config = match choose_config(&egl, display) {
            Ok(config) => config,
            Err(why) => {
                let _ = egl.terminate(display);
                return Err(why);
            }
        };

        if let Err(why) = egl.bind_api(egl::OPENGL_API) {
            let _ = egl.terminate(display);
            return Err(GpuError::Egl {
                call: "eglBindAPI",
                source: why,
            });
        }

        let Some(context) = create_context(&egl, display, config) else {
            let _ = egl.terminate(display);
            return Err(GpuError::NoContext);
        };

        let offscreen = match make_offscreen_current(&egl, display, config, context) {
            Ok(offscreen) => offscreen,
            Err(why) => {
                let _ = egl.destroy_context(display, context);
                let _ = egl.terminate(display);
                return Err(why);
            }
        };

        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                egl.get_proc_address(name)
                    .map_or(std::ptr::null(), |f| f as *const c_void)
            })
        };

        let version = gl.version();
        let dialect = ShaderDialect::for_version(version.major, version.minor);
        info!(
            version = %version.vendor_info,
            major = version.major,
            minor = version.minor,
            ?dialect,
            "OpenGL context ready"
        );

        let mut device = Self {
            egl,
            display,
            config,
            context,
            offscreen,
            surfaces: HashMap::new(),
            next_surface: 1,
            gl,
            quad: None,
            scratch: None,
        };

        // Dropping `device` on error releases the context and display.
        device.quad = Some(unsafe { QuadProgram::new(&device.gl, dialect)? });

        Ok(device)
    }

    fn current_offscreen(&self) -> Result<(), GpuError> {
        self.egl
            .make_current(
                self.display,
                self.offscreen,
                self.offscreen,
                Some(self.context),
            )
            .map_err(egl_call("eglMakeCurrent"))
    }

    fn check_gl(&self, during: &'static str) -> Result<(), GpuError> {
        let mut first = None;
        // bounded: a lost context may keep reporting errors
        for _ in 0..16 {
            let code = unsafe { self.gl.get_error() };
            if code == glow::NO_ERROR {
                break;
            }
            first.get_or_insert(code);
        }

        match first {
            Some(code) => Err(GpuError::Gl { code, during }),
            None => Ok(()),
        }
    }

    fn quad(&self) -> Result<&QuadProgram, GpuError> {
        self.quad
            .as_ref()
            .ok_or_else(|| GpuError::Shader("quad program missing".into()))
    }

    fn scratch_texture(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<glow::NativeTexture, GpuError> {
        if let Some((texture, w, h)) = self.scratch {
            if (w, h) == (width, height) {
                return Ok(texture);
            }
            unsafe { self.gl.delete_texture(texture) };
            self.scratch = None;
        }

        let texture = unsafe { create_texture(&self.gl, width, height)? };
        self.scratch = Some((texture, width, height));
        Ok(texture)
    }
}

impl GpuDevice for EglDevice {
    fn make_current(&mut self) -> Result<(), GpuError> {
        self.current_offscreen()
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<OffscreenTarget, GpuError> {
        let gl = &self.gl;
        unsafe {
            let texture = create_texture(gl, width, height)?;

            let framebuffer = match gl.create_framebuffer() {
                Ok(framebuffer) => framebuffer,
                Err(why) => {
                    gl.delete_texture(texture);
                    return Err(GpuError::Resource(why));
                }
            };

            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );

            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);

            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(framebuffer);
                gl.delete_texture(texture);
                return Err(GpuError::IncompleteFramebuffer(status));
            }

            if let Err(why) = self.check_gl("create_target") {
                gl.delete_framebuffer(framebuffer);
                gl.delete_texture(texture);
                return Err(why);
            }

            Ok(OffscreenTarget {
                framebuffer: Framebuffer(framebuffer.0),
                texture: Texture(texture.0),
                width,
                height,
            })
        }
    }

    fn destroy_target(&mut self, target: &OffscreenTarget) {
        unsafe {
            self.gl
                .delete_framebuffer(glow::NativeFramebuffer(target.framebuffer.0));
            self.gl
                .delete_texture(glow::NativeTexture(target.texture.0));
        }
    }

    fn bind_target(&mut self, target: &OffscreenTarget) {
        unsafe {
            self.gl.bind_framebuffer(
                glow::FRAMEBUFFER,
                Some(glow::NativeFramebuffer(target.framebuffer.0)),
            );
            self.gl
                .viewport(0, 0, target.width as i32, target.height as i32);
        }
    }

    fn bind_default(&mut self) {
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, None) };
    }

    fn clear(&mut self, [r, g, b, a]: [f32; 4]) {
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }

    fn upload_rgba(
        &mut self,
        texture: Texture,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), GpuError> {
        check_len(pixels, width, height)?;

        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 4);
            self.gl
                .bind_texture(glow::TEXTURE_2D, Some(glow::NativeTexture(texture.0)));
            self.gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(pixels),
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }

        self.check_gl("upload_rgba")
    }

    fn draw_rgba(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
        viewport: Viewport,
    ) -> Result<(), GpuError> {
        check_len(pixels, width, height)?;

        let texture = self.scratch_texture(width, height)?;
        let quad = self.quad()?;
        let gl = &self.gl;

        unsafe {
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 4);
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(pixels),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);

            gl.viewport(
                viewport.x,
                viewport.y,
                viewport.width as i32,
                viewport.height as i32,
            );
            // Keeps the first image row at the bottom of the target, where
            // a straight upload puts it too.
            quad.draw(gl, texture, false);
        }

        self.check_gl("draw_rgba")
    }

    fn read_target(&mut self, target: &OffscreenTarget) -> Result<Vec<u8>, GpuError> {
        let len = target.width as usize * target.height as usize * 4;
        let mut pixels = vec![0u8; len];

        unsafe {
            self.gl.bind_framebuffer(
                glow::FRAMEBUFFER,
                Some(glow::NativeFramebuffer(target.framebuffer.0)),
            );
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 4);
            self.gl.read_pixels(
                0,
                0,
                target.width as i32,
                target.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(&mut pixels),
            );
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }

        self.check_gl("read_target")?;
        Ok(pixels)
    }

    fn create_window_surface(&mut self, window: *mut c_void) -> Result<SurfaceId, GpuError> {
        let surface = unsafe {
            self.egl
                .create_window_surface(self.display, self.config, window, None)
                .map_err(egl_call("eglCreateWindowSurface"))?
        };

        // Presentation is paced by the compositor's frame callbacks, so the
        // swap itself must never wait for vblank.
        let interval = self
            .egl
            .make_current(
                self.display,
                Some(surface),
                Some(surface),
                Some(self.context),
            )
            .and_then(|()| self.egl.swap_interval(self.display, 0));
        if let Err(why) = interval {
            debug!(%why, "Could not disable swap interval");
        }
        self.current_offscreen()?;

        let id = SurfaceId(self.next_surface);
        self.next_surface += 1;
        self.surfaces.insert(id, surface);
        Ok(id)
    }

    fn destroy_window_surface(&mut self, surface: SurfaceId) {
        let Some(surface) = self.surfaces.remove(&surface) else {
            return;
        };

        if self.egl.get_current_surface(egl::DRAW) == Some(surface) {
            let _ = self.current_offscreen();
        }

        if let Err(why) = self.egl.destroy_surface(self.display, surface) {
            warn!(%why, "eglDestroySurface failed");
        }
    }

    fn paint_texture_onto(
        &mut self,
        surface: SurfaceId,
        texture: Texture,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError> {
        let window = *self
            .surfaces
            .get(&surface)
            .ok_or(GpuError::UnknownSurface(surface))?;

        let previous = self.egl.get_current_surface(egl::DRAW).or(self.offscreen);

        self.egl
            .make_current(self.display, Some(window), Some(window), Some(self.context))
            .map_err(egl_call("eglMakeCurrent"))?;

        let result = (|| {
            let quad = self.quad()?;
            unsafe {
                self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                self.gl.viewport(0, 0, width as i32, height as i32);
                self.gl.clear_color(0.0, 0.0, 0.0, 1.0);
                self.gl.clear(glow::COLOR_BUFFER_BIT);
                quad.draw(&self.gl, glow::NativeTexture(texture.0), true);
            }
            self.check_gl("paint_texture_onto")?;
            self.egl
                .swap_buffers(self.display, window)
                .map_err(egl_call("eglSwapBuffers"))
        })();

        if let Err(why) =
            self.egl
                .make_current(self.display, previous, previous, Some(self.context))
        {
            warn!(%why, "Failed to restore previous EGL surface");
        }

        result
    }
}

impl Drop for EglDevice {
    fn drop(&mut self) {
        let _ = self.current_offscreen();

        unsafe {
            if let Some(quad) = self.quad.take() {
                quad.destroy(&self.gl);
            }
            if let Some((texture, _, _)) = self.scratch.take() {
                self.gl.delete_texture(texture);
            }
        }

        for (_, surface) in self.surfaces.drain() {
            let _ = self.egl.destroy_surface(self.display, surface);
        }

        let _ = self.egl.make_current(self.display, None, None, None);
        if let Some(offscreen) = self.offscreen.take() {
            let _ = self.egl.destroy_surface(self.display, offscreen);
        }
        let _ = self.egl.destroy_context(self.display, self.context);
        let _ = self.egl.terminate(self.display);
    }
}

fn open_display(
    egl: &egl::Instance<egl::Static>,
    native: NativeDisplay,
) -> Result<egl::Display, GpuError> {
    let platform = match native {
        NativeDisplay::Wayland(display) if !display.is_null() => {
            Some((PLATFORM_WAYLAND_KHR, display, vec![egl::ATTRIB_NONE]))
        }
        NativeDisplay::Xcb { connection, screen } if !connection.is_null() => Some((
            PLATFORM_XCB_EXT,
            connection,
            vec![
                PLATFORM_XCB_SCREEN_EXT,
                screen as egl::Attrib,
                egl::ATTRIB_NONE,
            ],
        )),
        _ => None,
    };

    if let Some((platform, handle, attribs)) = platform {
        match unsafe { egl.get_platform_display(platform, handle, &attribs) } {
            Ok(display) => return Ok(display),
            Err(why) => {
                warn!(
                    %why,
                    platform = format!("{platform:#x}"),
                    "Platform display unavailable, using default display"
                );
            }
        }
    }

    unsafe { egl.get_display(egl::DEFAULT_DISPLAY) }.ok_or(GpuError::NoDisplay)
}

fn choose_config(
    egl: &egl::Instance<egl::Static>,
    display: egl::Display,
) -> Result<egl::Config, GpuError> {
    for (preference, attribs) in CONFIG_ATTRIBS.iter().enumerate() {
        match egl.choose_first_config(display, attribs) {
            Ok(Some(config)) => {
                let surface_type = egl
                    .get_config_attrib(display, config, egl::SURFACE_TYPE)
                    .ok();
                debug!(
                    preference,
                    surface_type = ?surface_type,
                    "Selected EGL config"
                );
                return Ok(config);
            }
            Ok(None) => debug!(preference, "No EGL config matches"),
            Err(why) => debug!(preference, %why, "eglChooseConfig failed"),
        }
    }

    Err(GpuError::NoConfig)
}

fn create_context(
    egl: &egl::Instance<egl::Static>,
    display: egl::Display,
    config: egl::Config,
) -> Option<egl::Context> {
    for (label, attribs) in CONTEXT_ATTRIBS {
        match egl.create_context(display, config, None, attribs) {
            Ok(context) => {
                info!(request = label, "Created OpenGL context");
                return Some(context);
            }
            Err(why) => warn!(request = label, %why, "OpenGL context request failed"),
        }
    }

    None
}

fn make_offscreen_current(
    egl: &egl::Instance<egl::Static>,
    display: egl::Display,
    config: egl::Config,
    context: egl::Context,
) -> Result<Option<egl::Surface>, GpuError> {
    let pbuffer_attribs = [egl::WIDTH, 1, egl::HEIGHT, 1, egl::NONE];
    match egl.create_pbuffer_surface(display, config, &pbuffer_attribs) {
        Ok(pbuffer) => {
            match egl.make_current(display, Some(pbuffer), Some(pbuffer), Some(context)) {
                Ok(()) => {
                    debug!("Using 1x1 pbuffer as offscreen surface");
                    return Ok(Some(pbuffer));
                }
                Err(why) => {
                    debug!(%why, "Could not make pbuffer current");
                    let _ = egl.destroy_surface(display, pbuffer);
                }
            }
        }
        Err(why) => debug!(%why, "Could not create pbuffer"),
    }

    let surfaceless = egl
        .query_string(Some(display), egl::EXTENSIONS)
        .map(|extensions| {
            extensions
                .to_string_lossy()
                .split_whitespace()
                .any(|ext| ext == "EGL_KHR_surfaceless_context")
        })
        .unwrap_or(false);

    if surfaceless && egl.make_current(display, None, None, Some(context)).is_ok() {
        debug!("Using surfaceless context");
        return Ok(None);
    }

    Err(GpuError::NoSurface)
}

unsafe fn create_texture(
    gl: &glow::Context,
    width: u32,
    height: u32,
) -> Result<glow::NativeTexture, GpuError> {
    unsafe {
        let texture = gl.create_texture().map_err(GpuError::Resource)?;
        gl.bind_texture(glow::TEXTURE_2D, Some(texture));
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_MIN_FILTER,
            glow::LINEAR as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_MAG_FILTER,
            glow::LINEAR as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_WRAP_S,
            glow::CLAMP_TO_EDGE as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_WRAP_T,
            glow::CLAMP_TO_EDGE as i32,
        );
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAX_LEVEL, 0);
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA8 as i32,
            width as i32,
            height as i32,
            0,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            None,
        );
        gl.bind_texture(glow::TEXTURE_2D, None);
        Ok(texture)
    }
}

fn check_len(pixels: &[u8], width: u32, height: u32) -> Result<(), GpuError> {
    let needed = width as usize * height as usize * 4;
    if pixels.len() < needed {
        return Err(GpuError::ShortBuffer {
            len: pixels.len(),
            needed,
            width,
            height,
        });
    }
    Ok(())
}
