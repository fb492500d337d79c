// SPDX-License-Identifier: MPL-2.0

//! Layer-shell backend: one background layer surface per output, painted
//! through EGL window surfaces behind a per-surface readiness gate.

mod gate;
mod naming;

use gate::{Effect, Event, SurfaceGate};
use naming::{OutputDescriptor, output_names};

use std::{collections::HashMap, ffi::c_void, io};

use eyre::WrapErr;
use sctk::{
    compositor::{CompositorHandler, CompositorState, Region},
    delegate_compositor, delegate_layer, delegate_output, delegate_registry,
    output::{OutputHandler, OutputState},
    reexports::client::{
        Connection, EventQueue, Proxy, QueueHandle,
        backend::{ObjectId, WaylandError},
        globals::registry_queue_init,
        protocol::{wl_output, wl_surface},
    },
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    shell::{
        WaylandSurface,
        wlr_layer::{
            Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
            LayerSurfaceConfigure,
        },
    },
};
use wayland_egl::WlEglSurface;

use crate::{
    display::{DisplayBackend, Output},
    render::{NativeDisplay, OffscreenTarget, SharedRenderer, SurfaceId},
};

/// The `wl_surface` side of a presentation.
trait SurfaceHandle {
    /// Allocate the native window, returning the pointer EGL renders to.
    fn create_window(&mut self, width: i32, height: i32, scale: i32) -> Option<*mut c_void>;
    fn resize_window(&mut self, width: i32, height: i32);
    fn destroy_window(&mut self);
    fn request_frame(&mut self);
    fn damage(&mut self, width: i32, height: i32);
    fn commit(&mut self);
}

/// A background layer surface with its EGL window.
struct LayerHandle {
    layer: LayerSurface,
    window: Option<WlEglSurface>,
    qh: QueueHandle<WaylandState>,
}

impl SurfaceHandle for LayerHandle {
    fn create_window(&mut self, width: i32, height: i32, scale: i32) -> Option<*mut c_void> {
        let wl_surface = self.layer.wl_surface();
        let window = match WlEglSurface::new(wl_surface.id(), width, height) {
            Ok(window) => window,
            Err(why) => {
                tracing::error!(?why, "Failed to create EGL window");
                return None;
            }
        };

        wl_surface.set_buffer_scale(scale);
        let native = window.ptr() as *mut c_void;
        self.window = Some(window);
        Some(native)
    }

    fn resize_window(&mut self, width: i32, height: i32) {
        if let Some(window) = self.window.as_ref() {
            window.resize(width, height, 0, 0);
        }
    }

    fn destroy_window(&mut self) {
        self.window = None;
    }

    fn request_frame(&mut self) {
        let wl_surface = self.layer.wl_surface();
        wl_surface.frame(&self.qh, wl_surface.clone());
    }

    fn damage(&mut self, width: i32, height: i32) {
        self.layer.wl_surface().damage_buffer(0, 0, width, height);
    }

    fn commit(&mut self) {
        self.layer.wl_surface().commit();
    }
}

/// Surface and GPU resources presenting one output.
struct PresentationSurface<H: SurfaceHandle = LayerHandle> {
    name: String,
    handle: H,
    gpu_surface: Option<SurfaceId>,
    gate: SurfaceGate,
    scale: i32,
    /// fallback when the compositor configures a zero size
    logical_size: (u32, u32),
    /// frame callbacks requested by failed paints, still to arrive
    stale_callbacks: u32,
}

impl<H: SurfaceHandle> PresentationSurface<H> {
    fn new(name: String, handle: H, scale: i32, logical_size: (u32, u32)) -> Self {
        Self {
            name,
            handle,
            gpu_surface: None,
            gate: SurfaceGate::new(),
            scale,
            logical_size,
            stale_callbacks: 0,
        }
    }

    fn buffer_size(&self, (width, height): (u32, u32)) -> (i32, i32) {
        let scale = self.scale.max(1);
        (width as i32 * scale, height as i32 * scale)
    }

    fn configure(&mut self, renderer: Option<&SharedRenderer>, new_size: (u32, u32)) {
        let (width, height) = match new_size {
            (0, _) | (_, 0) => self.logical_size,
            size => size,
        };

        let (gate, effect) = self.gate.step(Event::Configure { width, height });
        self.gate = gate;

        tracing::debug!(
            output = %self.name,
            width,
            height,
            phase = ?gate.phase,
            "Layer surface configured"
        );

        match effect {
            Effect::CreateWindow { width, height } => {
                self.create_window(renderer, (width, height));
            }
            Effect::ResizeWindow { width, height } => self.resize_window((width, height)),
            _ => {}
        }
    }

    fn create_window(&mut self, renderer: Option<&SharedRenderer>, size: (u32, u32)) {
        let (width, height) = self.buffer_size(size);
        let Some(native) = self.handle.create_window(width, height, self.scale.max(1)) else {
            return;
        };

        self.gpu_surface =
            renderer.and_then(|renderer| renderer.borrow_mut().create_window_surface(native));

        tracing::debug!(output = %self.name, width, height, "Created output window");
    }

    fn resize_window(&mut self, size: (u32, u32)) {
        let (width, height) = self.buffer_size(size);
        self.handle.resize_window(width, height);
        tracing::debug!(output = %self.name, width, height, "Resized output window");
    }

    /// Present `target` if the gate allows it. Returns whether it was painted.
    fn paint(&mut self, renderer: Option<&SharedRenderer>, target: &OffscreenTarget) -> bool {
        let (gate, effect) = self.gate.step(Event::PaintRequested);
        self.gate = gate;

        let resize = match effect {
            Effect::Draw { resize } => resize,
            Effect::Dropped(reason) => {
                tracing::trace!(?reason, output = %self.name, "Paint dropped");
                return false;
            }
            _ => return false,
        };

        if let Some(size) = resize {
            self.resize_window(size);
        }

        let (Some(size), Some(gpu_surface), Some(renderer)) =
            (self.gate.window_size, self.gpu_surface, renderer)
        else {
            self.gate = self.gate.step(Event::PaintFailed).0;
            return false;
        };
        let (width, height) = self.buffer_size(size);

        // the swap commits, so the callback and damage go in first
        self.handle.request_frame();
        self.handle.damage(width, height);

        let painted = renderer.borrow_mut().paint_texture_onto(
            gpu_surface,
            target.texture,
            width as u32,
            height as u32,
        );

        if painted {
            self.gate = self.gate.step(Event::PaintSubmitted).0;
        } else {
            // the requested callback resolves this commit, not a later paint
            self.handle.commit();
            self.stale_callbacks += 1;
            self.gate = self.gate.step(Event::PaintFailed).0;
        }

        painted
    }

    fn frame_done(&mut self) {
        // callbacks arrive in commit order, so stale ones come first
        if self.stale_callbacks > 0 {
            self.stale_callbacks -= 1;
            return;
        }
        self.gate = self.gate.step(Event::FrameDone).0;
    }

    fn release(&mut self, renderer: Option<&SharedRenderer>) {
        if let (Some(surface), Some(renderer)) = (self.gpu_surface.take(), renderer) {
            renderer.borrow_mut().release_window_surface(surface);
        }
        self.handle.destroy_window();
    }
}

/// Protocol state the sctk handlers operate on.
pub struct WaylandState {
    registry_state: RegistryState,
    output_state: OutputState,
    compositor_state: CompositorState,
    layer_shell: LayerShell,
    qh: QueueHandle<Self>,

    /// keyed by the `wl_output` the surface presents
    surfaces: HashMap<ObjectId, PresentationSurface>,
    renderer: Option<SharedRenderer>,
    exit: bool,
}

impl WaylandState {
    /// Outputs in enumeration order with their assigned names.
    fn named_outputs(&self) -> Vec<(wl_output::WlOutput, Output)> {
        let listed: Vec<_> = self
            .output_state
            .outputs()
            .filter_map(|output| {
                let info = self.output_state.info(&output)?;
                Some((output, info))
            })
            .collect();

        let descriptors: Vec<OutputDescriptor> = listed
            .iter()
            .map(|(_, info)| {
                let (x, y) = info.logical_position.unwrap_or(info.location);
                let (width, height) = info
                    .logical_size
                    .or_else(|| {
                        info.modes
                            .iter()
                            .find(|mode| mode.current)
                            .map(|mode| mode.dimensions)
                    })
                    .unwrap_or((0, 0));
                OutputDescriptor {
                    name: info.name.clone(),
                    x,
                    y,
                    width: width.max(0) as u32,
                    height: height.max(0) as u32,
                }
            })
            .collect();

        let names = output_names(&descriptors);

        listed
            .into_iter()
            .zip(descriptors)
            .zip(names)
            .enumerate()
            .map(|(index, (((output, info), descriptor), name))| {
                let ready = self
                    .surfaces
                    .get(&output.id())
                    .is_some_and(|surface| surface.gate.can_paint());
                let output_model = Output {
                    name,
                    x: descriptor.x,
                    y: descriptor.y,
                    width: descriptor.width,
                    height: descriptor.height,
                    scale: info.scale_factor,
                    primary: index == 0,
                    ready,
                };
                (output, output_model)
            })
            .collect()
    }

    fn create_surface(&mut self, output: &wl_output::WlOutput, model: &Output) {
        let region = match Region::new(&self.compositor_state) {
            Ok(region) => region,
            Err(why) => {
                tracing::error!(?why, output = %model.name, "Failed to create input region");
                return;
            }
        };

        let surface = self.compositor_state.create_surface(&self.qh);
        let layer = self.layer_shell.create_layer_surface(
            &self.qh,
            surface,
            Layer::Background,
            Some("wallpaper"),
            Some(output),
        );
        layer.set_anchor(Anchor::all());
        layer.set_exclusive_zone(-1);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.set_size(0, 0);
        // claim no input so clicks reach the desktop
        layer
            .wl_surface()
            .set_input_region(Some(region.wl_region()));
        layer.commit();

        tracing::info!(output = %model.name, "Created layer surface");

        let handle = LayerHandle {
            layer,
            window: None,
            qh: self.qh.clone(),
        };
        self.surfaces.insert(
            output.id(),
            PresentationSurface::new(
                model.name.clone(),
                handle,
                model.scale,
                (model.width, model.height),
            ),
        );
    }

    fn paint_surface(&mut self, id: &ObjectId, target: &OffscreenTarget) -> bool {
        match self.surfaces.get_mut(id) {
            Some(surface) => surface.paint(self.renderer.as_ref(), target),
            None => false,
        }
    }

    fn surface_for_wl(
        &mut self,
        wl_surface: &wl_surface::WlSurface,
    ) -> Option<&mut PresentationSurface> {
        self.surfaces
            .values_mut()
            .find(|surface| surface.handle.layer.wl_surface() == wl_surface)
    }

    fn surface_for_layer(&mut self, layer: &LayerSurface) -> Option<&mut PresentationSurface> {
        self.surfaces
            .values_mut()
            .find(|surface| &surface.handle.layer == layer)
    }
}

/// Backend for compositors implementing `zwlr_layer_shell_v1`.
pub struct WaylandBackend {
    connection: Connection,
    event_queue: EventQueue<WaylandState>,
    state: WaylandState,
}

impl WaylandBackend {
    /// Connect to the compositor and enumerate its outputs.
    ///
    /// # Errors
    ///
    /// Fails without a compositor connection or without layer-shell support.
    pub fn connect() -> eyre::Result<Self> {
        let connection =
            Connection::connect_to_env().wrap_err("wayland client connection failed")?;

        let (globals, mut event_queue) =
            registry_queue_init(&connection).wrap_err("failed to initialize registry queue")?;
        let qh = event_queue.handle();

        let compositor_state =
            CompositorState::bind(&globals, &qh).wrap_err("wl_compositor not available")?;
        let layer_shell =
            LayerShell::bind(&globals, &qh).wrap_err("zwlr_layer_shell_v1 not available")?;

        let mut state = WaylandState {
            registry_state: RegistryState::new(&globals),
            output_state: OutputState::new(&globals, &qh),
            compositor_state,
            layer_shell,
            qh,
            surfaces: HashMap::new(),
            renderer: None,
            exit: false,
        };

        // outputs first, then their names and geometry
        for _ in 0..2 {
            event_queue
                .roundtrip(&mut state)
                .wrap_err("failed to enumerate wayland outputs")?;
        }

        Ok(Self {
            connection,
            event_queue,
            state,
        })
    }

    fn roundtrip(&mut self) -> bool {
        match self.event_queue.roundtrip(&mut self.state) {
            Ok(_) => true,
            Err(why) => {
                tracing::error!(?why, "Wayland roundtrip failed");
                self.state.exit = true;
                false
            }
        }
    }

    fn paint_one(
        &mut self,
        output: &wl_output::WlOutput,
        model: &Output,
        target: &OffscreenTarget,
    ) -> bool {
        let id = output.id();

        if !self.state.surfaces.contains_key(&id) {
            self.state.create_surface(output, model);
            // collect the first configure before painting
            if !self.roundtrip() {
                return false;
            }
        }

        self.state.paint_surface(&id, target)
    }

    fn flush(&mut self) {
        if let Err(why) = self.connection.flush() {
            if !is_would_block(&why) {
                tracing::error!(?why, "Wayland connection lost");
                self.state.exit = true;
            }
        }
    }
}

fn is_would_block(why: &WaylandError) -> bool {
    matches!(why, WaylandError::Io(err) if err.kind() == io::ErrorKind::WouldBlock)
}

impl DisplayBackend for WaylandBackend {
    fn name(&self) -> &'static str {
        "wayland"
    }

    fn outputs(&self) -> Vec<Output> {
        self.state
            .named_outputs()
            .into_iter()
            .map(|(_, output)| output)
            .collect()
    }

    fn paint_output(&mut self, name: &str, target: &OffscreenTarget) -> bool {
        let Some((output, model)) = self
            .state
            .named_outputs()
            .into_iter()
            .find(|(_, output)| output.name == name)
        else {
            tracing::warn!(output = name, "No such output");
            return false;
        };

        let painted = self.paint_one(&output, &model, target);
        self.flush();
        painted
    }

    fn paint_all(&mut self, target: &OffscreenTarget) -> bool {
        let outputs = self.state.named_outputs();
        let mut painted = 0;

        for (output, model) in &outputs {
            if self.paint_one(output, model, target) {
                painted += 1;
            }
        }

        self.flush();
        tracing::trace!(painted, total = outputs.len(), "Painted outputs");
        painted > 0
    }

    fn native_display(&self) -> NativeDisplay {
        NativeDisplay::Wayland(self.connection.backend().display_ptr() as *mut c_void)
    }

    fn pump_events(&mut self) {
        self.flush();

        if let Some(guard) = self.event_queue.prepare_read() {
            if let Err(why) = guard.read() {
                if !is_would_block(&why) {
                    tracing::error!(?why, "Failed to read wayland events");
                    self.state.exit = true;
                    return;
                }
            }
        }

        if let Err(why) = self.event_queue.dispatch_pending(&mut self.state) {
            tracing::error!(?why, "Failed to dispatch wayland events");
            self.state.exit = true;
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.state.exit
    }

    fn bind_renderer(&mut self, renderer: SharedRenderer) {
        self.state.renderer = Some(renderer);
    }
}

impl Drop for WaylandBackend {
    fn drop(&mut self) {
        let renderer = self.state.renderer.take();
        for (_, mut surface) in self.state.surfaces.drain() {
            surface.release(renderer.as_ref());
        }
        // the EGL display must go before the wayland connection
        drop(renderer);
        let _ = self.connection.flush();
    }
}

impl CompositorHandler for WaylandState {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        surface: &wl_surface::WlSurface,
        new_factor: i32,
    ) {
        if let Some(entry) = self.surface_for_wl(surface) {
            entry.scale = new_factor;
            entry
                .handle
                .layer
                .wl_surface()
                .set_buffer_scale(new_factor.max(1));
            if let Some(size) = entry.gate.window_size {
                entry.resize_window(size);
            }
        }
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
        if let Some(entry) = self.surface_for_wl(surface) {
            entry.frame_done();
        }
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }
}

impl OutputHandler for WaylandState {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        let name = self.output_state.info(&output).and_then(|info| info.name);
        tracing::debug!(?name, "Output added");
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        let Some(info) = self.output_state.info(&output) else {
            return;
        };

        if let Some(surface) = self.surfaces.get_mut(&output.id()) {
            if let Some((width, height)) = info.logical_size {
                surface.logical_size = (width.max(0) as u32, height.max(0) as u32);
            }
            surface.scale = info.scale_factor;
        }
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        if let Some(mut surface) = self.surfaces.remove(&output.id()) {
            tracing::info!(output = %surface.name, "Output removed");
            surface.release(self.renderer.as_ref());
        }
    }
}

impl LayerShellHandler for WaylandState {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, layer: &LayerSurface) {
        if let Some(surface) = self.surface_for_layer(layer) {
            tracing::warn!(output = %surface.name, "Layer surface closed by compositor");
            surface.gate = surface.gate.step(Event::Closed).0;
        }
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        let renderer = self.renderer.clone();
        if let Some(surface) = self.surface_for_layer(layer) {
            surface.configure(renderer.as_ref(), configure.new_size);
        }
    }
}

impl ProvidesRegistryState for WaylandState {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }
    registry_handlers![OutputState];
}

delegate_compositor!(WaylandState);
delegate_output!(WaylandState);
delegate_layer!(WaylandState);
delegate_registry!(WaylandState);

#[cfg(test)]
mod tests {
    use super::{
        gate::{DropReason, Phase},
        *,
    };
    use crate::{
        render::Renderer,
        testing::{FakeGpu, GpuLog, fake_target},
    };
    use std::{cell::RefCell, rc::Rc};

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        CreateWindow { width: i32, height: i32, scale: i32 },
        Resize(i32, i32),
        DestroyWindow,
        RequestFrame,
        Damage(i32, i32),
        Commit,
    }

    #[derive(Default)]
    struct RecordingHandle {
        calls: Vec<Call>,
    }

    impl RecordingHandle {
        /// Calls recorded since the last drain.
        fn drain(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.calls)
        }
    }

    impl SurfaceHandle for RecordingHandle {
        fn create_window(&mut self, width: i32, height: i32, scale: i32) -> Option<*mut c_void> {
            self.calls.push(Call::CreateWindow {
                width,
                height,
                scale,
            });
            Some(std::ptr::null_mut())
        }

        fn resize_window(&mut self, width: i32, height: i32) {
            self.calls.push(Call::Resize(width, height));
        }

        fn destroy_window(&mut self) {
            self.calls.push(Call::DestroyWindow);
        }

        fn request_frame(&mut self) {
            self.calls.push(Call::RequestFrame);
        }

        fn damage(&mut self, width: i32, height: i32) {
            self.calls.push(Call::Damage(width, height));
        }

        fn commit(&mut self) {
            self.calls.push(Call::Commit);
        }
    }

    fn gpu() -> (SharedRenderer, Rc<RefCell<GpuLog>>) {
        let gpu = FakeGpu::default();
        let log = gpu.log();
        (Renderer::new(Box::new(gpu)).into_shared(), log)
    }

    /// A configured 1280x720 surface at scale 2, with its creation calls drained.
    fn configured(renderer: Option<&SharedRenderer>) -> PresentationSurface<RecordingHandle> {
        let mut surface =
            PresentationSurface::new("DP-1".into(), RecordingHandle::default(), 2, (1280, 720));
        surface.configure(renderer, (0, 0));
        assert_eq!(
            surface.handle.drain(),
            vec![Call::CreateWindow {
                width: 2560,
                height: 1440,
                scale: 2
            }]
        );
        surface
    }

    #[test]
    fn test_configure_creates_window_and_gpu_surface() {
        let (renderer, log) = gpu();
        let surface = configured(Some(&renderer));

        assert_eq!(log.borrow().surfaces_created, 1);
        assert_eq!(surface.gpu_surface, Some(SurfaceId(1)));
        assert_eq!(surface.gate.window_size, Some((1280, 720)));
        assert!(surface.gate.can_paint());
    }

    #[test]
    fn test_successful_paint_awaits_frame_callback() {
        let (renderer, log) = gpu();
        let mut surface = configured(Some(&renderer));
        let target = fake_target(1280, 720);

        assert!(surface.paint(Some(&renderer), &target));
        // the swap commits, so no explicit commit
        assert_eq!(
            surface.handle.drain(),
            vec![Call::RequestFrame, Call::Damage(2560, 1440)]
        );
        assert_eq!(surface.gate.phase, Phase::AwaitingReady);

        assert!(!surface.paint(Some(&renderer), &target));
        assert!(surface.handle.drain().is_empty());
        assert_eq!(log.borrow().paints, vec![SurfaceId(1)]);

        surface.frame_done();
        assert_eq!(surface.gate.phase, Phase::Configured);
        assert!(surface.paint(Some(&renderer), &target));
        assert_eq!(log.borrow().paints.len(), 2);
    }

    #[test]
    fn test_failed_paint_commits_and_returns_to_configured() {
        let (renderer, log) = gpu();
        let mut surface = configured(Some(&renderer));
        let target = fake_target(1280, 720);

        log.borrow_mut().fail_paint = true;
        assert!(!surface.paint(Some(&renderer), &target));
        assert_eq!(
            surface.handle.drain(),
            vec![Call::RequestFrame, Call::Damage(2560, 1440), Call::Commit]
        );
        assert_eq!(surface.gate.phase, Phase::Configured);
        assert!(log.borrow().paints.is_empty());
    }

    #[test]
    fn test_callback_from_failed_paint_does_not_release_next_paint() {
        let (renderer, log) = gpu();
        let mut surface = configured(Some(&renderer));
        let target = fake_target(1280, 720);

        log.borrow_mut().fail_paint = true;
        assert!(!surface.paint(Some(&renderer), &target));
        log.borrow_mut().fail_paint = false;
        assert!(surface.paint(Some(&renderer), &target));

        // callback for the failed commit
        surface.frame_done();
        assert_eq!(surface.gate.phase, Phase::AwaitingReady);
        assert!(
            !surface.paint(Some(&renderer), &target),
            "paint must wait for its own callback"
        );

        surface.frame_done();
        assert_eq!(surface.gate.phase, Phase::Configured);
    }

    #[test]
    fn test_resize_keeps_gpu_surface() {
        let (renderer, log) = gpu();
        let mut surface = configured(Some(&renderer));
        let target = fake_target(1280, 720);

        surface.configure(Some(&renderer), (1920, 1080));
        assert_eq!(surface.handle.drain(), vec![Call::Resize(3840, 2160)]);

        // a resize during presentation waits for the next paint
        assert!(surface.paint(Some(&renderer), &target));
        surface.handle.drain();
        surface.configure(Some(&renderer), (800, 600));
        assert!(surface.handle.drain().is_empty());

        surface.frame_done();
        assert!(surface.paint(Some(&renderer), &target));
        assert_eq!(
            surface.handle.drain(),
            vec![
                Call::Resize(1600, 1200),
                Call::RequestFrame,
                Call::Damage(1600, 1200)
            ]
        );

        let log = log.borrow();
        assert_eq!(log.surfaces_created, 1);
        assert_eq!(log.surfaces_destroyed, 0);
    }

    #[test]
    fn test_release_destroys_window_and_gpu_surface() {
        let (renderer, log) = gpu();
        let mut surface = configured(Some(&renderer));

        surface.release(Some(&renderer));
        assert_eq!(surface.handle.drain(), vec![Call::DestroyWindow]);
        assert_eq!(surface.gpu_surface, None);
        assert_eq!(log.borrow().surfaces_destroyed, 1);

        // nothing to present onto, so no callback is requested
        assert!(!surface.paint(Some(&renderer), &fake_target(1280, 720)));
        assert!(surface.handle.drain().is_empty());
        assert_eq!(surface.gate.phase, Phase::Configured);
    }

    #[test]
    fn test_paint_without_renderer_requests_nothing() {
        let mut surface = configured(None);
        assert_eq!(surface.gpu_surface, None);

        assert!(!surface.paint(None, &fake_target(1280, 720)));
        assert!(surface.handle.drain().is_empty());
        assert!(surface.gate.can_paint());
        assert_eq!(surface.stale_callbacks, 0);
    }

    /// Drive two gates through one ALL paint the way the backend does.
    #[test]
    fn test_two_outputs_cycle_through_presentation() {
        let mut gates = [SurfaceGate::new(), SurfaceGate::new()];
        let sizes = [(1920, 1080), (1920, 1080)];

        for (gate, (width, height)) in gates.iter_mut().zip(sizes) {
            let (next, effect) = gate.step(Event::Configure { width, height });
            assert_eq!(effect, Effect::CreateWindow { width, height });
            *gate = next;
        }

        let mut seen = vec![Vec::new(), Vec::new()];
        for (gate, phases) in gates.iter_mut().zip(seen.iter_mut()) {
            phases.push(gate.phase);
            let (next, effect) = gate.step(Event::PaintRequested);
            assert_eq!(effect, Effect::Draw { resize: None });
            phases.push(next.phase);
            let (next, _) = next.step(Event::PaintSubmitted);
            phases.push(next.phase);
            *gate = next;
        }

        // a second ALL paint before the callbacks is dropped on both
        for gate in &gates {
            let (_, effect) = gate.step(Event::PaintRequested);
            assert_eq!(effect, Effect::Dropped(DropReason::AwaitingReady));
        }

        for (gate, phases) in gates.iter_mut().zip(seen.iter_mut()) {
            *gate = gate.step(Event::FrameDone).0;
            phases.push(gate.phase);
        }

        let expected = [
            Phase::Configured,
            Phase::Painting,
            Phase::AwaitingReady,
            Phase::Configured,
        ];
        assert_eq!(seen, vec![expected.to_vec(), expected.to_vec()]);
    }

    #[test]
    fn test_positioned_outputs_get_distinct_names() {
        let outputs = [
            OutputDescriptor {
                name: None,
                x: 0,
                y: 0,
                width: 1920,
                height: 1080,
            },
            OutputDescriptor {
                name: None,
                x: 1920,
                y: 0,
                width: 1920,
                height: 1080,
            },
        ];
        let names = output_names(&outputs);
        assert_ne!(names[0], names[1]);
    }
}
