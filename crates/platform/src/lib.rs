//! Platform layer: windowing & event loop.
//!
//! Owns the winit `ApplicationHandler`, creates the GPU state once the
//! window exists, and drives the per-frame model spin. All scene inputs
//! arrive in an explicit [`ViewerConfig`] owned by the caller; nothing
//! lives in process-wide state.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use renderer::GpuState;
pub use renderer::{SceneSpec, ToonSettings};

/// Everything the viewer needs to run, assembled by the caller.
#[derive(Clone, Debug)]
pub struct ViewerConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub backends: wgpu::Backends,
    pub scene: SceneSpec,
    /// Model heading rate around +Z, degrees per second.
    pub spin_deg_per_sec: f32,
}

impl ViewerConfig {
    /// Viewer defaults: 1280x720, any GPU backend, 20 deg/s spin.
    pub fn new(title: impl Into<String>, scene: SceneSpec) -> Self {
        Self {
            title: title.into(),
            width: 1280,
            height: 720,
            backends: wgpu::Backends::all(),
            scene,
            spin_deg_per_sec: 20.0,
        }
    }
}

/// Open the window and run until it is closed.
pub fn run(config: ViewerConfig) -> Result<()> {
    let event_loop: EventLoop<()> =
        EventLoop::new().map_err(|e| anyhow::anyhow!("Failed to create event loop: {e}"))?;

    let mut app = ViewerApp::new(config);
    event_loop
        .run_app(&mut app)
        .map_err(|e| anyhow::anyhow!("Event loop error: {e:?}"))?;

    app.failure.map_or(Ok(()), Err)
}

struct ViewerApp {
    /// Scene config; taken on first `resumed`.
    pending: Option<ViewerConfig>,
    window: Option<Arc<Window>>,
    gpu: Option<GpuState>,
    spin_deg_per_sec: f32,
    start: Instant,
    /// First fatal error, reported after the loop unwinds.
    failure: Option<anyhow::Error>,
}

impl ViewerApp {
    fn new(config: ViewerConfig) -> Self {
        Self {
            spin_deg_per_sec: config.spin_deg_per_sec,
            pending: Some(config),
            window: None,
            gpu: None,
            start: Instant::now(),
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.failure = Some(err);
        event_loop.exit();
    }

    /// Model heading at this instant: absolute, from elapsed wall time.
    fn heading_rad(&self) -> f32 {
        (self.spin_deg_per_sec * self.start.elapsed().as_secs_f32()).to_radians()
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(config) = self.pending.take() else {
            return;
        };

        let attributes = Window::default_attributes()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.width.max(1), config.height.max(1)));
        let window = match event_loop.create_window(attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::anyhow!("Failed to create window: {e}"));
                return;
            }
        };
        log::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        match pollster::block_on(GpuState::new(
            window.clone(),
            config.backends,
            config.scene,
        )) {
            Ok(gpu) => {
                self.gpu = Some(gpu);
                self.window = Some(window);
                self.start = Instant::now();
            }
            Err(e) => self.fail(event_loop, e.context("GPU initialization failed")),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested. Exiting event loop.");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state.is_pressed()
                    && event.logical_key == Key::Named(NamedKey::Escape) =>
            {
                log::info!("Escape pressed. Exiting event loop.");
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                log::debug!("Resized: {}x{}", new_size.width, new_size.height);
                if let Some(gpu) = &mut self.gpu {
                    gpu.resize(new_size.width, new_size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let heading = self.heading_rad();
                if let Some(gpu) = &mut self.gpu {
                    match gpu.render(heading) {
                        Ok(()) => {}
                        Err(e) if GpuState::is_surface_lost(&e) => {
                            log::warn!("Surface lost ({e}), recreating");
                            gpu.recreate_surface();
                        }
                        Err(wgpu::SurfaceError::OutOfMemory) => {
                            self.fail(
                                event_loop,
                                anyhow::anyhow!("GPU out of memory, shutting down"),
                            );
                        }
                        Err(e) => log::warn!("Frame skipped: {e}"),
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        // Continuous animation: keep frames coming, vsync paces us.
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
