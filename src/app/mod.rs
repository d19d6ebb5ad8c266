mod camera_controller;
mod input_state;
mod timer;

use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::app::camera_controller::CameraController;
use crate::app::input_state::InputState;
use crate::app::timer::{FrameStats, Timer};
use crate::renderer::Renderer;
use crate::renderer::config::RenderConfig;

const WINDOW_TITLE: &str = "hillside";
const WINDOW_SIZE: (u32, u32) = (800, 800);

/// Owns the window, the renderer, and the frame loop around them. The
/// window and renderer are created lazily in `resumed`, as winit requires.
pub struct App {
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    camera_controller: CameraController,

    input_state: InputState,
    timer: Timer,
    frame_stats: FrameStats,
    close_requested: bool,
}

impl App {
    pub fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            camera_controller: CameraController::default(),

            input_state: InputState::default(),
            timer: Timer::new(),
            frame_stats: FrameStats::new(),
            close_requested: false,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let event_loop = EventLoop::new().wrap_err("creating the event loop")?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(self).wrap_err("running the event loop")?;
        Ok(())
    }

    /// One frame: advance time, apply input, update and draw, and refresh
    /// the title stats about once per second.
    fn frame(&mut self) -> Result<()> {
        let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut())
        else {
            return Ok(());
        };

        self.timer.tick();
        let delta_time = self.timer.delta();

        let (sun_theta, sun_phi) =
            self.camera_controller
                .process_input(&self.input_state, delta_time, renderer.camera_mut());
        renderer.rotate_sun(sun_theta, sun_phi);
        self.input_state.reset_frame();

        renderer.update(self.timer.total(), delta_time)?;
        renderer.draw()?;

        if let Some(stats) = self.frame_stats.tick(self.timer.total()) {
            window.set_title(&format!("{WINDOW_TITLE} | {stats}"));
        }
        Ok(())
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let attributes = Window::default_attributes()
                .with_title(WINDOW_TITLE)
                .with_inner_size(LogicalSize::new(WINDOW_SIZE.0, WINDOW_SIZE.1));
            match event_loop.create_window(attributes) {
                Ok(window) => self.window = Some(Arc::new(window)),
                Err(e) => {
                    log::error!("Failed to create the window: {e}");
                    event_loop.exit();
                    return;
                }
            }
        }
        let Some(window) = self.window.as_ref() else {
            return;
        };

        if self.renderer.is_none() {
            match Renderer::new(Arc::clone(window), RenderConfig::default()) {
                Ok(renderer) => self.renderer = Some(renderer),
                Err(e) => {
                    log::error!("Failed to initialize the renderer: {e:?}");
                    event_loop.exit();
                    return;
                }
            }
        }

        window.request_redraw();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window_id != window.id() {
            return;
        }

        self.input_state.process_window_events(&event);

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match code {
                KeyCode::Escape => {
                    self.close_requested = true;
                }
                KeyCode::F2 => {
                    if let Some(renderer) = self.renderer.as_mut() {
                        renderer.toggle_wireframe();
                    }
                }
                _ => {}
            },
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.frame() {
                    log::error!("Frame failed: {e:?}");
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}
