//! Window management using winit

use crate::error::{RendererError, RendererResult};
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::{Window as WinitWindow, WindowBuilder},
};

/// Wrapper around a winit window that tracks size changes and close requests
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl Window {
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> RendererResult<Self> {
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)
            .map_err(|e| RendererError::Window(e.to_string()))?;

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
            resized: false,
            close_requested: false,
        })
    }

    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Shared handle, for backends that keep the surface alive
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Current framebuffer size in physical pixels
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn was_resized(&self) -> bool {
        self.resized
    }

    pub fn clear_resize_flag(&mut self) {
        self.resized = false;
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Open a window and drive `frame` once per event-loop iteration.
///
/// `init` builds the per-application state once the window exists. The loop
/// exits when the window is closed or `frame` returns `false`. A zero-sized
/// (minimized) window skips frames until it is restored.
pub fn run<S, I, F>(title: &str, width: u32, height: u32, init: I, mut frame: F) -> RendererResult<()>
where
    I: FnOnce(&Window) -> RendererResult<S>,
    F: FnMut(&mut S, &mut Window) -> bool + 'static,
    S: 'static,
{
    let event_loop = EventLoop::new().map_err(|e| RendererError::Window(e.to_string()))?;
    let mut window = Window::new(&event_loop, title, width, height)?;
    let mut state = init(&window)?;

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    window.handle_event(&event);
                    if window.should_close() {
                        elwt.exit();
                    }
                }
                Event::AboutToWait => {
                    let (w, h) = window.dimensions();
                    if w == 0 || h == 0 {
                        return;
                    }
                    if !frame(&mut state, &mut window) {
                        log::info!("Frame callback requested exit");
                        elwt.exit();
                        return;
                    }
                    window.request_redraw();
                }
                _ => {}
            }
        })
        .map_err(|e| RendererError::Window(e.to_string()))
}
