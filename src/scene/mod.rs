//! Scene inputs the renderer consumes each frame
//!
//! The renderer never reaches for global engine state. Everything it needs
//! from the camera, window and scene arrives through [`FrameContext`].

mod camera;
mod light;
mod transform;

pub use camera::*;
pub use light::*;
pub use transform::*;

use glam::{Vec3, Vec4};

/// A colored line segment, as emitted by physics debug drawing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLine {
    pub start: Vec3,
    pub end: Vec3,
    pub color: Vec4,
}

impl DebugLine {
    pub fn new(start: Vec3, end: Vec3, color: Vec4) -> Self {
        Self { start, end, color }
    }
}

/// Per-frame inputs from the collaborators around the renderer
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub camera: CameraView,
    pub framebuffer_size: (u32, u32),
    pub delta_time: f32,
    pub time: f32,
    pub directional_light: Option<DirectionalLight>,
    /// Only the first `MAX_POINT_LIGHTS` are used
    pub point_lights: Vec<PointLight>,
    pub debug_lines: Vec<DebugLine>,
}

impl Default for FrameContext {
    fn default() -> Self {
        Self {
            camera: CameraView::default(),
            framebuffer_size: (1280, 720),
            delta_time: 1.0 / 60.0,
            time: 0.0,
            directional_light: None,
            point_lights: Vec::new(),
            debug_lines: Vec::new(),
        }
    }
}

impl FrameContext {
    pub fn new(camera: CameraView, framebuffer_size: (u32, u32)) -> Self {
        Self {
            camera,
            framebuffer_size,
            ..Default::default()
        }
    }

    pub fn with_directional_light(mut self, light: DirectionalLight) -> Self {
        self.directional_light = Some(light);
        self
    }

    pub fn with_point_light(mut self, light: PointLight) -> Self {
        self.point_lights.push(light);
        self
    }

    /// Directional light that should render into the shadow map this frame
    pub fn shadow_caster(&self) -> Option<&DirectionalLight> {
        self.directional_light.as_ref().filter(|l| l.casts_shadows())
    }
}
