//! Deferred Renderer - a deferred PBR renderer with shadow mapping and
//! reflection-probe image-based lighting
//!
//! The renderer supports two GPU backends behind one [`GraphicsBackend`] trait:
//! - **wgpu**: cross-platform, high-level GPU abstraction
//! - **Vulkan**: direct Vulkan API via ash (native only)
//!
//! A third backend, [`RecordingBackend`], allocates nothing on a GPU and
//! records every command it receives, so the whole pipeline can run in tests.
//!
//! # Features
//! - ID-keyed resource tables for shaders, materials, render objects and textures
//! - Per-material batching into deferred and forward buckets
//! - G-buffer pass, full-screen shading pass and forward pass
//! - Directional light shadow mapping
//! - Reflection probe capture with irradiance, prefiltered specular and BRDF LUT
//! - Tonemapping, color grading and FXAA
//! - Queued sprites and text, editor overlays and selection outline

pub mod async_save;
pub mod backend;
pub mod batching;
pub mod error;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod window;

pub use async_save::{AsyncTextureSave, SaveStatus};
pub use backend::{AnyBackend, GraphicsBackend, RecordingBackend};
pub use batching::{RenderBatches, RenderObjectBatch};
pub use error::{RendererError, RendererResult};
pub use renderer::Renderer;
pub use window::Window;

// Re-export the GPU backends for direct construction
pub use backend::wgpu_backend::WgpuBackend;
#[cfg(not(target_arch = "wasm32"))]
pub use backend::vulkan::VulkanBackend;

use glam::Vec3;
use std::path::PathBuf;

/// Backend selection for the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// wgpu backend - cross-platform, easier to use
    #[default]
    Wgpu,
    /// Vulkan backend via ash - maximum control (native only)
    Vulkan,
}

/// Tonemapping, color grading and anti-aliasing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessSettings {
    pub fxaa_enabled: bool,
    /// Paint detected edges instead of smoothing them
    pub fxaa_show_edges: bool,
    /// Per-channel multiplier applied after tonemapping
    pub brightness: Vec3,
    /// Per-channel offset applied after brightness
    pub offset: Vec3,
    /// 0 is grayscale, 1 leaves colors unchanged
    pub saturation: f32,
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        Self {
            fxaa_enabled: true,
            fxaa_show_edges: false,
            brightness: Vec3::ONE,
            offset: Vec3::ZERO,
            saturation: 1.0,
        }
    }
}

impl PostProcessSettings {
    /// Grading that leaves the tonemapped image untouched, used when
    /// post-processing is switched off
    pub fn neutral() -> Self {
        Self {
            fxaa_enabled: false,
            ..Default::default()
        }
    }
}

/// Renderer configuration
#[derive(Debug, Clone)]
pub struct RendererSettings {
    /// Which backend to use
    pub backend: BackendType,
    /// Enable vsync
    pub vsync: bool,
    /// Width and height of the directional light shadow map
    pub shadow_map_size: u32,
    pub brdf_lut_size: u32,
    /// Shading pass background where no geometry was drawn
    pub clear_color: Vec3,
    pub post_processing_enabled: bool,
    pub post: PostProcessSettings,
    pub show_grid: bool,
    pub show_world_origin: bool,
    /// Where screenshots are written
    pub screenshot_dir: PathBuf,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            backend: BackendType::Wgpu,
            vsync: true,
            shadow_map_size: 2048,
            brdf_lut_size: 512,
            clear_color: Vec3::new(1.0, 0.0, 1.0),
            post_processing_enabled: true,
            post: PostProcessSettings::default(),
            show_grid: true,
            show_world_origin: true,
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }
}

/// Configuration for the demo window
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    pub settings: RendererSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Deferred Renderer".to_string(),
            width: 1280,
            height: 720,
            settings: RendererSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = RendererSettings::default();
        assert_eq!(settings.shadow_map_size, 2048);
        assert_eq!(settings.brdf_lut_size, 512);
        assert_eq!(settings.clear_color, Vec3::new(1.0, 0.0, 1.0));
        assert!(settings.post.fxaa_enabled);
        assert_eq!(settings.backend, BackendType::Wgpu);
    }

    #[test]
    fn test_neutral_post_settings_skip_fxaa() {
        let neutral = PostProcessSettings::neutral();
        assert!(!neutral.fxaa_enabled);
        assert_eq!(neutral.brightness, Vec3::ONE);
        assert_eq!(neutral.saturation, 1.0);
    }
}
