//! Deferred rendering pipeline
//!
//! Each frame runs these passes in order:
//! 1. Shadow pass - depth-only render of deferred geometry from the light
//! 2. G-buffer pass - deferred geometry into three float targets
//! 3. Shading pass - full-screen lighting of the G-buffer
//! 4. Forward pass - skybox, translucent batches, debug lines, world-space
//!    sprites and text
//! 5. Post-processing - tonemap and color grade, then optional FXAA
//! 6. Editor and overlay passes - gizmos, selection outline, screen-space
//!    sprites and text
//!
//! Reflection probe capture reuses the G-buffer and shading stages against
//! cube faces, see [`reflection_probe`].

pub mod bindings;
pub mod buffers;
pub mod cache;
pub mod draw;
pub mod forward_pass;
pub mod gbuffer_pass;
pub mod overlay;
pub mod postprocess;
pub mod reflection_probe;
pub mod shading_pass;
pub mod shadow_pass;
pub mod sprites;
pub mod targets;
pub mod text;
pub mod uniforms;

pub use bindings::{BindingLayouts, FallbackTextures, IblSources, MaterialBindings, Samplers};
pub use buffers::{DynamicVertexBuffer, Geometry, StaticMesh, StreamedGeometry, UniformPool};
pub use cache::{PipelineCache, PipelineKey, TargetFormats};
pub use draw::DrawCallInfo;
pub use forward_pass::{ForwardPass, StreamedDraw};
pub use gbuffer_pass::GBufferPass;
pub use overlay::{EditorPass, OverlayPass};
pub use postprocess::PostProcessPass;
pub use shading_pass::ShadingPass;
pub use reflection_probe::{CaptureContext, CaptureLighting};
pub use shadow_pass::{ShadowPass, ShadowPassState};
pub use sprites::{Anchor, SpriteQuadDrawInfo};
pub use targets::FrameTargets;
pub use text::{FontAtlas, GlyphMetrics, QueuedString};
pub use uniforms::{MaterialUniforms, ObjectUniforms, ViewUniforms};

use crate::backend::traits::*;
use crate::batching::RenderBatches;
use crate::resources::{Mesh, ResourceTables, TextureID};
use crate::PostProcessSettings;

/// GPU state owned by the renderer on top of the resource tables
pub struct GpuResources {
    pub layouts: BindingLayouts,
    pub samplers: Samplers,
    pub pipelines: PipelineCache,
    pub view_uniforms: UniformPool,
    pub object_uniforms: UniformPool,
    pub material_bindings: MaterialBindings,
    pub fallbacks: FallbackTextures,
    pub targets: FrameTargets,
    pub fullscreen_triangle: StaticMesh,
    pub sprite_quad: StaticMesh,
    pub unit_cube: StaticMesh,
    /// Generated the first time a material needs it
    pub brdf_lut: Option<TextureID>,
    pub ibl: IblSources,
    pub post: PostProcessSettings,
}

impl GpuResources {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        tables: &mut ResourceTables,
        width: u32,
        height: u32,
        shadow_map_size: u32,
        post: PostProcessSettings,
    ) -> BackendResult<Self> {
        let layouts = BindingLayouts::new(backend)?;
        let samplers = Samplers::new(backend)?;
        let view_uniforms = UniformPool::new::<ViewUniforms>("View uniforms", layouts.view);
        let object_uniforms = UniformPool::new::<ObjectUniforms>("Object uniforms", layouts.object);
        let fallbacks = FallbackTextures::create(backend, &mut tables.textures)?;
        let targets = FrameTargets::create(backend, &mut tables.textures, width, height, shadow_map_size)?;

        Ok(Self {
            layouts,
            samplers,
            pipelines: PipelineCache::new(),
            view_uniforms,
            object_uniforms,
            material_bindings: MaterialBindings::default(),
            fallbacks,
            targets,
            fullscreen_triangle: StaticMesh::upload(backend, &Mesh::fullscreen_triangle())?,
            sprite_quad: StaticMesh::upload(backend, &Mesh::quad())?,
            unit_cube: StaticMesh::upload(backend, &Mesh::skybox())?,
            brdf_lut: None,
            ibl: IblSources::default(),
            post,
        })
    }

    /// Recycle per-draw uniform buffers. Call after beginning a submission.
    pub fn begin_submission(&mut self) {
        self.view_uniforms.reset();
        self.object_uniforms.reset();
    }

    /// Upload view constants for one pass (or one cube face)
    pub fn view_bind_group<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        uniforms: &ViewUniforms,
    ) -> Option<BindGroupHandle> {
        self.view_uniforms.acquire(backend, uniforms)
    }

    pub fn destroy<B: GraphicsBackend>(mut self, backend: &mut B, tables: &mut ResourceTables) {
        self.pipelines.clear(backend);
        self.material_bindings.invalidate_all(backend);
        self.view_uniforms.destroy(backend);
        self.object_uniforms.destroy(backend);
        self.samplers.destroy(backend);
        self.targets.destroy(backend, &mut tables.textures);
        self.fullscreen_triangle.destroy(backend);
        self.sprite_quad.destroy(backend);
        self.unit_cube.destroy(backend);
    }
}

/// What a pass records with: the backend, the GPU state and read-only views
/// of the resource tables and current batches
pub struct PassContext<'a, B: GraphicsBackend> {
    pub backend: &'a mut B,
    pub gpu: &'a mut GpuResources,
    pub tables: &'a ResourceTables,
    pub batches: &'a RenderBatches,
}

impl<'a, B: GraphicsBackend> PassContext<'a, B> {
    pub fn new(
        backend: &'a mut B,
        gpu: &'a mut GpuResources,
        tables: &'a ResourceTables,
        batches: &'a RenderBatches,
    ) -> Self {
        Self {
            backend,
            gpu,
            tables,
            batches,
        }
    }

    /// Default view of a table texture
    pub fn texture_view(&self, id: TextureID) -> Option<TextureViewHandle> {
        let view = self.tables.textures.get(id).map(|t| t.view);
        if view.is_none() {
            log::error!("Render target {} is missing", id);
        }
        view
    }
}

/// One step of the frame. Passes are plain data built per frame and executed
/// in a fixed order.
pub trait RenderPass {
    fn name(&self) -> &'static str;

    fn execute<B: GraphicsBackend>(&self, ctx: &mut PassContext<'_, B>);
}
