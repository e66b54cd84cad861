//! Renderer orchestration
//!
//! [`Renderer`] owns the resource tables and GPU state and drives every
//! pass in a fixed order each frame. It is generic over the backend, so the
//! same ordering logic runs against wgpu, Vulkan or the recording backend.

use crate::async_save::{AsyncTextureSave, SaveStatus};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::batching::RenderBatches;
use crate::error::{RendererError, RendererResult};
use crate::pipeline::reflection_probe::create_probe_targets;
use crate::pipeline::text::{
    screen_space_attributes, screen_space_vertices, world_space_attributes, world_space_vertices,
};
use crate::pipeline::{
    Anchor, CaptureContext, CaptureLighting, DynamicVertexBuffer, EditorPass, FontAtlas, ForwardPass,
    GBufferPass, GpuResources, OverlayPass, PassContext, PostProcessPass, QueuedString, RenderPass,
    ShadingPass, ShadowPass, ShadowPassState, SpriteQuadDrawInfo, StreamedDraw, StreamedGeometry,
    ViewUniforms,
};
use crate::resources::{
    builtin_shaders, GpuTexture, Material, MaterialCreateInfo, MaterialID, Mesh, RenderID, RenderObject,
    RenderObjectCreateInfo, ResourceTables, SamplerFlags, Shader, ShaderID, TextureData, TextureID,
    TextureSlot, VertexAttributes, VertexBufferDataCreateInfo,
};
use crate::scene::{FrameContext, MAX_POINT_LIGHTS};
use crate::{PostProcessSettings, RendererSettings};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

/// Outline color of the selected object
const SELECTION_COLOR: Vec4 = Vec4::new(1.0, 0.55, 0.1, 1.0);

const GRID_LINES: u32 = 100;
const GRID_SPACING: f32 = 1.0;
/// Camera height above the ground at which the grid has faded out
const GRID_FADE_HEIGHT: f32 = 350.0;
/// Camera distance from the origin at which the world axes have faded out
const AXES_FADE_DISTANCE: f32 = 300.0;

/// Materials the renderer creates for its own draws
#[derive(Debug, Clone, Copy, Default)]
struct EngineMaterials {
    fallback: MaterialID,
    shadow: MaterialID,
    sprite: MaterialID,
    post_process: MaterialID,
    post_fxaa: MaterialID,
    grid: MaterialID,
    world_origin: MaterialID,
    selection: MaterialID,
    font_ss: MaterialID,
    font_ws: MaterialID,
    debug_lines: MaterialID,
    gbuffer: MaterialID,
    probe_combine: MaterialID,
}

struct LoadedFont {
    atlas: FontAtlas,
    texture: TextureID,
}

/// Vertex buffers rewritten every frame
struct StreamBuffers {
    debug_lines: DynamicVertexBuffer,
    text_ss: DynamicVertexBuffer,
    text_ws: DynamicVertexBuffer,
}

impl StreamBuffers {
    fn new() -> Self {
        Self {
            debug_lines: DynamicVertexBuffer::new("Debug lines"),
            text_ss: DynamicVertexBuffer::new("Screen-space text"),
            text_ws: DynamicVertexBuffer::new("World-space text"),
        }
    }

    fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.debug_lines.destroy(backend);
        self.text_ss.destroy(backend);
        self.text_ws.destroy(backend);
    }
}

/// Deferred renderer over any [`GraphicsBackend`]
pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    settings: RendererSettings,
    tables: ResourceTables,
    gpu: GpuResources,
    batches: RenderBatches,
    batches_dirty: bool,
    engine: EngineMaterials,

    grid: Option<RenderID>,
    world_origin: Option<RenderID>,
    skybox: Option<RenderID>,
    selected: Option<RenderID>,

    sprites: Vec<SpriteQuadDrawInfo>,
    strings_ss: Vec<QueuedString>,
    strings_ws: Vec<QueuedString>,
    font: Option<LoadedFont>,
    streams: StreamBuffers,

    shadow_state: ShadowPassState,
    frames_rendered: u64,
    initial_capture_done: bool,
    recapture_requested: bool,
    capture_in_progress: bool,

    screenshot_requested: bool,
    screenshot: Option<AsyncTextureSave>,
    warned_point_lights: bool,
    warned_missing_font: bool,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Load the built-in shaders and create the frame targets and engine
    /// materials
    pub fn new(mut backend: B, settings: RendererSettings) -> RendererResult<Self> {
        let mut tables = ResourceTables::new();
        for descriptor in builtin_shaders() {
            tables.shaders.insert_at_lowest_free(Shader { descriptor });
        }

        let (width, height) = backend.surface_size();
        let post = effective_post(&settings);
        let gpu = GpuResources::new(
            &mut backend,
            &mut tables,
            width,
            height,
            settings.shadow_map_size,
            post,
        )?;

        let mut renderer = Self {
            backend,
            settings,
            tables,
            gpu,
            batches: RenderBatches::default(),
            batches_dirty: true,
            engine: EngineMaterials::default(),
            grid: None,
            world_origin: None,
            skybox: None,
            selected: None,
            sprites: Vec::new(),
            strings_ss: Vec::new(),
            strings_ws: Vec::new(),
            font: None,
            streams: StreamBuffers::new(),
            shadow_state: ShadowPassState::Disabled,
            frames_rendered: 0,
            initial_capture_done: false,
            recapture_requested: false,
            capture_in_progress: false,
            screenshot_requested: false,
            screenshot: None,
            warned_point_lights: false,
            warned_missing_font: false,
        };
        renderer.create_engine_materials()?;
        renderer.create_editor_objects();

        log::info!(
            "Renderer initialized at {}x{} with {} shaders",
            width,
            height,
            renderer.tables.shaders.len()
        );
        Ok(renderer)
    }

    fn create_engine_materials(&mut self) -> RendererResult<()> {
        let targets = self.gpu.targets.clone();

        // material 0 stands in for invalid material references
        self.engine.fallback = self.initialize_material(
            &MaterialCreateInfo::engine("Fallback", "pbr").with_albedo(Vec3::new(1.0, 0.0, 1.0)),
        )?;
        self.engine.shadow = self.initialize_material(&MaterialCreateInfo::engine("Shadow", "shadow"))?;
        self.engine.sprite = self.initialize_material(&MaterialCreateInfo::engine("Sprite material", "sprite"))?;

        let mut post = MaterialCreateInfo::engine("Post process material", "post_process");
        post.frame_buffers = vec![targets.offscreen[0]];
        self.engine.post_process = self.initialize_material(&post)?;

        let mut fxaa = MaterialCreateInfo::engine("Post FXAA material", "post_fxaa");
        fxaa.frame_buffers = vec![targets.offscreen[1]];
        self.engine.post_fxaa = self.initialize_material(&fxaa)?;

        self.engine.grid = self.initialize_material(&MaterialCreateInfo::engine("Grid", "color"))?;
        self.engine.world_origin = self.initialize_material(&MaterialCreateInfo::engine("World origin", "color"))?;
        self.engine.selection = self.initialize_material(
            &MaterialCreateInfo::engine("Selected object", "wireframe").with_color_multiplier(SELECTION_COLOR),
        )?;
        self.engine.font_ss = self.initialize_material(&MaterialCreateInfo::engine("Font SS", "font_ss"))?;
        self.engine.font_ws = self.initialize_material(&MaterialCreateInfo::engine("Font WS", "font_ws"))?;
        self.engine.debug_lines = self.initialize_material(&MaterialCreateInfo::engine("Debug lines", "color"))?;

        let mut gbuffer = MaterialCreateInfo::engine("GBuffer material", "deferred_combine");
        gbuffer.frame_buffers = targets.gbuffer.to_vec();
        gbuffer.enable_irradiance_sampler = true;
        gbuffer.enable_prefiltered_map = true;
        gbuffer.enable_brdf_lut = true;
        self.engine.gbuffer = self.initialize_material(&gbuffer)?;
        self.gpu.ibl.gbuffer_material = self.engine.gbuffer;

        let mut probe_combine = MaterialCreateInfo::engine("Probe combine", "deferred_combine_cubemap");
        probe_combine.enable_irradiance_sampler = true;
        probe_combine.enable_prefiltered_map = true;
        probe_combine.enable_brdf_lut = true;
        self.engine.probe_combine = self.initialize_material(&probe_combine)?;

        Ok(())
    }

    fn create_editor_objects(&mut self) {
        let grid_mesh = Mesh::grid(GRID_LINES, GRID_SPACING, Vec4::new(0.5, 0.5, 0.5, 1.0));
        let mut grid = RenderObjectCreateInfo::new("Grid", self.engine.grid, grid_mesh.vertex_data);
        grid.topology = grid_mesh.topology;
        grid.editor_object = true;
        grid.cull_face = CullMode::None;
        grid.visible = self.settings.show_grid;
        self.grid = Some(self.initialize_render_object(grid));

        let axes_mesh = Mesh::world_axes(2.0);
        let mut axes = RenderObjectCreateInfo::new("World origin", self.engine.world_origin, axes_mesh.vertex_data);
        axes.topology = axes_mesh.topology;
        axes.editor_object = true;
        axes.cull_face = CullMode::None;
        axes.depth_test_func = CompareFunction::Always;
        axes.depth_write = false;
        axes.visible = self.settings.show_world_origin;
        self.world_origin = Some(self.initialize_render_object(axes));
    }

    /// Create a material. Fails only when its shader is not loaded.
    pub fn initialize_material(&mut self, info: &MaterialCreateInfo) -> RendererResult<MaterialID> {
        let Some(shader_id) = self.tables.shader_id(&info.shader_name) else {
            log::warn!("Material {} uses unknown shader {}", info.name, info.shader_name);
            return Err(RendererError::UnknownShader(info.shader_name.clone()));
        };

        let mut material = Material::from_create_info(info, shader_id);
        if material.generate_reflection_probe_maps {
            if let Err(e) = create_probe_targets(&mut self.backend, &mut self.tables.textures, &mut material) {
                log::error!("Reflection probe targets for {} failed: {}", material.name, e);
            }
        }
        let needs_brdf_lut = material.samplers.contains(SamplerFlags::BRDF_LUT)
            && self
                .tables
                .shaders
                .get(shader_id)
                .is_some_and(|s| s.descriptor.needs_brdf_lut);
        let generate_hdr_cubemap = material.generate_hdr_cubemap;

        let id = self.tables.materials.insert_at_lowest_free(material);
        log::debug!("Created material {} ({}) with shader {}", info.name, id, info.shader_name);

        if generate_hdr_cubemap {
            self.generate_hdr_maps(id);
        }
        if needs_brdf_lut {
            self.ensure_brdf_lut();
        }
        Ok(id)
    }

    /// Convert an HDR sky into a cubemap and derive its IBL maps
    fn generate_hdr_maps(&mut self, material: MaterialID) {
        let (irradiance, prefilter) = match self.tables.materials.get(material) {
            Some(m) => (m.generate_irradiance_sampler, m.generate_prefiltered_map),
            None => return,
        };

        self.backend.begin_commands();
        self.gpu.begin_submission();
        {
            let mut ctx = CaptureContext::new(&mut self.backend, &mut self.gpu, &mut self.tables, &self.batches);
            if ctx.equirectangular_to_cube(material).is_some() {
                if irradiance {
                    ctx.convolve_irradiance(material);
                }
                if prefilter {
                    ctx.prefilter(material);
                }
            }
        }
        if let Err(e) = self.backend.submit_commands() {
            log::error!("HDR cubemap generation failed to submit: {}", e);
        }
        self.gpu.material_bindings.invalidate(&mut self.backend, self.engine.gbuffer);
    }

    /// Render the BRDF lookup table the first time a material needs it
    fn ensure_brdf_lut(&mut self) {
        if self.gpu.brdf_lut.is_some() {
            return;
        }
        self.backend.begin_commands();
        self.gpu.begin_submission();
        let lut = CaptureContext::new(&mut self.backend, &mut self.gpu, &mut self.tables, &self.batches)
            .generate_brdf_lut(self.settings.brdf_lut_size);
        if let Err(e) = self.backend.submit_commands() {
            log::error!("BRDF LUT generation failed to submit: {}", e);
        }
        self.gpu.brdf_lut = lut;
        // bind groups built before now sampled the fallback
        self.gpu.material_bindings.invalidate_all(&mut self.backend);
    }

    /// Create a render object. An invalid material falls back to material 0.
    pub fn initialize_render_object(&mut self, mut info: RenderObjectCreateInfo) -> RenderID {
        if info.name.is_empty() {
            log::warn!("Render object created without a name");
        }
        if info.vertex_data.vertex_count() == 0 {
            log::error!("Render object {} has no vertex data and will never be drawn", info.name);
        }
        if !self.tables.materials.contains(info.material_id) {
            log::warn!(
                "Render object {} has invalid material {}, using material {}",
                info.name,
                info.material_id,
                self.engine.fallback
            );
            info.material_id = self.engine.fallback;
        }

        let mut object = RenderObject::from_create_info(info);
        let attributes = self.shader_attributes(object.material_id);
        self.upload_object(&mut object, attributes);
        let is_probe = self
            .tables
            .materials
            .get(object.material_id)
            .is_some_and(|m| m.generate_reflection_probe_maps);

        let id = self.tables.objects.insert_at_lowest_free(object);
        self.batches_dirty = true;
        if is_probe {
            self.recapture_requested = true;
        }
        log::trace!("Created render object {}", id);
        id
    }

    fn shader_attributes(&self, material: MaterialID) -> VertexAttributes {
        self.tables
            .material_shader(material)
            .map_or(VertexAttributes::POSITION, |s| s.descriptor.vertex_attributes)
    }

    fn upload_object(&mut self, object: &mut RenderObject, attributes: VertexAttributes) {
        match object.upload(&mut self.backend, attributes) {
            Ok(missing) if !missing.is_empty() => {
                log::warn!("Render object {} has no data for {:?}; zero-filled", object.name, missing);
            }
            Ok(_) => {}
            Err(e) => log::error!("Vertex upload for {} failed: {}", object.name, e),
        }
    }

    /// Release a render object's buffers and free its ID
    pub fn destroy_render_object(&mut self, id: RenderID) -> bool {
        let Some(mut object) = self.tables.objects.remove(id) else {
            log::warn!("Cannot destroy render object {}: it does not exist", id);
            return false;
        };
        object.release(&mut self.backend);
        self.batches_dirty = true;

        if self.selected == Some(id) {
            self.selected = None;
        }
        if self.skybox == Some(id) {
            self.skybox = None;
            self.gpu.ibl.skybox_material = None;
            self.gpu.material_bindings.invalidate(&mut self.backend, self.engine.gbuffer);
        }
        if self.grid == Some(id) {
            self.grid = None;
        }
        if self.world_origin == Some(id) {
            self.world_origin = None;
        }
        true
    }

    /// Destroy user materials, and engine materials too when asked
    pub fn clear_materials(&mut self, destroy_engine_materials: bool) {
        let removed = self
            .tables
            .materials
            .drain_where(|m| destroy_engine_materials || !m.engine_material);
        self.release_materials(&removed);
        log::info!("Cleared {} materials", removed.len());
    }

    /// Destroy one user material. Objects using it fall back to material 0.
    pub fn remove_material(&mut self, id: MaterialID) -> bool {
        match self.tables.materials.get(id) {
            Some(material) if material.engine_material => {
                log::warn!("Cannot remove engine material {} ({})", material.name, id);
                return false;
            }
            Some(_) => {}
            None => {
                log::warn!("Cannot remove material {}: it does not exist", id);
                return false;
            }
        }
        let Some(material) = self.tables.materials.remove(id) else {
            return false;
        };
        log::debug!("Removed material {} ({})", material.name, id);
        self.release_materials(&[(id, material)]);
        true
    }

    /// Drop everything that still points at materials already taken out of
    /// the table, then free their generated maps
    fn release_materials(&mut self, removed: &[(MaterialID, Material)]) {
        if removed.is_empty() {
            return;
        }
        let is_removed = |id: MaterialID| removed.iter().any(|(r, _)| *r == id);

        let mut stale: Vec<MaterialID> = removed.iter().map(|(id, _)| *id).collect();
        for (id, material) in self.tables.materials.iter_mut() {
            let mut changed = false;
            if material.irradiance_source.is_some_and(|s| is_removed(s)) {
                material.irradiance_source = None;
                changed = true;
            }
            if material.prefilter_source.is_some_and(|s| is_removed(s)) {
                material.prefilter_source = None;
                changed = true;
            }
            if changed {
                stale.push(id);
            }
        }
        if self.gpu.ibl.active_probe.is_some_and(|p| is_removed(p)) {
            self.gpu.ibl.active_probe = None;
            self.recapture_requested = true;
        }
        if self.gpu.ibl.skybox_material.is_some_and(|m| is_removed(m)) {
            self.gpu.ibl.skybox_material = None;
        }
        // the combine group may sample any material's captured maps
        stale.push(self.engine.gbuffer);
        for id in stale {
            self.gpu.material_bindings.invalidate(&mut self.backend, id);
        }

        for (_, material) in removed {
            for texture in material.generated.all() {
                self.gpu.material_bindings.invalidate_override(&mut self.backend, texture);
                if let Some(texture) = self.tables.textures.remove(texture) {
                    texture.destroy(&mut self.backend);
                }
            }
        }

        self.remap_orphaned_objects();
        self.batches_dirty = true;
    }

    /// Point objects whose material is gone at the fallback material
    fn remap_orphaned_objects(&mut self) {
        let orphans: Vec<RenderID> = self
            .tables
            .objects
            .iter()
            .filter(|(_, o)| !self.tables.materials.contains(o.material_id))
            .map(|(id, _)| id)
            .collect();
        if orphans.is_empty() {
            return;
        }
        let fallback = self.engine.fallback;
        if !self.tables.materials.contains(fallback) {
            log::warn!("{} render objects are left without a material", orphans.len());
            return;
        }

        let attributes = self.shader_attributes(fallback);
        for id in orphans {
            let Some(mut object) = self.tables.objects.remove(id) else {
                continue;
            };
            log::warn!(
                "Render object {} lost material {}, using material {}",
                object.name,
                object.material_id,
                fallback
            );
            object.material_id = fallback;
            if object.vertex_attributes != attributes {
                self.upload_object(&mut object, attributes);
            }
            self.tables.objects.insert_at(id, object);
        }
    }

    /// Upload decoded pixels into the texture table
    pub fn initialize_texture(&mut self, data: &TextureData) -> RendererResult<TextureID> {
        let texture = GpuTexture::upload(&mut self.backend, data)?;
        let id = self.tables.textures.insert_at_lowest_free(texture);
        log::debug!("Uploaded texture {} ({}x{}) as {}", data.name, data.width, data.height, id);
        Ok(id)
    }

    pub fn get_material(&self, id: MaterialID) -> Option<&Material> {
        let material = self.tables.materials.get(id);
        if material.is_none() {
            log::warn!("No material with ID {}", id);
        }
        material
    }

    pub fn get_render_object(&self, id: RenderID) -> Option<&RenderObject> {
        let object = self.tables.objects.get(id);
        if object.is_none() {
            log::warn!("No render object with ID {}", id);
        }
        object
    }

    pub fn get_shader(&self, id: ShaderID) -> Option<&Shader> {
        let shader = self.tables.shaders.get(id);
        if shader.is_none() {
            log::warn!("No shader with ID {}", id);
        }
        shader
    }

    pub fn get_shader_id(&self, name: &str) -> Option<ShaderID> {
        self.tables.shader_id(name)
    }

    pub fn get_material_id(&self, name: &str) -> Option<MaterialID> {
        self.tables.material_id(name)
    }

    /// Names of every non-engine material, in ID order
    pub fn valid_material_names(&self) -> Vec<String> {
        self.tables
            .materials
            .iter()
            .filter(|(_, m)| !m.engine_material)
            .map(|(_, m)| m.name.clone())
            .collect()
    }

    pub fn render_ids(&self) -> Vec<RenderID> {
        self.tables.objects.ids()
    }

    /// Use `id` as the skybox. Its material's cube maps light the scene
    /// until a reflection probe has been captured.
    pub fn set_skybox_mesh(&mut self, id: RenderID) -> bool {
        let Some(object) = self.tables.objects.get(id) else {
            log::warn!("Cannot use render object {} as skybox: it does not exist", id);
            return false;
        };
        self.skybox = Some(id);
        self.gpu.ibl.skybox_material = Some(object.material_id);
        self.gpu.material_bindings.invalidate(&mut self.backend, self.engine.gbuffer);
        // captures skipped for want of a skybox can run now
        self.recapture_requested = true;
        true
    }

    pub fn set_render_object_material_id(&mut self, id: RenderID, material: MaterialID) -> bool {
        if !self.tables.materials.contains(material) {
            log::warn!("Cannot assign invalid material {} to render object {}", material, id);
            return false;
        }
        let attributes = self.shader_attributes(material);
        let captures_reflections = self
            .tables
            .materials
            .get(material)
            .is_some_and(|m| m.generate_reflection_probe_maps);
        let Some(mut object) = self.tables.objects.remove(id) else {
            log::warn!("No render object with ID {}", id);
            return false;
        };
        object.material_id = material;
        if object.vertex_attributes != attributes {
            self.upload_object(&mut object, attributes);
        }
        self.tables.objects.insert_at(id, object);
        if self.skybox == Some(id) {
            self.gpu.ibl.skybox_material = Some(material);
            self.gpu.material_bindings.invalidate(&mut self.backend, self.engine.gbuffer);
        }
        if captures_reflections {
            self.recapture_requested = true;
        }
        self.batches_dirty = true;
        true
    }

    /// Replace an object's vertex arrays and upload them for its material
    pub fn update_vertex_data(&mut self, id: RenderID, vertex_data: VertexBufferDataCreateInfo) -> bool {
        let Some(mut object) = self.tables.objects.remove(id) else {
            log::warn!("Cannot update vertices of render object {}: it does not exist", id);
            return false;
        };
        if vertex_data.vertex_count() == 0 {
            log::error!("Render object {} was given no vertex data and will never be drawn", object.name);
        }
        object.vertex_source = vertex_data;
        let attributes = self.shader_attributes(object.material_id);
        self.upload_object(&mut object, attributes);
        self.tables.objects.insert_at(id, object);
        self.batches_dirty = true;
        true
    }

    /// Change how an object's vertices are assembled. A topology its vertex
    /// count cannot form falls back to a triangle list.
    pub fn set_topology_mode(&mut self, id: RenderID, topology: PrimitiveTopology) -> bool {
        let Some(object) = self.tables.objects.get_mut(id) else {
            log::warn!("No render object with ID {}", id);
            return false;
        };
        let count = if object.index_count() > 0 {
            object.index_count()
        } else {
            object.vertex_count
        };
        object.topology = if fits_topology(count, topology) {
            topology
        } else {
            log::warn!(
                "{} elements of {} do not form a {:?}; using a triangle list",
                count,
                object.name,
                topology
            );
            PrimitiveTopology::TriangleList
        };
        true
    }

    pub fn set_render_object_visible(&mut self, id: RenderID, visible: bool) {
        match self.tables.objects.get_mut(id) {
            Some(object) if object.visible != visible => {
                object.visible = visible;
                self.batches_dirty = true;
            }
            Some(_) => {}
            None => log::warn!("No render object with ID {}", id),
        }
    }

    pub fn set_render_object_transform(&mut self, id: RenderID, transform: Mat4) {
        match self.tables.objects.get_mut(id) {
            Some(object) => object.transform = transform,
            None => log::warn!("No render object with ID {}", id),
        }
    }

    pub fn set_selected_object(&mut self, id: Option<RenderID>) {
        self.selected = id.filter(|id| {
            let exists = self.tables.objects.contains(*id);
            if !exists {
                log::warn!("Cannot select render object {}: it does not exist", id);
            }
            exists
        });
    }

    pub fn set_clear_color(&mut self, color: Vec3) {
        self.settings.clear_color = color;
    }

    pub fn set_post_process_settings(&mut self, post: PostProcessSettings) {
        self.settings.post = post;
        self.apply_post_settings();
    }

    pub fn set_post_processing_enabled(&mut self, enabled: bool) {
        self.settings.post_processing_enabled = enabled;
        self.apply_post_settings();
    }

    fn apply_post_settings(&mut self) {
        self.gpu.post = effective_post(&self.settings);
        self.gpu.material_bindings.invalidate(&mut self.backend, self.engine.post_process);
        self.gpu.material_bindings.invalidate(&mut self.backend, self.engine.post_fxaa);
    }

    pub fn draw_sprite(&mut self, sprite: SpriteQuadDrawInfo) {
        self.sprites.push(sprite);
    }

    /// Queue a string at a normalized [-1, 1] screen position
    pub fn draw_string_ss(&mut self, text: &str, color: Vec4, anchor: Anchor, position: Vec2, spacing: f32) {
        self.strings_ss.push(QueuedString {
            text: text.to_string(),
            color,
            position: position.extend(0.0),
            rotation: Quat::IDENTITY,
            anchor,
            spacing,
        });
    }

    pub fn draw_string_ws(&mut self, text: &str, color: Vec4, position: Vec3, rotation: Quat, spacing: f32) {
        self.strings_ws.push(QueuedString {
            text: text.to_string(),
            color,
            position,
            rotation,
            anchor: Anchor::BottomLeft,
            spacing,
        });
    }

    /// Upload a glyph atlas and bind it to both font materials
    pub fn set_font(&mut self, atlas: FontAtlas) -> RendererResult<()> {
        let data = TextureData::from_rgba8_linear(&atlas.name, atlas.width, atlas.height, atlas.pixels.clone());
        let texture = self.initialize_texture(&data)?;

        if let Some(old) = self.font.take() {
            if let Some(old_texture) = self.tables.textures.remove(old.texture) {
                old_texture.destroy(&mut self.backend);
            }
        }
        for material in [self.engine.font_ss, self.engine.font_ws] {
            if let Some(entry) = self.tables.materials.get_mut(material) {
                entry.textures.insert(TextureSlot::Albedo, texture);
                entry.samplers |= SamplerFlags::ALBEDO;
            }
            self.gpu.material_bindings.invalidate(&mut self.backend, material);
        }

        log::info!("Loaded font {} ({} glyphs)", atlas.name, atlas.glyphs.len());
        self.font = Some(LoadedFont { atlas, texture });
        self.warned_missing_font = false;
        Ok(())
    }

    /// Resize the swapchain and every screen-sized target. Texture IDs are
    /// kept, so materials referencing them need no update.
    pub fn on_window_size_changed(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return;
        }
        self.backend.resize(width, height);
        let (width, height) = self.backend.surface_size();
        self.resize_targets(width, height);
    }

    fn resize_targets(&mut self, width: u32, height: u32) {
        if let Err(e) = self
            .gpu
            .targets
            .resize(&mut self.backend, &mut self.tables.textures, width, height)
        {
            log::error!("Resizing frame targets to {}x{} failed: {}", width, height, e);
        }

        let screen_sized = self.gpu.targets.screen_sized();
        let stale: Vec<MaterialID> = self
            .tables
            .materials
            .iter()
            .filter(|(_, m)| screen_sized.iter().any(|t| m.uses_texture(*t)))
            .map(|(id, _)| id)
            .collect();
        for material in stale {
            self.gpu.material_bindings.invalidate(&mut self.backend, material);
        }
    }

    /// Recreate every shader and drop all cached pipelines
    pub fn reload_shaders(&mut self) {
        self.gpu.pipelines.clear(&mut self.backend);
        self.tables.shaders.drain_where(|_| true);
        for (index, descriptor) in builtin_shaders().into_iter().enumerate() {
            self.tables.shaders.insert_at(ShaderID(index as u32), Shader { descriptor });
        }
        self.gpu.material_bindings.invalidate_all(&mut self.backend);
        log::info!("Reloaded {} shaders", self.tables.shaders.len());
    }

    /// Capture every reflection probe again on the next update
    pub fn recapture_reflection_probe(&mut self) {
        self.recapture_requested = true;
    }

    /// Ask for the next frame to be written to the screenshot directory
    pub fn request_screenshot(&mut self) -> RendererResult<()> {
        self.poll_screenshot();
        if self.screenshot.as_mut().is_some_and(|s| !s.is_finished()) {
            log::warn!("A screenshot is still being saved; request ignored");
            return Err(RendererError::ScreenshotInFlight);
        }
        self.screenshot_requested = true;
        Ok(())
    }

    /// Per-frame bookkeeping ahead of [`Renderer::render`]
    pub fn update(&mut self, frame: &FrameContext) {
        self.poll_screenshot();

        if frame.point_lights.len() > MAX_POINT_LIGHTS && !self.warned_point_lights {
            log::warn!(
                "{} point lights supplied; only the first {} are used",
                frame.point_lights.len(),
                MAX_POINT_LIGHTS
            );
            self.warned_point_lights = true;
        }

        self.update_editor_objects(frame.camera.position);

        if !self.initial_capture_done || self.recapture_requested {
            self.initial_capture_done = true;
            self.recapture_requested = false;
            self.capture_reflection_probes(frame);
        }
    }

    fn poll_screenshot(&mut self) {
        let Some(save) = self.screenshot.as_mut() else {
            return;
        };
        match save.poll() {
            SaveStatus::InProgress => {}
            SaveStatus::Saved(path) => {
                log::info!("Saved screenshot to {}", path.display());
                self.screenshot = None;
            }
            SaveStatus::Failed(reason) => {
                log::error!("Saving screenshot to {} failed: {}", save.path().display(), reason);
                self.screenshot = None;
            }
        }
    }

    /// Fade the grid out with camera height and the axes with distance
    fn update_editor_objects(&mut self, camera_position: Vec3) {
        let grid_alpha = 0.8 - (camera_position.y / GRID_FADE_HEIGHT).clamp(-1.0, 1.0);
        let axes_alpha = 1.0 - (camera_position.length() / AXES_FADE_DISTANCE).clamp(-1.0, 1.0);
        for (material, alpha) in [(self.engine.grid, grid_alpha), (self.engine.world_origin, axes_alpha)] {
            if let Some(material) = self.tables.materials.get_mut(material) {
                material.color_multiplier = Vec3::ONE.extend(alpha.clamp(0.0, 1.0));
            }
        }

        for (object, visible) in [
            (self.grid, self.settings.show_grid),
            (self.world_origin, self.settings.show_world_origin),
        ] {
            if let Some(id) = object {
                self.set_render_object_visible(id, visible);
            }
        }
    }

    /// Probe materials with the world position of the first object using
    /// each, in material order
    fn probes(&self) -> Vec<(MaterialID, Vec3)> {
        self.tables
            .materials
            .iter()
            .filter(|(_, m)| m.generate_reflection_probe_maps)
            .map(|(id, _)| {
                let position = self
                    .tables
                    .objects
                    .iter()
                    .find(|(_, o)| o.material_id == id)
                    .map_or(Vec3::ZERO, |(_, o)| o.transform.w_axis.truncate());
                (id, position)
            })
            .collect()
    }

    fn capture_reflection_probes(&mut self, frame: &FrameContext) {
        let probes = self.probes();
        if probes.is_empty() {
            return;
        }
        if self.capture_in_progress {
            log::warn!("Reflection probe capture already running");
            return;
        }
        if self.skybox.is_none() {
            log::error!("Reflection probe capture needs a skybox mesh; none is set");
            return;
        }

        self.capture_in_progress = true;
        self.rebatch_if_dirty();

        let lighting = CaptureLighting {
            directional: frame.directional_light,
            point_lights: frame.point_lights.iter().take(MAX_POINT_LIGHTS).copied().collect(),
            clear_color: self.settings.clear_color,
            skybox: self.skybox,
        };
        let (combine, sprite) = (self.engine.probe_combine, self.engine.sprite);

        self.backend.begin_commands();
        self.gpu.begin_submission();
        let mut captured = None;
        {
            let mut ctx = CaptureContext::new(&mut self.backend, &mut self.gpu, &mut self.tables, &self.batches);
            for (probe, position) in &probes {
                if !ctx.capture_scene(*probe, *position, combine, sprite, &lighting) {
                    continue;
                }
                ctx.convolve_irradiance(*probe);
                ctx.prefilter(*probe);
                captured = Some(*probe);
            }
        }
        if let Err(e) = self.backend.submit_commands() {
            log::error!("Reflection probe capture failed to submit: {}", e);
        }

        if let Some(probe) = captured {
            self.gpu.ibl.active_probe = Some(probe);
            self.gpu.material_bindings.invalidate(&mut self.backend, self.engine.gbuffer);
            log::info!("Captured {} reflection probe(s)", probes.len());
        }
        self.capture_in_progress = false;
    }

    fn rebatch_if_dirty(&mut self) {
        if !self.batches_dirty {
            return;
        }
        self.batches = RenderBatches::build(&self.tables);
        self.batches_dirty = false;

        if cfg!(debug_assertions) {
            let expected = RenderBatches::expected_object_count(&self.tables);
            let batched = self.batches.object_count();
            if expected != batched {
                log::error!("Batching lost track of objects: {} batched, {} expected", batched, expected);
            }
        }
    }

    fn stream_debug_lines(&mut self, frame: &FrameContext) -> Option<StreamedDraw> {
        if frame.debug_lines.is_empty() {
            return None;
        }
        let mut vertices = Vec::with_capacity(frame.debug_lines.len() * 14);
        for line in &frame.debug_lines {
            for point in [line.start, line.end] {
                vertices.extend_from_slice(&point.to_array());
                vertices.extend_from_slice(&line.color.to_array());
            }
        }
        let geometry = StreamedGeometry::write(
            &mut self.backend,
            &mut self.streams.debug_lines,
            VertexAttributes::POSITION | VertexAttributes::COLOR,
            PrimitiveTopology::LineList,
            &vertices,
        )?;
        Some(StreamedDraw {
            geometry,
            material: self.engine.debug_lines,
        })
    }

    /// Glyph quads for the queued strings: (screen space, world space)
    fn stream_text(&mut self, width: u32, height: u32) -> (Option<StreamedDraw>, Option<StreamedDraw>) {
        if self.strings_ss.is_empty() && self.strings_ws.is_empty() {
            return (None, None);
        }
        let Some(font) = self.font.as_ref() else {
            if !self.warned_missing_font {
                log::warn!("Strings were queued but no font is loaded; dropping them");
                self.warned_missing_font = true;
            }
            return (None, None);
        };

        let ss_vertices = screen_space_vertices(&font.atlas, &self.strings_ss, width, height);
        let ws_vertices = world_space_vertices(&font.atlas, &self.strings_ws);

        let screen = StreamedGeometry::write(
            &mut self.backend,
            &mut self.streams.text_ss,
            screen_space_attributes(),
            PrimitiveTopology::TriangleList,
            &ss_vertices,
        )
        .map(|geometry| StreamedDraw {
            geometry,
            material: self.engine.font_ss,
        });
        let world = StreamedGeometry::write(
            &mut self.backend,
            &mut self.streams.text_ws,
            world_space_attributes(),
            PrimitiveTopology::TriangleList,
            &ws_vertices,
        )
        .map(|geometry| StreamedDraw {
            geometry,
            material: self.engine.font_ws,
        });
        (screen, world)
    }

    /// Record and present one frame
    pub fn render(&mut self, frame: &FrameContext) {
        let swapchain = match self.backend.begin_frame() {
            Ok(swapchain) => swapchain,
            Err(e) => {
                log::error!("Failed to begin frame: {}", e);
                self.clear_queued_draws();
                return;
            }
        };
        if (swapchain.width, swapchain.height) != (self.gpu.targets.width, self.gpu.targets.height) {
            self.resize_targets(swapchain.width, swapchain.height);
        }
        self.gpu.begin_submission();
        self.rebatch_if_dirty();

        let (width, height) = (self.gpu.targets.width, self.gpu.targets.height);
        let light_view_projection = frame.shadow_caster().map(|light| light.view_projection());
        let camera = ViewUniforms::for_camera(&frame.camera)
            .with_lights(frame.directional_light.as_ref(), &frame.point_lights)
            .with_shadow(light_view_projection)
            .with_time(frame.time)
            .with_screen(width, height);

        let debug_lines = self.stream_debug_lines(frame);
        let (text_ss, text_ws) = self.stream_text(width, height);
        let (screen_sprites, world_sprites): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.sprites).into_iter().partition(|s| s.screen_space);

        let views = (
            self.gpu.view_bind_group(&mut self.backend, &camera),
            self.gpu
                .view_bind_group(&mut self.backend, &ViewUniforms::screen_space(width, height)),
        );
        let (Some(view), Some(screen_view)) = views else {
            log::error!("View uniforms unavailable; skipping frame {}", self.frames_rendered);
            if let Err(e) = self.backend.end_frame() {
                log::error!("Failed to present frame {}: {}", self.frames_rendered, e);
            }
            self.finish_frame();
            return;
        };

        let output_format = self.backend.swapchain_format();
        let post = self.gpu.post;
        let selected = self.selected.filter(|id| self.tables.objects.contains(*id));
        let engine = self.engine;
        let skybox = self.skybox;
        let clear_color = self.settings.clear_color;

        self.shadow_state = match light_view_projection {
            Some(_) => ShadowPassState::Armed,
            None => ShadowPassState::Disabled,
        };

        {
            let mut ctx = PassContext::new(&mut self.backend, &mut self.gpu, &self.tables, &self.batches);

            if let Some(light_view_projection) = light_view_projection {
                ShadowPass {
                    light_view_projection,
                    shadow_material: engine.shadow,
                }
                .execute(&mut ctx);
                self.shadow_state = ShadowPassState::Rendered;
            }

            GBufferPass { view }.execute(&mut ctx);
            ShadingPass {
                view,
                combine_material: engine.gbuffer,
                clear_color,
            }
            .execute(&mut ctx);
            ForwardPass {
                view,
                skybox,
                debug_lines,
                sprites: &world_sprites,
                sprite_material: engine.sprite,
                text: text_ws,
            }
            .execute(&mut ctx);
            PostProcessPass {
                view,
                tonemap_material: engine.post_process,
                fxaa_material: post.fxaa_enabled.then_some(engine.post_fxaa),
                output: swapchain.view,
                output_format,
            }
            .execute(&mut ctx);
            EditorPass {
                view,
                selected,
                selection_material: engine.selection,
                output: swapchain.view,
                output_format,
            }
            .execute(&mut ctx);
            OverlayPass {
                view,
                screen_view,
                sprites: &screen_sprites,
                sprite_material: engine.sprite,
                text: text_ss,
                output: swapchain.view,
                output_format,
            }
            .execute(&mut ctx);
        }

        // the swapchain image is gone once presented, so read it back first
        if self.screenshot_requested {
            self.screenshot_requested = false;
            self.start_screenshot(swapchain.texture, width, height);
        }

        if let Err(e) = self.backend.end_frame() {
            log::error!("Failed to present frame {}: {}", self.frames_rendered, e);
        }
        self.finish_frame();
    }

    fn finish_frame(&mut self) {
        self.frames_rendered += 1;
        self.clear_queued_draws();
    }

    /// Sprites and strings only live for the frame they were queued in
    fn clear_queued_draws(&mut self) {
        self.sprites.clear();
        self.strings_ss.clear();
        self.strings_ws.clear();
    }

    /// Sprites and strings waiting for the next frame: (sprites, strings)
    pub fn queued_draw_count(&self) -> (usize, usize) {
        (self.sprites.len(), self.strings_ss.len() + self.strings_ws.len())
    }

    fn start_screenshot(&mut self, texture: TextureHandle, width: u32, height: u32) {
        if self.screenshot.is_some() {
            log::warn!("A screenshot is still being saved; skipping capture");
            return;
        }
        let pixels = match self.backend.read_texture(texture, width, height) {
            Ok(pixels) => pixels,
            Err(e) => {
                log::error!("Screenshot readback failed: {}", e);
                return;
            }
        };
        let path = self
            .settings
            .screenshot_dir
            .join(format!("screenshot_{:06}.png", self.frames_rendered));
        match AsyncTextureSave::start(pixels, path) {
            Ok(save) => self.screenshot = Some(save),
            Err(e) => log::error!("Could not start saving the screenshot: {}", e),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn tables(&self) -> &ResourceTables {
        &self.tables
    }

    pub fn gpu(&self) -> &GpuResources {
        &self.gpu
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// Batches as of the last rebuild
    pub fn batches(&self) -> &RenderBatches {
        &self.batches
    }

    /// Rebuild the batches now instead of at the next frame
    pub fn rebatch(&mut self) -> &RenderBatches {
        self.batches_dirty = true;
        self.rebatch_if_dirty();
        &self.batches
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn shadow_state(&self) -> ShadowPassState {
        self.shadow_state
    }

    pub fn selected_object(&self) -> Option<RenderID> {
        self.selected
    }

    pub fn skybox(&self) -> Option<RenderID> {
        self.skybox
    }

    /// Material currently lighting the scene through its captured maps
    pub fn active_probe(&self) -> Option<MaterialID> {
        self.gpu.ibl.active_probe
    }

    pub fn is_saving_screenshot(&self) -> bool {
        self.screenshot.is_some()
    }

    /// Tear down every GPU resource and hand the backend back
    pub fn destroy(mut self) -> B {
        if let Some(mut save) = self.screenshot.take() {
            while save.poll() == SaveStatus::InProgress {
                std::thread::yield_now();
            }
        }
        for id in self.tables.objects.ids() {
            if let Some(mut object) = self.tables.objects.remove(id) {
                object.release(&mut self.backend);
            }
        }
        self.streams.destroy(&mut self.backend);
        self.gpu.destroy(&mut self.backend, &mut self.tables);
        for id in self.tables.textures.ids() {
            if let Some(texture) = self.tables.textures.remove(id) {
                texture.destroy(&mut self.backend);
            }
        }
        log::info!("Renderer destroyed after {} frames", self.frames_rendered);
        self.backend
    }
}

/// Grading actually applied: the user's when post-processing is on,
/// otherwise a neutral pass-through without FXAA
fn effective_post(settings: &RendererSettings) -> PostProcessSettings {
    if settings.post_processing_enabled {
        settings.post
    } else {
        PostProcessSettings::neutral()
    }
}

fn fits_topology(count: u32, topology: PrimitiveTopology) -> bool {
    match topology {
        PrimitiveTopology::PointList => count >= 1,
        PrimitiveTopology::LineList => count >= 2 && count % 2 == 0,
        PrimitiveTopology::LineStrip => count >= 2,
        PrimitiveTopology::TriangleList => count >= 3 && count % 3 == 0,
        PrimitiveTopology::TriangleStrip => count >= 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordedCommand, RecordingBackend};
    use crate::scene::{CameraView, DirectionalLight};

    fn renderer() -> Renderer<RecordingBackend> {
        Renderer::new(RecordingBackend::new(320, 240), RendererSettings::default()).unwrap()
    }

    fn frame() -> FrameContext {
        FrameContext::new(CameraView::default(), (320, 240))
    }

    fn triangle(renderer: &mut Renderer<RecordingBackend>, material: MaterialID) -> RenderID {
        let mesh = Mesh::triangle();
        renderer.initialize_render_object(RenderObjectCreateInfo::new("triangle", material, mesh.vertex_data))
    }

    #[test]
    fn test_engine_materials_exist() {
        let renderer = renderer();
        for name in [
            "Shadow",
            "Sprite material",
            "Post process material",
            "Post FXAA material",
            "Grid",
            "World origin",
            "Selected object",
            "Font SS",
            "Font WS",
            "Debug lines",
            "GBuffer material",
        ] {
            assert!(renderer.get_material_id(name).is_some(), "missing {}", name);
        }
        assert!(renderer.valid_material_names().is_empty());
        assert_eq!(renderer.get_material_id("Fallback"), Some(MaterialID(0)));
        assert!(renderer.gpu().brdf_lut.is_some());
    }

    #[test]
    fn test_unknown_shader_is_an_error() {
        let mut renderer = renderer();
        let result = renderer.initialize_material(&MaterialCreateInfo::new("glass", "pbr_glass"));
        assert!(matches!(result, Err(RendererError::UnknownShader(name)) if name == "pbr_glass"));
    }

    #[test]
    fn test_invalid_material_falls_back_to_zero() {
        let mut renderer = renderer();
        let id = triangle(&mut renderer, MaterialID(9999));
        assert_eq!(renderer.get_render_object(id).unwrap().material_id, MaterialID(0));
    }

    #[test]
    fn test_material_reassignment_rebatches() {
        let mut renderer = renderer();
        let pbr = renderer
            .initialize_material(&MaterialCreateInfo::new("pbr", "pbr"))
            .unwrap();
        let color = renderer
            .initialize_material(&MaterialCreateInfo::new("color", "color"))
            .unwrap();
        let id = triangle(&mut renderer, pbr);
        assert!(renderer.rebatch().batch_for(pbr).is_some());

        assert!(renderer.set_render_object_material_id(id, color));
        let batches = renderer.rebatch();
        assert!(batches.batch_for(pbr).is_none());
        assert!(batches.forward.iter().any(|b| b.material_id == color));
        assert!(!renderer.set_render_object_material_id(id, MaterialID(4242)));
    }

    #[test]
    fn test_topology_falls_back_to_triangle_list() {
        let mut renderer = renderer();
        let pbr = renderer
            .initialize_material(&MaterialCreateInfo::new("pbr", "pbr"))
            .unwrap();
        let id = triangle(&mut renderer, pbr);

        renderer.set_topology_mode(id, PrimitiveTopology::LineList);
        assert_eq!(
            renderer.get_render_object(id).unwrap().topology,
            PrimitiveTopology::TriangleList
        );
        renderer.set_topology_mode(id, PrimitiveTopology::LineStrip);
        assert_eq!(renderer.get_render_object(id).unwrap().topology, PrimitiveTopology::LineStrip);
    }

    #[test]
    fn test_frame_pass_order() {
        let mut renderer = renderer();
        let pbr = renderer
            .initialize_material(&MaterialCreateInfo::new("pbr", "pbr"))
            .unwrap();
        triangle(&mut renderer, pbr);

        let frame = frame().with_directional_light(DirectionalLight::default());
        renderer.backend_mut().clear_commands();
        renderer.update(&frame);
        renderer.render(&frame);

        assert_eq!(
            renderer.backend().pass_labels(),
            vec![
                "Shadow Pass",
                "G-Buffer Pass",
                "Shading Pass",
                "Forward Pass",
                "Tonemap",
                "FXAA",
                "Editor Pass",
                "Overlay Pass",
            ]
        );
        assert_eq!(renderer.shadow_state(), ShadowPassState::Rendered);
        assert_eq!(renderer.frames_rendered(), 1);
    }

    #[test]
    fn test_disabled_post_processing_skips_fxaa() {
        let mut renderer = renderer();
        renderer.set_post_processing_enabled(false);
        renderer.render(&frame());
        let labels = renderer.backend().pass_labels();
        assert!(labels.contains(&"Tonemap".to_string()));
        assert!(!labels.contains(&"FXAA".to_string()));
    }

    #[test]
    fn test_queues_clear_after_frame() {
        let mut renderer = renderer();
        renderer.draw_string_ss("hello", Vec4::ONE, Anchor::Center, Vec2::ZERO, 0.0);
        renderer.draw_sprite(SpriteQuadDrawInfo::default());
        renderer.render(&frame());
        assert!(renderer.sprites.is_empty());
        assert!(renderer.strings_ss.is_empty());
        assert!(renderer.warned_missing_font);
    }

    #[test]
    fn test_failed_frame_start_drops_queued_draws() {
        let mut renderer = renderer();
        renderer.draw_sprite(SpriteQuadDrawInfo::default());
        renderer.draw_string_ws("label", Vec4::ONE, Vec3::ZERO, Quat::IDENTITY, 0.0);
        renderer.backend_mut().fail_next_frame();
        renderer.backend_mut().clear_commands();

        renderer.render(&frame());

        assert_eq!(renderer.queued_draw_count(), (0, 0));
        assert_eq!(renderer.frames_rendered(), 0);
        assert!(renderer.backend().commands().is_empty());
    }

    #[test]
    fn test_skipped_frame_still_presents() {
        let mut renderer = renderer();
        renderer.draw_sprite(SpriteQuadDrawInfo::default());
        renderer.backend_mut().limit_buffer_creations(0);
        renderer.backend_mut().clear_commands();

        renderer.render(&frame());

        let commands = renderer.backend().commands();
        assert_eq!(commands.first(), Some(&RecordedCommand::BeginFrame));
        assert_eq!(commands.last(), Some(&RecordedCommand::EndFrame));
        assert!(renderer.backend().passes().is_empty());
        assert_eq!(renderer.backend().frames_presented(), 1);
        assert_eq!(renderer.queued_draw_count(), (0, 0));
    }

    #[test]
    fn test_empty_vertex_data_is_kept_out_of_batches() {
        let mut renderer = renderer();
        let pbr = renderer
            .initialize_material(&MaterialCreateInfo::new("pbr", "pbr"))
            .unwrap();
        let empty = renderer.initialize_render_object(RenderObjectCreateInfo::new(
            "empty",
            pbr,
            VertexBufferDataCreateInfo::default(),
        ));
        assert!(!renderer.get_render_object(empty).unwrap().has_vertex_data());
        assert!(renderer.rebatch().batch_for(pbr).is_none());

        assert!(renderer.update_vertex_data(empty, Mesh::triangle().vertex_data));
        let object = renderer.get_render_object(empty).unwrap();
        assert!(object.has_vertex_data());
        assert_eq!(object.vertex_count, 3);
        assert_eq!(renderer.rebatch().batch_for(pbr).unwrap().objects, vec![empty]);
    }

    #[test]
    fn test_update_vertex_data_replaces_buffer() {
        let mut renderer = renderer();
        let pbr = renderer
            .initialize_material(&MaterialCreateInfo::new("pbr", "pbr"))
            .unwrap();
        let id = triangle(&mut renderer, pbr);
        let old_buffer = renderer.get_render_object(id).unwrap().vertex_buffer.unwrap();
        let live_buffers = renderer.backend().live_buffer_count();

        assert!(renderer.update_vertex_data(id, Mesh::cube().vertex_data));

        let object = renderer.get_render_object(id).unwrap();
        assert_ne!(object.vertex_buffer, Some(old_buffer));
        assert_eq!(object.vertex_count, Mesh::cube().vertex_count() as u32);
        assert!(renderer.backend().buffer_descriptor(old_buffer).is_none());
        assert_eq!(renderer.backend().live_buffer_count(), live_buffers);
        assert!(!renderer.update_vertex_data(RenderID(4242), Mesh::triangle().vertex_data));
    }

    #[test]
    fn test_destroying_selected_object_clears_selection() {
        let mut renderer = renderer();
        let pbr = renderer
            .initialize_material(&MaterialCreateInfo::new("pbr", "pbr"))
            .unwrap();
        let id = triangle(&mut renderer, pbr);
        renderer.set_selected_object(Some(id));
        assert_eq!(renderer.selected_object(), Some(id));

        assert!(renderer.destroy_render_object(id));
        assert_eq!(renderer.selected_object(), None);
        assert!(!renderer.destroy_render_object(id));
    }

    #[test]
    fn test_reload_shaders_keeps_ids() {
        let mut renderer = renderer();
        let before: Vec<_> = renderer
            .tables()
            .shaders
            .iter()
            .map(|(id, s)| (id, s.name()))
            .collect();
        renderer.render(&frame());
        renderer.reload_shaders();
        let after: Vec<_> = renderer
            .tables()
            .shaders
            .iter()
            .map(|(id, s)| (id, s.name()))
            .collect();
        assert_eq!(before, after);
        assert_eq!(renderer.gpu().pipelines.len(), 0);
    }

    #[test]
    fn test_screenshot_reads_back_before_present() {
        let mut settings = RendererSettings::default();
        settings.screenshot_dir = std::env::temp_dir().join(format!("deferred-renderer-shot-{}", std::process::id()));
        let mut renderer = Renderer::new(RecordingBackend::new(8, 8), settings.clone()).unwrap();
        renderer.request_screenshot().unwrap();
        renderer.backend_mut().clear_commands();
        renderer.render(&frame());

        let commands = renderer.backend().commands();
        let read = commands
            .iter()
            .position(|c| matches!(c, RecordedCommand::ReadTexture(_)))
            .unwrap();
        let present = commands
            .iter()
            .position(|c| matches!(c, RecordedCommand::EndFrame))
            .unwrap();
        assert!(read < present);
        assert!(renderer.is_saving_screenshot());

        // only the swapchain image outlives the renderer
        let backend = renderer.destroy();
        assert_eq!(backend.live_texture_count(), 1);
        let _ = std::fs::remove_dir_all(settings.screenshot_dir);
    }

    #[test]
    fn test_screenshot_after_finished_save_is_taken() {
        let mut settings = RendererSettings::default();
        settings.screenshot_dir =
            std::env::temp_dir().join(format!("deferred-renderer-shot-again-{}", std::process::id()));
        let mut renderer = Renderer::new(RecordingBackend::new(8, 8), settings.clone()).unwrap();
        renderer.request_screenshot().unwrap();
        renderer.render(&frame());

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while !renderer.screenshot.as_mut().unwrap().is_finished() {
            assert!(std::time::Instant::now() < deadline, "screenshot save timed out");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        // the finished save has not been polled by update yet
        renderer.request_screenshot().unwrap();
        renderer.backend_mut().clear_commands();
        renderer.render(&frame());

        assert!(renderer
            .backend()
            .commands()
            .iter()
            .any(|c| matches!(c, RecordedCommand::ReadTexture(_))));
        assert!(renderer.is_saving_screenshot());
        renderer.destroy();
        let _ = std::fs::remove_dir_all(settings.screenshot_dir);
    }

    #[test]
    fn test_fits_topology() {
        assert!(fits_topology(6, PrimitiveTopology::TriangleList));
        assert!(!fits_topology(4, PrimitiveTopology::TriangleList));
        assert!(fits_topology(4, PrimitiveTopology::TriangleStrip));
        assert!(!fits_topology(3, PrimitiveTopology::LineList));
        assert!(!fits_topology(0, PrimitiveTopology::PointList));
    }
}
