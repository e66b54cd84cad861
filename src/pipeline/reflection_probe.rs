//! Reflection probe capture and image-based lighting precomputation
//!
//! A capture runs as one offscreen submission:
//! 1. For each cube face, the deferred batches are drawn into the probe's
//!    cube G-buffer, combined into the environment cubemap and topped with
//!    the forward batches (skybox included).
//! 2. The environment is convolved into a small irradiance cube.
//! 3. Each mip of the prefiltered cube is rendered with a roughness of
//!    `mip / (mips - 1)`.
//!
//! The split-sum BRDF lookup table does not depend on the scene and is
//! rendered once. HDR equirectangular skies go through the same face loop
//! to become cubemaps.
//!
//! The combine material used during capture never receives the maps being
//! generated, so there is no feedback between captures.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::batching::RenderBatches;
use crate::pipeline::cache::TargetFormats;
use crate::pipeline::forward_pass::ForwardPass;
use crate::pipeline::gbuffer_pass::GBufferPass;
use crate::pipeline::targets::{DEPTH_FORMAT, GBUFFER_FORMAT, HDR_FORMAT};
use crate::pipeline::uniforms::ViewUniforms;
use crate::pipeline::{GpuResources, PassContext};
use crate::resources::{
    GpuTexture, Material, MaterialCreateInfo, MaterialID, RenderID, ResourceTables, SlotTable, TextureID,
    TextureSlot,
};
use crate::scene::{DirectionalLight, PointLight};
use glam::{Mat4, Vec3};

/// Mip count of prefiltered specular maps, before clamping to the size
pub const PREFILTER_MIP_LEVELS: u32 = 5;
pub const BRDF_LUT_FORMAT: TextureFormat = TextureFormat::Rg16Float;

const CAPTURE_NEAR: f32 = 0.1;
const CAPTURE_FAR: f32 = 1000.0;

/// Engine materials the capture draws with, created on first use
pub const IRRADIANCE_MATERIAL: &str = "Irradiance";
pub const PREFILTER_MATERIAL: &str = "Prefilter";
pub const BRDF_MATERIAL: &str = "BRDF";
pub const EQUIRECTANGULAR_MATERIAL: &str = "Equirectangular to Cube";

/// 90 degree square projection with near and far swapped for reversed-Z
pub fn capture_projection() -> Mat4 {
    Mat4::perspective_rh(90f32.to_radians(), 1.0, CAPTURE_FAR, CAPTURE_NEAR)
}

/// Views for the +X, -X, +Y, -Y, +Z, -Z faces as seen from `position`
pub fn capture_views(position: Vec3) -> [Mat4; 6] {
    let faces = [
        (Vec3::X, -Vec3::Y),
        (-Vec3::X, -Vec3::Y),
        (Vec3::Y, Vec3::Z),
        (-Vec3::Y, -Vec3::Z),
        (Vec3::Z, -Vec3::Y),
        (-Vec3::Z, -Vec3::Y),
    ];
    let translation = Mat4::from_translation(-position);
    faces.map(|(direction, up)| Mat4::look_at_rh(Vec3::ZERO, direction, up) * translation)
}

/// Mips of a prefiltered cube of `size`: at most [`PREFILTER_MIP_LEVELS`],
/// and never below 1x1
pub fn prefilter_mip_levels(size: u32) -> u32 {
    let full_chain = 32 - size.max(1).leading_zeros();
    full_chain.min(PREFILTER_MIP_LEVELS)
}

pub fn prefilter_roughness(mip: u32, mip_levels: u32) -> f32 {
    if mip_levels <= 1 {
        0.0
    } else {
        mip as f32 / (mip_levels - 1) as f32
    }
}

/// Create the environment cube and cube G-buffer a probe material captures
/// into
pub fn create_probe_targets<B: GraphicsBackend>(
    backend: &mut B,
    textures: &mut SlotTable<TextureID, GpuTexture>,
    material: &mut Material,
) -> BackendResult<()> {
    let size = material.cubemap_size;
    let mut create = |label: String, format: TextureFormat| -> BackendResult<TextureID> {
        let texture = GpuTexture::create(backend, TextureDescriptor::cube_target(&label, size, 1, format))?;
        Ok(textures.insert_at_lowest_free(texture))
    };

    let name = material.name.clone();
    material.generated.cubemap = Some(create(format!("{} environment", name), HDR_FORMAT)?);
    material.generated.capture_targets = vec![
        create(format!("{} capture position metallic", name), GBUFFER_FORMAT)?,
        create(format!("{} capture normal roughness", name), GBUFFER_FORMAT)?,
        create(format!("{} capture albedo ao", name), GBUFFER_FORMAT)?,
    ];
    material.generated.capture_depth = Some(create(format!("{} capture depth", name), DEPTH_FORMAT)?);

    log::debug!("Created {}x{} reflection probe targets for {}", size, size, name);
    Ok(())
}

/// Lights and clear color a scene capture is shaded with
#[derive(Debug, Clone, Default)]
pub struct CaptureLighting {
    pub directional: Option<DirectionalLight>,
    pub point_lights: Vec<PointLight>,
    pub clear_color: Vec3,
    /// Drawn first on every face
    pub skybox: Option<RenderID>,
}

/// Everything a capture touches. Unlike a frame pass it may rebind material
/// textures and create tables entries.
pub struct CaptureContext<'a, B: GraphicsBackend> {
    pub backend: &'a mut B,
    pub gpu: &'a mut GpuResources,
    pub tables: &'a mut ResourceTables,
    pub batches: &'a RenderBatches,
}

impl<'a, B: GraphicsBackend> CaptureContext<'a, B> {
    pub fn new(
        backend: &'a mut B,
        gpu: &'a mut GpuResources,
        tables: &'a mut ResourceTables,
        batches: &'a RenderBatches,
    ) -> Self {
        Self {
            backend,
            gpu,
            tables,
            batches,
        }
    }

    fn pass(&mut self) -> PassContext<'_, B> {
        PassContext::new(self.backend, self.gpu, self.tables, self.batches)
    }

    /// Look up or create an engine material
    pub fn engine_material(&mut self, name: &str, shader_name: &str) -> Option<MaterialID> {
        if let Some(id) = self.tables.material_id(name) {
            return Some(id);
        }
        let Some(shader_id) = self.tables.shader_id(shader_name) else {
            log::error!("Cannot create {}: shader {} is not loaded", name, shader_name);
            return None;
        };
        let info = MaterialCreateInfo::engine(name, shader_name);
        let id = self
            .tables
            .materials
            .insert_at_lowest_free(Material::from_create_info(&info, shader_id));
        log::debug!("Created engine material {} ({})", name, id);
        Some(id)
    }

    /// Point `slot` of `material` at `texture` and drop its stale bind group
    pub fn bind_material_texture(&mut self, material: MaterialID, slot: TextureSlot, texture: TextureID) {
        let Some(entry) = self.tables.materials.get_mut(material) else {
            log::warn!("Cannot bind texture to missing material {}", material);
            return;
        };
        if entry.textures.insert(slot, texture) != Some(texture) {
            self.gpu.material_bindings.invalidate(self.backend, material);
        }
    }

    fn face_views(&mut self, texture: TextureID, mip: u32) -> Option<[TextureViewHandle; 6]> {
        let Some(handle) = self.tables.textures.get(texture).map(|t| t.handle) else {
            log::error!("Capture target {} is missing", texture);
            return None;
        };
        let mut views = Vec::with_capacity(6);
        for face in 0..6 {
            match self
                .backend
                .create_texture_view(handle, &TextureViewDescriptor::cube_face(face, mip))
            {
                Ok(view) => views.push(view),
                Err(e) => {
                    log::error!("Face view {} of texture {} failed: {}", face, texture, e);
                    self.release_views(&views);
                    return None;
                }
            }
        }
        views.try_into().ok()
    }

    fn release_views(&mut self, views: &[TextureViewHandle]) {
        for view in views {
            self.backend.destroy_texture_view(*view);
        }
    }

    /// Reuse `existing` if it still matches, otherwise create a new cube
    fn cube_target(
        &mut self,
        existing: Option<TextureID>,
        label: &str,
        size: u32,
        mip_levels: u32,
    ) -> Option<TextureID> {
        let descriptor = TextureDescriptor::cube_target(label, size, mip_levels, HDR_FORMAT);
        if let Some(id) = existing {
            if self.tables.textures.get(id).is_some_and(|t| t.descriptor == descriptor) {
                return Some(id);
            }
            if let Some(old) = self.tables.textures.remove(id) {
                // any bind group may still sample the old texture
                self.gpu.material_bindings.invalidate_all(self.backend);
                old.destroy(self.backend);
            }
        }
        match GpuTexture::create(self.backend, descriptor) {
            Ok(texture) => Some(self.tables.textures.insert_at_lowest_free(texture)),
            Err(e) => {
                log::error!("Failed to create {}: {}", label, e);
                None
            }
        }
    }

    fn view_group(&mut self, uniforms: &ViewUniforms) -> Option<BindGroupHandle> {
        self.gpu.view_bind_group(self.backend, uniforms)
    }

    /// Draw `material` on the unit cube into every face of `target` at `mip`
    fn render_faces(&mut self, label: &str, material: MaterialID, target: TextureID, mip: u32, roughness: f32) {
        let Some(views) = self.face_views(target, mip) else {
            return;
        };
        let projection = capture_projection();
        let targets = TargetFormats::new(&[HDR_FORMAT], None);

        for (face, view_matrix) in capture_views(Vec3::ZERO).into_iter().enumerate() {
            let uniforms = ViewUniforms::new(view_matrix, projection, Vec3::ZERO, 1.0).with_roughness(roughness);
            let Some(view) = self.view_group(&uniforms) else {
                break;
            };
            self.backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(format!("{} face {} mip {}", label, face, mip)),
                color_attachments: vec![ColorAttachment {
                    view: views[face],
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                }],
                depth_stencil_attachment: None,
            });
            self.pass().draw_cube(material, view, &targets);
            self.backend.end_render_pass();
        }

        self.release_views(&views);
    }

    /// Capture the scene around `position` into the probe material's
    /// environment cube
    pub fn capture_scene(
        &mut self,
        probe: MaterialID,
        position: Vec3,
        combine_material: MaterialID,
        sprite_material: MaterialID,
        lighting: &CaptureLighting,
    ) -> bool {
        let Some(generated) = self.tables.materials.get(probe).map(|m| m.generated.clone()) else {
            log::error!("Reflection probe material {} does not exist", probe);
            return false;
        };
        let (Some(environment), Some(depth), [position_target, normal_target, albedo_target]) = (
            generated.cubemap,
            generated.capture_depth,
            generated.capture_targets.as_slice(),
        ) else {
            log::error!("Material {} has no reflection probe targets", probe);
            return false;
        };
        let gbuffer = [*position_target, *normal_target, *albedo_target];

        for (i, target) in gbuffer.iter().enumerate() {
            self.bind_material_texture(combine_material, TextureSlot::CubeFrameBuffer(i as u8), *target);
        }

        let mut views = Vec::with_capacity(5);
        for id in [gbuffer[0], gbuffer[1], gbuffer[2], depth, environment] {
            match self.face_views(id, 0) {
                Some(faces) => views.push(faces),
                None => {
                    for faces in &views {
                        self.release_views(faces);
                    }
                    return false;
                }
            }
        }
        let (gbuffer_views, depth_views, environment_views) = (&views[..3], views[3], views[4]);

        let projection = capture_projection();
        let shading_targets = TargetFormats::new(&[HDR_FORMAT], Some(DEPTH_FORMAT));
        for (face, view_matrix) in capture_views(position).into_iter().enumerate() {
            let uniforms = ViewUniforms::new(view_matrix, projection, position, 1.0)
                .with_lights(lighting.directional.as_ref(), &lighting.point_lights);
            let Some(view) = self.view_group(&uniforms) else {
                break;
            };

            let clear = LoadOp::Clear([0.0; 4]);
            self.backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(format!("Probe G-Buffer face {}", face)),
                color_attachments: gbuffer_views
                    .iter()
                    .map(|views| ColorAttachment {
                        view: views[face],
                        load_op: clear,
                    })
                    .collect(),
                depth_stencil_attachment: Some(DepthStencilAttachment {
                    view: depth_views[face],
                    depth_load_op: clear,
                    depth_clear_value: 0.0,
                }),
            });
            GBufferPass { view }.record(&mut self.pass());
            self.backend.end_render_pass();

            self.backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(format!("Probe Shading face {}", face)),
                color_attachments: vec![ColorAttachment {
                    view: environment_views[face],
                    load_op: LoadOp::Clear(lighting.clear_color.extend(1.0).to_array()),
                }],
                depth_stencil_attachment: Some(DepthStencilAttachment {
                    view: depth_views[face],
                    depth_load_op: LoadOp::Load,
                    depth_clear_value: 0.0,
                }),
            });
            let mut pass = self.pass();
            pass.draw_cube(combine_material, view, &shading_targets);
            ForwardPass::batches_only(view, lighting.skybox, sprite_material).record(&mut pass);
            self.backend.end_render_pass();
        }

        for faces in &views {
            self.release_views(faces);
        }
        true
    }

    /// Convolve `source`'s environment cube into its irradiance map
    pub fn convolve_irradiance(&mut self, source: MaterialID) -> Option<TextureID> {
        let (environment, existing, size, name) = {
            let material = self.tables.materials.get(source)?;
            (
                material.generated.cubemap.or(material.textures.get(&TextureSlot::Cubemap).copied())?,
                material.generated.irradiance,
                material.irradiance_size,
                material.name.clone(),
            )
        };
        let irradiance_material = self.engine_material(IRRADIANCE_MATERIAL, "irradiance")?;
        let target = self.cube_target(existing, &format!("{} irradiance", name), size, 1)?;
        if let Some(material) = self.tables.materials.get_mut(source) {
            material.generated.irradiance = Some(target);
        }

        self.bind_material_texture(irradiance_material, TextureSlot::Cubemap, environment);
        self.render_faces("Irradiance", irradiance_material, target, 0, 0.0);
        log::debug!("Convolved irradiance for {} at {}x{}", name, size, size);
        Some(target)
    }

    /// Prefilter `source`'s environment cube, one roughness level per mip
    pub fn prefilter(&mut self, source: MaterialID) -> Option<TextureID> {
        let (environment, existing, size, name) = {
            let material = self.tables.materials.get(source)?;
            (
                material.generated.cubemap.or(material.textures.get(&TextureSlot::Cubemap).copied())?,
                material.generated.prefiltered,
                material.prefiltered_size,
                material.name.clone(),
            )
        };
        let prefilter_material = self.engine_material(PREFILTER_MATERIAL, "prefilter")?;
        let mip_levels = prefilter_mip_levels(size);
        let target = self.cube_target(existing, &format!("{} prefiltered", name), size, mip_levels)?;
        if let Some(material) = self.tables.materials.get_mut(source) {
            material.generated.prefiltered = Some(target);
        }

        self.bind_material_texture(prefilter_material, TextureSlot::Cubemap, environment);
        for mip in 0..mip_levels {
            let roughness = prefilter_roughness(mip, mip_levels);
            self.render_faces("Prefilter", prefilter_material, target, mip, roughness);
        }
        log::debug!("Prefiltered {} over {} mips", name, mip_levels);
        Some(target)
    }

    /// Convert `material`'s HDR equirectangular texture into its cubemap
    pub fn equirectangular_to_cube(&mut self, material_id: MaterialID) -> Option<TextureID> {
        let (source, existing, size, name) = {
            let material = self.tables.materials.get(material_id)?;
            let Some(source) = material.textures.get(&TextureSlot::HdrEquirectangular).copied() else {
                log::warn!("Material {} has no equirectangular texture to convert", material.name);
                return None;
            };
            (source, material.generated.cubemap, material.cubemap_size, material.name.clone())
        };
        let convert_material = self.engine_material(EQUIRECTANGULAR_MATERIAL, "equirectangular_to_cube")?;
        let target = self.cube_target(existing, &format!("{} cubemap", name), size, 1)?;
        if let Some(material) = self.tables.materials.get_mut(material_id) {
            material.generated.cubemap = Some(target);
        }

        self.bind_material_texture(convert_material, TextureSlot::HdrEquirectangular, source);
        self.render_faces("Equirectangular to Cube", convert_material, target, 0, 0.0);
        self.gpu.material_bindings.invalidate(self.backend, material_id);
        log::debug!("Converted {} to a {}x{} cubemap", name, size, size);
        Some(target)
    }

    /// Render the split-sum BRDF lookup table
    pub fn generate_brdf_lut(&mut self, size: u32) -> Option<TextureID> {
        let brdf_material = self.engine_material(BRDF_MATERIAL, "brdf")?;
        let descriptor = TextureDescriptor::render_target("BRDF LUT", size.max(1), size.max(1), BRDF_LUT_FORMAT);
        let texture = match GpuTexture::create(self.backend, descriptor) {
            Ok(texture) => texture,
            Err(e) => {
                log::error!("Failed to create the BRDF LUT: {}", e);
                return None;
            }
        };
        let target = texture.view;
        let id = self.tables.textures.insert_at_lowest_free(texture);

        let Some(view) = self.view_group(&ViewUniforms::default()) else {
            return Some(id);
        };
        self.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("BRDF LUT".into()),
            color_attachments: vec![ColorAttachment {
                view: target,
                load_op: LoadOp::Clear([0.0; 4]),
            }],
            depth_stencil_attachment: None,
        });
        self.pass()
            .draw_fullscreen(brdf_material, view, &TargetFormats::new(&[BRDF_LUT_FORMAT], None));
        self.backend.end_render_pass();

        log::info!("Generated {}x{} BRDF LUT", size, size);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_capture_views_look_down_each_axis() {
        let views = capture_views(Vec3::ZERO);
        let forwards = [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z];
        for (view, forward) in views.iter().zip(forwards) {
            // a right-handed view looks down -Z
            let looked_at = view.transform_point3(forward);
            assert!(looked_at.abs_diff_eq(-Vec3::Z, 1e-5), "{:?} -> {:?}", forward, looked_at);
        }
    }

    #[test]
    fn test_capture_views_are_translated_by_probe_position() {
        let position = Vec3::new(3.0, -1.0, 2.0);
        for view in capture_views(position) {
            assert!(view.transform_point3(position).abs_diff_eq(Vec3::ZERO, 1e-5));
        }
    }

    #[test]
    fn test_projection_is_reversed_z() {
        let projection = capture_projection();
        let near = projection * Vec4::new(0.0, 0.0, -CAPTURE_NEAR, 1.0);
        let far = projection * Vec4::new(0.0, 0.0, -CAPTURE_FAR, 1.0);
        assert!((near.z / near.w - 1.0).abs() < 1e-4);
        assert!((far.z / far.w).abs() < 1e-4);
    }

    #[test]
    fn test_prefilter_mips_and_roughness() {
        assert_eq!(prefilter_mip_levels(128), 5);
        assert_eq!(prefilter_mip_levels(8), 4);
        assert_eq!(prefilter_mip_levels(1), 1);
        assert_eq!(prefilter_roughness(0, 5), 0.0);
        assert_eq!(prefilter_roughness(4, 5), 1.0);
        assert_eq!(prefilter_roughness(2, 5), 0.5);
        assert_eq!(prefilter_roughness(0, 1), 0.0);
    }
}
