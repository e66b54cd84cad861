//! Draw recording shared by every pass

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::batching::RenderObjectBatch;
use crate::pipeline::buffers::Geometry;
use crate::pipeline::cache::{PipelineKey, TargetFormats};
use crate::pipeline::uniforms::ObjectUniforms;
use crate::pipeline::PassContext;
use crate::resources::{MaterialID, RenderID, TextureID};
use glam::{Mat4, Vec4};

/// Per-pass overrides passed down to each draw. Unset fields keep the
/// object's own state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrawCallInfo {
    pub material_override: Option<MaterialID>,
    /// Replaces the material's albedo texture, for sprites
    pub albedo_override: Option<TextureID>,
    pub depth_compare: Option<CompareFunction>,
    pub depth_write: Option<bool>,
    pub cull_mode: Option<CullMode>,
    pub wireframe: bool,
    pub color_override: Option<Vec4>,
}

impl DrawCallInfo {
    pub fn with_material(material: MaterialID) -> Self {
        Self {
            material_override: Some(material),
            ..Default::default()
        }
    }
}

impl<'a, B: GraphicsBackend> PassContext<'a, B> {
    /// Record one draw. Returns false when the draw had to be skipped; the
    /// reason has already been logged.
    pub fn draw_geometry(
        &mut self,
        geometry: &Geometry,
        transform: Mat4,
        material_id: MaterialID,
        view: BindGroupHandle,
        targets: &TargetFormats,
        info: &DrawCallInfo,
    ) -> bool {
        let Some(material) = self.tables.materials.get(material_id) else {
            log::warn!("Draw skipped: no material with ID {}", material_id);
            return false;
        };
        let Some(shader) = self.tables.shaders.get(material.shader_id) else {
            log::warn!("Draw skipped: material {} has invalid shader", material.name);
            return false;
        };

        let key = PipelineKey {
            shader: material.shader_id,
            buffer_attributes: geometry.attributes,
            targets: targets.clone(),
            topology: geometry.topology,
            cull_mode: info.cull_mode.unwrap_or(geometry.cull_mode),
            depth_compare: info.depth_compare.unwrap_or(geometry.depth_compare),
            depth_write: info
                .depth_write
                .unwrap_or(geometry.depth_write && shader.descriptor.depth_write),
            wireframe: info.wireframe,
        };
        let Some(pipeline) = self
            .gpu
            .pipelines
            .get_or_create(self.backend, &key, shader, &mut self.gpu.layouts)
        else {
            return false;
        };
        let Some(material_group) =
            self.gpu
                .material_bind_group(self.backend, self.tables, material_id, info.albedo_override)
        else {
            return false;
        };
        let color = info.color_override.unwrap_or(material.color_multiplier);
        let Some(object_group) = self
            .gpu
            .object_uniforms
            .acquire(self.backend, &ObjectUniforms::new(transform, color))
        else {
            return false;
        };

        self.backend.set_render_pipeline(pipeline);
        self.backend.set_bind_group(0, view);
        self.backend.set_bind_group(1, object_group);
        self.backend.set_bind_group(2, material_group);
        self.backend.set_vertex_buffer(0, geometry.vertex_buffer, 0);
        match geometry.index_buffer {
            Some(index_buffer) if geometry.index_count > 0 => {
                self.backend.set_index_buffer(index_buffer, 0, IndexFormat::Uint32);
                self.backend.draw_indexed(0..geometry.index_count, 0, 0..1);
            }
            _ => self.backend.draw(0..geometry.vertex_count, 0..1),
        }
        true
    }

    /// Draw a render object with its own material unless overridden
    pub fn draw_object(
        &mut self,
        id: RenderID,
        view: BindGroupHandle,
        targets: &TargetFormats,
        info: &DrawCallInfo,
    ) -> bool {
        let Some(object) = self.tables.objects.get(id) else {
            log::warn!("Draw skipped: no render object with ID {}", id);
            return false;
        };
        let Some(geometry) = Geometry::from_object(object) else {
            return false;
        };
        let material_id = info.material_override.unwrap_or(object.material_id);
        let transform = object.transform;
        self.draw_geometry(&geometry, transform, material_id, view, targets, info)
    }

    /// Draw every object of every batch, returning the number of draws
    pub fn draw_batches(
        &mut self,
        batches: &[RenderObjectBatch],
        view: BindGroupHandle,
        targets: &TargetFormats,
        info: &DrawCallInfo,
    ) -> usize {
        let mut drawn = 0;
        for batch in batches {
            for id in &batch.objects {
                if self.draw_object(*id, view, targets, info) {
                    drawn += 1;
                }
            }
        }
        drawn
    }

    /// Draw loose render objects in order, returning the number of draws
    pub fn draw_objects(
        &mut self,
        ids: &[RenderID],
        view: BindGroupHandle,
        targets: &TargetFormats,
        info: &DrawCallInfo,
    ) -> usize {
        ids.iter()
            .filter(|id| self.draw_object(**id, view, targets, info))
            .count()
    }

    /// Cover the whole target with `material`, ignoring depth
    pub fn draw_fullscreen(&mut self, material_id: MaterialID, view: BindGroupHandle, targets: &TargetFormats) -> bool {
        let geometry = self.gpu.fullscreen_triangle.geometry();
        self.draw_geometry(
            &geometry,
            Mat4::IDENTITY,
            material_id,
            view,
            targets,
            &DrawCallInfo::default(),
        )
    }

    /// Draw the inward-facing unit cube, for rendering into cube faces
    pub fn draw_cube(&mut self, material_id: MaterialID, view: BindGroupHandle, targets: &TargetFormats) -> bool {
        let geometry = self.gpu.unit_cube.geometry();
        self.draw_geometry(
            &geometry,
            Mat4::IDENTITY,
            material_id,
            view,
            targets,
            &DrawCallInfo::default(),
        )
    }
}
