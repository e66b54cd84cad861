//! Directional light shadow map
//!
//! Deferred geometry is rendered depth-only from the light with front faces
//! culled. The shadow map uses conventional depth (cleared to 1, `Less`),
//! unlike the reversed-Z camera passes.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::cache::TargetFormats;
use crate::pipeline::draw::DrawCallInfo;
use crate::pipeline::targets::DEPTH_FORMAT;
use crate::pipeline::uniforms::ViewUniforms;
use crate::pipeline::{PassContext, RenderPass};
use crate::resources::MaterialID;
use glam::Mat4;

/// Where the shadow pass stands this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowPassState {
    /// No enabled, shadow-casting directional light
    #[default]
    Disabled,
    /// A caster exists; the map has not been drawn yet this frame
    Armed,
    Rendered,
}

pub struct ShadowPass {
    pub light_view_projection: Mat4,
    /// Depth-only material every deferred object is drawn with
    pub shadow_material: MaterialID,
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &'static str {
        "Shadow Pass"
    }

    fn execute<B: GraphicsBackend>(&self, ctx: &mut PassContext<'_, B>) {
        let shadow_map = ctx.gpu.targets.shadow_map;
        let Some(depth_view) = ctx.texture_view(shadow_map) else {
            return;
        };
        let uniforms = ViewUniforms::default().with_shadow(Some(self.light_view_projection));
        let Some(view) = ctx.gpu.view_bind_group(ctx.backend, &uniforms) else {
            return;
        };

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(self.name().into()),
            color_attachments: Vec::new(),
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_clear_value: 1.0,
            }),
        });

        let targets = TargetFormats::depth_only(DEPTH_FORMAT);
        let info = DrawCallInfo {
            material_override: Some(self.shadow_material),
            cull_mode: Some(CullMode::Front),
            depth_compare: Some(CompareFunction::Less),
            depth_write: Some(true),
            ..Default::default()
        };
        let batches = ctx.batches;
        let drawn = ctx.draw_batches(&batches.deferred, view, &targets, &info);

        ctx.backend.end_render_pass();
        log::trace!("Shadow pass drew {} objects", drawn);
    }
}
