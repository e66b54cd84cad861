//! Passes drawn onto the post-processed image
//!
//! Both passes render into the swapchain image while depth-testing against
//! the offscreen depth buffer, which still holds the scene depth when the
//! editor pass runs. The overlay pass clears it first so nothing it draws can
//! be hidden.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::cache::TargetFormats;
use crate::pipeline::draw::DrawCallInfo;
use crate::pipeline::forward_pass::StreamedDraw;
use crate::pipeline::sprites::SpriteQuadDrawInfo;
use crate::pipeline::targets::DEPTH_FORMAT;
use crate::pipeline::{PassContext, RenderPass};
use crate::resources::{MaterialID, RenderID};
use glam::Mat4;

/// Swapchain color plus the offscreen depth buffer
fn begin<B: GraphicsBackend>(
    ctx: &mut PassContext<'_, B>,
    label: &str,
    output: TextureViewHandle,
    depth_load_op: LoadOp,
) -> bool {
    let depth_id = ctx.gpu.targets.offscreen_depth;
    let Some(depth) = ctx.texture_view(depth_id) else {
        return false;
    };
    ctx.backend.begin_render_pass(&RenderPassDescriptor {
        label: Some(label.into()),
        color_attachments: vec![ColorAttachment {
            view: output,
            load_op: LoadOp::Load,
        }],
        depth_stencil_attachment: Some(DepthStencilAttachment {
            view: depth,
            depth_load_op,
            depth_clear_value: 0.0,
        }),
    });
    true
}

/// Depth-aware editor objects and the selection outline
pub struct EditorPass {
    pub view: BindGroupHandle,
    pub selected: Option<RenderID>,
    pub selection_material: MaterialID,
    pub output: TextureViewHandle,
    pub output_format: TextureFormat,
}

impl EditorPass {
    fn selection_info(&self, wireframe: bool) -> DrawCallInfo {
        DrawCallInfo {
            material_override: Some(self.selection_material),
            depth_compare: Some(CompareFunction::GreaterEqual),
            depth_write: Some(false),
            cull_mode: Some(CullMode::None),
            wireframe,
            ..Default::default()
        }
    }
}

impl RenderPass for EditorPass {
    fn name(&self) -> &'static str {
        "Editor Pass"
    }

    fn execute<B: GraphicsBackend>(&self, ctx: &mut PassContext<'_, B>) {
        if !begin(ctx, self.name(), self.output, LoadOp::Load) {
            return;
        }
        let targets = TargetFormats::new(&[self.output_format], Some(DEPTH_FORMAT));

        let batches = ctx.batches;
        ctx.draw_objects(
            &batches.editor_depth_aware,
            self.view,
            &targets,
            &DrawCallInfo::default(),
        );

        if let Some(selected) = self.selected {
            let info = self.selection_info(ctx.backend.supports_wireframe());
            ctx.draw_object(selected, self.view, &targets, &info);
        }

        ctx.backend.end_render_pass();
    }
}

/// Depth-unaware editor objects, screen-space sprites and screen-space text
pub struct OverlayPass<'f> {
    pub view: BindGroupHandle,
    /// Orthographic view for screen-space sprites
    pub screen_view: BindGroupHandle,
    pub sprites: &'f [SpriteQuadDrawInfo],
    pub sprite_material: MaterialID,
    pub text: Option<StreamedDraw>,
    pub output: TextureViewHandle,
    pub output_format: TextureFormat,
}

impl<'f> RenderPass for OverlayPass<'f> {
    fn name(&self) -> &'static str {
        "Overlay Pass"
    }

    fn execute<B: GraphicsBackend>(&self, ctx: &mut PassContext<'_, B>) {
        if !begin(ctx, self.name(), self.output, LoadOp::Clear([0.0; 4])) {
            return;
        }
        let targets = TargetFormats::new(&[self.output_format], Some(DEPTH_FORMAT));

        let batches = ctx.batches;
        ctx.draw_objects(
            &batches.editor_depth_unaware,
            self.view,
            &targets,
            &DrawCallInfo::default(),
        );

        ctx.draw_sprites(self.sprites, self.sprite_material, self.screen_view, &targets);

        if let Some(text) = &self.text {
            let geometry = text.geometry.geometry(CompareFunction::Always, false);
            ctx.draw_geometry(
                &geometry,
                Mat4::IDENTITY,
                text.material,
                self.screen_view,
                &targets,
                &DrawCallInfo::default(),
            );
        }

        ctx.backend.end_render_pass();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_never_writes_depth() {
        let pass = EditorPass {
            view: BindGroupHandle(0),
            selected: Some(RenderID(3)),
            selection_material: MaterialID(9),
            output: TextureViewHandle(0),
            output_format: TextureFormat::Bgra8UnormSrgb,
        };
        let info = pass.selection_info(true);
        assert_eq!(info.depth_write, Some(false));
        assert_eq!(info.material_override, Some(MaterialID(9)));
        assert!(info.wireframe);
        assert!(!pass.selection_info(false).wireframe);
    }
}
