//! Full-screen lighting of the G-buffer into the HDR offscreen target

use crate::backend::traits::*;
use crate::pipeline::cache::TargetFormats;
use crate::pipeline::targets::{DEPTH_FORMAT, HDR_FORMAT};
use crate::pipeline::{PassContext, RenderPass};
use crate::resources::MaterialID;
use glam::Vec3;

pub struct ShadingPass {
    pub view: BindGroupHandle,
    /// Material using the `deferred_combine` shader with the G-buffer bound
    pub combine_material: MaterialID,
    /// Left wherever the G-buffer holds no geometry
    pub clear_color: Vec3,
}

impl ShadingPass {
    pub fn targets() -> TargetFormats {
        TargetFormats::new(&[HDR_FORMAT], Some(DEPTH_FORMAT))
    }
}

impl RenderPass for ShadingPass {
    fn name(&self) -> &'static str {
        "Shading Pass"
    }

    fn execute<B: GraphicsBackend>(&self, ctx: &mut PassContext<'_, B>) {
        let targets = &ctx.gpu.targets;
        let (color_id, depth_id) = (targets.offscreen[0], targets.offscreen_depth);
        let (Some(color), Some(depth)) = (ctx.texture_view(color_id), ctx.texture_view(depth_id)) else {
            return;
        };

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(self.name().into()),
            color_attachments: vec![ColorAttachment {
                view: color,
                load_op: LoadOp::Clear(self.clear_color.extend(1.0).to_array()),
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth,
                depth_load_op: LoadOp::Load,
                depth_clear_value: 0.0,
            }),
        });

        if !ctx.draw_fullscreen(self.combine_material, self.view, &Self::targets()) {
            log::error!("Shading pass could not draw the G-buffer combine");
        }

        ctx.backend.end_render_pass();
    }
}
