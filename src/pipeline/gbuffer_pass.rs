//! G-buffer generation pass for deferred rendering
//!
//! Renders deferred geometry to three render targets sharing one depth
//! buffer:
//! - position (xyz) + metallic (w)
//! - world-space normal (xyz) + roughness (w)
//! - albedo (rgb) + ambient occlusion (a)
//!
//! The depth buffer is then copied into the offscreen depth target so
//! forward geometry can test against the opaque scene.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::cache::TargetFormats;
use crate::pipeline::draw::DrawCallInfo;
use crate::pipeline::targets::{DEPTH_FORMAT, GBUFFER_FORMAT};
use crate::pipeline::{PassContext, RenderPass};

pub struct GBufferPass {
    pub view: BindGroupHandle,
}

impl GBufferPass {
    pub fn targets() -> TargetFormats {
        TargetFormats::new(&[GBUFFER_FORMAT; 3], Some(DEPTH_FORMAT))
    }

    /// Draw the deferred batches into whatever G-buffer is bound. Probe
    /// capture calls this with cube faces attached.
    pub fn record<B: GraphicsBackend>(&self, ctx: &mut PassContext<'_, B>) -> usize {
        let batches = ctx.batches;
        ctx.draw_batches(&batches.deferred, self.view, &Self::targets(), &DrawCallInfo::default())
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &'static str {
        "G-Buffer Pass"
    }

    fn execute<B: GraphicsBackend>(&self, ctx: &mut PassContext<'_, B>) {
        let targets = ctx.gpu.targets.clone();
        let (Some(position), Some(normal), Some(albedo), Some(depth)) = (
            ctx.texture_view(targets.gbuffer[0]),
            ctx.texture_view(targets.gbuffer[1]),
            ctx.texture_view(targets.gbuffer[2]),
            ctx.texture_view(targets.gbuffer_depth),
        ) else {
            return;
        };

        let clear = |view| ColorAttachment {
            view,
            load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
        };
        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(self.name().into()),
            color_attachments: vec![clear(position), clear(normal), clear(albedo)],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth,
                depth_load_op: LoadOp::Clear([0.0; 4]),
                depth_clear_value: 0.0,
            }),
        });
        ctx.backend
            .set_viewport(0.0, 0.0, targets.width as f32, targets.height as f32, 0.0, 1.0);

        let drawn = self.record(ctx);
        ctx.backend.end_render_pass();

        let (Some(src), Some(dst)) = (
            ctx.tables.textures.get(targets.gbuffer_depth),
            ctx.tables.textures.get(targets.offscreen_depth),
        ) else {
            log::error!("Depth targets missing; forward pass will not see the scene depth");
            return;
        };
        ctx.backend
            .copy_texture_to_texture(src.handle, dst.handle, targets.width, targets.height);

        log::trace!("G-buffer pass drew {} objects", drawn);
    }
}
