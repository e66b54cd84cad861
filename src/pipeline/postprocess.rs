//! Tonemapping, color grading and FXAA
//!
//! The lit HDR image is tonemapped either straight into the output or, with
//! FXAA enabled, into the LDR offscreen target which FXAA then resolves into
//! the output.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::cache::TargetFormats;
use crate::pipeline::targets::LDR_FORMAT;
use crate::pipeline::{PassContext, RenderPass};
use crate::resources::MaterialID;

pub struct PostProcessPass {
    /// Carries exposure and texel size
    pub view: BindGroupHandle,
    /// Samples the HDR offscreen target
    pub tonemap_material: MaterialID,
    /// Samples the LDR offscreen target; `None` skips FXAA
    pub fxaa_material: Option<MaterialID>,
    pub output: TextureViewHandle,
    pub output_format: TextureFormat,
}

impl PostProcessPass {
    fn fullscreen<B: GraphicsBackend>(
        &self,
        ctx: &mut PassContext<'_, B>,
        label: &str,
        material: MaterialID,
        target: TextureViewHandle,
        format: TextureFormat,
    ) {
        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(label.into()),
            color_attachments: vec![ColorAttachment {
                view: target,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
            }],
            depth_stencil_attachment: None,
        });
        if !ctx.draw_fullscreen(material, self.view, &TargetFormats::new(&[format], None)) {
            log::error!("{} could not draw", label);
        }
        ctx.backend.end_render_pass();
    }
}

impl RenderPass for PostProcessPass {
    fn name(&self) -> &'static str {
        "Post Processing"
    }

    fn execute<B: GraphicsBackend>(&self, ctx: &mut PassContext<'_, B>) {
        match self.fxaa_material {
            Some(fxaa) => {
                let ldr_id = ctx.gpu.targets.offscreen[1];
                let Some(ldr) = ctx.texture_view(ldr_id) else {
                    return;
                };
                self.fullscreen(ctx, "Tonemap", self.tonemap_material, ldr, LDR_FORMAT);
                self.fullscreen(ctx, "FXAA", fxaa, self.output, self.output_format);
            }
            None => {
                self.fullscreen(ctx, "Tonemap", self.tonemap_material, self.output, self.output_format);
            }
        }
    }
}
