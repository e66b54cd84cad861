//! Forward rendering on top of the lit G-buffer
//!
//! Draws into the HDR offscreen target, depth-testing against the opaque
//! scene depth copied out of the G-buffer pass. Translucent batches are drawn
//! in material order; there is no back-to-front sort.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::buffers::StreamedGeometry;
use crate::pipeline::cache::TargetFormats;
use crate::pipeline::draw::DrawCallInfo;
use crate::pipeline::sprites::SpriteQuadDrawInfo;
use crate::pipeline::targets::{DEPTH_FORMAT, HDR_FORMAT};
use crate::pipeline::{PassContext, RenderPass};
use crate::resources::{MaterialID, RenderID};
use glam::Mat4;

/// Geometry streamed for this frame together with the material it uses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamedDraw {
    pub geometry: StreamedGeometry,
    pub material: MaterialID,
}

pub struct ForwardPass<'f> {
    pub view: BindGroupHandle,
    /// Drawn ahead of the forward batches it also belongs to
    pub skybox: Option<RenderID>,
    /// Physics debug lines
    pub debug_lines: Option<StreamedDraw>,
    /// World-space sprites only
    pub sprites: &'f [SpriteQuadDrawInfo],
    pub sprite_material: MaterialID,
    /// World-space glyph quads
    pub text: Option<StreamedDraw>,
}

impl<'f> ForwardPass<'f> {
    /// Skybox and forward batches only, for reflection probe faces
    pub fn batches_only(view: BindGroupHandle, skybox: Option<RenderID>, sprite_material: MaterialID) -> Self {
        Self {
            view,
            skybox,
            debug_lines: None,
            sprites: &[],
            sprite_material,
            text: None,
        }
    }

    pub fn targets() -> TargetFormats {
        TargetFormats::new(&[HDR_FORMAT], Some(DEPTH_FORMAT))
    }

    /// Record every forward draw into the bound attachments
    pub fn record<B: GraphicsBackend>(&self, ctx: &mut PassContext<'_, B>) -> usize {
        let targets = Self::targets();
        let info = DrawCallInfo::default();
        let mut drawn = 0;
        if let Some(skybox) = self.skybox {
            if ctx.draw_object(skybox, self.view, &targets, &info) {
                drawn += 1;
            }
        }

        let batches = ctx.batches;
        for batch in &batches.forward {
            for id in batch.objects.iter().filter(|id| Some(**id) != self.skybox) {
                if ctx.draw_object(*id, self.view, &targets, &info) {
                    drawn += 1;
                }
            }
        }

        if let Some(lines) = &self.debug_lines {
            let geometry = lines.geometry.geometry(CompareFunction::GreaterEqual, false);
            if ctx.draw_geometry(
                &geometry,
                Mat4::IDENTITY,
                lines.material,
                self.view,
                &targets,
                &DrawCallInfo::default(),
            ) {
                drawn += 1;
            }
        }

        drawn += ctx.draw_sprites(self.sprites, self.sprite_material, self.view, &targets);

        if let Some(text) = &self.text {
            let geometry = text.geometry.geometry(CompareFunction::GreaterEqual, false);
            if ctx.draw_geometry(
                &geometry,
                Mat4::IDENTITY,
                text.material,
                self.view,
                &targets,
                &DrawCallInfo::default(),
            ) {
                drawn += 1;
            }
        }

        drawn
    }
}

impl<'f> RenderPass for ForwardPass<'f> {
    fn name(&self) -> &'static str {
        "Forward Pass"
    }

    fn execute<B: GraphicsBackend>(&self, ctx: &mut PassContext<'_, B>) {
        let (color_id, depth_id) = (ctx.gpu.targets.offscreen[0], ctx.gpu.targets.offscreen_depth);
        let (Some(color), Some(depth)) = (ctx.texture_view(color_id), ctx.texture_view(depth_id)) else {
            return;
        };

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(self.name().into()),
            color_attachments: vec![ColorAttachment {
                view: color,
                load_op: LoadOp::Load,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth,
                depth_load_op: LoadOp::Load,
                depth_clear_value: 0.0,
            }),
        });
        let drawn = self.record(ctx);
        ctx.backend.end_render_pass();

        log::trace!("Forward pass drew {} items", drawn);
    }
}
