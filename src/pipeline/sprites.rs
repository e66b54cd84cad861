//! Textured quads queued during the frame and flushed by the forward and
//! overlay passes

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::cache::TargetFormats;
use crate::pipeline::draw::DrawCallInfo;
use crate::pipeline::PassContext;
use crate::resources::{MaterialID, TextureID};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

/// Which point of a quad or string sits at its position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    #[default]
    Center,
    TopLeft,
    Top,
    TopRight,
    Right,
    BottomRight,
    Bottom,
    BottomLeft,
    Left,
}

impl Anchor {
    /// Anchor point on a unit box centered at the origin, y up
    pub fn point(self) -> Vec2 {
        match self {
            Anchor::Center => Vec2::ZERO,
            Anchor::TopLeft => Vec2::new(-0.5, 0.5),
            Anchor::Top => Vec2::new(0.0, 0.5),
            Anchor::TopRight => Vec2::new(0.5, 0.5),
            Anchor::Right => Vec2::new(0.5, 0.0),
            Anchor::BottomRight => Vec2::new(0.5, -0.5),
            Anchor::Bottom => Vec2::new(0.0, -0.5),
            Anchor::BottomLeft => Vec2::new(-0.5, -0.5),
            Anchor::Left => Vec2::new(-0.5, 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpriteQuadDrawInfo {
    /// Sampled instead of the material's albedo when set
    pub texture: Option<TextureID>,
    /// Defaults to the engine sprite material
    pub material: Option<MaterialID>,
    /// Normalized [-1, 1] screen coordinates in screen space, world units
    /// otherwise
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub anchor: Anchor,
    pub color: Vec4,
    pub screen_space: bool,
    pub read_depth: bool,
    pub write_depth: bool,
}

impl Default for SpriteQuadDrawInfo {
    fn default() -> Self {
        Self {
            texture: None,
            material: None,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            anchor: Anchor::Center,
            color: Vec4::ONE,
            screen_space: true,
            read_depth: true,
            write_depth: false,
        }
    }
}

impl SpriteQuadDrawInfo {
    pub fn screen(texture: TextureID, position: Vec2, scale: Vec2) -> Self {
        Self {
            texture: Some(texture),
            position: position.extend(0.0),
            scale: scale.extend(1.0),
            ..Default::default()
        }
    }

    pub fn world(texture: TextureID, position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            texture: Some(texture),
            position,
            rotation,
            scale,
            screen_space: false,
            ..Default::default()
        }
    }

    /// Model matrix for the unit quad. Screen-space x is stretched by the
    /// aspect ratio to match [`ViewUniforms::screen_space`].
    ///
    /// [`ViewUniforms::screen_space`]: crate::pipeline::ViewUniforms::screen_space
    pub fn model(&self, aspect: f32) -> Mat4 {
        let translation = if self.screen_space {
            Vec3::new(self.position.x * aspect, self.position.y, 0.0)
        } else {
            self.position
        };
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, translation)
            * Mat4::from_translation(-self.anchor.point().extend(0.0))
    }

    fn draw_info(&self, sprite_material: MaterialID) -> DrawCallInfo {
        let depth_compare = if !self.screen_space && self.read_depth {
            CompareFunction::GreaterEqual
        } else {
            CompareFunction::Always
        };
        DrawCallInfo {
            material_override: Some(self.material.unwrap_or(sprite_material)),
            albedo_override: self.texture,
            depth_compare: Some(depth_compare),
            depth_write: Some(self.write_depth),
            color_override: Some(self.color),
            ..Default::default()
        }
    }
}

impl<'a, B: GraphicsBackend> PassContext<'a, B> {
    /// Draw queued sprites onto the sprite quad, returning how many drew
    pub fn draw_sprites(
        &mut self,
        sprites: &[SpriteQuadDrawInfo],
        sprite_material: MaterialID,
        view: BindGroupHandle,
        targets: &TargetFormats,
    ) -> usize {
        let geometry = self.gpu.sprite_quad.geometry();
        let (width, height) = (self.gpu.targets.width, self.gpu.targets.height);
        let aspect = width as f32 / height.max(1) as f32;

        let mut drawn = 0;
        for sprite in sprites {
            let info = sprite.draw_info(sprite_material);
            let material = info.material_override.unwrap_or(sprite_material);
            if self.draw_geometry(&geometry, sprite.model(aspect), material, view, targets, &info) {
                drawn += 1;
            }
        }
        drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_left_anchor_puts_corner_at_position() {
        let sprite = SpriteQuadDrawInfo {
            anchor: Anchor::TopLeft,
            position: Vec3::new(0.25, 0.5, 0.0),
            scale: Vec3::new(0.2, 0.1, 1.0),
            ..Default::default()
        };
        let corner = sprite.model(1.0).transform_point3(Vec3::new(-0.5, 0.5, 0.0));
        assert!(corner.abs_diff_eq(Vec3::new(0.25, 0.5, 0.0), 1e-6));
    }

    #[test]
    fn test_screen_space_position_is_aspect_corrected() {
        let sprite = SpriteQuadDrawInfo {
            position: Vec3::new(1.0, 0.0, 0.0),
            ..Default::default()
        };
        let center = sprite.model(2.0).transform_point3(Vec3::ZERO);
        assert!(center.abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-6));

        let world = SpriteQuadDrawInfo {
            screen_space: false,
            ..sprite
        };
        assert!(world.model(2.0).transform_point3(Vec3::ZERO).abs_diff_eq(Vec3::X, 1e-6));
    }

    #[test]
    fn test_depth_read_only_applies_in_world_space() {
        let sprite_material = MaterialID(7);
        let world = SpriteQuadDrawInfo {
            screen_space: false,
            ..Default::default()
        };
        assert_eq!(
            world.draw_info(sprite_material).depth_compare,
            Some(CompareFunction::GreaterEqual)
        );

        let screen = SpriteQuadDrawInfo::default();
        let info = screen.draw_info(sprite_material);
        assert_eq!(info.depth_compare, Some(CompareFunction::Always));
        assert_eq!(info.material_override, Some(sprite_material));
    }
}
