//! Light types read by the shading pass

use glam::{Mat4, Vec3};

/// Point lights beyond this count are ignored
pub const MAX_POINT_LIGHTS: usize = 4;

/// Sun-style light, the only shadow caster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in
    pub direction: Vec3,
    pub color: Vec3,
    pub brightness: f32,
    pub enabled: bool,
    pub cast_shadow: bool,
    pub shadow_near: f32,
    pub shadow_far: f32,
    /// Half extent of the orthographic shadow volume
    pub shadow_zoom: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.3, -1.0, -0.4).normalize(),
            color: Vec3::ONE,
            brightness: 3.0,
            enabled: true,
            cast_shadow: true,
            shadow_near: 0.1,
            shadow_far: 100.0,
            shadow_zoom: 30.0,
        }
    }
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, brightness: f32) -> Self {
        Self {
            direction: direction.normalize_or_zero(),
            color,
            brightness,
            ..Default::default()
        }
    }

    pub fn casts_shadows(&self) -> bool {
        self.enabled && self.cast_shadow
    }

    /// World to light clip space, looking along `direction` at the origin
    /// from the middle of the shadow depth range
    pub fn view_projection(&self) -> Mat4 {
        let direction = self.direction.try_normalize().unwrap_or(-Vec3::Y);
        let up = if direction.dot(Vec3::Y).abs() > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let eye = -direction * (self.shadow_far * 0.5);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, up);
        let zoom = self.shadow_zoom;
        let projection = Mat4::orthographic_rh(-zoom, zoom, -zoom, zoom, self.shadow_near, self.shadow_far);
        projection * view
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub brightness: f32,
    pub enabled: bool,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            brightness: 10.0,
            enabled: true,
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, brightness: f32) -> Self {
        Self {
            position,
            color,
            brightness,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_origin_lands_inside_shadow_volume() {
        let light = DirectionalLight::default();
        let clip = light.view_projection() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_straight_down_light_has_valid_matrix() {
        let light = DirectionalLight::new(-Vec3::Y, Vec3::ONE, 1.0);
        assert!(light.view_projection().is_finite());
    }

    #[test]
    fn test_disabled_light_casts_no_shadow() {
        let light = DirectionalLight {
            enabled: false,
            ..Default::default()
        };
        assert!(!light.casts_shadows());
    }
}
