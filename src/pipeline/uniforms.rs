//! Uniform blocks shared with `shaders/common.wgsl`
//!
//! Field order and sizes must match the WGSL structs exactly; every member is
//! a multiple of 16 bytes so the Rust and WGSL layouts agree without padding.

use crate::resources::{Material, SamplerFlags};
use crate::scene::{CameraView, DirectionalLight, PointLight, MAX_POINT_LIGHTS};
use crate::PostProcessSettings;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PointLightUniform {
    /// xyz = position, w = enabled
    pub position: Vec4,
    /// rgb = color, w = brightness
    pub color: Vec4,
}

/// Group 0: per-view constants
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub light_view_projection: Mat4,
    /// xyz = camera position, w = exposure
    pub cam_pos: Vec4,
    /// x = time, y = prefilter roughness, z = shadows enabled, w = point light count
    pub params: Vec4,
    /// xyz = direction, w = enabled
    pub dir_light_direction: Vec4,
    /// rgb = color, w = brightness
    pub dir_light_color: Vec4,
    pub point_lights: [PointLightUniform; MAX_POINT_LIGHTS],
    /// xy = size, zw = texel size
    pub screen: Vec4,
}

impl Default for ViewUniforms {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO, 1.0)
    }
}

impl ViewUniforms {
    pub fn new(view: Mat4, projection: Mat4, position: Vec3, exposure: f32) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            light_view_projection: Mat4::IDENTITY,
            cam_pos: position.extend(exposure),
            params: Vec4::ZERO,
            dir_light_direction: Vec4::ZERO,
            dir_light_color: Vec4::ZERO,
            point_lights: [PointLightUniform::default(); MAX_POINT_LIGHTS],
            screen: Vec4::new(1.0, 1.0, 1.0, 1.0),
        }
    }

    pub fn for_camera(camera: &CameraView) -> Self {
        Self::new(camera.view, camera.projection, camera.position, camera.exposure)
    }

    /// Orthographic view for screen-space sprites: x spans `[-aspect, aspect]`
    /// and y spans `[-1, 1]`
    pub fn screen_space(width: u32, height: u32) -> Self {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        let projection = Mat4::orthographic_rh(-aspect, aspect, -1.0, 1.0, -1.0, 1.0);
        Self::new(Mat4::IDENTITY, projection, Vec3::ZERO, 1.0).with_screen(width, height)
    }

    /// Fill in the light block. Point lights past [`MAX_POINT_LIGHTS`] are
    /// dropped; the caller warns about them.
    pub fn with_lights(mut self, directional: Option<&DirectionalLight>, point_lights: &[PointLight]) -> Self {
        if let Some(light) = directional.filter(|l| l.enabled) {
            self.dir_light_direction = light.direction.normalize_or_zero().extend(1.0);
            self.dir_light_color = light.color.extend(light.brightness);
        }
        let mut count = 0;
        for (slot, light) in self.point_lights.iter_mut().zip(point_lights) {
            *slot = PointLightUniform {
                position: light.position.extend(if light.enabled { 1.0 } else { 0.0 }),
                color: light.color.extend(light.brightness),
            };
            count += 1;
        }
        self.params.w = count as f32;
        self
    }

    /// Enable shadow lookups with the given light-space matrix
    pub fn with_shadow(mut self, light_view_projection: Option<Mat4>) -> Self {
        match light_view_projection {
            Some(matrix) => {
                self.light_view_projection = matrix;
                self.params.z = 1.0;
            }
            None => {
                self.light_view_projection = Mat4::IDENTITY;
                self.params.z = 0.0;
            }
        }
        self
    }

    pub fn with_time(mut self, time: f32) -> Self {
        self.params.x = time;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.params.y = roughness;
        self
    }

    pub fn with_screen(mut self, width: u32, height: u32) -> Self {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        self.screen = Vec4::new(w, h, 1.0 / w, 1.0 / h);
        self
    }

    pub fn shadows_enabled(&self) -> bool {
        self.params.z > 0.5
    }
}

/// Group 1: per-draw constants
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectUniforms {
    pub model: Mat4,
    pub model_inv_transpose: Mat4,
    pub color_multiplier: Vec4,
}

impl ObjectUniforms {
    pub fn new(model: Mat4, color_multiplier: Vec4) -> Self {
        Self {
            model,
            model_inv_transpose: model.inverse().transpose(),
            color_multiplier,
        }
    }
}

/// Group 2 binding 0: material constants
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniforms {
    pub const_albedo: Vec4,
    /// x = metallic, y = roughness, z = ao, w = texture scale
    pub const_params: Vec4,
    /// albedo, metallic, roughness, ao
    pub enable_samplers: [u32; 4],
    /// normal, irradiance, prefiltered, brdf lut
    pub enable_samplers2: [u32; 4],
    /// rgb = brightness, w = saturation
    pub grading0: Vec4,
    /// rgb = offset, w = show edges
    pub grading1: Vec4,
}

impl MaterialUniforms {
    /// `ibl` is the subset of IBL inputs that resolved to a real map; a
    /// material asking for irradiance with nothing to sample keeps the
    /// constant ambient term.
    pub fn new(material: &Material, ibl: SamplerFlags, post: &PostProcessSettings) -> Self {
        let flag = |f: SamplerFlags| u32::from(material.samplers.contains(f));
        let ibl_flag = |f: SamplerFlags| u32::from(material.samplers.contains(f) && ibl.contains(f));
        Self {
            const_albedo: material.const_albedo.extend(1.0),
            const_params: Vec4::new(
                material.const_metallic,
                material.const_roughness,
                material.const_ao,
                material.texture_scale,
            ),
            enable_samplers: [
                flag(SamplerFlags::ALBEDO),
                flag(SamplerFlags::METALLIC),
                flag(SamplerFlags::ROUGHNESS),
                flag(SamplerFlags::AO),
            ],
            enable_samplers2: [
                flag(SamplerFlags::NORMAL),
                ibl_flag(SamplerFlags::IRRADIANCE),
                ibl_flag(SamplerFlags::PREFILTERED),
                flag(SamplerFlags::BRDF_LUT),
            ],
            grading0: post.brightness.extend(post.saturation),
            grading1: post.offset.extend(if post.fxaa_show_edges { 1.0 } else { 0.0 }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{MaterialCreateInfo, ShaderID};

    #[test]
    fn test_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<ViewUniforms>(), 4 * 64 + 4 * 16 + 4 * 32 + 16);
        assert_eq!(std::mem::size_of::<ObjectUniforms>(), 144);
        assert_eq!(std::mem::size_of::<MaterialUniforms>(), 96);
    }

    #[test]
    fn test_lights_are_capped() {
        let lights: Vec<PointLight> = (0..6)
            .map(|i| PointLight::new(Vec3::splat(i as f32), Vec3::ONE, 1.0))
            .collect();
        let uniforms = ViewUniforms::default().with_lights(None, &lights);
        assert_eq!(uniforms.params.w, MAX_POINT_LIGHTS as f32);
        assert_eq!(uniforms.point_lights[3].position.x, 3.0);
        assert_eq!(uniforms.dir_light_direction.w, 0.0);
    }

    #[test]
    fn test_shadow_flag() {
        let on = ViewUniforms::default().with_shadow(Some(Mat4::from_scale(Vec3::splat(2.0))));
        assert!(on.shadows_enabled());
        assert!(!on.with_shadow(None).shadows_enabled());
    }

    #[test]
    fn test_irradiance_needs_a_resolved_map() {
        let info = MaterialCreateInfo {
            enable_irradiance_sampler: true,
            enable_prefiltered_map: true,
            ..MaterialCreateInfo::engine("GBuffer material", "deferred_combine")
        };
        let material = Material::from_create_info(&info, ShaderID(0));
        let post = PostProcessSettings::default();

        let without = MaterialUniforms::new(&material, SamplerFlags::empty(), &post);
        assert_eq!(without.enable_samplers2[1], 0);

        let with = MaterialUniforms::new(&material, SamplerFlags::IRRADIANCE | SamplerFlags::PREFILTERED, &post);
        assert_eq!(with.enable_samplers2[1..3], [1, 1]);
    }
}
