//! Materials: a shader plus the constants and textures it is drawn with

use crate::resources::shader::TextureSlot;
use crate::resources::table::{MaterialID, ShaderID, TextureID};
use bitflags::bitflags;
use glam::{Vec3, Vec4};
use std::collections::BTreeMap;

bitflags! {
    /// Texture inputs a material samples instead of its constant fallback
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SamplerFlags: u32 {
        const ALBEDO = 1 << 0;
        const METALLIC = 1 << 1;
        const ROUGHNESS = 1 << 2;
        const AO = 1 << 3;
        const NORMAL = 1 << 4;
        const CUBEMAP = 1 << 5;
        const HDR_EQUIRECTANGULAR = 1 << 6;
        const IRRADIANCE = 1 << 7;
        const PREFILTERED = 1 << 8;
        const BRDF_LUT = 1 << 9;
    }
}

/// Everything needed to create a material
#[derive(Debug, Clone)]
pub struct MaterialCreateInfo {
    pub name: String,
    pub shader_name: String,

    pub const_albedo: Vec3,
    pub const_metallic: f32,
    pub const_roughness: f32,
    pub const_ao: f32,

    pub enable_albedo_sampler: bool,
    pub albedo_texture: Option<TextureID>,
    pub enable_metallic_sampler: bool,
    pub metallic_texture: Option<TextureID>,
    pub enable_roughness_sampler: bool,
    pub roughness_texture: Option<TextureID>,
    pub enable_ao_sampler: bool,
    pub ao_texture: Option<TextureID>,
    pub enable_normal_sampler: bool,
    pub normal_texture: Option<TextureID>,

    pub enable_hdr_equirectangular_sampler: bool,
    pub hdr_equirectangular_texture: Option<TextureID>,
    /// Render the equirectangular texture into a cubemap at creation time
    pub generate_hdr_cubemap_sampler: bool,

    pub enable_cubemap_sampler: bool,
    pub cubemap_texture: Option<TextureID>,
    pub generated_cubemap_size: u32,

    /// Capture the scene around the objects using this material
    pub generate_reflection_probe_maps: bool,
    pub generate_irradiance_sampler: bool,
    pub generated_irradiance_cubemap_size: u32,
    pub generate_prefiltered_map: bool,
    pub generated_prefiltered_map_size: u32,

    pub enable_irradiance_sampler: bool,
    /// Material whose generated irradiance cubemap this one samples
    pub irradiance_sampler_material: Option<MaterialID>,
    pub enable_prefiltered_map: bool,
    pub prefilter_map_material: Option<MaterialID>,
    pub enable_brdf_lut: bool,

    /// Render targets bound to `TextureSlot::FrameBuffer(n)` slots
    pub frame_buffers: Vec<TextureID>,

    pub color_multiplier: Vec4,
    pub texture_scale: f32,
    pub engine_material: bool,
}

impl Default for MaterialCreateInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            shader_name: String::new(),
            const_albedo: Vec3::ONE,
            const_metallic: 0.0,
            const_roughness: 0.5,
            const_ao: 1.0,
            enable_albedo_sampler: false,
            albedo_texture: None,
            enable_metallic_sampler: false,
            metallic_texture: None,
            enable_roughness_sampler: false,
            roughness_texture: None,
            enable_ao_sampler: false,
            ao_texture: None,
            enable_normal_sampler: false,
            normal_texture: None,
            enable_hdr_equirectangular_sampler: false,
            hdr_equirectangular_texture: None,
            generate_hdr_cubemap_sampler: false,
            enable_cubemap_sampler: false,
            cubemap_texture: None,
            generated_cubemap_size: 512,
            generate_reflection_probe_maps: false,
            generate_irradiance_sampler: false,
            generated_irradiance_cubemap_size: 32,
            generate_prefiltered_map: false,
            generated_prefiltered_map_size: 128,
            enable_irradiance_sampler: false,
            irradiance_sampler_material: None,
            enable_prefiltered_map: false,
            prefilter_map_material: None,
            enable_brdf_lut: false,
            frame_buffers: Vec::new(),
            color_multiplier: Vec4::ONE,
            texture_scale: 1.0,
            engine_material: false,
        }
    }
}

impl MaterialCreateInfo {
    pub fn new(name: &str, shader_name: &str) -> Self {
        Self {
            name: name.to_string(),
            shader_name: shader_name.to_string(),
            ..Default::default()
        }
    }

    pub fn engine(name: &str, shader_name: &str) -> Self {
        Self {
            engine_material: true,
            ..Self::new(name, shader_name)
        }
    }

    pub fn with_albedo(mut self, albedo: Vec3) -> Self {
        self.const_albedo = albedo;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.const_metallic = metallic;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.const_roughness = roughness;
        self
    }

    pub fn with_albedo_texture(mut self, texture: TextureID) -> Self {
        self.enable_albedo_sampler = true;
        self.albedo_texture = Some(texture);
        self
    }

    pub fn with_normal_texture(mut self, texture: TextureID) -> Self {
        self.enable_normal_sampler = true;
        self.normal_texture = Some(texture);
        self
    }

    pub fn with_cubemap(mut self, texture: TextureID) -> Self {
        self.enable_cubemap_sampler = true;
        self.cubemap_texture = Some(texture);
        self
    }

    pub fn with_color_multiplier(mut self, color: Vec4) -> Self {
        self.color_multiplier = color;
        self
    }
}

/// Maps generated for a material at creation or capture time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedMaps {
    /// Environment cube: the captured scene or the converted HDR image
    pub cubemap: Option<TextureID>,
    pub irradiance: Option<TextureID>,
    pub prefiltered: Option<TextureID>,
    /// Cube G-buffer targets and depth used while capturing
    pub capture_targets: Vec<TextureID>,
    pub capture_depth: Option<TextureID>,
}

impl GeneratedMaps {
    pub fn all(&self) -> impl Iterator<Item = TextureID> + '_ {
        self.cubemap
            .iter()
            .chain(self.irradiance.iter())
            .chain(self.prefiltered.iter())
            .chain(self.capture_targets.iter())
            .chain(self.capture_depth.iter())
            .copied()
    }
}

/// A material table entry
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub shader_id: ShaderID,

    pub const_albedo: Vec3,
    pub const_metallic: f32,
    pub const_roughness: f32,
    pub const_ao: f32,
    pub texture_scale: f32,
    pub color_multiplier: Vec4,

    pub samplers: SamplerFlags,
    /// Explicitly assigned textures. Slots without one bind a fallback.
    pub textures: BTreeMap<TextureSlot, TextureID>,

    pub generate_hdr_cubemap: bool,
    pub generate_reflection_probe_maps: bool,
    pub generate_irradiance_sampler: bool,
    pub generate_prefiltered_map: bool,
    pub cubemap_size: u32,
    pub irradiance_size: u32,
    pub prefiltered_size: u32,
    pub generated: GeneratedMaps,

    pub irradiance_source: Option<MaterialID>,
    pub prefilter_source: Option<MaterialID>,

    pub engine_material: bool,
}

impl Material {
    /// Build a material for an already resolved shader
    pub fn from_create_info(info: &MaterialCreateInfo, shader_id: ShaderID) -> Self {
        let mut samplers = SamplerFlags::empty();
        let mut textures = BTreeMap::new();

        let inputs = [
            (info.enable_albedo_sampler, info.albedo_texture, SamplerFlags::ALBEDO, TextureSlot::Albedo),
            (info.enable_metallic_sampler, info.metallic_texture, SamplerFlags::METALLIC, TextureSlot::Metallic),
            (info.enable_roughness_sampler, info.roughness_texture, SamplerFlags::ROUGHNESS, TextureSlot::Roughness),
            (info.enable_ao_sampler, info.ao_texture, SamplerFlags::AO, TextureSlot::AmbientOcclusion),
            (info.enable_normal_sampler, info.normal_texture, SamplerFlags::NORMAL, TextureSlot::Normal),
            (info.enable_cubemap_sampler, info.cubemap_texture, SamplerFlags::CUBEMAP, TextureSlot::Cubemap),
            (
                info.enable_hdr_equirectangular_sampler,
                info.hdr_equirectangular_texture,
                SamplerFlags::HDR_EQUIRECTANGULAR,
                TextureSlot::HdrEquirectangular,
            ),
        ];
        for (enabled, texture, flag, slot) in inputs {
            match (enabled, texture) {
                (true, Some(texture)) => {
                    samplers |= flag;
                    textures.insert(slot, texture);
                }
                (true, None) => log::warn!(
                    "Material {}: {:?} sampler enabled without a texture; using constant value",
                    info.name,
                    slot
                ),
                (false, _) => {}
            }
        }

        for (i, texture) in info.frame_buffers.iter().enumerate() {
            textures.insert(TextureSlot::FrameBuffer(i as u8), *texture);
        }

        samplers.set(SamplerFlags::IRRADIANCE, info.enable_irradiance_sampler);
        samplers.set(SamplerFlags::PREFILTERED, info.enable_prefiltered_map);
        samplers.set(SamplerFlags::BRDF_LUT, info.enable_brdf_lut);

        Self {
            name: info.name.clone(),
            shader_id,
            const_albedo: info.const_albedo,
            const_metallic: info.const_metallic,
            const_roughness: info.const_roughness,
            const_ao: info.const_ao,
            texture_scale: info.texture_scale,
            color_multiplier: info.color_multiplier,
            samplers,
            textures,
            generate_hdr_cubemap: info.generate_hdr_cubemap_sampler,
            generate_reflection_probe_maps: info.generate_reflection_probe_maps,
            generate_irradiance_sampler: info.generate_irradiance_sampler,
            generate_prefiltered_map: info.generate_prefiltered_map,
            cubemap_size: info.generated_cubemap_size.max(1),
            irradiance_size: info.generated_irradiance_cubemap_size.max(1),
            prefiltered_size: info.generated_prefiltered_map_size.max(1),
            generated: GeneratedMaps::default(),
            irradiance_source: info.irradiance_sampler_material,
            prefilter_source: info.prefilter_map_material,
            engine_material: info.engine_material,
        }
    }

    pub fn uses_texture(&self, texture: TextureID) -> bool {
        self.textures.values().any(|t| *t == texture) || self.generated.all().any(|t| t == texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_sampler_without_texture_stays_constant() {
        let info = MaterialCreateInfo {
            enable_albedo_sampler: true,
            ..MaterialCreateInfo::new("rusty", "pbr")
        };
        let material = Material::from_create_info(&info, ShaderID(4));
        assert!(!material.samplers.contains(SamplerFlags::ALBEDO));
        assert!(material.textures.is_empty());
    }

    #[test]
    fn test_textures_are_keyed_by_slot() {
        let info = MaterialCreateInfo::new("brick", "pbr")
            .with_albedo_texture(TextureID(3))
            .with_normal_texture(TextureID(5));
        let material = Material::from_create_info(&info, ShaderID(4));
        assert_eq!(material.textures.get(&TextureSlot::Albedo), Some(&TextureID(3)));
        assert_eq!(material.textures.get(&TextureSlot::Normal), Some(&TextureID(5)));
        assert!(material.samplers.contains(SamplerFlags::ALBEDO | SamplerFlags::NORMAL));
        assert!(material.uses_texture(TextureID(5)));
    }

    #[test]
    fn test_frame_buffers_fill_numbered_slots() {
        let info = MaterialCreateInfo {
            frame_buffers: vec![TextureID(10), TextureID(11), TextureID(12)],
            ..MaterialCreateInfo::engine("GBuffer material", "deferred_combine")
        };
        let material = Material::from_create_info(&info, ShaderID(0));
        assert_eq!(material.textures.get(&TextureSlot::FrameBuffer(2)), Some(&TextureID(12)));
        assert!(material.engine_material);
    }
}
