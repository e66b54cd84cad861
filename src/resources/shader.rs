//! Built-in shader descriptors
//!
//! Every shader is a single WGSL module holding `vs_main` and (except the
//! depth-only shadow shader) `fs_main`. Modules are composed with the shared
//! uniform declarations in `shaders/common.wgsl` before compilation.
//!
//! Bind groups are fixed across all shaders:
//! - group 0: per-view uniforms
//! - group 1: per-object uniforms
//! - group 2: material uniforms at binding 0, then a texture/sampler pair per
//!   entry of [`ShaderDescriptor::texture_slots`] (texture at `1 + 2i`,
//!   sampler at `2 + 2i`)

use crate::backend::types::TextureViewDimension;
use crate::resources::vertex::VertexAttributes;
use bitflags::bitflags;

const COMMON_WGSL: &str = include_str!("../../shaders/common.wgsl");

bitflags! {
    /// Uniform values a shader reads. Constant uniforms are set once per
    /// view, dynamic uniforms once per draw.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Uniforms: u32 {
        const MODEL = 1 << 0;
        const VIEW = 1 << 1;
        const PROJECTION = 1 << 2;
        const VIEW_PROJECTION = 1 << 3;
        const LIGHT_VIEW_PROJECTION = 1 << 4;
        const CAM_POS = 1 << 5;
        const EXPOSURE = 1 << 6;
        const DIR_LIGHT = 1 << 7;
        const POINT_LIGHTS = 1 << 8;
        const TIME = 1 << 9;
        const ROUGHNESS = 1 << 10;
        const TEXEL_SIZE = 1 << 11;
        const COLOR_MULTIPLIER = 1 << 12;
        const CONST_ALBEDO = 1 << 13;
        const CONST_METALLIC = 1 << 14;
        const CONST_ROUGHNESS = 1 << 15;
        const CONST_AO = 1 << 16;
        const TEXTURE_SCALE = 1 << 17;
        const ENABLE_SAMPLERS = 1 << 18;
        const COLOR_GRADING = 1 << 19;
    }
}

/// A texture a material binds for its shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureSlot {
    Albedo,
    Metallic,
    Roughness,
    AmbientOcclusion,
    Normal,
    Cubemap,
    HdrEquirectangular,
    Irradiance,
    Prefiltered,
    BrdfLut,
    ShadowMap,
    /// A 2D render target produced earlier in the frame
    FrameBuffer(u8),
    /// One of a reflection probe's cube G-buffer targets
    CubeFrameBuffer(u8),
}

impl TextureSlot {
    pub fn view_dimension(self) -> TextureViewDimension {
        match self {
            TextureSlot::Cubemap
            | TextureSlot::Irradiance
            | TextureSlot::Prefiltered
            | TextureSlot::CubeFrameBuffer(_) => TextureViewDimension::Cube,
            _ => TextureViewDimension::D2,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureSlot::ShadowMap)
    }
}

/// Immutable description of one shader program and the pass it belongs to
#[derive(Debug, Clone)]
pub struct ShaderDescriptor {
    pub name: &'static str,
    source: &'static str,
    pub vertex_attributes: VertexAttributes,
    pub constant_uniforms: Uniforms,
    pub dynamic_uniforms: Uniforms,
    pub texture_slots: Vec<TextureSlot>,
    /// Drawn into the G-buffer rather than lit in a forward pass
    pub deferred: bool,
    pub translucent: bool,
    pub needs_shadow_map: bool,
    pub needs_irradiance_sampler: bool,
    pub needs_prefiltered_map: bool,
    pub needs_brdf_lut: bool,
    pub depth_write: bool,
    /// Depth-only shaders have no fragment stage
    pub has_fragment_stage: bool,
}

impl ShaderDescriptor {
    fn new(name: &'static str, source: &'static str, vertex_attributes: VertexAttributes) -> Self {
        Self {
            name,
            source,
            vertex_attributes,
            constant_uniforms: Uniforms::empty(),
            dynamic_uniforms: Uniforms::empty(),
            texture_slots: Vec::new(),
            deferred: false,
            translucent: false,
            needs_shadow_map: false,
            needs_irradiance_sampler: false,
            needs_prefiltered_map: false,
            needs_brdf_lut: false,
            depth_write: true,
            has_fragment_stage: true,
        }
    }

    /// WGSL module with the shared declarations prepended
    pub fn source(&self) -> String {
        format!("{}\n{}", COMMON_WGSL, self.source)
    }

    pub fn fragment_entry(&self) -> Option<&'static str> {
        self.has_fragment_stage.then_some("fs_main")
    }

    /// Binding index of `slot`'s texture in group 2
    pub fn texture_binding(&self, slot: TextureSlot) -> Option<u32> {
        self.texture_slots
            .iter()
            .position(|s| *s == slot)
            .map(|i| 1 + 2 * i as u32)
    }
}

/// The engine's shader set, in load order. Shader IDs are indices into this
/// list.
pub fn builtin_shaders() -> Vec<ShaderDescriptor> {
    use TextureSlot as T;
    use VertexAttributes as V;

    let view_constants = Uniforms::VIEW | Uniforms::PROJECTION | Uniforms::VIEW_PROJECTION;
    let mut shaders = Vec::new();

    let mut s = ShaderDescriptor::new(
        "deferred_combine",
        include_str!("../../shaders/deferred_combine.wgsl"),
        V::POSITION | V::UV,
    );
    s.constant_uniforms = Uniforms::CAM_POS
        | Uniforms::EXPOSURE
        | Uniforms::DIR_LIGHT
        | Uniforms::POINT_LIGHTS
        | Uniforms::LIGHT_VIEW_PROJECTION;
    s.dynamic_uniforms = Uniforms::ENABLE_SAMPLERS;
    s.texture_slots = vec![
        T::FrameBuffer(0),
        T::FrameBuffer(1),
        T::FrameBuffer(2),
        T::ShadowMap,
        T::Irradiance,
        T::Prefiltered,
        T::BrdfLut,
    ];
    s.needs_shadow_map = true;
    s.needs_irradiance_sampler = true;
    s.needs_prefiltered_map = true;
    s.needs_brdf_lut = true;
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "deferred_combine_cubemap",
        include_str!("../../shaders/deferred_combine_cubemap.wgsl"),
        V::POSITION,
    );
    s.constant_uniforms = view_constants
        | Uniforms::CAM_POS
        | Uniforms::EXPOSURE
        | Uniforms::DIR_LIGHT
        | Uniforms::POINT_LIGHTS;
    s.dynamic_uniforms = Uniforms::MODEL | Uniforms::ENABLE_SAMPLERS;
    s.texture_slots = vec![
        T::CubeFrameBuffer(0),
        T::CubeFrameBuffer(1),
        T::CubeFrameBuffer(2),
        T::Irradiance,
        T::Prefiltered,
        T::BrdfLut,
    ];
    s.needs_irradiance_sampler = true;
    s.needs_prefiltered_map = true;
    s.needs_brdf_lut = true;
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new("color", include_str!("../../shaders/color.wgsl"), V::POSITION | V::COLOR);
    s.constant_uniforms = view_constants;
    s.dynamic_uniforms = Uniforms::MODEL | Uniforms::COLOR_MULTIPLIER;
    s.translucent = true;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "wireframe",
        include_str!("../../shaders/wireframe.wgsl"),
        V::POSITION,
    );
    s.constant_uniforms = view_constants;
    s.dynamic_uniforms = Uniforms::MODEL | Uniforms::COLOR_MULTIPLIER;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "pbr",
        include_str!("../../shaders/pbr.wgsl"),
        V::POSITION | V::UV | V::NORMAL | V::TANGENT,
    );
    s.constant_uniforms = view_constants;
    s.dynamic_uniforms = Uniforms::MODEL
        | Uniforms::CONST_ALBEDO
        | Uniforms::CONST_METALLIC
        | Uniforms::CONST_ROUGHNESS
        | Uniforms::CONST_AO
        | Uniforms::TEXTURE_SCALE
        | Uniforms::ENABLE_SAMPLERS;
    s.texture_slots = vec![T::Albedo, T::Metallic, T::Roughness, T::AmbientOcclusion, T::Normal];
    s.deferred = true;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "pbr_ws",
        include_str!("../../shaders/pbr_ws.wgsl"),
        V::POSITION | V::NORMAL | V::TANGENT,
    );
    s.constant_uniforms = view_constants;
    s.dynamic_uniforms = Uniforms::MODEL
        | Uniforms::CONST_ALBEDO
        | Uniforms::CONST_METALLIC
        | Uniforms::CONST_ROUGHNESS
        | Uniforms::CONST_AO
        | Uniforms::TEXTURE_SCALE
        | Uniforms::ENABLE_SAMPLERS;
    s.texture_slots = vec![T::Albedo, T::Normal];
    s.deferred = true;
    shaders.push(s);

    let mut s = ShaderDescriptor::new("skybox", include_str!("../../shaders/skybox.wgsl"), V::POSITION);
    s.constant_uniforms = view_constants;
    s.dynamic_uniforms = Uniforms::MODEL | Uniforms::EXPOSURE;
    s.texture_slots = vec![T::Cubemap];
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "equirectangular_to_cube",
        include_str!("../../shaders/equirectangular_to_cube.wgsl"),
        V::POSITION,
    );
    s.constant_uniforms = view_constants;
    s.dynamic_uniforms = Uniforms::MODEL;
    s.texture_slots = vec![T::HdrEquirectangular];
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "irradiance",
        include_str!("../../shaders/irradiance.wgsl"),
        V::POSITION,
    );
    s.constant_uniforms = view_constants;
    s.dynamic_uniforms = Uniforms::MODEL;
    s.texture_slots = vec![T::Cubemap];
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "prefilter",
        include_str!("../../shaders/prefilter.wgsl"),
        V::POSITION,
    );
    s.constant_uniforms = view_constants | Uniforms::ROUGHNESS;
    s.dynamic_uniforms = Uniforms::MODEL;
    s.texture_slots = vec![T::Cubemap];
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new("brdf", include_str!("../../shaders/brdf.wgsl"), V::POSITION | V::UV);
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new("sprite", include_str!("../../shaders/sprite.wgsl"), V::POSITION | V::UV);
    s.constant_uniforms = view_constants;
    s.dynamic_uniforms = Uniforms::MODEL | Uniforms::COLOR_MULTIPLIER | Uniforms::ENABLE_SAMPLERS;
    s.texture_slots = vec![T::Albedo];
    s.translucent = true;
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "post_process",
        include_str!("../../shaders/post_process.wgsl"),
        V::POSITION_2D | V::UV,
    );
    s.constant_uniforms = Uniforms::EXPOSURE;
    s.dynamic_uniforms = Uniforms::COLOR_GRADING;
    s.texture_slots = vec![T::FrameBuffer(0)];
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "post_fxaa",
        include_str!("../../shaders/post_fxaa.wgsl"),
        V::POSITION_2D | V::UV,
    );
    s.constant_uniforms = Uniforms::TEXEL_SIZE;
    s.dynamic_uniforms = Uniforms::COLOR_GRADING;
    s.texture_slots = vec![T::FrameBuffer(0)];
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "font_ss",
        include_str!("../../shaders/font_ss.wgsl"),
        V::POSITION_2D | V::UV | V::COLOR,
    );
    s.texture_slots = vec![T::Albedo];
    s.translucent = true;
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new(
        "font_ws",
        include_str!("../../shaders/font_ws.wgsl"),
        V::POSITION | V::UV | V::COLOR,
    );
    s.constant_uniforms = view_constants;
    s.texture_slots = vec![T::Albedo];
    s.translucent = true;
    s.depth_write = false;
    shaders.push(s);

    let mut s = ShaderDescriptor::new("shadow", include_str!("../../shaders/shadow.wgsl"), V::POSITION);
    s.constant_uniforms = Uniforms::LIGHT_VIEW_PROJECTION;
    s.dynamic_uniforms = Uniforms::MODEL;
    s.has_fragment_stage = false;
    shaders.push(s);

    shaders
}

/// A loaded shader table entry
#[derive(Debug, Clone)]
pub struct Shader {
    pub descriptor: ShaderDescriptor,
}

impl Shader {
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(name: &str) -> ShaderDescriptor {
        builtin_shaders()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap()
    }

    #[test]
    fn test_shader_names_are_unique() {
        let shaders = builtin_shaders();
        let mut names: Vec<_> = shaders.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), shaders.len());
    }

    #[test]
    fn test_combine_flags() {
        let combine = find("deferred_combine");
        assert!(!combine.deferred);
        assert!(!combine.depth_write);
        assert!(combine.needs_shadow_map && combine.needs_brdf_lut);
        assert_eq!(combine.texture_binding(TextureSlot::ShadowMap), Some(7));

        let cubemap = find("deferred_combine_cubemap");
        assert!(!cubemap.needs_shadow_map);
        assert_eq!(cubemap.vertex_attributes, VertexAttributes::POSITION);
    }

    #[test]
    fn test_only_shadow_lacks_fragment_stage() {
        for shader in builtin_shaders() {
            assert_eq!(shader.fragment_entry().is_none(), shader.name == "shadow");
        }
    }

    #[test]
    fn test_pbr_is_deferred() {
        assert!(find("pbr").deferred);
        assert!(find("pbr_ws").deferred);
        assert!(!find("color").deferred);
        assert!(find("color").translucent);
    }

    #[test]
    fn test_source_includes_common_declarations() {
        let source = find("pbr").source();
        assert!(source.contains("struct ViewUniforms"));
        assert!(source.contains("fn vs_main"));
    }
}
