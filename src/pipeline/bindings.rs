//! Bind group layouts, samplers and cached material bind groups
//!
//! Every pipeline uses three groups: the view block (0), the per-draw object
//! block (1) and the material group (2). The material group starts with the
//! material's uniform block and then holds a texture and sampler per texture
//! slot its shader declares, in declaration order.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::uniforms::MaterialUniforms;
use crate::pipeline::GpuResources;
use crate::resources::*;
use std::collections::HashMap;

fn uniform_entry() -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding: 0,
        visibility: ShaderStageFlags::VERTEX_FRAGMENT,
        ty: BindingType::UniformBuffer,
    }
}

/// Layout entries of the material group for a shader's texture slots
pub fn material_layout_entries(slots: &[TextureSlot]) -> Vec<BindGroupLayoutEntry> {
    let mut entries = vec![uniform_entry()];
    for (i, slot) in slots.iter().enumerate() {
        let sample_type = if slot.is_depth() {
            TextureSampleType::Depth
        } else {
            TextureSampleType::Float { filterable: true }
        };
        entries.push(BindGroupLayoutEntry {
            binding: 1 + 2 * i as u32,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
            ty: BindingType::Texture {
                sample_type,
                view_dimension: slot.view_dimension(),
            },
        });
        entries.push(BindGroupLayoutEntry {
            binding: 2 + 2 * i as u32,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
            ty: BindingType::Sampler {
                comparison: slot.is_depth(),
            },
        });
    }
    entries
}

/// Bind group layouts, shared by every pipeline with the same slot signature
pub struct BindingLayouts {
    pub view: BindGroupLayoutHandle,
    pub object: BindGroupLayoutHandle,
    materials: HashMap<Vec<TextureSlot>, BindGroupLayoutHandle>,
}

impl BindingLayouts {
    pub fn new<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        Ok(Self {
            view: backend.create_bind_group_layout(&[uniform_entry()])?,
            object: backend.create_bind_group_layout(&[uniform_entry()])?,
            materials: HashMap::new(),
        })
    }

    pub fn material_layout<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        slots: &[TextureSlot],
    ) -> BackendResult<BindGroupLayoutHandle> {
        if let Some(layout) = self.materials.get(slots) {
            return Ok(*layout);
        }
        let layout = backend.create_bind_group_layout(&material_layout_entries(slots))?;
        self.materials.insert(slots.to_vec(), layout);
        Ok(layout)
    }
}

pub struct Samplers {
    pub linear_clamp: SamplerHandle,
    pub linear_repeat: SamplerHandle,
    pub shadow: SamplerHandle,
}

impl Samplers {
    pub fn new<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        Ok(Self {
            linear_clamp: backend.create_sampler(&SamplerDescriptor {
                label: Some("Linear clamp".into()),
                ..Default::default()
            })?,
            linear_repeat: backend.create_sampler(&SamplerDescriptor::repeat("Linear repeat"))?,
            shadow: backend.create_sampler(&SamplerDescriptor::shadow_comparison("Shadow comparison"))?,
        })
    }

    /// Material maps tile; render targets and environment maps clamp
    pub fn for_slot(&self, slot: TextureSlot) -> SamplerHandle {
        match slot {
            TextureSlot::Albedo
            | TextureSlot::Metallic
            | TextureSlot::Roughness
            | TextureSlot::AmbientOcclusion
            | TextureSlot::Normal => self.linear_repeat,
            TextureSlot::ShadowMap => self.shadow,
            _ => self.linear_clamp,
        }
    }

    pub fn destroy<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.destroy_sampler(self.linear_clamp);
        backend.destroy_sampler(self.linear_repeat);
        backend.destroy_sampler(self.shadow);
    }
}

/// Textures bound when a slot has nothing assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackTextures {
    pub white: TextureID,
    pub flat_normal: TextureID,
    pub black_cube: TextureID,
}

impl FallbackTextures {
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        textures: &mut SlotTable<TextureID, GpuTexture>,
    ) -> BackendResult<Self> {
        let white = GpuTexture::upload(backend, &TextureData::white())?;
        let flat_normal = GpuTexture::upload(backend, &TextureData::flat_normal())?;
        let black_cube = GpuTexture::solid_cube(backend, "black_cube", [0.0, 0.0, 0.0, 1.0])?;
        Ok(Self {
            white: textures.insert_at_lowest_free(white),
            flat_normal: textures.insert_at_lowest_free(flat_normal),
            black_cube: textures.insert_at_lowest_free(black_cube),
        })
    }

    fn for_slot(&self, slot: TextureSlot) -> TextureID {
        match slot.view_dimension() {
            TextureViewDimension::Cube => self.black_cube,
            TextureViewDimension::D2 if slot == TextureSlot::Normal => self.flat_normal,
            TextureViewDimension::D2 => self.white,
        }
    }
}

/// Where the shading material finds its image-based lighting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IblSources {
    pub gbuffer_material: MaterialID,
    /// Last material whose reflection probe maps were captured
    pub active_probe: Option<MaterialID>,
    pub skybox_material: Option<MaterialID>,
}

struct MaterialBindGroup {
    bind_group: BindGroupHandle,
    uniform_buffer: BufferHandle,
}

/// Material bind groups keyed by material and an optional albedo override
/// (sprites reuse one material with many textures)
#[derive(Default)]
pub struct MaterialBindings {
    groups: HashMap<(MaterialID, Option<TextureID>), MaterialBindGroup>,
}

impl MaterialBindings {
    pub fn get(&self, material: MaterialID, albedo_override: Option<TextureID>) -> Option<BindGroupHandle> {
        self.groups
            .get(&(material, albedo_override))
            .map(|g| g.bind_group)
    }

    /// Drop every bind group built for `material`; the next draw rebuilds it
    /// from the material's current state
    pub fn invalidate<B: GraphicsBackend>(&mut self, backend: &mut B, material: MaterialID) {
        let keys: Vec<_> = self
            .groups
            .keys()
            .filter(|(m, _)| *m == material)
            .copied()
            .collect();
        for key in keys {
            if let Some(group) = self.groups.remove(&key) {
                backend.destroy_bind_group(group.bind_group);
                backend.destroy_buffer(group.uniform_buffer);
            }
        }
    }

    /// Drop bind groups that sample `texture` through their albedo override
    pub fn invalidate_override<B: GraphicsBackend>(&mut self, backend: &mut B, texture: TextureID) {
        let keys: Vec<_> = self
            .groups
            .keys()
            .filter(|(_, t)| *t == Some(texture))
            .copied()
            .collect();
        for key in keys {
            if let Some(group) = self.groups.remove(&key) {
                backend.destroy_bind_group(group.bind_group);
                backend.destroy_buffer(group.uniform_buffer);
            }
        }
    }

    pub fn invalidate_all<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for (_, group) in self.groups.drain() {
            backend.destroy_bind_group(group.bind_group);
            backend.destroy_buffer(group.uniform_buffer);
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl GpuResources {
    /// Irradiance and prefiltered maps a material samples, if any resolve
    pub fn ibl_maps(
        &self,
        tables: &ResourceTables,
        material_id: MaterialID,
        material: &Material,
    ) -> (Option<TextureID>, Option<TextureID>) {
        let generated = |source: Option<MaterialID>| source.and_then(|id| tables.materials.get(id)).map(|m| &m.generated);

        if material.irradiance_source.is_some() || material.prefilter_source.is_some() {
            return (
                generated(material.irradiance_source).and_then(|g| g.irradiance),
                generated(material.prefilter_source).and_then(|g| g.prefiltered),
            );
        }

        if material_id == self.ibl.gbuffer_material {
            let source = self
                .ibl
                .active_probe
                .filter(|id| generated(Some(*id)).is_some_and(|g| g.irradiance.is_some()))
                .or(self.ibl.skybox_material);
            let maps = generated(source);
            return (
                maps.and_then(|g| g.irradiance),
                maps.and_then(|g| g.prefiltered),
            );
        }

        (None, None)
    }

    fn resolve_slot(
        &self,
        tables: &ResourceTables,
        material: &Material,
        slot: TextureSlot,
        albedo_override: Option<TextureID>,
        ibl: (Option<TextureID>, Option<TextureID>),
    ) -> TextureID {
        let assigned = match slot {
            TextureSlot::Albedo => albedo_override.or_else(|| material.textures.get(&slot).copied()),
            TextureSlot::Cubemap => material
                .textures
                .get(&slot)
                .copied()
                .or(material.generated.cubemap),
            TextureSlot::Irradiance => ibl.0,
            TextureSlot::Prefiltered => ibl.1,
            TextureSlot::BrdfLut => self.brdf_lut,
            TextureSlot::ShadowMap => return self.targets.shadow_map,
            _ => material.textures.get(&slot).copied(),
        };

        let wants_cube = slot.view_dimension() == TextureViewDimension::Cube;
        match assigned.map(|id| (id, tables.textures.get(id))) {
            Some((id, Some(texture))) if texture.is_cube() == wants_cube => id,
            Some((id, Some(_))) => {
                log::warn!(
                    "Material {}: texture {} has the wrong dimension for {:?}",
                    material.name,
                    id,
                    slot
                );
                self.fallbacks.for_slot(slot)
            }
            Some((id, None)) => {
                log::warn!("Material {}: texture {} for {:?} does not exist", material.name, id, slot);
                self.fallbacks.for_slot(slot)
            }
            None => self.fallbacks.for_slot(slot),
        }
    }

    /// The material's bind group, created and cached on first use
    pub fn material_bind_group<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        tables: &ResourceTables,
        material_id: MaterialID,
        albedo_override: Option<TextureID>,
    ) -> Option<BindGroupHandle> {
        if let Some(group) = self.material_bindings.get(material_id, albedo_override) {
            return Some(group);
        }

        let Some(material) = tables.materials.get(material_id) else {
            log::warn!("No material with ID {}", material_id);
            return None;
        };
        let Some(shader) = tables.shaders.get(material.shader_id) else {
            log::warn!("Material {} has invalid shader {}", material.name, material.shader_id);
            return None;
        };

        let slots = &shader.descriptor.texture_slots;
        let layout = match self.layouts.material_layout(backend, slots) {
            Ok(layout) => layout,
            Err(e) => {
                log::error!("Material layout for {} failed: {}", shader.name(), e);
                return None;
            }
        };

        let ibl = self.ibl_maps(tables, material_id, material);
        let mut resolved = SamplerFlags::empty();
        resolved.set(SamplerFlags::IRRADIANCE, ibl.0.is_some());
        resolved.set(SamplerFlags::PREFILTERED, ibl.1.is_some());
        let uniforms = MaterialUniforms::new(material, resolved, &self.post);
        let bytes = bytemuck::bytes_of(&uniforms);
        let uniform_buffer = match backend.create_buffer_init(
            &BufferDescriptor::uniform(&format!("{} uniforms", material.name), bytes.len() as u64),
            bytes,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::error!("Material {} uniform buffer failed: {}", material.name, e);
                return None;
            }
        };

        let mut entries = vec![(
            0,
            BindGroupEntry::Buffer {
                buffer: uniform_buffer,
                offset: 0,
                size: None,
            },
        )];
        for (i, slot) in slots.iter().enumerate() {
            let texture_id = self.resolve_slot(tables, material, *slot, albedo_override, ibl);
            let Some(texture) = tables.textures.get(texture_id) else {
                log::error!("Fallback texture {} for {:?} is missing", texture_id, slot);
                backend.destroy_buffer(uniform_buffer);
                return None;
            };
            entries.push((1 + 2 * i as u32, BindGroupEntry::Texture(texture.view)));
            entries.push((2 + 2 * i as u32, BindGroupEntry::Sampler(self.samplers.for_slot(*slot))));
        }

        match backend.create_bind_group(layout, &entries) {
            Ok(bind_group) => {
                log::debug!("Created bind group for material {}", material.name);
                self.material_bindings.groups.insert(
                    (material_id, albedo_override),
                    MaterialBindGroup {
                        bind_group,
                        uniform_buffer,
                    },
                );
                Some(bind_group)
            }
            Err(e) => {
                log::error!("Bind group for material {} failed: {}", material.name, e);
                backend.destroy_buffer(uniform_buffer);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_entries_follow_slot_order() {
        let slots = [TextureSlot::Albedo, TextureSlot::ShadowMap, TextureSlot::Irradiance];
        let entries = material_layout_entries(&slots);
        assert_eq!(entries.len(), 7);
        assert_eq!(entries[0].ty, BindingType::UniformBuffer);
        assert_eq!(
            entries[3].ty,
            BindingType::Texture {
                sample_type: TextureSampleType::Depth,
                view_dimension: TextureViewDimension::D2,
            }
        );
        assert_eq!(entries[4].ty, BindingType::Sampler { comparison: true });
        assert_eq!(
            entries[5].ty,
            BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::Cube,
            }
        );
    }

    #[test]
    fn test_fallback_by_slot_dimension() {
        let fallbacks = FallbackTextures {
            white: TextureID(0),
            flat_normal: TextureID(1),
            black_cube: TextureID(2),
        };
        assert_eq!(fallbacks.for_slot(TextureSlot::Albedo), TextureID(0));
        assert_eq!(fallbacks.for_slot(TextureSlot::Normal), TextureID(1));
        assert_eq!(fallbacks.for_slot(TextureSlot::Prefiltered), TextureID(2));
        assert_eq!(fallbacks.for_slot(TextureSlot::CubeFrameBuffer(0)), TextureID(2));
    }
}
