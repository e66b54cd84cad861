//! The four resource tables the renderer owns

use crate::resources::material::Material;
use crate::resources::render_object::RenderObject;
use crate::resources::shader::Shader;
use crate::resources::table::{MaterialID, RenderID, ShaderID, SlotTable, TextureID};
use crate::resources::texture::GpuTexture;

#[derive(Debug, Default)]
pub struct ResourceTables {
    pub shaders: SlotTable<ShaderID, Shader>,
    pub materials: SlotTable<MaterialID, Material>,
    pub objects: SlotTable<RenderID, RenderObject>,
    pub textures: SlotTable<TextureID, GpuTexture>,
}

impl ResourceTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shader_id(&self, name: &str) -> Option<ShaderID> {
        self.shaders
            .iter()
            .find(|(_, s)| s.name() == name)
            .map(|(id, _)| id)
    }

    pub fn material_id(&self, name: &str) -> Option<MaterialID> {
        self.materials
            .iter()
            .find(|(_, m)| m.name == name)
            .map(|(id, _)| id)
    }

    /// Shader a material draws with, if both exist
    pub fn material_shader(&self, material: MaterialID) -> Option<&Shader> {
        self.materials
            .get(material)
            .and_then(|m| self.shaders.get(m.shader_id))
    }

    /// Material an object draws with
    pub fn object_material(&self, object: RenderID) -> Option<&Material> {
        self.objects
            .get(object)
            .and_then(|o| self.materials.get(o.material_id))
    }
}
