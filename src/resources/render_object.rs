//! Render objects: geometry placed in the world with a material

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::table::MaterialID;
use crate::resources::vertex::{VertexAttributes, VertexBufferData, VertexBufferDataCreateInfo};
use glam::Mat4;

/// Everything needed to create a render object
#[derive(Debug, Clone)]
pub struct RenderObjectCreateInfo {
    pub name: String,
    pub material_id: MaterialID,
    pub vertex_data: VertexBufferDataCreateInfo,
    pub indices: Option<Vec<u32>>,
    pub transform: Mat4,
    pub visible: bool,
    /// Grid, gizmos and other geometry that never takes part in lighting
    pub editor_object: bool,
    pub cull_face: CullMode,
    pub depth_test_func: CompareFunction,
    pub depth_write: bool,
    pub topology: PrimitiveTopology,
}

impl Default for RenderObjectCreateInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            material_id: MaterialID::INVALID,
            vertex_data: VertexBufferDataCreateInfo::default(),
            indices: None,
            transform: Mat4::IDENTITY,
            visible: true,
            editor_object: false,
            cull_face: CullMode::Back,
            depth_test_func: CompareFunction::GreaterEqual,
            depth_write: true,
            topology: PrimitiveTopology::TriangleList,
        }
    }
}

impl RenderObjectCreateInfo {
    pub fn new(name: &str, material_id: MaterialID, vertex_data: VertexBufferDataCreateInfo) -> Self {
        Self {
            name: name.to_string(),
            material_id,
            vertex_data,
            ..Default::default()
        }
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }
}

/// A render object table entry
#[derive(Debug, Clone)]
pub struct RenderObject {
    pub name: String,
    pub material_id: MaterialID,
    pub transform: Mat4,
    pub visible: bool,
    pub editor_object: bool,
    pub cull_face: CullMode,
    pub depth_test_func: CompareFunction,
    pub depth_write: bool,
    pub topology: PrimitiveTopology,

    /// Kept so the object can be re-interleaved when its material changes
    /// to a shader with a different attribute mask
    pub vertex_source: VertexBufferDataCreateInfo,
    pub vertex_attributes: VertexAttributes,
    pub vertex_count: u32,
    pub vertex_buffer: Option<BufferHandle>,
    pub indices: Option<Vec<u32>>,
    pub index_buffer: Option<BufferHandle>,
}

impl RenderObject {
    pub fn from_create_info(info: RenderObjectCreateInfo) -> Self {
        Self {
            name: info.name,
            material_id: info.material_id,
            transform: info.transform,
            visible: info.visible,
            editor_object: info.editor_object,
            cull_face: info.cull_face,
            depth_test_func: info.depth_test_func,
            depth_write: info.depth_write,
            topology: info.topology,
            vertex_source: info.vertex_data,
            vertex_attributes: VertexAttributes::empty(),
            vertex_count: 0,
            vertex_buffer: None,
            indices: info.indices,
            index_buffer: None,
        }
    }

    pub fn has_vertex_data(&self) -> bool {
        self.vertex_count > 0 && self.vertex_buffer.is_some()
    }

    pub fn index_count(&self) -> u32 {
        self.indices.as_ref().map_or(0, |i| i.len() as u32)
    }

    /// Interleave the stored vertex arrays for `attributes` and (re)create the
    /// GPU buffers. Returns the attributes that had to be zero-filled.
    pub fn upload<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        attributes: VertexAttributes,
    ) -> BackendResult<VertexAttributes> {
        self.release(backend);

        let (data, missing) = VertexBufferData::new(&self.vertex_source, attributes);
        self.vertex_attributes = attributes;
        if data.is_empty() {
            return Ok(missing);
        }

        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor::vertex(&format!("{} vertices", self.name), data.bytes().len() as u64),
            data.bytes(),
        )?;
        self.vertex_buffer = Some(vertex_buffer);
        self.vertex_count = data.vertex_count;

        if let Some(indices) = self.indices.as_ref().filter(|i| !i.is_empty()) {
            let bytes: &[u8] = bytemuck::cast_slice(indices);
            let index_buffer = backend.create_buffer_init(
                &BufferDescriptor::index(&format!("{} indices", self.name), bytes.len() as u64),
                bytes,
            )?;
            self.index_buffer = Some(index_buffer);
        }

        Ok(missing)
    }

    /// Destroy the GPU buffers, keeping the CPU-side vertex arrays
    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(buffer) = self.vertex_buffer.take() {
            backend.destroy_buffer(buffer);
        }
        if let Some(buffer) = self.index_buffer.take() {
            backend.destroy_buffer(buffer);
        }
        self.vertex_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use glam::Vec3;

    fn triangle() -> VertexBufferDataCreateInfo {
        VertexBufferDataCreateInfo {
            positions_3d: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            ..Default::default()
        }
    }

    #[test]
    fn test_upload_creates_buffers() {
        let mut backend = RecordingBackend::new(16, 16);
        let info = RenderObjectCreateInfo::new("tri", MaterialID(0), triangle()).with_indices(vec![0, 1, 2]);
        let mut object = RenderObject::from_create_info(info);
        assert!(!object.has_vertex_data());

        let missing = object
            .upload(&mut backend, VertexAttributes::POSITION | VertexAttributes::NORMAL)
            .unwrap();
        assert_eq!(missing, VertexAttributes::NORMAL);
        assert!(object.has_vertex_data());
        assert_eq!(object.vertex_count, 3);
        assert_eq!(object.index_count(), 3);
        assert_eq!(backend.live_buffer_count(), 2);

        object.release(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
        assert!(!object.has_vertex_data());
    }

    #[test]
    fn test_empty_vertex_data_uploads_nothing() {
        let mut backend = RecordingBackend::new(16, 16);
        let info = RenderObjectCreateInfo::new("empty", MaterialID(0), VertexBufferDataCreateInfo::default());
        let mut object = RenderObject::from_create_info(info);
        object.upload(&mut backend, VertexAttributes::POSITION).unwrap();
        assert!(!object.has_vertex_data());
        assert_eq!(backend.live_buffer_count(), 0);
    }
}
