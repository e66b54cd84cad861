//! Uniform pools, per-frame vertex buffers and engine-owned meshes

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{Mesh, RenderObject, VertexAttributes, VertexBufferData};
use bytemuck::Pod;

struct UniformSlot {
    buffer: BufferHandle,
    bind_group: BindGroupHandle,
}

/// Uniform buffers handed out one per draw (or per view) and recycled at the
/// start of every submission, so no buffer is written twice before the GPU
/// has seen the first write.
pub struct UniformPool {
    label: &'static str,
    size: u64,
    layout: BindGroupLayoutHandle,
    slots: Vec<UniformSlot>,
    next: usize,
}

impl UniformPool {
    pub fn new<T: Pod>(label: &'static str, layout: BindGroupLayoutHandle) -> Self {
        Self {
            label,
            size: std::mem::size_of::<T>() as u64,
            layout,
            slots: Vec::new(),
            next: 0,
        }
    }

    /// Write `value` into the next free buffer and return its bind group
    pub fn acquire<B: GraphicsBackend, T: Pod>(&mut self, backend: &mut B, value: &T) -> Option<BindGroupHandle> {
        let bytes = bytemuck::bytes_of(value);
        debug_assert_eq!(bytes.len() as u64, self.size);

        if self.next == self.slots.len() {
            let buffer = match backend.create_buffer(&BufferDescriptor::uniform(self.label, self.size)) {
                Ok(buffer) => buffer,
                Err(e) => {
                    log::error!("Failed to grow {} pool: {}", self.label, e);
                    return None;
                }
            };
            let entries = [(
                0,
                BindGroupEntry::Buffer {
                    buffer,
                    offset: 0,
                    size: None,
                },
            )];
            let bind_group = match backend.create_bind_group(self.layout, &entries) {
                Ok(group) => group,
                Err(e) => {
                    log::error!("Failed to create {} bind group: {}", self.label, e);
                    backend.destroy_buffer(buffer);
                    return None;
                }
            };
            self.slots.push(UniformSlot { buffer, bind_group });
        }

        let slot = &self.slots[self.next];
        backend.write_buffer(slot.buffer, 0, bytes);
        self.next += 1;
        Some(slot.bind_group)
    }

    /// Make every buffer available again. Call right after beginning a
    /// submission.
    pub fn reset(&mut self) {
        self.next = 0;
    }

    pub fn in_use(&self) -> usize {
        self.next
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for slot in self.slots.drain(..) {
            backend.destroy_bind_group(slot.bind_group);
            backend.destroy_buffer(slot.buffer);
        }
        self.next = 0;
    }
}

/// Vertex buffer rewritten once per frame, grown to the next power of two
pub struct DynamicVertexBuffer {
    label: String,
    buffer: Option<BufferHandle>,
    capacity: u64,
}

impl DynamicVertexBuffer {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            buffer: None,
            capacity: 0,
        }
    }

    pub fn write<B: GraphicsBackend>(&mut self, backend: &mut B, bytes: &[u8]) -> Option<BufferHandle> {
        if bytes.is_empty() {
            return None;
        }
        let needed = bytes.len() as u64;
        if needed > self.capacity || self.buffer.is_none() {
            if let Some(old) = self.buffer.take() {
                backend.destroy_buffer(old);
            }
            let capacity = needed.next_power_of_two().max(256);
            match backend.create_buffer(&BufferDescriptor::vertex(&self.label, capacity)) {
                Ok(buffer) => {
                    self.buffer = Some(buffer);
                    self.capacity = capacity;
                }
                Err(e) => {
                    log::error!("Failed to grow {} to {} bytes: {}", self.label, capacity, e);
                    self.capacity = 0;
                    return None;
                }
            }
        }
        let buffer = self.buffer?;
        backend.write_buffer(buffer, 0, bytes);
        Some(buffer)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(buffer) = self.buffer.take() {
            backend.destroy_buffer(buffer);
        }
        self.capacity = 0;
    }
}

/// Vertex input for one draw, independent of where it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub vertex_buffer: BufferHandle,
    pub attributes: VertexAttributes,
    pub vertex_count: u32,
    pub index_buffer: Option<BufferHandle>,
    pub index_count: u32,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub depth_compare: CompareFunction,
    pub depth_write: bool,
}

impl Geometry {
    pub fn from_object(object: &RenderObject) -> Option<Self> {
        Some(Self {
            vertex_buffer: object.vertex_buffer?,
            attributes: object.vertex_attributes,
            vertex_count: object.vertex_count,
            index_buffer: object.index_buffer,
            index_count: object.index_count(),
            topology: object.topology,
            cull_mode: object.cull_face,
            depth_compare: object.depth_test_func,
            depth_write: object.depth_write,
        })
    }
}

/// Vertices written into a [`DynamicVertexBuffer`] for this frame only:
/// debug lines and glyph quads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamedGeometry {
    pub buffer: BufferHandle,
    pub attributes: VertexAttributes,
    pub vertex_count: u32,
    pub topology: PrimitiveTopology,
}

impl StreamedGeometry {
    /// Stream `vertices` (interleaved as `attributes`) into `target`
    pub fn write<B: GraphicsBackend>(
        backend: &mut B,
        target: &mut DynamicVertexBuffer,
        attributes: VertexAttributes,
        topology: PrimitiveTopology,
        vertices: &[f32],
    ) -> Option<Self> {
        let stride = attributes.stride();
        if stride == 0 {
            return None;
        }
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let buffer = target.write(backend, bytes)?;
        Some(Self {
            buffer,
            attributes,
            vertex_count: (bytes.len() as u64 / stride) as u32,
            topology,
        })
    }

    pub fn geometry(&self, depth_compare: CompareFunction, depth_write: bool) -> Geometry {
        Geometry {
            vertex_buffer: self.buffer,
            attributes: self.attributes,
            vertex_count: self.vertex_count,
            index_buffer: None,
            index_count: 0,
            topology: self.topology,
            cull_mode: CullMode::None,
            depth_compare,
            depth_write,
        }
    }
}

/// A mesh the engine draws without a render object: the full-screen
/// triangle, the sprite quad and the cube used for cube-face rendering
pub struct StaticMesh {
    buffer: BufferHandle,
    attributes: VertexAttributes,
    vertex_count: u32,
    topology: PrimitiveTopology,
}

impl StaticMesh {
    pub fn upload<B: GraphicsBackend>(backend: &mut B, mesh: &Mesh) -> BackendResult<Self> {
        let attributes = mesh.vertex_data.attributes();
        let (data, _) = VertexBufferData::new(&mesh.vertex_data, attributes);
        let buffer = backend.create_buffer_init(
            &BufferDescriptor::vertex(&mesh.name, data.bytes().len() as u64),
            data.bytes(),
        )?;
        Ok(Self {
            buffer,
            attributes,
            vertex_count: data.vertex_count,
            topology: mesh.topology,
        })
    }

    /// Geometry drawn without culling or depth testing
    pub fn geometry(&self) -> Geometry {
        Geometry {
            vertex_buffer: self.buffer,
            attributes: self.attributes,
            vertex_count: self.vertex_count,
            index_buffer: None,
            index_count: 0,
            topology: self.topology,
            cull_mode: CullMode::None,
            depth_compare: CompareFunction::Always,
            depth_write: false,
        }
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        backend.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordedCommand, RecordingBackend};
    use glam::Vec4;

    fn uniform_layout(backend: &mut RecordingBackend) -> BindGroupLayoutHandle {
        backend
            .create_bind_group_layout(&[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::VERTEX_FRAGMENT,
                ty: BindingType::UniformBuffer,
            }])
            .unwrap()
    }

    #[test]
    fn test_pool_reuses_buffers_after_reset() {
        let mut backend = RecordingBackend::new(64, 64);
        let layout = uniform_layout(&mut backend);
        let mut pool = UniformPool::new::<Vec4>("test uniforms", layout);

        let a = pool.acquire(&mut backend, &Vec4::ONE).unwrap();
        let b = pool.acquire(&mut backend, &Vec4::ZERO).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.capacity(), 2);

        pool.reset();
        assert_eq!(pool.acquire(&mut backend, &Vec4::X), Some(a));
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_dynamic_buffer_grows_by_powers_of_two() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut buffer = DynamicVertexBuffer::new("lines");
        assert!(buffer.write(&mut backend, &[]).is_none());

        let first = buffer.write(&mut backend, &[0u8; 100]).unwrap();
        assert_eq!(buffer.capacity(), 256);
        assert_eq!(buffer.write(&mut backend, &[0u8; 200]), Some(first));

        let grown = buffer.write(&mut backend, &[0u8; 300]).unwrap();
        assert_ne!(grown, first);
        assert_eq!(buffer.capacity(), 512);
        assert_eq!(backend.live_buffer_count(), 1);

        let writes = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::WriteBuffer { .. }))
            .count();
        assert_eq!(writes, 3);
    }

    #[test]
    fn test_static_mesh_keeps_every_attribute() {
        let mut backend = RecordingBackend::new(64, 64);
        let mesh = StaticMesh::upload(&mut backend, &Mesh::fullscreen_triangle()).unwrap();
        let geometry = mesh.geometry();
        assert_eq!(geometry.vertex_count, 3);
        assert!(geometry.attributes.contains(VertexAttributes::POSITION | VertexAttributes::POSITION_2D));
        assert_eq!(geometry.cull_mode, CullMode::None);
    }

    #[test]
    fn test_streamed_vertex_count_follows_stride() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut buffer = DynamicVertexBuffer::new("debug lines");
        let attributes = VertexAttributes::POSITION | VertexAttributes::COLOR;
        // two vertices of position + color
        let vertices = [0.0f32; 14];
        let streamed =
            StreamedGeometry::write(&mut backend, &mut buffer, attributes, PrimitiveTopology::LineList, &vertices)
                .unwrap();
        assert_eq!(streamed.vertex_count, 2);
        assert_eq!(streamed.geometry(CompareFunction::GreaterEqual, false).depth_compare, CompareFunction::GreaterEqual);
    }
}
