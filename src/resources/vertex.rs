//! Vertex attribute masks and interleaved vertex buffers

use crate::backend::types::{VertexAttribute, VertexBufferLayout, VertexFormat};
use bitflags::bitflags;
use glam::{Vec2, Vec3, Vec4};

bitflags! {
    /// Vertex attributes a shader consumes or a buffer carries.
    ///
    /// Interleaving always follows declaration order, so two buffers with the
    /// same mask share one layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct VertexAttributes: u32 {
        const POSITION = 1 << 0;
        const POSITION_2D = 1 << 1;
        const UV = 1 << 2;
        const COLOR = 1 << 3;
        const NORMAL = 1 << 4;
        const TANGENT = 1 << 5;
    }
}

impl VertexAttributes {
    /// Format of a single-bit attribute. Multi-bit masks return `None`.
    pub fn format(self) -> Option<VertexFormat> {
        let format = if self == Self::POSITION || self == Self::NORMAL {
            VertexFormat::Float32x3
        } else if self == Self::POSITION_2D || self == Self::UV {
            VertexFormat::Float32x2
        } else if self == Self::COLOR || self == Self::TANGENT {
            VertexFormat::Float32x4
        } else {
            return None;
        };
        Some(format)
    }

    /// Size of one interleaved vertex in bytes
    pub fn stride(self) -> u64 {
        self.iter()
            .filter_map(|a| a.format())
            .map(|f| f.size())
            .sum()
    }

    /// Byte offset of `attribute` inside a vertex interleaved with this mask
    pub fn offset_of(self, attribute: VertexAttributes) -> Option<u64> {
        if !self.contains(attribute) {
            return None;
        }
        let mut offset = 0;
        for a in self.iter() {
            if a == attribute {
                return Some(offset);
            }
            offset += a.format().map(|f| f.size()).unwrap_or(0);
        }
        None
    }

    /// Layout that reads `shader` attributes out of a buffer interleaved with
    /// `self`. Locations are assigned sequentially over the shader's mask.
    /// Returns `None` when the buffer lacks something the shader reads.
    pub fn layout_for_shader(self, shader: VertexAttributes) -> Option<VertexBufferLayout> {
        if !self.contains(shader) {
            return None;
        }
        let attributes = shader
            .iter()
            .enumerate()
            .filter_map(|(location, a)| {
                Some(VertexAttribute {
                    location: location as u32,
                    format: a.format()?,
                    offset: self.offset_of(a)?,
                })
            })
            .collect();
        Some(VertexBufferLayout {
            array_stride: self.stride(),
            attributes,
        })
    }
}

/// Per-attribute vertex arrays, as handed over by mesh loaders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexBufferDataCreateInfo {
    pub positions_3d: Vec<Vec3>,
    pub positions_2d: Vec<Vec2>,
    pub tex_coords: Vec<Vec2>,
    pub colors: Vec<Vec4>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec4>,
}

impl VertexBufferDataCreateInfo {
    /// Attributes that have data
    pub fn attributes(&self) -> VertexAttributes {
        let mut attributes = VertexAttributes::empty();
        attributes.set(VertexAttributes::POSITION, !self.positions_3d.is_empty());
        attributes.set(VertexAttributes::POSITION_2D, !self.positions_2d.is_empty());
        attributes.set(VertexAttributes::UV, !self.tex_coords.is_empty());
        attributes.set(VertexAttributes::COLOR, !self.colors.is_empty());
        attributes.set(VertexAttributes::NORMAL, !self.normals.is_empty());
        attributes.set(VertexAttributes::TANGENT, !self.tangents.is_empty());
        attributes
    }

    pub fn vertex_count(&self) -> usize {
        self.positions_3d.len().max(self.positions_2d.len())
    }
}

/// Vertices interleaved for one attribute mask
#[derive(Debug, Clone, PartialEq)]
pub struct VertexBufferData {
    pub attributes: VertexAttributes,
    pub vertex_count: u32,
    data: Vec<f32>,
}

impl VertexBufferData {
    /// Interleave `info` using `attributes`. Attributes the create info has no
    /// data for are zero-filled; they are reported back so callers can warn.
    pub fn new(info: &VertexBufferDataCreateInfo, attributes: VertexAttributes) -> (Self, VertexAttributes) {
        let vertex_count = info.vertex_count();
        let missing = attributes - info.attributes();
        let floats_per_vertex = (attributes.stride() / 4) as usize;
        let mut data = Vec::with_capacity(vertex_count * floats_per_vertex);

        for i in 0..vertex_count {
            for attribute in attributes.iter() {
                if attribute == VertexAttributes::POSITION {
                    let v = info.positions_3d.get(i).copied().unwrap_or(Vec3::ZERO);
                    data.extend_from_slice(&v.to_array());
                } else if attribute == VertexAttributes::POSITION_2D {
                    let v = info.positions_2d.get(i).copied().unwrap_or(Vec2::ZERO);
                    data.extend_from_slice(&v.to_array());
                } else if attribute == VertexAttributes::UV {
                    let v = info.tex_coords.get(i).copied().unwrap_or(Vec2::ZERO);
                    data.extend_from_slice(&v.to_array());
                } else if attribute == VertexAttributes::COLOR {
                    let v = info.colors.get(i).copied().unwrap_or(Vec4::ONE);
                    data.extend_from_slice(&v.to_array());
                } else if attribute == VertexAttributes::NORMAL {
                    let v = info.normals.get(i).copied().unwrap_or(Vec3::Y);
                    data.extend_from_slice(&v.to_array());
                } else if attribute == VertexAttributes::TANGENT {
                    let v = info.tangents.get(i).copied().unwrap_or(Vec4::X);
                    data.extend_from_slice(&v.to_array());
                }
            }
        }

        (
            Self {
                attributes,
                vertex_count: vertex_count as u32,
                data,
            },
            missing,
        )
    }

    pub fn stride(&self) -> u64 {
        self.attributes.stride()
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_and_offsets() {
        let mask = VertexAttributes::POSITION | VertexAttributes::UV | VertexAttributes::NORMAL;
        assert_eq!(mask.stride(), 12 + 8 + 12);
        assert_eq!(mask.offset_of(VertexAttributes::POSITION), Some(0));
        assert_eq!(mask.offset_of(VertexAttributes::UV), Some(12));
        assert_eq!(mask.offset_of(VertexAttributes::NORMAL), Some(20));
        assert_eq!(mask.offset_of(VertexAttributes::COLOR), None);
    }

    #[test]
    fn test_layout_for_subset_keeps_buffer_stride() {
        let buffer = VertexAttributes::POSITION | VertexAttributes::UV | VertexAttributes::NORMAL;
        let layout = buffer
            .layout_for_shader(VertexAttributes::POSITION | VertexAttributes::NORMAL)
            .unwrap();
        assert_eq!(layout.array_stride, 32);
        assert_eq!(layout.attributes.len(), 2);
        assert_eq!(layout.attributes[1].location, 1);
        assert_eq!(layout.attributes[1].offset, 20);

        assert!(buffer.layout_for_shader(VertexAttributes::COLOR).is_none());
    }

    #[test]
    fn test_interleave_zero_fills_missing() {
        let info = VertexBufferDataCreateInfo {
            positions_3d: vec![Vec3::new(1.0, 2.0, 3.0)],
            tex_coords: vec![Vec2::new(0.5, 0.25)],
            ..Default::default()
        };
        let mask = VertexAttributes::POSITION | VertexAttributes::UV | VertexAttributes::NORMAL;
        let (data, missing) = VertexBufferData::new(&info, mask);
        assert_eq!(missing, VertexAttributes::NORMAL);
        assert_eq!(data.vertex_count, 1);
        let floats: &[f32] = bytemuck::cast_slice(data.bytes());
        assert_eq!(floats, &[1.0, 2.0, 3.0, 0.5, 0.25, 0.0, 1.0, 0.0]);
    }
}
