//! Procedural meshes for the engine's own render objects and demos

use crate::backend::types::PrimitiveTopology;
use crate::resources::vertex::VertexBufferDataCreateInfo;
use glam::{Vec2, Vec3, Vec4};

/// Per-attribute vertex arrays plus optional indices
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub vertex_data: VertexBufferDataCreateInfo,
    pub indices: Vec<u32>,
    pub topology: PrimitiveTopology,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertex_data: VertexBufferDataCreateInfo::default(),
            indices: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_data.vertex_count()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Indices for render object creation; `None` for non-indexed meshes
    pub fn indices(&self) -> Option<Vec<u32>> {
        (!self.indices.is_empty()).then(|| self.indices.clone())
    }

    fn push_lit_vertex(&mut self, position: Vec3, normal: Vec3, uv: Vec2, tangent: Vec4) {
        self.vertex_data.positions_3d.push(position);
        self.vertex_data.normals.push(normal);
        self.vertex_data.tex_coords.push(uv);
        self.vertex_data.tangents.push(tangent);
    }

    fn push_line(&mut self, from: Vec3, to: Vec3, color: Vec4) {
        self.vertex_data.positions_3d.extend_from_slice(&[from, to]);
        self.vertex_data.colors.extend_from_slice(&[color, color]);
    }

    /// Unit cube centered at the origin
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];
        for (normal, right) in faces {
            let up = normal.cross(right);
            let corners = [
                (-right - up, Vec2::new(0.0, 1.0)),
                (right - up, Vec2::new(1.0, 1.0)),
                (right + up, Vec2::new(1.0, 0.0)),
                (-right + up, Vec2::new(0.0, 0.0)),
            ];
            let base = mesh.vertex_count() as u32;
            for (offset, uv) in corners {
                mesh.push_lit_vertex((normal + offset) * 0.5, normal, uv, right.extend(1.0));
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);

        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());
                let uv = Vec2::new(segment as f32 / segments as f32, ring as f32 / rings as f32);
                let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos());
                mesh.push_lit_vertex(normal * 0.5, normal.normalize_or_zero(), uv, tangent.extend(1.0));
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        mesh
    }

    /// Plane on the XZ axis facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");
        let subdivisions = subdivisions.max(1);

        let half_width = width / 2.0;
        let half_depth = depth / 2.0;
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let position = Vec3::new(-half_width + x as f32 * step_x, 0.0, -half_depth + z as f32 * step_z);
                let uv = Vec2::new(x as f32 / subdivisions as f32, z as f32 / subdivisions as f32);
                mesh.push_lit_vertex(position, Vec3::Y, uv, Vec4::new(1.0, 0.0, 0.0, 1.0));
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }

    /// A single triangle facing +Z
    pub fn triangle() -> Self {
        let mut mesh = Mesh::new("triangle");
        let corners = [
            (Vec3::new(-0.5, -0.5, 0.0), Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, -0.5, 0.0), Vec2::new(1.0, 1.0)),
            (Vec3::new(0.0, 0.5, 0.0), Vec2::new(0.5, 0.0)),
        ];
        for (position, uv) in corners {
            mesh.push_lit_vertex(position, Vec3::Z, uv, Vec4::new(1.0, 0.0, 0.0, 1.0));
        }
        mesh
    }

    /// Unit quad on the XY plane facing +Z, as two non-indexed triangles.
    /// UV (0, 0) is the top-left corner.
    pub fn quad() -> Self {
        let mut mesh = Mesh::new("quad");
        let corners = [
            (Vec2::new(-0.5, -0.5), Vec2::new(0.0, 1.0)),
            (Vec2::new(0.5, -0.5), Vec2::new(1.0, 1.0)),
            (Vec2::new(0.5, 0.5), Vec2::new(1.0, 0.0)),
            (Vec2::new(-0.5, -0.5), Vec2::new(0.0, 1.0)),
            (Vec2::new(0.5, 0.5), Vec2::new(1.0, 0.0)),
            (Vec2::new(-0.5, 0.5), Vec2::new(0.0, 0.0)),
        ];
        for (position, uv) in corners {
            mesh.vertex_data.positions_3d.push(position.extend(0.0));
            mesh.vertex_data.tex_coords.push(uv);
        }
        mesh
    }

    /// Position-only cube seen from the inside, for skyboxes and cube face
    /// rendering. Draw it without culling.
    pub fn skybox() -> Self {
        let cube = Mesh::cube();
        let mut mesh = Mesh::new("skybox");
        mesh.vertex_data.positions_3d = cube
            .indices
            .iter()
            .map(|&i| cube.vertex_data.positions_3d[i as usize] * 2.0)
            .collect();
        mesh
    }

    /// Three vertices covering the whole viewport. Carries both 3D and 2D
    /// positions so combine and post-process shaders can share it.
    pub fn fullscreen_triangle() -> Self {
        let mut mesh = Mesh::new("fullscreen triangle");
        let corners = [
            (Vec2::new(-1.0, -1.0), Vec2::new(0.0, 1.0)),
            (Vec2::new(3.0, -1.0), Vec2::new(2.0, 1.0)),
            (Vec2::new(-1.0, 3.0), Vec2::new(0.0, -1.0)),
        ];
        for (position, uv) in corners {
            mesh.vertex_data.positions_3d.push(position.extend(0.0));
            mesh.vertex_data.positions_2d.push(position);
            mesh.vertex_data.tex_coords.push(uv);
        }
        mesh
    }

    /// Line-list grid on the XZ plane
    pub fn grid(line_count: u32, spacing: f32, color: Vec4) -> Self {
        let mut mesh = Mesh::new("grid");
        mesh.topology = PrimitiveTopology::LineList;

        let half = line_count as f32 * spacing * 0.5;
        for i in 0..=line_count {
            let offset = -half + i as f32 * spacing;
            mesh.push_line(Vec3::new(offset, 0.0, -half), Vec3::new(offset, 0.0, half), color);
            mesh.push_line(Vec3::new(-half, 0.0, offset), Vec3::new(half, 0.0, offset), color);
        }
        mesh
    }

    /// Red, green and blue lines along the positive axes
    pub fn world_axes(length: f32) -> Self {
        let mut mesh = Mesh::new("world origin");
        mesh.topology = PrimitiveTopology::LineList;
        mesh.push_line(Vec3::ZERO, Vec3::X * length, Vec4::new(1.0, 0.0, 0.0, 1.0));
        mesh.push_line(Vec3::ZERO, Vec3::Y * length, Vec4::new(0.0, 1.0, 0.0, 1.0));
        mesh.push_line(Vec3::ZERO, Vec3::Z * length, Vec4::new(0.0, 0.0, 1.0, 1.0));
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::vertex::VertexAttributes;

    #[test]
    fn test_cube_counts() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert!(cube
            .vertex_data
            .attributes()
            .contains(VertexAttributes::POSITION | VertexAttributes::NORMAL | VertexAttributes::TANGENT));
    }

    #[test]
    fn test_cube_faces_wind_counter_clockwise() {
        let cube = Mesh::cube();
        let p = &cube.vertex_data.positions_3d;
        for tri in cube.indices.chunks(3) {
            let (a, b, c) = (p[tri[0] as usize], p[tri[1] as usize], p[tri[2] as usize]);
            let face_normal = (b - a).cross(c - a).normalize();
            let vertex_normal = cube.vertex_data.normals[tri[0] as usize];
            assert!(face_normal.dot(vertex_normal) > 0.99);
        }
    }

    #[test]
    fn test_sphere_faces_point_outward() {
        let sphere = Mesh::sphere(16, 8);
        let p = &sphere.vertex_data.positions_3d;
        for tri in sphere.indices.chunks(3) {
            let (a, b, c) = (p[tri[0] as usize], p[tri[1] as usize], p[tri[2] as usize]);
            let cross = (b - a).cross(c - a);
            if cross.length() > 1e-6 {
                assert!(cross.dot(a + b + c) > 0.0);
            }
        }
    }

    #[test]
    fn test_skybox_is_position_only() {
        let skybox = Mesh::skybox();
        assert_eq!(skybox.vertex_count(), 36);
        assert_eq!(skybox.vertex_data.attributes(), VertexAttributes::POSITION);
        assert!(skybox.indices().is_none());
    }

    #[test]
    fn test_fullscreen_triangle_covers_viewport() {
        let tri = Mesh::fullscreen_triangle();
        assert_eq!(tri.vertex_count(), 3);
        let attributes = tri.vertex_data.attributes();
        assert!(attributes.contains(VertexAttributes::POSITION | VertexAttributes::POSITION_2D | VertexAttributes::UV));
        assert_eq!(tri.vertex_data.tex_coords[0], Vec2::new(0.0, 1.0));
    }

    #[test]
    fn test_quad_is_two_front_facing_triangles() {
        let quad = Mesh::quad();
        assert_eq!(quad.vertex_count(), 6);
        let p = &quad.vertex_data.positions_3d;
        for tri in p.chunks(3) {
            assert!((tri[1] - tri[0]).cross(tri[2] - tri[0]).z > 0.0);
        }
    }

    #[test]
    fn test_grid_is_line_list() {
        let grid = Mesh::grid(10, 1.0, Vec4::ONE);
        assert_eq!(grid.topology, PrimitiveTopology::LineList);
        assert_eq!(grid.vertex_count(), 11 * 4);
    }
}
