//! Mesh data and GPU meshes

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};

use crate::backend::types::*;
use crate::resources::{Release, ReleaseQueue};

/// CPU-side vertex and index data
#[derive(Debug, Clone)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl MeshData {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Triangle corners transformed to world space
    pub fn world_triangles(&self, world: &Mat4) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        let world = *world;
        self.indices.chunks_exact(3).filter_map(move |tri| {
            let corner = |i: u32| {
                self.vertices
                    .get(i as usize)
                    .map(|v| world.transform_point3(v.position))
            };
            Some([corner(tri[0])?, corner(tri[1])?, corner(tri[2])?])
        })
    }

    /// Append a `columns` x `rows` grid of vertices produced by `surface`,
    /// which maps a uv in `[0, 1]^2` to position, normal and tangent.
    ///
    /// Triangles wind counter-clockwise around the normal when `d/dv x d/du`
    /// points along it.
    fn push_patch(&mut self, columns: u32, rows: u32, surface: impl Fn(Vec2) -> (Vec3, Vec3, Vec3)) {
        let columns = columns.max(1);
        let rows = rows.max(1);
        let base = self.vertices.len() as u32;
        for row in 0..=rows {
            for column in 0..=columns {
                let uv = Vec2::new(column as f32 / columns as f32, row as f32 / rows as f32);
                let (position, normal, tangent) = surface(uv);
                self.vertices.push(Vertex {
                    position,
                    normal,
                    uv,
                    tangent: tangent.extend(1.0),
                });
            }
        }
        let stride = columns + 1;
        for row in 0..rows {
            for column in 0..columns {
                let top_left = base + row * stride + column;
                let bottom_left = top_left + stride;
                self.indices.extend_from_slice(&[
                    top_left,
                    bottom_left,
                    top_left + 1,
                    top_left + 1,
                    bottom_left,
                    bottom_left + 1,
                ]);
            }
        }
    }

    /// Unit cube centered on the origin, four vertices per face
    pub fn cube() -> Self {
        // (normal, u axis, v axis)
        const FACES: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::NEG_Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::NEG_Y),
            (Vec3::X, Vec3::NEG_Z, Vec3::NEG_Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::NEG_Y),
            (Vec3::Y, Vec3::X, Vec3::Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::NEG_Z),
        ];
        let mut data = MeshData::new("cube");
        for (normal, u_axis, v_axis) in FACES {
            data.push_patch(1, 1, |uv| {
                let position = normal * 0.5 + (uv.x - 0.5) * u_axis + (uv.y - 0.5) * v_axis;
                (position, normal, u_axis)
            });
        }
        data
    }

    /// Sphere of diameter 1, `segments` around and `rings` from pole to pole
    pub fn sphere(segments: u32, rings: u32) -> Self {
        use std::f32::consts::{PI, TAU};

        let mut data = MeshData::new("sphere");
        data.push_patch(segments.max(3), rings.max(2), |uv| {
            let (sin_theta, cos_theta) = (uv.x * TAU).sin_cos();
            let (sin_phi, cos_phi) = (uv.y * PI).sin_cos();
            let normal = Vec3::new(sin_phi * cos_theta, cos_phi, -sin_phi * sin_theta);
            let tangent = Vec3::new(-sin_theta, 0.0, -cos_theta);
            (normal * 0.5, normal, tangent)
        });
        data
    }

    /// `width` x `depth` plane in XZ facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut data = MeshData::new("plane");
        data.push_patch(subdivisions, subdivisions, |uv| {
            let position = Vec3::new((uv.x - 0.5) * width, 0.0, (uv.y - 0.5) * depth);
            (position, Vec3::Y, Vec3::X)
        });
        data
    }

    /// Unit quad in XY facing +Z
    pub fn quad() -> Self {
        let mut data = MeshData::new("quad");
        data.push_patch(1, 1, |uv| (Vec3::new(uv.x - 0.5, 0.5 - uv.y, 0.0), Vec3::Z, Vec3::X));
        data
    }
}

/// Identity of a GPU mesh, unique per device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub(crate) u64);

/// A mesh uploaded to the GPU.
///
/// Keeps its CPU data around for consumers that need triangles on the host
/// (the path tracer uploads them into its own buffers).
#[derive(Debug)]
pub struct Mesh {
    id: MeshId,
    binding: MeshBinding,
    vertex_count: u32,
    index_count: u32,
    data: Arc<MeshData>,
    releases: ReleaseQueue,
}

impl Mesh {
    pub(crate) fn new(
        id: MeshId,
        binding: MeshBinding,
        data: Arc<MeshData>,
        releases: ReleaseQueue,
    ) -> Self {
        Self {
            id,
            binding,
            vertex_count: data.vertex_count() as u32,
            index_count: data.index_count() as u32,
            data,
            releases,
        }
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn binding(&self) -> &MeshBinding {
        &self.binding
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.binding.topology
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn data(&self) -> &MeshData {
        &self.data
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.releases.push(Release::Buffer(self.binding.vertex_buffer));
        if let Some((buffer, _)) = self.binding.index_buffer {
            self.releases.push(Release::Buffer(buffer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::BufferHandle;

    #[test]
    fn cube_has_twelve_triangles() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
    }

    #[test]
    fn generated_triangles_face_along_their_normals() {
        for data in [MeshData::cube(), MeshData::sphere(12, 6), MeshData::plane(2.0, 2.0, 3), MeshData::quad()] {
            for tri in data.indices.chunks_exact(3) {
                let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| data.vertices[i as usize]);
                let face = (b.position - a.position).cross(c.position - a.position);
                if face.length_squared() < 1e-10 {
                    // Degenerate at the sphere's poles.
                    continue;
                }
                let normal = a.normal + b.normal + c.normal;
                assert!(face.dot(normal) > 0.0, "{} winds inward", data.name);
            }
        }
    }

    #[test]
    fn world_triangles_apply_transform() {
        let quad = MeshData::quad();
        let world = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0));
        let tris: Vec<_> = quad.world_triangles(&world).collect();
        assert_eq!(tris.len(), 2);
        assert!(tris.iter().flatten().all(|p| p.z == 5.0));
    }

    #[test]
    fn drop_releases_both_buffers() {
        let queue = ReleaseQueue::new();
        let binding = MeshBinding {
            vertex_buffer: BufferHandle(10),
            index_buffer: Some((BufferHandle(11), IndexFormat::Uint32)),
            layout: Vertex::layout(),
            topology: PrimitiveTopology::TriangleList,
        };
        let mesh = Mesh::new(MeshId(1), binding, Arc::new(MeshData::quad()), queue.clone());
        assert_eq!(mesh.index_count(), 6);
        drop(mesh);
        assert_eq!(queue.len(), 2);
    }
}
