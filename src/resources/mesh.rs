//! Mesh geometry, on the CPU and uploaded

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{BufferId, GpuBuffer, RendererResources};
use glam::{Vec2, Vec3, Vec4};
use std::ops::Range;
use std::sync::Arc;

/// Index range of a mesh drawn with a single material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submesh {
    pub indices: Range<u32>,
    pub material_index: usize,
}

/// A mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// Empty means one submesh covering every index
    pub submeshes: Vec<Submesh>,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertices: Vec::new(),
            indices: Vec::new(),
            submeshes: Vec::new(),
        }
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

    fn resolved_submeshes(&self) -> Vec<Submesh> {
        if self.submeshes.is_empty() {
            vec![Submesh {
                indices: 0..self.indices.len() as u32,
                material_index: 0,
            }]
        } else {
            self.submeshes.clone()
        }
    }

    /// Unit cube centered at the origin, also used for the skybox
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");
        // (normal, u axis, v axis) per face
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];
        let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];

        for (normal, u_axis, v_axis) in faces {
            let base = mesh.vertices.len() as u32;
            for (u, v) in corners {
                mesh.vertices.push(Vertex {
                    position: normal * 0.5 + u_axis * u + v_axis * v,
                    normal,
                    uv: Vec2::new(u + 0.5, 0.5 - v),
                    tangent: u_axis.extend(1.0),
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// Plane on the XZ axis
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");
        let subdivisions = subdivisions.max(1);
        let step = Vec2::new(width, depth) / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let uv = Vec2::new(x as f32, z as f32) / subdivisions as f32;
                mesh.vertices.push(Vertex {
                    position: Vec3::new(
                        x as f32 * step.x - width / 2.0,
                        0.0,
                        z as f32 * step.y - depth / 2.0,
                    ),
                    normal: Vec3::Y,
                    uv,
                    tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
                });
            }
        }

        let row = subdivisions + 1;
        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let i = z * row + x;
                mesh.indices
                    .extend_from_slice(&[i, i + row, i + 1, i + 1, i + row, i + row + 1]);
            }
        }
        mesh
    }

    /// Unit quad on the XY plane facing +Z, used for quad draws
    pub fn quad() -> Self {
        let mut mesh = Mesh::new("quad");
        for (x, y) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            mesh.vertices.push(Vertex {
                position: Vec3::new(x, y, 0.0),
                normal: Vec3::Z,
                uv: Vec2::new(x + 0.5, 0.5 - y),
                tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
            });
        }
        mesh.indices = vec![0, 1, 2, 0, 2, 3];
        mesh
    }

    /// Single triangle covering the whole screen in clip space
    pub fn fullscreen_triangle() -> Self {
        let mut mesh = Mesh::new("fullscreen triangle");
        for (x, y) in [(-1.0, -1.0), (3.0, -1.0), (-1.0, 3.0)] {
            mesh.vertices.push(Vertex {
                position: Vec3::new(x, y, 0.0),
                normal: Vec3::Z,
                uv: Vec2::new((x + 1.0) * 0.5, (y + 1.0) * 0.5),
                tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
            });
        }
        mesh.indices = vec![0, 1, 2];
        mesh
    }
}

/// Mesh geometry resident on the device, shared immutably by draw entries
#[derive(Debug)]
pub struct GpuMesh {
    pub name: String,
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub index_count: u32,
    pub submeshes: Vec<Submesh>,
}

impl GpuMesh {
    pub fn upload(
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        mesh: &Mesh,
    ) -> BackendResult<Arc<Self>> {
        let vertices = GpuBuffer::create(
            backend,
            &format!("{} vertices", mesh.name),
            mesh.vertex_bytes().len().max(4) as u64,
            BufferUsage::VERTEX | BufferUsage::MAP_WRITE,
        )?;
        vertices.write(backend, 0, mesh.vertex_bytes())?;
        let indices = GpuBuffer::create(
            backend,
            &format!("{} indices", mesh.name),
            mesh.index_bytes().len().max(4) as u64,
            BufferUsage::INDEX | BufferUsage::MAP_WRITE,
        )?;
        indices.write(backend, 0, mesh.index_bytes())?;

        Ok(Arc::new(Self {
            name: mesh.name.clone(),
            vertex_buffer: resources.add_buffer(vertices),
            index_buffer: resources.add_buffer(indices),
            index_count: mesh.indices.len() as u32,
            submeshes: mesh.resolved_submeshes(),
        }))
    }

    pub fn bind(&self, backend: &mut dyn GraphicsBackend, resources: &RendererResources) {
        backend.bind_vertex_buffer(0, resources.buffer(self.vertex_buffer).handle, 0);
        backend.bind_index_buffer(
            resources.buffer(self.index_buffer).handle,
            0,
            IndexFormat::Uint32,
        );
    }

    /// Draw one submesh; the mesh must be bound. Out-of-range submeshes draw nothing.
    pub fn draw_submesh(&self, backend: &mut dyn GraphicsBackend, submesh: usize) {
        if let Some(submesh) = self.submeshes.get(submesh) {
            backend.draw_indexed(submesh.indices.clone(), 0, 0..1);
        }
    }

    pub fn draw(&self, backend: &mut dyn GraphicsBackend) {
        backend.draw_indexed(0..self.index_count, 0, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn test_cube_faces_point_outwards() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.triangle_count(), 12);
        for vertex in &cube.vertices {
            assert!((vertex.position.dot(vertex.normal) - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_plane_grid() {
        let plane = Mesh::plane(10.0, 10.0, 4);
        assert_eq!(plane.vertices.len(), 25);
        assert_eq!(plane.triangle_count(), 32);
        assert!(plane.indices.iter().all(|&i| (i as usize) < plane.vertices.len()));
    }

    #[test]
    fn test_upload_defaults_to_single_submesh() {
        let mut backend = HeadlessBackend::new(Extent2D::new(8, 8));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let mesh = GpuMesh::upload(&mut resources, &mut backend, &Mesh::quad()).unwrap();

        assert_eq!(mesh.submeshes, vec![Submesh { indices: 0..6, material_index: 0 }]);
        let index_bytes = backend
            .buffer_contents(resources.buffer(mesh.index_buffer).handle)
            .unwrap();
        assert_eq!(index_bytes, Mesh::quad().index_bytes());
    }
}
