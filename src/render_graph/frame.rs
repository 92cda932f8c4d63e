//! Per-frame data shared with every record callback

use crate::backend::types::Extent2D;
use crate::config::RendererConfig;
use crate::resources::{GpuMesh, ImageId, Material};
use glam::{Mat4, Vec4};
use std::sync::Arc;

/// One mesh submission for the next frame
#[derive(Debug, Clone)]
pub struct MeshDrawEntry {
    pub mesh: Arc<GpuMesh>,
    pub transform: Mat4,
    pub materials: Vec<Arc<Material>>,
    pub submesh_index: usize,
}

impl MeshDrawEntry {
    /// Material of the drawn submesh, falling back to the first one
    pub fn material(&self) -> Option<&Arc<Material>> {
        let index = self
            .mesh
            .submeshes
            .get(self.submesh_index)
            .map_or(0, |s| s.material_index);
        self.materials.get(index).or_else(|| self.materials.first())
    }
}

/// One textured quad submission for the next frame
#[derive(Debug, Clone, Copy)]
pub struct QuadDrawEntry {
    pub transform: Mat4,
    pub image: ImageId,
    pub color: Vec4,
}

/// Everything a frame's passes read besides the resource tables
#[derive(Debug, Clone, Default)]
pub struct FrameData {
    /// Snapshot of the configuration taken when the frame started
    pub config: RendererConfig,
    pub extent: Extent2D,
    pub frame_index: u32,
    pub meshes: Vec<MeshDrawEntry>,
    pub quads: Vec<QuadDrawEntry>,
    /// Camera view with the translation removed
    pub skybox_view: Mat4,
    /// Flipped projection times view, for quads
    pub view_projection: Mat4,
}
