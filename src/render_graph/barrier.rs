//! Prebuilt buffer barrier pairs

use crate::backend::types::*;
use crate::resources::{BufferId, RendererResources};

/// Barriers placed around a pass that rewrites buffers another stage reads
///
/// `before` makes the writer wait for earlier reads, `after` makes later
/// reads wait for the write. Built once when the pass joins the graph and
/// rebuilt only when one of the buffers is recreated.
#[derive(Debug, Clone)]
pub struct BufferBarrierPair {
    buffers: Vec<BufferId>,
    reader: PipelineStages,
    writer: PipelineStages,
    generations: Vec<u64>,
    pub before: PipelineBarrier,
    pub after: PipelineBarrier,
}

impl BufferBarrierPair {
    pub fn build(
        resources: &RendererResources,
        buffers: &[BufferId],
        reader: PipelineStages,
        writer: PipelineStages,
    ) -> Self {
        let mut pair = Self {
            buffers: buffers.to_vec(),
            reader,
            writer,
            generations: Vec::new(),
            before: PipelineBarrier {
                src_stages: reader,
                dst_stages: writer,
                by_region: true,
                buffers: Vec::new(),
                images: Vec::new(),
            },
            after: PipelineBarrier {
                src_stages: writer,
                dst_stages: reader,
                by_region: true,
                buffers: Vec::new(),
                images: Vec::new(),
            },
        };
        pair.rebuild(resources);
        pair
    }

    fn buffer_barriers(
        &self,
        resources: &RendererResources,
        src_access: AccessFlags,
        dst_access: AccessFlags,
    ) -> Vec<BufferBarrier> {
        self.buffers
            .iter()
            .map(|id| {
                let buffer = resources.buffer(*id);
                BufferBarrier {
                    buffer: buffer.handle,
                    src_access,
                    dst_access,
                    offset: 0,
                    size: buffer.size,
                }
            })
            .collect()
    }

    pub fn rebuild(&mut self, resources: &RendererResources) {
        self.before.buffers =
            self.buffer_barriers(resources, AccessFlags::SHADER_READ, AccessFlags::SHADER_WRITE);
        self.after.buffers =
            self.buffer_barriers(resources, AccessFlags::SHADER_WRITE, AccessFlags::SHADER_READ);
        self.generations = self
            .buffers
            .iter()
            .map(|id| resources.buffer(*id).generation)
            .collect();
        log::debug!(
            "Built barriers for {} buffers ({:?} -> {:?})",
            self.buffers.len(),
            self.reader,
            self.writer
        );
    }

    pub fn is_outdated(&self, resources: &RendererResources) -> bool {
        self.buffers
            .iter()
            .zip(&self.generations)
            .any(|(id, generation)| resources.buffer(*id).generation != *generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::resources::GpuBuffer;

    #[test]
    fn test_pair_tracks_recreated_buffers() {
        let mut backend = HeadlessBackend::new(Extent2D::new(8, 8));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let lights = resources.add_buffer(GpuBuffer::storage(&mut backend, "lights", 64).unwrap());
        let grid = resources.add_buffer(GpuBuffer::storage(&mut backend, "grid", 32).unwrap());

        let mut pair = BufferBarrierPair::build(
            &resources,
            &[lights, grid],
            PipelineStages::FRAGMENT_SHADER,
            PipelineStages::COMPUTE_SHADER,
        );
        assert_eq!(pair.before.buffers.len(), 2);
        assert_eq!(pair.before.src_stages, PipelineStages::FRAGMENT_SHADER);
        assert_eq!(pair.after.dst_stages, PipelineStages::FRAGMENT_SHADER);
        assert_eq!(pair.after.buffers[1].size, 32);
        assert!(!pair.is_outdated(&resources));

        resources.buffer_mut(grid).recreate(&mut backend).unwrap();
        assert!(pair.is_outdated(&resources));
        pair.rebuild(&resources);
        assert_eq!(pair.after.buffers[1].buffer, resources.buffer(grid).handle);
        assert!(!pair.is_outdated(&resources));
    }
}
