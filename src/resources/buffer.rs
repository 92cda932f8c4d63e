//! GPU buffers and buffer subscriptions

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{BufferId, RendererResources};
use bytemuck::Pod;

/// A fixed-size device buffer
#[derive(Debug)]
pub struct GpuBuffer {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub handle: BufferHandle,
    /// Bumped every time the device buffer is recreated
    pub generation: u64,
}

impl GpuBuffer {
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        size: u64,
        usage: BufferUsage,
    ) -> BackendResult<Self> {
        let handle = backend.create_buffer(&BufferDescriptor {
            label: Some(label.to_string()),
            size,
            usage,
            mapped_at_creation: usage.contains(BufferUsage::MAP_WRITE),
        })?;
        Ok(Self {
            label: label.to_string(),
            size,
            usage,
            handle,
            generation: 0,
        })
    }

    /// Host-visible uniform buffer sized for `T`
    pub fn uniform<T: Pod>(backend: &mut dyn GraphicsBackend, label: &str) -> BackendResult<Self> {
        Self::create(
            backend,
            label,
            std::mem::size_of::<T>() as u64,
            BufferUsage::UNIFORM | BufferUsage::MAP_WRITE,
        )
    }

    /// Host-visible storage buffer of `size` bytes
    pub fn storage(backend: &mut dyn GraphicsBackend, label: &str, size: u64) -> BackendResult<Self> {
        Self::create(
            backend,
            label,
            size,
            BufferUsage::STORAGE | BufferUsage::MAP_WRITE,
        )
    }

    /// Write `data` at `offset`; writes past the end are rejected, never truncated
    pub fn write(
        &self,
        backend: &mut dyn GraphicsBackend,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        let end = offset.checked_add(data.len() as u64);
        if end.map_or(true, |end| end > self.size) {
            return Err(BackendError::BufferWriteOutOfRange {
                label: self.label.clone(),
                offset,
                len: data.len() as u64,
                size: self.size,
            });
        }
        backend.write_buffer(self.handle, offset, data)
    }

    pub fn write_pod<T: Pod>(&self, backend: &mut dyn GraphicsBackend, value: &T) -> BackendResult<()> {
        self.write(backend, 0, bytemuck::bytes_of(value))
    }

    /// Replace the device buffer with a fresh one of the same size
    pub fn recreate(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        backend.destroy_buffer(self.handle);
        self.handle = backend.create_buffer(&BufferDescriptor {
            label: Some(self.label.clone()),
            size: self.size,
            usage: self.usage,
            mapped_at_creation: self.usage.contains(BufferUsage::MAP_WRITE),
        })?;
        self.generation += 1;
        Ok(())
    }

    /// Recreate with a new size; previous contents are lost
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, size: u64) -> BackendResult<()> {
        self.size = size;
        self.recreate(backend)
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_buffer(self.handle);
    }
}

type BufferEncoder<E> = Box<dyn Fn(&E) -> Vec<u8>>;

/// Buffers rewritten whenever an event of type `E` is broadcast
///
/// Each subscriber encodes the event into the full contents of its buffer.
pub struct BufferSubscriptions<E: ?Sized> {
    subscribers: Vec<(BufferId, BufferEncoder<E>)>,
}

impl<E: ?Sized> Default for BufferSubscriptions<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<E: ?Sized> BufferSubscriptions<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, buffer: BufferId, encode: impl Fn(&E) -> Vec<u8> + 'static) {
        self.subscribers.push((buffer, Box::new(encode)));
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Write every subscribed buffer, in subscription order
    pub fn notify(
        &self,
        event: &E,
        resources: &RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        for (buffer, encode) in &self.subscribers {
            let bytes = encode(event);
            resources.buffer(*buffer).write(backend, 0, &bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn test_out_of_range_write_is_rejected() {
        let mut backend = HeadlessBackend::new(Extent2D::new(8, 8));
        let buffer = GpuBuffer::storage(&mut backend, "lights", 16).unwrap();

        buffer.write(&mut backend, 8, &[0xff; 8]).unwrap();
        let err = buffer.write(&mut backend, 12, &[0; 8]).unwrap_err();
        assert!(matches!(
            err,
            BackendError::BufferWriteOutOfRange { offset: 12, len: 8, size: 16, .. }
        ));
        assert_eq!(&backend.buffer_contents(buffer.handle).unwrap()[8..], &[0xff; 8]);
    }

    #[test]
    fn test_recreate_bumps_generation() {
        let mut backend = HeadlessBackend::new(Extent2D::new(8, 8));
        let mut buffer = GpuBuffer::uniform::<[f32; 4]>(&mut backend, "params").unwrap();
        let old = buffer.handle;

        buffer.recreate(&mut backend).unwrap();
        assert_ne!(buffer.handle, old);
        assert_eq!(buffer.generation, 1);
        assert_eq!(backend.live_buffer_count(), 1);
    }

    #[test]
    fn test_subscriptions_write_in_order() {
        let mut backend = HeadlessBackend::new(Extent2D::new(8, 8));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let a = resources.add_buffer(GpuBuffer::uniform::<u32>(&mut backend, "a").unwrap());
        let b = resources.add_buffer(GpuBuffer::uniform::<u32>(&mut backend, "b").unwrap());

        let mut subscriptions = BufferSubscriptions::<u32>::new();
        subscriptions.subscribe(a, |v| bytemuck::bytes_of(v).to_vec());
        subscriptions.subscribe(b, |v| bytemuck::bytes_of(&(v * 2)).to_vec());
        subscriptions.notify(&21, &resources, &mut backend).unwrap();

        let read = |id: BufferId| {
            let bytes = backend.buffer_contents(resources.buffer(id).handle).unwrap();
            u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        };
        assert_eq!(read(a), 21);
        assert_eq!(read(b), 42);
    }
}
