//! Pools of window-sized resources
//!
//! Pool members are recreated when the window extent changes. After the
//! recreation of every changed member, the changed members' callbacks run in
//! registration order so they can re-point descriptor sets at the new images.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::image::MipLevels;
use crate::resources::{DescriptorSetId, FramebufferId, ImageId, RendererResources};

/// How a pooled resource derives its extent from the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentSource {
    Window { divisor: u32 },
}

impl ExtentSource {
    pub const FULL: Self = ExtentSource::Window { divisor: 1 };
    pub const HALF: Self = ExtentSource::Window { divisor: 2 };

    pub fn resolve(&self, window: Extent2D) -> Extent2D {
        match *self {
            ExtentSource::Window { divisor } => window.scaled_down(divisor),
        }
    }
}

pub type ResizeCallback =
    Box<dyn Fn(&mut RendererResources, &mut dyn GraphicsBackend) -> BackendResult<()>>;

/// Callback re-resolving the given descriptor sets
pub fn rewire(sets: Vec<DescriptorSetId>) -> ResizeCallback {
    Box::new(move |resources, backend| {
        for set in &sets {
            resources.update_descriptor_set(*set, backend)?;
        }
        Ok(())
    })
}

struct ImagePoolEntry {
    image: ImageId,
    extent_source: Option<ExtentSource>,
    mip_levels: MipLevels,
    on_resize: Option<ResizeCallback>,
}

#[derive(Default)]
pub struct ImagePool {
    entries: Vec<ImagePoolEntry>,
}

impl ImagePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image; `extent_source == None` means it is never recreated
    pub fn add_to_pool(
        &mut self,
        image: ImageId,
        extent_source: Option<ExtentSource>,
        on_resize: Option<ResizeCallback>,
        mip_levels: MipLevels,
    ) {
        self.entries.push(ImagePoolEntry {
            image,
            extent_source,
            mip_levels,
            on_resize,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recreate every member whose extent changed, then fire their callbacks
    ///
    /// Returns the number of recreated images.
    pub fn resize_images(
        &self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        window: Extent2D,
    ) -> BackendResult<usize> {
        let mut changed = Vec::new();
        for entry in &self.entries {
            let Some(source) = entry.extent_source else {
                continue;
            };
            let extent = source.resolve(window);
            let image = resources.image(entry.image);
            if image.extent() == extent && image.mip_levels() == entry.mip_levels.resolve(extent) {
                continue;
            }
            resources
                .image_mut(entry.image)
                .recreate(backend, extent, entry.mip_levels)?;
            changed.push(entry);
        }

        for entry in &changed {
            if let Some(on_resize) = &entry.on_resize {
                on_resize(resources, backend)?;
            }
        }
        Ok(changed.len())
    }

    /// Fire every callback in registration order
    pub fn rewire_all(
        &self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        for on_resize in self.entries.iter().filter_map(|e| e.on_resize.as_ref()) {
            on_resize(resources, backend)?;
        }
        Ok(())
    }
}

struct FramebufferPoolEntry {
    framebuffer: FramebufferId,
    on_resize: Option<ResizeCallback>,
}

#[derive(Default)]
pub struct FramebufferPool {
    entries: Vec<FramebufferPoolEntry>,
}

impl FramebufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a framebuffer; its description's extent source decides whether it resizes
    pub fn add_to_pool(&mut self, framebuffer: FramebufferId, on_resize: Option<ResizeCallback>) {
        self.entries.push(FramebufferPoolEntry {
            framebuffer,
            on_resize,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recreate every member whose extent changed, then fire their callbacks
    pub fn resize_buffers(
        &self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        window: Extent2D,
    ) -> BackendResult<usize> {
        let mut changed = Vec::new();
        for entry in &self.entries {
            let framebuffer = resources.framebuffer(entry.framebuffer);
            let Some(source) = framebuffer.extent_source() else {
                continue;
            };
            let extent = source.resolve(window);
            if framebuffer.extent() == extent {
                continue;
            }
            resources.resize_framebuffer(entry.framebuffer, backend, extent)?;
            changed.push(entry);
        }

        for entry in &changed {
            if let Some(on_resize) = &entry.on_resize {
                on_resize(resources, backend)?;
            }
        }
        Ok(changed.len())
    }

    pub fn rewire_all(
        &self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        for on_resize in self.entries.iter().filter_map(|e| e.on_resize.as_ref()) {
            on_resize(resources, backend)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::resources::image::ImageDescription;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn storage_image(
        resources: &mut RendererResources,
        backend: &mut HeadlessBackend,
        label: &str,
        extent: Extent2D,
    ) -> ImageId {
        resources
            .create_image(
                backend,
                ImageDescription::storage(label, extent, TextureFormat::Rgba16Float),
            )
            .unwrap()
    }

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Option<ResizeCallback> {
        let log = log.clone();
        Some(Box::new(move |_, _| {
            log.lock().push(name);
            Ok(())
        }))
    }

    #[test]
    fn test_callbacks_fire_in_registration_order() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let window = Extent2D::new(64, 64);
        let a = storage_image(&mut resources, &mut backend, "a", window);
        let b = storage_image(&mut resources, &mut backend, "b", window);
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut pool = ImagePool::new();
        pool.add_to_pool(a, Some(ExtentSource::FULL), recording(&log, "a"), MipLevels::Fixed(1));
        pool.add_to_pool(b, Some(ExtentSource::FULL), recording(&log, "b"), MipLevels::Fixed(1));

        let resized = pool
            .resize_images(&mut resources, &mut backend, Extent2D::new(32, 32))
            .unwrap();
        assert_eq!(resized, 2);
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_callbacks_see_every_recreated_image() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let window = Extent2D::new(64, 64);
        let a = storage_image(&mut resources, &mut backend, "a", window);
        let b = storage_image(&mut resources, &mut backend, "b", window);
        let seen = Arc::new(Mutex::new(0));

        let mut pool = ImagePool::new();
        let seen_by_a = seen.clone();
        pool.add_to_pool(
            a,
            Some(ExtentSource::FULL),
            Some(Box::new(move |resources, _| {
                *seen_by_a.lock() = resources.image(b).generation;
                Ok(())
            })),
            MipLevels::Fixed(1),
        );
        pool.add_to_pool(b, Some(ExtentSource::FULL), None, MipLevels::Fixed(1));

        pool.resize_images(&mut resources, &mut backend, Extent2D::new(16, 16))
            .unwrap();
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_unchanged_and_fixed_members_are_left_alone() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let half = storage_image(&mut resources, &mut backend, "half", Extent2D::new(32, 32));
        let fixed = storage_image(&mut resources, &mut backend, "fixed", Extent2D::new(128, 128));
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut pool = ImagePool::new();
        pool.add_to_pool(half, Some(ExtentSource::HALF), recording(&log, "half"), MipLevels::Fixed(1));
        pool.add_to_pool(fixed, None, recording(&log, "fixed"), MipLevels::Fixed(1));

        let resized = pool
            .resize_images(&mut resources, &mut backend, Extent2D::new(64, 64))
            .unwrap();
        assert_eq!(resized, 0);
        assert!(log.lock().is_empty());

        pool.rewire_all(&mut resources, &mut backend).unwrap();
        assert_eq!(*log.lock(), vec!["half", "fixed"]);
    }

    #[test]
    fn test_mip_policy_change_triggers_recreation() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let image = storage_image(&mut resources, &mut backend, "bloom", Extent2D::new(32, 32));

        let mut pool = ImagePool::new();
        pool.add_to_pool(
            image,
            Some(ExtentSource::HALF),
            None,
            MipLevels::FullChain { min: 2, drop: 0 },
        );
        let resized = pool
            .resize_images(&mut resources, &mut backend, Extent2D::new(64, 64))
            .unwrap();
        assert_eq!(resized, 1);
        assert_eq!(resources.image(image).mip_levels(), 6);
    }
}
