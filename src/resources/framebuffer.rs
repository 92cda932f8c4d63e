//! Framebuffers and their attachments

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::image::ImageDescription;
use crate::resources::pool::ExtentSource;
use crate::resources::ImageId;

/// Where a framebuffer attachment comes from
#[derive(Debug, Clone)]
pub enum AttachmentSource {
    /// Image created and resized together with the framebuffer
    Owned(ImageDescription),
    /// One layer of an image owned elsewhere
    ImageLayer { image: ImageId, layer: u32 },
}

#[derive(Debug, Clone)]
pub struct FramebufferDescription {
    pub label: String,
    pub render_pass: RenderPassHandle,
    /// Color attachments first, depth last
    pub attachments: Vec<AttachmentSource>,
    pub extent: Extent2D,
    /// `None` keeps the framebuffer at its creation extent across window resizes
    pub extent_source: Option<ExtentSource>,
}

#[derive(Debug)]
pub struct Framebuffer {
    pub(crate) desc: FramebufferDescription,
    pub handle: FramebufferHandle,
    /// Resolved attachment images, parallel to the description's attachments
    pub(crate) images: Vec<ImageId>,
    pub generation: u64,
}

impl Framebuffer {
    pub fn label(&self) -> &str {
        &self.desc.label
    }

    pub fn extent(&self) -> Extent2D {
        self.desc.extent
    }

    pub fn render_pass(&self) -> RenderPassHandle {
        self.desc.render_pass
    }

    pub fn extent_source(&self) -> Option<ExtentSource> {
        self.desc.extent_source
    }

    pub fn description(&self) -> &FramebufferDescription {
        &self.desc
    }

    /// Image backing attachment `index`
    pub fn image(&self, index: usize) -> Option<ImageId> {
        self.images.get(index).copied()
    }

    /// Images created by this framebuffer, which are recreated with it
    pub fn owned_images(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.desc
            .attachments
            .iter()
            .zip(&self.images)
            .filter(|(source, _)| matches!(source, AttachmentSource::Owned(_)))
            .map(|(_, image)| *image)
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_framebuffer(self.handle);
    }
}
