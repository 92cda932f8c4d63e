//! Texture loading

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{ImageDescription, ImageId, RendererResources};
use glam::Vec4;
use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};

/// Decoded texel data ready for upload
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load an image file; `.hdr` and `.exr` files keep full float precision
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let hdr = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("hdr") || e.eq_ignore_ascii_case("exr"));
        Ok(Self::from_image(img, &name, hdr))
    }

    fn from_image(img: DynamicImage, name: &str, hdr: bool) -> Self {
        let (width, height) = img.dimensions();
        let (format, data) = if hdr {
            let texels = img.to_rgba32f().into_raw();
            (TextureFormat::Rgba32Float, bytemuck::cast_slice(&texels).to_vec())
        } else {
            (TextureFormat::Rgba8UnormSrgb, img.to_rgba8().into_raw())
        };
        Self {
            width,
            height,
            format,
            data,
            name: name.to_string(),
        }
    }

    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    pub fn extent(&self) -> Extent2D {
        Extent2D::new(self.width, self.height)
    }

    /// Linear color of a texel, coordinates clamped to the image
    pub fn texel(&self, x: u32, y: u32) -> Vec4 {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        let index = (y * self.width + x) as usize;
        match self.format {
            TextureFormat::Rgba32Float => {
                let offset = index * 16;
                let texel: &[f32] = bytemuck::cast_slice(&self.data[offset..offset + 16]);
                Vec4::from_slice(texel)
            }
            TextureFormat::Rgba8UnormSrgb => {
                let [r, g, b, a] = self.rgba8(index);
                Vec4::new(srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b), a as f32 / 255.0)
            }
            _ => Vec4::from_array(self.rgba8(index).map(|c| c as f32 / 255.0)),
        }
    }

    fn rgba8(&self, index: usize) -> [u8; 4] {
        let offset = index * 4;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }

    /// Upload into a new sampled image with its own descriptor set
    pub fn upload(
        &self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<ImageId> {
        let desc = ImageDescription::new(
            &self.name,
            self.extent(),
            self.format,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        )
        .with_descriptor_set();
        let id = resources.create_image(backend, desc)?;
        let image = resources.image(id).handle;
        backend.write_image(image, 0, &self.data, self.extent())?;
        backend.transition_image_layout(
            image,
            &ImageTransition {
                old_layout: ImageLayout::TransferDst,
                new_layout: ImageLayout::ShaderReadOnly,
                mip_levels: 1,
                array_layers: 1,
            },
        )?;
        Ok(id)
    }
}

fn srgb_to_linear(c: u8) -> f32 {
    let c = c as f32 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// First existing file among `<stem>.hdr`, `<stem>.exr`, `<stem>.png`, `<stem>.jpg`
pub fn find_texture(stem: &Path) -> Option<PathBuf> {
    ["hdr", "exr", "png", "jpg"]
        .iter()
        .map(|ext| stem.with_extension(ext))
        .find(|p| p.exists())
}

/// Load the first candidate that exists and decodes, falling back to a 1x1 placeholder
pub fn load_with_fallback(candidates: &[PathBuf], placeholder: [u8; 4]) -> TextureData {
    for stem in candidates {
        let Some(path) = find_texture(stem) else {
            log::warn!("Texture {} not found", stem.display());
            continue;
        };
        match TextureData::from_file(&path) {
            Ok(texture) => return texture,
            Err(e) => log::warn!("Failed to load {}: {}", path.display(), e),
        }
    }
    log::warn!("Using placeholder texture");
    TextureData::solid_color(placeholder, "placeholder")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_candidates_fall_back_to_placeholder() {
        let dir = std::env::temp_dir().join("tiled-renderer-missing-textures");
        let texture = load_with_fallback(
            &[dir.join("HDRs/industrial_sky"), dir.join("HDRs/belfast_sunset")],
            [0, 0, 0, 255],
        );
        assert_eq!(texture.extent(), Extent2D::new(1, 1));
        assert_eq!(texture.data, vec![0, 0, 0, 255]);
    }

    #[test]
    fn test_texel_decodes_to_linear() {
        let texture = TextureData::solid_color([255, 0, 51, 255], "red");
        assert_eq!(texture.texel(0, 0), Vec4::new(1.0, 0.0, 0.2, 1.0));
        // out of range coordinates clamp to the edge
        assert_eq!(texture.texel(5, 5), texture.texel(0, 0));
    }
}
