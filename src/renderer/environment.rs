//! Image based lighting maps
//!
//! The environment texture is an equirectangular panorama. It is resampled
//! into a cubemap, convolved into a small irradiance cube, and paired with a
//! split-sum BRDF lookup table. The prefiltered specular map is the
//! environment cube itself.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{ImageDescription, ImageId, RendererResources, TextureData};
use glam::{Vec2, Vec3, Vec4};
use std::f32::consts::PI;
use std::path::Path;

pub const ENVIRONMENT_CUBE_SIZE: u32 = 64;
pub const IRRADIANCE_CUBE_SIZE: u32 = 8;
/// Face edge of the coarse cube the irradiance convolution integrates over
pub const IRRADIANCE_SOURCE_SIZE: u32 = 16;
pub const BRDF_LUT_SIZE: u32 = 32;

pub const CUBE_FORMAT: TextureFormat = TextureFormat::Rgba32Float;
pub const BRDF_LUT_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Panoramas tried in order, relative to the resources directory
pub const ENVIRONMENT_CANDIDATES: [&str; 2] = ["HDRs/industrial_sky", "HDRs/belfast_sunset"];
const PLACEHOLDER_SKY: [u8; 4] = [128, 128, 128, 255];

/// Texels of the six faces of a cube, in +X, -X, +Y, -Y, +Z, -Z order
#[derive(Debug, Clone, PartialEq)]
pub struct CubeFaces {
    pub size: u32,
    pub faces: [Vec<Vec4>; 6],
}

impl CubeFaces {
    pub fn from_fn(size: u32, mut texel: impl FnMut(Vec3) -> Vec4) -> Self {
        let faces = std::array::from_fn(|face| {
            let mut texels = Vec::with_capacity((size * size) as usize);
            for y in 0..size {
                for x in 0..size {
                    let (u, v) = texel_coords(x, y, size);
                    texels.push(texel(face_direction(face, u, v)));
                }
            }
            texels
        });
        Self { size, faces }
    }

    /// Direction and solid angle of every texel
    fn samples(&self) -> impl Iterator<Item = (Vec3, f32, Vec4)> + '_ {
        let size = self.size;
        self.faces.iter().enumerate().flat_map(move |(face, texels)| {
            texels.iter().enumerate().map(move |(i, color)| {
                let (x, y) = (i as u32 % size, i as u32 / size);
                let (u, v) = texel_coords(x, y, size);
                let solid_angle = 4.0 / ((size * size) as f32 * (u * u + v * v + 1.0).powf(1.5));
                (face_direction(face, u, v), solid_angle, *color)
            })
        })
    }
}

/// Texel center in `[-1, 1]`
fn texel_coords(x: u32, y: u32, size: u32) -> (f32, f32) {
    let size = size as f32;
    (
        (x as f32 + 0.5) / size * 2.0 - 1.0,
        (y as f32 + 0.5) / size * 2.0 - 1.0,
    )
}

/// World direction through face coordinates `u, v` in `[-1, 1]`, Vulkan cube conventions
pub fn face_direction(face: usize, u: f32, v: f32) -> Vec3 {
    let dir = match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    };
    dir.normalize()
}

/// Panorama coordinates of a direction, `v = 0` at +Y
pub fn equirect_uv(dir: Vec3) -> Vec2 {
    let u = 0.5 + dir.z.atan2(dir.x) / (2.0 * PI);
    let v = dir.y.clamp(-1.0, 1.0).acos() / PI;
    Vec2::new(u, v)
}

pub fn equirect_to_cube(texture: &TextureData, size: u32) -> CubeFaces {
    let (width, height) = (texture.width as f32, texture.height as f32);
    CubeFaces::from_fn(size, |dir| {
        let uv = equirect_uv(dir);
        texture.texel((uv.x * width) as u32, (uv.y * height) as u32)
    })
}

/// Cosine-weighted convolution of `source`, normalized so a constant sky maps to itself
pub fn irradiance(source: &CubeFaces, size: u32) -> CubeFaces {
    let samples: Vec<(Vec3, f32, Vec4)> = source.samples().collect();
    CubeFaces::from_fn(size, |normal| {
        let mut sum = Vec3::ZERO;
        let mut weight = 0.0;
        for &(dir, solid_angle, color) in &samples {
            let cos = normal.dot(dir);
            if cos > 0.0 {
                sum += color.truncate() * cos * solid_angle;
                weight += cos * solid_angle;
            }
        }
        if weight > 0.0 {
            (sum / weight).extend(1.0)
        } else {
            Vec4::new(0.0, 0.0, 0.0, 1.0)
        }
    })
}

/// Analytic fit of the split-sum environment BRDF: (scale, bias) applied to F0
pub fn env_brdf_approx(n_dot_v: f32, roughness: f32) -> Vec2 {
    let c0 = Vec4::new(-1.0, -0.0275, -0.572, 0.022);
    let c1 = Vec4::new(1.0, 0.0425, 1.04, -0.04);
    let r = c0 * roughness + c1;
    let a004 = (r.x * r.x).min((-9.28 * n_dot_v).exp2()) * r.x + r.y;
    Vec2::new(a004 * -1.04 + r.z, a004 * 1.04 + r.w).clamp(Vec2::ZERO, Vec2::ONE)
}

/// RGBA8 lookup table indexed by `(n_dot_v, roughness)`
pub fn brdf_lut(size: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let n_dot_v = (x as f32 + 0.5) / size as f32;
            let roughness = (y as f32 + 0.5) / size as f32;
            let brdf = env_brdf_approx(n_dot_v, roughness);
            data.extend_from_slice(&[
                (brdf.x * 255.0).round() as u8,
                (brdf.y * 255.0).round() as u8,
                0,
                255,
            ]);
        }
    }
    data
}

/// Device images of the image based lighting inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentMaps {
    /// Sky cube, also the prefiltered specular map
    pub environment: ImageId,
    pub irradiance: ImageId,
    pub brdf_lut: ImageId,
}

impl EnvironmentMaps {
    /// Load the first available panorama under `resources_path`, or a flat grey sky
    pub fn load(
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        resources_path: &Path,
    ) -> BackendResult<Self> {
        let candidates: Vec<_> = ENVIRONMENT_CANDIDATES
            .iter()
            .map(|stem| resources_path.join(stem))
            .collect();
        let texture = crate::resources::load_with_fallback(&candidates, PLACEHOLDER_SKY);
        Self::from_texture(resources, backend, &texture)
    }

    pub fn from_texture(
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        texture: &TextureData,
    ) -> BackendResult<Self> {
        log::info!(
            "Building environment maps from '{}' ({}x{})",
            texture.name,
            texture.width,
            texture.height
        );
        let environment = equirect_to_cube(texture, ENVIRONMENT_CUBE_SIZE);
        let coarse = equirect_to_cube(texture, IRRADIANCE_SOURCE_SIZE);
        let irradiance = irradiance(&coarse, IRRADIANCE_CUBE_SIZE);

        let environment = upload_cube(resources, backend, "Environment", &environment)?;
        let irradiance = upload_cube(resources, backend, "Irradiance", &irradiance)?;
        let brdf_lut = upload_brdf_lut(resources, backend)?;
        Ok(Self {
            environment,
            irradiance,
            brdf_lut,
        })
    }
}

fn cube_sampler() -> SamplerDescriptor {
    SamplerDescriptor {
        address_mode: AddressMode::ClampToEdge,
        ..Default::default()
    }
}

fn upload_cube(
    resources: &mut RendererResources,
    backend: &mut dyn GraphicsBackend,
    label: &str,
    cube: &CubeFaces,
) -> BackendResult<ImageId> {
    let extent = Extent2D::new(cube.size, cube.size);
    let desc = ImageDescription::new(
        label,
        extent,
        CUBE_FORMAT,
        TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
    )
    .cube()
    .with_sampler(cube_sampler());
    let id = resources.create_image(backend, desc)?;
    let handle = resources.image(id).handle;
    for (layer, texels) in cube.faces.iter().enumerate() {
        backend.write_image(handle, layer as u32, bytemuck::cast_slice(texels), extent)?;
    }
    backend.transition_image_layout(
        handle,
        &ImageTransition {
            old_layout: ImageLayout::TransferDst,
            new_layout: ImageLayout::ShaderReadOnly,
            mip_levels: 1,
            array_layers: 6,
        },
    )?;
    Ok(id)
}

fn upload_brdf_lut(
    resources: &mut RendererResources,
    backend: &mut dyn GraphicsBackend,
) -> BackendResult<ImageId> {
    let extent = Extent2D::new(BRDF_LUT_SIZE, BRDF_LUT_SIZE);
    let desc = ImageDescription::new(
        "BRDF LUT",
        extent,
        BRDF_LUT_FORMAT,
        TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
    )
    .with_sampler(cube_sampler());
    let id = resources.create_image(backend, desc)?;
    let handle = resources.image(id).handle;
    backend.write_image(handle, 0, &brdf_lut(BRDF_LUT_SIZE), extent)?;
    backend.transition_image_layout(
        handle,
        &ImageTransition {
            old_layout: ImageLayout::TransferDst,
            new_layout: ImageLayout::ShaderReadOnly,
            mip_levels: 1,
            array_layers: 1,
        },
    )?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    fn panorama(width: u32, height: u32, texel: impl Fn(u32, u32) -> [f32; 4]) -> TextureData {
        let mut texels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                texels.extend_from_slice(&texel(x, y));
            }
        }
        TextureData {
            width,
            height,
            format: TextureFormat::Rgba32Float,
            data: bytemuck::cast_slice(&texels).to_vec(),
            name: "panorama".into(),
        }
    }

    #[test]
    fn test_face_centers_point_along_axes() {
        let axes = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (face, axis) in axes.iter().enumerate() {
            assert!((face_direction(face, 0.0, 0.0) - *axis).length() < 1e-6);
        }
    }

    #[test]
    fn test_equirect_poles() {
        assert!(equirect_uv(Vec3::Y).y.abs() < 1e-6);
        assert!((equirect_uv(Vec3::NEG_Y).y - 1.0).abs() < 1e-6);
        assert!((equirect_uv(Vec3::X).x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_constant_sky_is_preserved() {
        let sky = panorama(16, 8, |_, _| [0.25, 0.5, 1.0, 1.0]);
        let cube = equirect_to_cube(&sky, 4);
        let irradiance = irradiance(&cube, 2);
        for texel in irradiance.faces.iter().flatten() {
            assert!((*texel - Vec4::new(0.25, 0.5, 1.0, 1.0)).length() < 1e-4);
        }
    }

    #[test]
    fn test_irradiance_faces_toward_bright_hemisphere() {
        // top half of the panorama is the sky
        let sky = panorama(32, 16, |_, y| if y < 8 { [1.0; 4] } else { [0.0, 0.0, 0.0, 1.0] });
        let irradiance = irradiance(&equirect_to_cube(&sky, 8), 1);
        let up = irradiance.faces[2][0].x;
        let down = irradiance.faces[3][0].x;
        assert!(up > 0.9, "up {}", up);
        assert!(down < 0.1, "down {}", down);
    }

    #[test]
    fn test_brdf_lut_range() {
        let lut = brdf_lut(BRDF_LUT_SIZE);
        assert_eq!(lut.len(), (BRDF_LUT_SIZE * BRDF_LUT_SIZE * 4) as usize);
        let smooth_head_on = env_brdf_approx(1.0, 0.0);
        assert!(smooth_head_on.x + smooth_head_on.y > 0.95);
        assert!(env_brdf_approx(1.0, 1.0).x < smooth_head_on.x);
    }

    #[test]
    fn test_missing_panorama_falls_back_to_placeholder() {
        let mut backend = HeadlessBackend::new(Extent2D::new(8, 8));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let maps = EnvironmentMaps::load(&mut resources, &mut backend, Path::new("/nonexistent")).unwrap();

        let environment = resources.image(maps.environment);
        assert_eq!(environment.array_layers(), 6);
        assert_eq!(environment.extent(), Extent2D::new(ENVIRONMENT_CUBE_SIZE, ENVIRONMENT_CUBE_SIZE));
        assert_eq!(resources.image(maps.irradiance).array_layers(), 6);
        assert_eq!(resources.image(maps.brdf_lut).format(), BRDF_LUT_FORMAT);
    }
}
