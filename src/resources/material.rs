//! Material definitions for PBR rendering

use crate::backend::traits::*;
use crate::resources::{Binding, DescriptorSet, DescriptorSetId, ImageId, RendererResources};
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Texture slots of a material, in binding order
pub const MATERIAL_TEXTURE_SLOTS: u32 = 5;

/// PBR material properties
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub emissive_strength: f32,

    /// `None` samples the white fallback image
    pub albedo_texture: Option<ImageId>,
    pub normal_texture: Option<ImageId>,
    pub metallic_roughness_texture: Option<ImageId>,
    pub occlusion_texture: Option<ImageId>,
    pub emissive_texture: Option<ImageId>,

    /// Set bound at index 1 by the PBR pass, created by the renderer
    pub descriptor_set: Option<DescriptorSetId>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            emissive_strength: 1.0,
            albedo_texture: None,
            normal_texture: None,
            metallic_roughness_texture: None,
            occlusion_texture: None,
            emissive_texture: None,
            descriptor_set: None,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3, strength: f32) -> Self {
        self.emissive = emissive;
        self.emissive_strength = strength;
        self
    }

    pub fn with_albedo_texture(mut self, image: ImageId) -> Self {
        self.albedo_texture = Some(image);
        self
    }

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic")
            .with_base_color(color.extend(1.0))
            .with_roughness(0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::new("metal")
            .with_base_color(color.extend(1.0))
            .with_metallic(1.0)
            .with_roughness(roughness)
    }

    /// Fully opaque materials are the only ones written to the depth pre-pass
    pub fn is_opaque(&self) -> bool {
        self.base_color.w >= 1.0
    }

    fn textures(&self) -> [Option<ImageId>; MATERIAL_TEXTURE_SLOTS as usize] {
        [
            self.albedo_texture,
            self.normal_texture,
            self.metallic_roughness_texture,
            self.occlusion_texture,
            self.emissive_texture,
        ]
    }

    /// Fragment push constants, pushed at offset 64 after the model matrix
    pub fn params(&self) -> MaterialParams {
        let texture_flags = self
            .textures()
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_some())
            .fold(0u32, |flags, (slot, _)| flags | (1 << slot));
        MaterialParams {
            base_color: self.base_color,
            emissive: self.emissive.extend(self.emissive_strength),
            metallic: self.metallic,
            roughness: self.roughness,
            texture_flags,
            _padding: 0,
        }
    }

    /// Allocate and write the material's texture set
    pub fn create_descriptor_set(
        &mut self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        layout: DescriptorSetLayoutHandle,
        fallback: ImageId,
    ) -> BackendResult<DescriptorSetId> {
        let bindings = self
            .textures()
            .iter()
            .enumerate()
            .map(|(slot, texture)| Binding::sampled(slot as u32, texture.unwrap_or(fallback)))
            .collect();
        let set = DescriptorSet::allocate(backend, &format!("Material {}", self.name), layout, bindings)?;
        let id = resources.add_descriptor_set(set);
        resources.update_descriptor_set(id, backend)?;
        self.descriptor_set = Some(id);
        Ok(id)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialParams {
    pub base_color: Vec4,
    /// xyz = emissive, w = strength
    pub emissive: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    /// Bit per texture slot that holds a real texture
    pub texture_flags: u32,
    pub _padding: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_flag_present_textures() {
        let material = Material::plastic(Vec3::X).with_albedo_texture(ImageId(3));
        let params = material.params();
        assert_eq!(params.texture_flags, 0b1);
        assert_eq!(params.base_color, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(std::mem::size_of::<MaterialParams>(), 48);
    }

    #[test]
    fn test_translucent_base_color_is_not_opaque() {
        assert!(Material::default().is_opaque());
        assert!(!Material::new("glass").with_base_color(Vec4::new(1.0, 1.0, 1.0, 0.5)).is_opaque());
    }
}
