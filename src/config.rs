//! Renderer configuration
//!
//! The configuration is persisted as TOML and shared at runtime through a
//! [`ConfigStore`], so a UI thread may edit it while the renderer draws.
//! The renderer compares the store revision at the start of every frame and
//! broadcasts changes to its subscribers.

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub vsync: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { vsync: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectShadowsConfig {
    pub enabled: bool,
    /// Edge length of each cascade in texels; read at init
    pub size: u32,
}

impl Default for DirectShadowsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsaoConfig {
    pub enabled: bool,
    pub radius: f32,
}

impl Default for SsaoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    pub enabled: bool,
    pub threshold: f32,
    pub clamp: f32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1.0,
            clamp: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsrConfig {
    pub enabled: bool,
    pub samples: i32,
    pub max_distance: f32,
}

impl Default for SsrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            samples: 30,
            max_distance: 50.0,
        }
    }
}

/// Tonemapping operator selected in the post-process pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tonemapper {
    #[default]
    Aces,
    Uncharted2,
    Filmic,
    Reinhard,
}

impl Tonemapper {
    /// Index the post-process shader switches on
    pub fn index(&self) -> i32 {
        match self {
            Tonemapper::Aces => 0,
            Tonemapper::Uncharted2 => 1,
            Tonemapper::Filmic => 2,
            Tonemapper::Reinhard => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub tonemapper: Tonemapper,
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            tonemapper: Tonemapper::Aces,
            exposure: 1.0,
            gamma: 2.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtmosphereConfig {
    pub enabled: bool,
    /// Time of day driving the sun position
    pub time: f32,
}

impl Default for AtmosphereConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            time: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiledLightingConfig {
    pub enabled: bool,
}

/// Every renderer option, grouped by section as it appears in the TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub display: DisplayConfig,
    pub direct_shadows: DirectShadowsConfig,
    pub ssao: SsaoConfig,
    pub bloom: BloomConfig,
    pub ssr: SsrConfig,
    pub color: ColorConfig,
    pub atmosphere: AtmosphereConfig,
    pub tiled_lighting: TiledLightingConfig,
}

impl RendererConfig {
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Load the file, writing the defaults there first when it does not exist
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        log::info!("No renderer config at {}, writing defaults", path.display());
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }
}

/// Shared, revisioned configuration
#[derive(Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<RendererConfig>>,
    revision: Arc<AtomicU64>,
}

impl ConfigStore {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            revision: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, RendererConfig> {
        self.inner.read()
    }

    pub fn snapshot(&self) -> RendererConfig {
        self.inner.read().clone()
    }

    /// Mutate the configuration and bump the revision
    pub fn update<R>(&self, f: impl FnOnce(&mut RendererConfig) -> R) -> R {
        let result = f(&mut self.inner.write());
        self.revision.fetch_add(1, Ordering::Release);
        result
    }

    pub fn replace(&self, config: RendererConfig) {
        self.update(|current| *current = config);
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let config = RendererConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[tiled_lighting]"));
        assert_eq!(RendererConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = RendererConfig::from_toml("[ssao]\nenabled = false\n").unwrap();
        assert!(!config.ssao.enabled);
        assert_eq!(config.ssao.radius, SsaoConfig::default().radius);
        assert_eq!(config.bloom, BloomConfig::default());
        assert!(!config.atmosphere.enabled);
        assert!(!config.tiled_lighting.enabled);
    }

    #[test]
    fn test_tonemapper_is_snake_case() {
        let config = RendererConfig::from_toml("[color]\ntonemapper = \"uncharted2\"\n").unwrap();
        assert_eq!(config.color.tonemapper, Tonemapper::Uncharted2);
        assert_eq!(config.color.tonemapper.index(), 1);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = std::env::temp_dir().join(format!("tiled-renderer-config-{}", std::process::id()));
        let path = dir.join("renderer.toml");
        let _ = std::fs::remove_file(&path);

        let created = RendererConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(RendererConfig::load(&path).unwrap(), created);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_store_update_bumps_revision() {
        let store = ConfigStore::new(RendererConfig::default());
        let shared = store.clone();
        assert_eq!(store.revision(), 0);

        shared.update(|c| c.ssao.enabled = false);
        assert_eq!(store.revision(), 1);
        assert!(!store.read().ssao.enabled);
    }
}
