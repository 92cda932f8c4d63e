//! Top-level renderer errors

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::pipeline::shader::ShaderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("Texture error: {0}")]
    Texture(String),
}

pub type RendererResult<T> = Result<T, RendererError>;
