//! Shader compilation and the shader registry
//!
//! Shaders are written in WGSL. A single source module may hold several
//! stages: vertex and fragment entry points are named `vs_<entry>` and
//! `fs_<entry>`, compute entry points use `<entry>` as is.

use crate::backend::types::{ShaderModuleCode, ShaderStage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Failed to read shader {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("WGSL parse error in {0}")]
    Parse(String),
    #[error("Validation error in {0}")]
    Validation(String),
    #[error("SPIR-V generation error in {0}")]
    Codegen(String),
    #[error("Shader '{0}' has neither a compute stage nor a vertex and fragment pair")]
    MissingStage(String),
    #[error("Shader compilation thread for '{0}' panicked")]
    Thread(String),
}

/// Where a stage's source comes from
#[derive(Debug, Clone)]
pub enum ShaderSource {
    Wgsl(&'static str),
    File(PathBuf),
}

impl ShaderSource {
    pub fn load(&self) -> Result<String, ShaderError> {
        match self {
            ShaderSource::Wgsl(source) => Ok(source.to_string()),
            ShaderSource::File(path) => std::fs::read_to_string(path).map_err(|source| ShaderError::Io {
                path: path.clone(),
                source,
            }),
        }
    }

    /// Prefer `<dir>/<file_name>` when it exists, otherwise the embedded source
    pub fn with_override(embedded: &'static str, dir: Option<&Path>, file_name: &str) -> Self {
        match dir.map(|d| d.join(file_name)).filter(|p| p.exists()) {
            Some(path) => ShaderSource::File(path),
            None => ShaderSource::Wgsl(embedded),
        }
    }
}

/// Entry point name of `stage` for the base name `entry_point`
pub fn stage_entry_point(stage: ShaderStage, entry_point: &str) -> String {
    match stage {
        ShaderStage::Vertex => format!("vs_{}", entry_point),
        ShaderStage::Fragment => format!("fs_{}", entry_point),
        ShaderStage::Compute => entry_point.to_string(),
    }
}

/// Turns shader source into SPIR-V words
pub trait ShaderCompiler: Send + Sync {
    fn compile(
        &self,
        name: &str,
        source: &ShaderSource,
        stage: ShaderStage,
        entry_point: &str,
    ) -> Result<Vec<u32>, ShaderError>;
}

/// WGSL to SPIR-V through naga
#[derive(Debug, Default, Clone, Copy)]
pub struct WgslCompiler;

impl ShaderCompiler for WgslCompiler {
    fn compile(
        &self,
        name: &str,
        source: &ShaderSource,
        stage: ShaderStage,
        entry_point: &str,
    ) -> Result<Vec<u32>, ShaderError> {
        let text = source.load()?;
        let module = naga::front::wgsl::parse_str(&text)
            .map_err(|e| ShaderError::Parse(format!("{}: {}", name, e.emit_to_string(&text))))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = validator
            .validate(&module)
            .map_err(|e| ShaderError::Validation(format!("{}: {}", name, e)))?;

        let naga_stage = match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        };
        if !module
            .entry_points
            .iter()
            .any(|ep| ep.name == entry_point && ep.stage == naga_stage)
        {
            return Err(ShaderError::Codegen(format!(
                "{}: entry point '{}' not found for stage {:?}",
                name, entry_point, stage
            )));
        }

        let options = naga::back::spv::Options {
            lang_version: (1, 3),
            flags: naga::back::spv::WriterFlags::empty(),
            ..Default::default()
        };
        let pipeline_options = naga::back::spv::PipelineOptions {
            shader_stage: naga_stage,
            entry_point: entry_point.to_string(),
        };
        naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
            .map_err(|e| ShaderError::Codegen(format!("{}: {}", name, e)))
    }
}

/// Compiler that skips compilation and emits a minimal SPIR-V header
///
/// Used with the headless backend, which never consumes the words.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessCompiler;

impl ShaderCompiler for HeadlessCompiler {
    fn compile(
        &self,
        _name: &str,
        _source: &ShaderSource,
        _stage: ShaderStage,
        _entry_point: &str,
    ) -> Result<Vec<u32>, ShaderError> {
        // magic, version 1.3, generator, bound, schema
        Ok(vec![0x0723_0203, 0x0001_0300, 0, 1, 0])
    }
}

/// Sources and entry point of one shader
#[derive(Debug, Clone)]
pub struct ShaderCreateInfo {
    pub name: String,
    pub vertex: Option<ShaderSource>,
    pub fragment: Option<ShaderSource>,
    pub compute: Option<ShaderSource>,
    pub entry_point: String,
}

impl ShaderCreateInfo {
    /// Vertex and fragment stages from one WGSL module
    pub fn graphics(name: &str, source: ShaderSource) -> Self {
        Self {
            name: name.to_string(),
            vertex: Some(source.clone()),
            fragment: Some(source),
            compute: None,
            entry_point: "main".to_string(),
        }
    }

    pub fn compute(name: &str, source: ShaderSource) -> Self {
        Self {
            name: name.to_string(),
            vertex: None,
            fragment: None,
            compute: Some(source),
            entry_point: "main".to_string(),
        }
    }
}

/// Compiled stages of a shader
#[derive(Debug, Clone)]
pub struct Shader {
    pub name: String,
    pub stages: Vec<ShaderModuleCode>,
}

impl Shader {
    pub fn stage(&self, stage: ShaderStage) -> Option<&ShaderModuleCode> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn is_compute(&self) -> bool {
        self.stage(ShaderStage::Compute).is_some()
    }
}

fn compile_shader(compiler: &dyn ShaderCompiler, info: &ShaderCreateInfo) -> Result<Shader, ShaderError> {
    let stages: Vec<(ShaderStage, &ShaderSource)> = match (&info.vertex, &info.fragment, &info.compute) {
        (_, _, Some(compute)) => vec![(ShaderStage::Compute, compute)],
        (Some(vertex), Some(fragment), None) => {
            vec![(ShaderStage::Vertex, vertex), (ShaderStage::Fragment, fragment)]
        }
        _ => return Err(ShaderError::MissingStage(info.name.clone())),
    };

    let stages = stages
        .into_iter()
        .map(|(stage, source)| {
            let entry_point = stage_entry_point(stage, &info.entry_point);
            let spirv = compiler.compile(&info.name, source, stage, &entry_point)?;
            Ok(ShaderModuleCode {
                stage,
                entry_point,
                spirv: Arc::new(spirv),
            })
        })
        .collect::<Result<Vec<_>, ShaderError>>()?;

    log::debug!("Compiled shader '{}' ({} stages)", info.name, stages.len());
    Ok(Shader {
        name: info.name.clone(),
        stages,
    })
}

type ShaderMap = Arc<RwLock<HashMap<String, Arc<Shader>>>>;

/// Compilation running on a worker thread
pub struct ShaderTask {
    name: String,
    handle: JoinHandle<Result<Shader, ShaderError>>,
    library: ShaderMap,
}

impl ShaderTask {
    /// Join the worker and register the result with the library
    pub fn wait(self) -> Result<Arc<Shader>, ShaderError> {
        let shader = self
            .handle
            .join()
            .map_err(|_| ShaderError::Thread(self.name.clone()))??;
        let shader = Arc::new(shader);
        self.library
            .write()
            .insert(shader.name.clone(), shader.clone());
        Ok(shader)
    }
}

/// Registry of compiled shaders, keyed by name
#[derive(Clone)]
pub struct ShaderLibrary {
    compiler: Arc<dyn ShaderCompiler>,
    shaders: ShaderMap,
}

impl ShaderLibrary {
    pub fn new(compiler: Arc<dyn ShaderCompiler>) -> Self {
        Self {
            compiler,
            shaders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start compiling on a worker thread
    pub fn create_shader_async(&self, info: ShaderCreateInfo) -> ShaderTask {
        let compiler = self.compiler.clone();
        let name = info.name.clone();
        let handle = std::thread::spawn(move || compile_shader(compiler.as_ref(), &info));
        ShaderTask {
            name,
            handle,
            library: self.shaders.clone(),
        }
    }

    pub fn create_shader(&self, info: ShaderCreateInfo) -> Result<Arc<Shader>, ShaderError> {
        let shader = Arc::new(compile_shader(self.compiler.as_ref(), &info)?);
        self.add_shader(shader.clone());
        Ok(shader)
    }

    pub fn add_shader(&self, shader: Arc<Shader>) {
        self.shaders.write().insert(shader.name.clone(), shader);
    }

    pub fn get_shader(&self, name: &str) -> Option<Arc<Shader>> {
        self.shaders.read().get(name).cloned()
    }

    pub fn remove_shader(&self, name: &str) -> Option<Arc<Shader>> {
        self.shaders.write().remove(name)
    }

    /// Drop every compiled shader; pipelines keep their own copies of the words
    pub fn unload_shaders(&self) {
        let mut shaders = self.shaders.write();
        log::debug!("Unloading {} shaders", shaders.len());
        shaders.clear();
    }

    pub fn len(&self) -> usize {
        self.shaders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index) - 1);
    let y = f32(i32(index & 1u) * 2 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

    #[test]
    fn test_async_compile_registers_shader() {
        let library = ShaderLibrary::new(Arc::new(HeadlessCompiler));
        let tasks: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|name| library.create_shader_async(ShaderCreateInfo::compute(name, ShaderSource::Wgsl(""))))
            .collect();
        for task in tasks {
            let shader = task.wait().unwrap();
            assert!(shader.is_compute());
            assert_eq!(shader.stages[0].entry_point, "main");
        }
        assert_eq!(library.len(), 3);

        assert!(library.remove_shader("B").is_some());
        assert!(library.get_shader("B").is_none());
        library.unload_shaders();
        assert!(library.is_empty());
    }

    #[test]
    fn test_missing_stage_is_rejected() {
        let library = ShaderLibrary::new(Arc::new(HeadlessCompiler));
        let info = ShaderCreateInfo {
            name: "Broken".into(),
            vertex: Some(ShaderSource::Wgsl("")),
            fragment: None,
            compute: None,
            entry_point: "main".into(),
        };
        assert!(matches!(library.create_shader(info), Err(ShaderError::MissingStage(_))));
    }

    #[test]
    fn test_wgsl_compiler_emits_spirv() {
        let library = ShaderLibrary::new(Arc::new(WgslCompiler));
        let shader = library
            .create_shader(ShaderCreateInfo::graphics("Triangle", ShaderSource::Wgsl(TRIANGLE)))
            .unwrap();
        let vertex = shader.stage(ShaderStage::Vertex).unwrap();
        assert_eq!(vertex.entry_point, "vs_main");
        assert_eq!(vertex.spirv[0], 0x0723_0203);
        assert!(shader.stage(ShaderStage::Fragment).is_some());
    }

    #[test]
    fn test_wgsl_parse_errors_are_reported() {
        let result = WgslCompiler.compile(
            "Bad",
            &ShaderSource::Wgsl("fn broken( {"),
            ShaderStage::Compute,
            "main",
        );
        assert!(matches!(result, Err(ShaderError::Parse(_))));
    }
}
