use std::borrow::Cow;
use std::fmt;

use naga_oil::compose::{
    ComposableModuleDescriptor, Composer, NagaModuleDescriptor, ShaderLanguage,
    ShaderType,
};

use super::types::constants_wgsl;

/// Shaders the renderer builds pipelines from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shader {
    /// Periodic-image expansion and visibility culling (compute).
    Cull,
    /// Instanced mesh drawing with picking feedback (vertex + fragment).
    Mesh,
}

impl Shader {
    /// Every shader, for composition checks.
    pub const ALL: [Self; 2] = [Self::Cull, Self::Mesh];

    /// WGSL source, possibly containing `#import` directives.
    #[must_use]
    pub fn source(self) -> &'static str {
        match self {
            Self::Cull => include_str!("../../assets/shaders/cull.wgsl"),
            Self::Mesh => include_str!("../../assets/shaders/mesh.wgsl"),
        }
    }

    /// Virtual file path used in diagnostics.
    #[must_use]
    pub fn file_path(self) -> &'static str {
        match self {
            Self::Cull => "cull.wgsl",
            Self::Mesh => "mesh.wgsl",
        }
    }

    /// Debug label for the created module.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Cull => "Cull Shader",
            Self::Mesh => "Mesh Shader",
        }
    }
}

/// Shader registration or composition failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderError {
    /// File the error refers to.
    pub file_path: String,
    /// Composer diagnostic.
    pub message: String,
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shader '{}': {}", self.file_path, self.message)
    }
}

impl std::error::Error for ShaderError {}

/// Wraps `naga_oil::compose::Composer` to provide shader composition with
/// `#import` support.
///
/// The generated `trajview::constants` module and the shared
/// `trajview::types` module are registered at construction. The composer
/// produces `naga::Module` IR directly, skipping WGSL re-parse at runtime.
pub struct ShaderComposer {
    composer: Composer,
}

impl ShaderComposer {
    /// Create a composer with the shared modules registered.
    ///
    /// # Errors
    ///
    /// Returns [`ShaderError`] if a shared module fails to parse.
    pub fn new() -> Result<Self, ShaderError> {
        let mut composer = Composer::default();

        // Dependency order: constants first, types import them.
        let constants = constants_wgsl();
        let modules: [(&str, &str); 2] = [
            (constants.as_str(), "modules/constants.wgsl"),
            (
                include_str!("../../assets/shaders/modules/types.wgsl"),
                "modules/types.wgsl",
            ),
        ];

        for (source, file_path) in modules {
            let _ = composer
                .add_composable_module(ComposableModuleDescriptor {
                    source,
                    file_path,
                    language: ShaderLanguage::Wgsl,
                    ..Default::default()
                })
                .map_err(|e| ShaderError {
                    file_path: file_path.to_owned(),
                    message: e.to_string(),
                })?;
        }

        Ok(Self { composer })
    }

    /// Compose `shader` into a `wgpu::ShaderModule`.
    ///
    /// # Errors
    ///
    /// Returns [`ShaderError`] if composition fails.
    pub fn compose(
        &mut self,
        device: &wgpu::Device,
        shader: Shader,
    ) -> Result<wgpu::ShaderModule, ShaderError> {
        let module = self.compose_naga(shader)?;
        Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(shader.label()),
            source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
        }))
    }

    /// Compose `shader` into a `naga::Module` without a device.
    ///
    /// # Errors
    ///
    /// Returns [`ShaderError`] if composition fails.
    pub fn compose_naga(
        &mut self,
        shader: Shader,
    ) -> Result<naga::Module, ShaderError> {
        self.composer
            .make_naga_module(NagaModuleDescriptor {
                source: shader.source(),
                file_path: shader.file_path(),
                shader_type: ShaderType::Wgsl,
                ..Default::default()
            })
            .map_err(|e| ShaderError {
                file_path: shader.file_path().to_owned(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_shaders_compose() {
        let mut composer = ShaderComposer::new().unwrap();
        for shader in Shader::ALL {
            let _ = composer
                .compose_naga(shader)
                .unwrap_or_else(|e| panic!("{e}"));
        }
    }

    #[test]
    fn cull_shader_exposes_entry_point() {
        let mut composer = ShaderComposer::new().unwrap();
        let module = composer.compose_naga(Shader::Cull).unwrap();
        assert!(module
            .entry_points
            .iter()
            .any(|ep| ep.name == "cs_main" && ep.stage == naga::ShaderStage::Compute));
    }

    #[test]
    fn mesh_shader_exposes_both_vertex_entries() {
        let mut composer = ShaderComposer::new().unwrap();
        let module = composer.compose_naga(Shader::Mesh).unwrap();
        let names: Vec<&str> =
            module.entry_points.iter().map(|ep| ep.name.as_str()).collect();
        for expected in ["vs_main", "vs_bond", "fs_main"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }
}
