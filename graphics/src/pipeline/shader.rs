//! Precompiled shader binaries.
//!
//! Shaders are compiled offline; the renderer only loads the blobs from
//! `<dir>/<name>.<extension>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::GraphicsError;

/// Shader pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    /// Ray tracing library holding every ray tracing stage.
    Library,
}

/// A compiled shader blob plus its entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderBinary {
    pub name: String,
    pub stage: ShaderStage,
    pub entry_point: String,
    pub bytecode: Arc<[u8]>,
}

impl ShaderBinary {
    pub fn new(name: &str, stage: ShaderStage, entry_point: &str, bytecode: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            stage,
            entry_point: entry_point.to_string(),
            bytecode: bytecode.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }
}

/// Reads shader binaries from a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderLoader {
    dir: PathBuf,
    extension: String,
}

impl ShaderLoader {
    /// Default extension of compiled blobs.
    pub const DEFAULT_EXTENSION: &'static str = "spv";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: Self::DEFAULT_EXTENSION.to_string(),
        }
    }

    #[must_use]
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}", self.extension))
    }

    /// Load `<dir>/<name>.<extension>`.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::ResourceCreationFailed`] if the file is missing,
    /// unreadable or empty.
    pub fn load(
        &self,
        name: &str,
        stage: ShaderStage,
        entry_point: &str,
    ) -> Result<ShaderBinary, GraphicsError> {
        let path = self.path_of(name);
        let bytecode = std::fs::read(&path).map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "failed to read shader {}: {e}",
                path.display()
            ))
        })?;
        if bytecode.is_empty() {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "shader {} is empty",
                path.display()
            )));
        }
        log::debug!("Loaded shader {} ({} bytes)", path.display(), bytecode.len());
        Ok(ShaderBinary::new(name, stage, entry_point, bytecode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lumen_shader_{test}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_path_of() {
        let loader = ShaderLoader::new("shaders/bin").with_extension(".cso");
        assert_eq!(
            loader.path_of("ScreenVertexShader"),
            Path::new("shaders/bin").join("ScreenVertexShader.cso")
        );
    }

    #[test]
    fn test_load_reads_blob() {
        let dir = scratch_dir("load");
        std::fs::write(dir.join("Vs.spv"), [1u8, 2, 3, 4]).unwrap();
        let shader = ShaderLoader::new(&dir)
            .load("Vs", ShaderStage::Vertex, "main")
            .unwrap();
        assert_eq!(&*shader.bytecode, &[1, 2, 3, 4]);
        assert_eq!(shader.stage, ShaderStage::Vertex);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_or_empty_blob_fails() {
        let dir = scratch_dir("missing");
        std::fs::write(dir.join("Empty.spv"), [0u8; 0]).unwrap();
        let loader = ShaderLoader::new(&dir);
        assert!(matches!(
            loader.load("Missing", ShaderStage::Pixel, "main"),
            Err(GraphicsError::ResourceCreationFailed(_))
        ));
        assert!(matches!(
            loader.load("Empty", ShaderStage::Pixel, "main"),
            Err(GraphicsError::ResourceCreationFailed(_))
        ));
        std::fs::remove_dir_all(dir).ok();
    }
}
