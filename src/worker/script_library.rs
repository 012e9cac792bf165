//! Library scripts evaluated before every job script

use crate::errors::{AppError, AppResult};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryScript {
    pub name: String,
    pub source: String,
}

/// Controller glue plus shared helpers, in evaluation order
#[derive(Debug, Clone, Default)]
pub struct ScriptLibrary {
    scripts: Vec<LibraryScript>,
}

impl ScriptLibrary {
    pub fn new(scripts: Vec<LibraryScript>) -> Self {
        Self { scripts }
    }

    /// Load the controller script, if configured, followed by every `*.js` in
    /// `directory` in file name order
    ///
    /// A configured controller script must exist. A missing library directory
    /// is not an error.
    pub fn load(controller_script: Option<&Path>, directory: &Path) -> AppResult<Self> {
        let mut scripts = Vec::new();

        if let Some(path) = controller_script {
            let source = std::fs::read_to_string(path).map_err(|e| {
                AppError::configuration(format!(
                    "cannot read controller script {}: {}",
                    path.display(),
                    e
                ))
            })?;
            scripts.push(LibraryScript {
                name: path.display().to_string(),
                source,
            });
        }

        if directory.is_dir() {
            let mut paths: Vec<_> = std::fs::read_dir(directory)?
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "js"))
                .collect();
            paths.sort();

            for path in paths {
                let source = std::fs::read_to_string(&path)?;
                scripts.push(LibraryScript {
                    name: path.display().to_string(),
                    source,
                });
            }
        } else {
            debug!("Library directory {} not found", directory.display());
        }

        info!("Loaded {} library scripts", scripts.len());
        Ok(Self { scripts })
    }

    pub fn scripts(&self) -> &[LibraryScript] {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
