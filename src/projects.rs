//! Project lookup: resolves an owner key to the directory its terminal
//! starts in.
//!
//! The catalog file looks like:
//!
//! ```json
//! {
//!   "projects": {
//!     "1": { "name": "Board", "source_directory": "/home/me/src/board" }
//!   }
//! }
//! ```

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{TerminalError, TerminalResult};

pub trait ProjectDirectory: Send + Sync {
    fn source_directory(&self, project_key: &str) -> TerminalResult<PathBuf>;

    /// Refresh from the backing store, returning the project count.
    fn reload(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_directory: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    projects: HashMap<String, Project>,
}

/// Projects loaded from a JSON file. Reloading replaces
/// the whole map under the write lock.
pub struct ProjectCatalog {
    path: Option<PathBuf>,
    projects: RwLock<HashMap<String, Project>>,
}

impl ProjectCatalog {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let projects = load(&path);
        Self {
            path: Some(path),
            projects: RwLock::new(projects),
        }
    }

    pub fn from_projects(projects: HashMap<String, Project>) -> Self {
        Self {
            path: None,
            projects: RwLock::new(projects),
        }
    }

    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.read().is_empty()
    }
}

impl ProjectDirectory for ProjectCatalog {
    fn source_directory(&self, project_key: &str) -> TerminalResult<PathBuf> {
        let projects = self.projects.read();
        let project = projects
            .get(project_key)
            .ok_or_else(|| TerminalError::ProjectNotFound(project_key.to_string()))?;
        project
            .source_directory
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or_else(|| TerminalError::NoSourceDirectory(project_key.to_string()))
    }

    fn reload(&self) -> usize {
        let Some(path) = &self.path else {
            return self.projects.read().len();
        };
        let fresh = load(path);
        let count = fresh.len();
        *self.projects.write() = fresh;
        count
    }
}

fn load(path: &Path) -> HashMap<String, Project> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Project catalog {} unreadable: {}", path.display(), e);
            return HashMap::new();
        }
    };
    match serde_json::from_str::<CatalogFile>(&raw) {
        Ok(file) => {
            info!(
                "Loaded {} projects from {}",
                file.projects.len(),
                path.display()
            );
            file.projects
        }
        Err(e) => {
            warn!("Project catalog {} is corrupt: {}", path.display(), e);
            HashMap::new()
        }
    }
}
