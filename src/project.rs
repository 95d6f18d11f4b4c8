//! Projects and `:`-separated path addressing
//!
//! A build is a tree of projects. The root project has the path `:`, a child
//! included as `libs/util` has the path `:libs:util`, and the task `compile`
//! of that child is addressed as `:libs:util:compile`.

use std::path::{Path, PathBuf};

use crate::error::{KilnError, Result};

/// Separator between path segments
pub const PATH_SEPARATOR: char = ':';

/// Path of the root project
pub const ROOT_PATH: &str = ":";

/// Prefix of the skip key every task is created with (`skip.<name>`)
pub const AUTOSKIP_PROPERTY_PREFIX: &str = "skip.";

/// Directory, next to a build script, that holds its compiled units
pub const CACHE_DIR_NAME: &str = ".kiln";

/// Build file name looked up in every project directory
pub const BUILD_FILE: &str = "kiln.toml";

/// Build script name looked up in every project directory
pub const BUILD_SCRIPT: &str = "build.rhai";

/// A project in the build tree
#[derive(Debug, Clone)]
pub struct Project {
    path: String,
    name: String,
    dir: PathBuf,
}

impl Project {
    /// Create the root project located in `dir`
    pub fn root(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "root".to_string());

        Self {
            path: ROOT_PATH.to_string(),
            name,
            dir,
        }
    }

    /// Create a child project from an include entry such as `libs/util`
    pub fn child(root_dir: &Path, include: &str) -> Result<Self> {
        let segments: Vec<&str> = include
            .split(['/', '\\', PATH_SEPARATOR])
            .filter(|s| !s.is_empty())
            .collect();

        if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(KilnError::InvalidProject {
                path: include.to_string(),
                reason: "Included project must be a relative directory below the root".to_string(),
            });
        }

        let path = format!("{}{}", PATH_SEPARATOR, segments.join(":"));
        let dir = segments.iter().fold(root_dir.to_path_buf(), |d, s| d.join(s));
        let name = segments[segments.len() - 1].to_string();

        Ok(Self { path, name, dir })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_root(&self) -> bool {
        self.path == ROOT_PATH
    }
}

/// Path of the task `name` owned by the project at `project_path`
pub fn task_path(project_path: &str, name: &str) -> String {
    if project_path == ROOT_PATH {
        format!("{}{}", PATH_SEPARATOR, name)
    } else {
        format!("{}{}{}", project_path, PATH_SEPARATOR, name)
    }
}

/// Resolve a task reference against the project owning the referencing task.
///
/// Absolute references (leading `:`) are returned as they are.
pub fn resolve_path(project_path: &str, reference: &str) -> Result<String> {
    let reference = reference.trim();
    let relative = reference.strip_prefix(PATH_SEPARATOR);
    let body = relative.unwrap_or(reference);

    if body.is_empty() || body.split(PATH_SEPARATOR).any(str::is_empty) {
        return Err(KilnError::InvalidTask {
            task: reference.to_string(),
            reason: "Task paths must not contain empty segments".to_string(),
        });
    }

    Ok(match relative {
        Some(_) => reference.to_string(),
        None => task_path(project_path, body),
    })
}

/// Split a task path into its project path and task name
pub fn split_task_path(path: &str) -> (&str, &str) {
    match path.rfind(PATH_SEPARATOR) {
        Some(0) => (ROOT_PATH, &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => (ROOT_PATH, path),
    }
}

/// Parent of a project path, `None` for the root
pub fn parent_path(project_path: &str) -> Option<&str> {
    if project_path == ROOT_PATH {
        return None;
    }
    Some(split_task_path(project_path).0)
}

/// Whether `candidate` is `ancestor` or one of its descendants
pub fn is_ancestor_or_self(ancestor: &str, candidate: &str) -> bool {
    if ancestor == ROOT_PATH || ancestor == candidate {
        return true;
    }
    candidate
        .strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
}
