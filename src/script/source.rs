//! Where a script comes from

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{KilnError, Result};

/// The identity and content of a script, independent of how it is compiled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    source_file: Option<PathBuf>,
    text: String,
    modified: Option<DateTime<Utc>>,
    class_name: String,
    display_name: String,
}

impl ScriptSource {
    /// Read a script from disk. A missing file is an empty script.
    ///
    /// The modification time is taken before the text is read, so an edit
    /// racing with the read can only make the recorded time older than the
    /// text.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(time) => Some(DateTime::<Utc>::from(time)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(source) => return Err(KilnError::ScriptSourceUnavailable { path, source }),
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(source) => return Err(KilnError::ScriptSourceUnavailable { path, source }),
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "script".to_string());

        Ok(Self {
            class_name: class_name_for(&file_name),
            display_name: path.display().to_string(),
            source_file: Some(path),
            text,
            modified,
        })
    }

    /// A script with no backing file, e.g. an inline task script
    pub fn inline(name: &str, text: impl Into<String>) -> Self {
        Self {
            source_file: None,
            text: text.into(),
            modified: None,
            class_name: class_name_for(name),
            display_name: name.to_string(),
        }
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Last-modified time of the backing file when it was read
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// Identifier used to name the compiled unit and its cache directory
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Human-readable origin for diagnostics
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn class_name_for(name: &str) -> String {
    let mut class_name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if class_name.is_empty() || class_name.starts_with(|c: char| c.is_ascii_digit()) {
        class_name.insert(0, '_');
    }
    class_name
}
