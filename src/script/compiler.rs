//! Compiling script text into executable units

use std::path::Path;

use chrono::{DateTime, Utc};
use rhai::AST;

use super::cache;
use super::engine::ScriptEngine;
use crate::error::{KilnError, Result};

/// Turns script text into an executable unit, and persists and reloads
/// compiled units from a cache directory.
pub trait ScriptCompiler {
    /// The compiled form scripts take
    type Unit;

    fn compile(&self, text: &str, class_name: &str) -> Result<Self::Unit>;

    /// Load the unit compiled as `class_name` from `cache_dir` if it is still
    /// valid for a script last modified at `timestamp`.
    fn load_from_cache(
        &self,
        timestamp: DateTime<Utc>,
        class_name: &str,
        cache_dir: &Path,
    ) -> Result<Option<Self::Unit>>;

    /// Compile `text`, read from a script last modified at `timestamp`, and
    /// store the result in `cache_dir`
    fn write_to_cache(
        &self,
        text: &str,
        timestamp: DateTime<Utc>,
        class_name: &str,
        cache_dir: &Path,
    ) -> Result<Self::Unit>;
}

/// Compiles Rhai scripts to an [`AST`].
///
/// Rhai has no serialized AST form, so the cached unit is the verified script
/// text, which a hit recompiles without touching the original file.
#[derive(Debug, Clone, Default)]
pub struct RhaiCompiler {
    engine: ScriptEngine,
}

impl RhaiCompiler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptCompiler for RhaiCompiler {
    type Unit = AST;

    fn compile(&self, text: &str, class_name: &str) -> Result<AST> {
        self.engine
            .compile(text)
            .map_err(|source| KilnError::ScriptCompile {
                script: class_name.to_string(),
                source,
            })
    }

    fn load_from_cache(
        &self,
        timestamp: DateTime<Utc>,
        class_name: &str,
        cache_dir: &Path,
    ) -> Result<Option<AST>> {
        let Some(entry) = cache::read_entry(cache_dir, class_name)? else {
            return Ok(None);
        };

        if entry.manifest.class_name != class_name || !entry.is_valid_for(timestamp) {
            tracing::debug!(
                class = class_name,
                recorded = %entry.manifest.source_modified,
                modified = %timestamp,
                "cached script is stale"
            );
            return Ok(None);
        }

        // A stored unit that no longer compiles is treated as corrupt
        self.engine
            .compile(&entry.unit)
            .map(Some)
            .map_err(|e| KilnError::Cache {
                message: format!("Cached unit '{}' does not compile: {}", class_name, e),
            })
    }

    fn write_to_cache(
        &self,
        text: &str,
        timestamp: DateTime<Utc>,
        class_name: &str,
        cache_dir: &Path,
    ) -> Result<AST> {
        let ast = self.compile(text, class_name)?;
        let manifest = cache::write_entry(cache_dir, class_name, text, timestamp)?;
        tracing::debug!(
            class = class_name,
            dir = %cache_dir.display(),
            size_bytes = manifest.size,
            "wrote compiled script to cache"
        );
        Ok(ast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error() {
        let compiler = RhaiCompiler::new();
        let result = compiler.compile("let x = ;", "broken_rhai");
        assert!(matches!(result, Err(KilnError::ScriptCompile { script, .. }) if script == "broken_rhai"));
    }

    #[test]
    fn test_write_then_load() {
        let temp = tempfile::tempdir().unwrap();
        let compiler = RhaiCompiler::new();
        let modified = Utc::now() - chrono::Duration::seconds(10);

        compiler
            .write_to_cache("let x = 40 + 2;", modified, "build_rhai", temp.path())
            .unwrap();
        let loaded = compiler.load_from_cache(modified, "build_rhai", temp.path()).unwrap();
        assert!(loaded.is_some());

        let later = modified + chrono::Duration::milliseconds(1);
        let stale = compiler.load_from_cache(later, "build_rhai", temp.path()).unwrap();
        assert!(stale.is_none());
    }

    #[test]
    fn test_compile_failure_is_not_cached() {
        let temp = tempfile::tempdir().unwrap();
        let compiler = RhaiCompiler::new();
        let result = compiler.write_to_cache("fn (", Utc::now(), "bad_rhai", temp.path());
        assert!(matches!(result, Err(KilnError::ScriptCompile { .. })));
        assert!(!cache::entry_dir(temp.path(), "bad_rhai").exists());
    }
}
