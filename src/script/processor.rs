//! Deciding between the script cache and a fresh compile

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::compiler::ScriptCompiler;
use super::source::ScriptSource;
use crate::error::{KilnError, Result};
use crate::project::CACHE_DIR_NAME;

/// How the compiled-script cache is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheUsage {
    /// Reuse a valid entry instead of the script file, write on miss.
    ///
    /// Whether a hit also skips compilation depends on the compiler: a Rhai
    /// unit is stored as verified text and parsed again on a hit.
    #[default]
    On,
    /// Never read, always recompile and rewrite
    Rebuild,
    /// Never touch the cache
    Off,
}

impl FromStr for CacheUsage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(CacheUsage::On),
            "rebuild" => Ok(CacheUsage::Rebuild),
            "off" => Ok(CacheUsage::Off),
            other => Err(format!("unknown cache usage '{}'", other)),
        }
    }
}

impl fmt::Display for CacheUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheUsage::On => "on",
            CacheUsage::Rebuild => "rebuild",
            CacheUsage::Off => "off",
        };
        f.write_str(name)
    }
}

/// What a script compiled to
#[derive(Debug, Clone)]
pub enum ScriptBody<U> {
    /// The script text was blank
    Empty,
    Compiled(U),
}

/// A compiled script together with the source it came from
#[derive(Debug, Clone)]
pub struct Script<U> {
    body: ScriptBody<U>,
    source: ScriptSource,
}

impl<U> Script<U> {
    pub fn new(body: ScriptBody<U>, source: ScriptSource) -> Self {
        Self { body, source }
    }

    pub fn body(&self) -> &ScriptBody<U> {
        &self.body
    }

    /// The compiled unit, `None` for an empty script
    pub fn unit(&self) -> Option<&U> {
        match &self.body {
            ScriptBody::Compiled(unit) => Some(unit),
            ScriptBody::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.body, ScriptBody::Empty)
    }

    pub fn source(&self) -> &ScriptSource {
        &self.source
    }
}

/// Produces scripts from sources, going through the on-disk cache when the
/// source has a backing file and caching is not off.
#[derive(Debug, Clone)]
pub struct ScriptProcessor<C> {
    compiler: C,
    cache_usage: CacheUsage,
    cache_dir_name: String,
}

impl<C: ScriptCompiler> ScriptProcessor<C> {
    pub fn new(compiler: C, cache_usage: CacheUsage) -> Self {
        Self {
            compiler,
            cache_usage,
            cache_dir_name: CACHE_DIR_NAME.to_string(),
        }
    }

    /// Use a different cache directory name next to scripts
    pub fn with_cache_dir_name(mut self, name: impl Into<String>) -> Self {
        self.cache_dir_name = name.into();
        self
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    pub fn cache_usage(&self) -> CacheUsage {
        self.cache_usage
    }

    /// `<script dir>/<cache dir name>/<script file name>`
    pub fn cache_dir_for(&self, source_file: &Path) -> PathBuf {
        let parent = source_file.parent().unwrap_or_else(|| Path::new("."));
        let file_name = source_file.file_name().unwrap_or(source_file.as_os_str());
        parent.join(&self.cache_dir_name).join(file_name)
    }

    fn is_cacheable(&self, source: &ScriptSource) -> bool {
        self.cache_usage != CacheUsage::Off && source.source_file().is_some_and(Path::is_file)
    }

    /// Compile or load the script for `source`
    pub fn create_script(&self, source: ScriptSource) -> Result<Script<C::Unit>> {
        if source.is_blank() {
            tracing::debug!(script = source.display_name(), "empty script");
            return Ok(Script::new(ScriptBody::Empty, source));
        }

        let unit = match source.source_file() {
            Some(file) if self.is_cacheable(&source) => self.load_via_cache(&source, file)?,
            _ => self.compiler.compile(source.text(), source.class_name())?,
        };

        Ok(Script::new(ScriptBody::Compiled(unit), source))
    }

    fn load_via_cache(&self, source: &ScriptSource, file: &Path) -> Result<C::Unit> {
        let cache_dir = self.cache_dir_for(file);
        let class_name = source.class_name();
        let timestamp = match source.modified() {
            Some(time) => time,
            None => last_modified(file)?,
        };

        if self.cache_usage == CacheUsage::On {
            match self.compiler.load_from_cache(timestamp, class_name, &cache_dir) {
                Ok(Some(unit)) => {
                    tracing::debug!(script = source.display_name(), "script cache hit");
                    return Ok(unit);
                }
                Ok(None) => {
                    tracing::debug!(script = source.display_name(), "script cache miss");
                }
                Err(e) => {
                    tracing::warn!(
                        script = source.display_name(),
                        error = %e,
                        "unreadable script cache entry, recompiling"
                    );
                }
            }
        }

        match self
            .compiler
            .write_to_cache(source.text(), timestamp, class_name, &cache_dir)
        {
            Ok(unit) => Ok(unit),
            Err(e) if e.is_cache_error() => {
                tracing::warn!(
                    script = source.display_name(),
                    error = %e,
                    "could not write script cache, compiling without it"
                );
                self.compiler.compile(source.text(), class_name)
            }
            Err(e) => Err(e),
        }
    }
}

fn last_modified(file: &Path) -> Result<DateTime<Utc>> {
    std::fs::metadata(file)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .map_err(|source| KilnError::ScriptSourceUnavailable {
            path: file.to_path_buf(),
            source,
        })
}
