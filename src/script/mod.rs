//! Build scripts: sources, compilation, the compiled-unit cache, and the
//! functions scripts use to configure a project.

pub mod cache;
mod compiler;
pub mod dsl;
mod engine;
mod processor;
mod source;

pub use cache::CacheStats;
pub use compiler::{RhaiCompiler, ScriptCompiler};
pub use dsl::{Directive, Evaluation};
pub use engine::ScriptEngine;
pub use processor::{CacheUsage, Script, ScriptBody, ScriptProcessor};
pub use source::ScriptSource;
