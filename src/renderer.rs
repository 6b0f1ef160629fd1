//! The renderer front end: configuration, the compile pipeline, and
//! the public render entry points.

use std::io;
use std::path::{Path, PathBuf};

use kstring::KString;
use log::debug;

use crate::cache::CompileCache;
use crate::error::{Result, ScytheError};
use crate::exec::{Data, Executor, Interp};
use crate::rules::{self, DirectiveHandler, UserDirective};
use crate::views::{self, Views};
use crate::{includes, inheritance};

/// Compilation recursion limit; an `@include`/`@extends` cycle hits
/// this long before anything else goes wrong.
const MAX_DEPTH: usize = 64;

/// Construction-time configuration. Paths are checked by
/// `Scythe::new`, not here, so a `Settings` can be built up freely.
#[derive(Default)]
pub struct Settings {
    pub views_path: PathBuf,
    pub cache_path: PathBuf,
    pub namespaces: Vec<(KString, PathBuf)>,
    pub directives: Vec<UserDirective>,
}

impl Settings {
    pub fn new(views_path: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Settings {
            views_path: views_path.into(),
            cache_path: cache_path.into(),
            namespaces: Vec::new(),
            directives: Vec::new(),
        }
    }

    pub fn namespace(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.namespaces.push((KString::from_ref(name), path.into()));
        self
    }

    pub fn directive(mut self, name: &str, handler: DirectiveHandler) -> Self {
        self.directives.push(UserDirective::new(name, handler));
        self
    }
}

/// The template renderer. Construction validates every configured
/// path; a constructed instance can render concurrently from multiple
/// threads since all per-render state lives in the executor call.
pub struct Scythe {
    views: Views,
    cache: CompileCache,
    user_rules: Vec<UserDirective>,
    executor: Box<dyn Executor>,
}

impl std::fmt::Debug for Scythe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scythe")
            .field("views", &self.views)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Scythe {
    pub fn new(settings: Settings) -> Result<Self> {
        let views_path = normalize(&settings.views_path);
        let cache_path = normalize(&settings.cache_path);
        views::check_dir(&views_path, false)?;
        views::check_dir(&cache_path, true)?;

        let mut scythe = Scythe {
            views: Views::new(views_path),
            cache: CompileCache::new(cache_path),
            user_rules: settings.directives,
            executor: Box::new(Interp),
        };
        for (name, path) in settings.namespaces {
            scythe.add_namespace(&name, path)?;
        }
        Ok(scythe)
    }

    /// Swap in a different execution strategy.
    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Register a namespace after construction. The path must exist.
    pub fn add_namespace(&mut self, name: &str, path: impl Into<PathBuf>) -> Result<()> {
        let path = normalize(&path.into());
        if !path.is_dir() {
            return Err(ScytheError::NamespacePathNotFound(name.to_string(), path));
        }
        self.views.add_namespace(KString::from_ref(name), path);
        Ok(())
    }

    pub fn add_directive(&mut self, name: &str, handler: DirectiveHandler) {
        self.user_rules.push(UserDirective::new(name, handler));
    }

    pub fn namespaces(&self) -> Vec<(&str, &Path)> {
        self.views
            .namespaces()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_path()))
            .collect()
    }

    pub fn directives(&self) -> Vec<&str> {
        self.user_rules.iter().map(|d| d.name()).collect()
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        self.views.exists(id)
    }

    /// Render a template into a writer. The output is built in full
    /// before anything is written, so a failed render leaves the sink
    /// untouched.
    pub fn render<W: io::Write>(&self, sink: &mut W, id: &str, data: &Data) -> Result<()> {
        if !self.exists(id)? {
            return Err(ScytheError::TemplateNotFound(id.to_string()));
        }
        let output = self.make(id, data)?;
        sink.write_all(output.as_bytes())?;
        Ok(())
    }

    /// Render a template to a string.
    pub fn make(&self, id: &str, data: &Data) -> Result<String> {
        let compiled = self.compiled_contents(id, 0)?;
        self.executor.execute(&compiled, data)
    }

    /// Compile and execute template source directly, bypassing the
    /// view lookup and the cache. Includes and extends inside the
    /// source still resolve against the configured views.
    pub fn render_string(&self, source: &str, data: &Data) -> Result<String> {
        let compiled = self.compile_at(source, 0)?;
        self.executor.execute(&compiled, data)
    }

    /// Compile template source to its executable form without
    /// running it.
    pub fn compile_string(&self, source: &str) -> Result<String> {
        self.compile_at(source, 0)
    }

    /// The compile pipeline: inheritance, then includes, then the
    /// rewrite table, then user directives, then the cleanup pass
    /// that strips unfilled inheritance markers. `depth` counts
    /// template fetches, not pipeline stages.
    pub(crate) fn compile_at(&self, source: &str, depth: usize) -> Result<String> {
        Ok(inheritance::cleanup(&self.compile_fragment(source, depth)?))
    }

    /// The pipeline without the final cleanup. Used for text that is
    /// spliced into a larger template, where an unfilled marker may
    /// still be filled by an outer level.
    pub(crate) fn compile_fragment(&self, source: &str, depth: usize) -> Result<String> {
        let text = if inheritance::has_extends(source) {
            inheritance::resolve(self, source, depth)?
        } else {
            source.to_string()
        };
        let text = includes::resolve(self, &text, depth)?;
        let text = rules::rewrite(&text);
        Ok(self
            .user_rules
            .iter()
            .fold(text, |t, rule| rule.apply(&t)))
    }

    /// Compiled form of a parent template as seen by an extending
    /// child. Bypasses the cache, which holds the cleaned form, and
    /// keeps unfilled markers so the child can still fill them.
    pub(crate) fn parent_contents(&self, id: &str, depth: usize) -> Result<String> {
        if depth > MAX_DEPTH {
            return Err(ScytheError::IncludeDepthExceeded(id.to_string()));
        }
        let source = self.views.contents(id)?;
        self.compile_fragment(&source, depth)
    }

    /// Compiled form of a stored template, through the cache.
    pub(crate) fn compiled_contents(&self, id: &str, depth: usize) -> Result<String> {
        if depth > MAX_DEPTH {
            return Err(ScytheError::IncludeDepthExceeded(id.to_string()));
        }
        let source_modified = self.views.modified(id)?;
        if self.cache.fresh(id, source_modified) {
            return self.cache.load(id);
        }
        debug!("compiling template '{id}'");
        let source = self.views.contents(id)?;
        let compiled = self.compile_at(&source, depth)?;
        self.cache.store(id, &compiled)?;
        Ok(compiled)
    }
}

/// Strip trailing path separators so configured paths join cleanly
/// whether or not the caller wrote them with one.
fn normalize(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        path.to_path_buf()
    } else {
        PathBuf::from(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_normalize() {
        assert_eq!(normalize(Path::new("/a/b/")), PathBuf::from("/a/b"));
        assert_eq!(normalize(Path::new("/a/b")), PathBuf::from("/a/b"));
        assert_eq!(normalize(Path::new("/")), PathBuf::from("/"));
    }
}
