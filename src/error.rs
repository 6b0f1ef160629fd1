//! Error type for the whole renderer. One enum, since every failure
//! crosses the same public boundary (`render`/`compile`), and the
//! message wording is part of the contract (tests match on it).

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScytheError>;

#[derive(Error, Debug)]
pub enum ScytheError {
    #[error("renderer cannot find view path at '{}'", .0.display())]
    ViewsPathNotFound(PathBuf),

    #[error("renderer cannot read view path at '{}'", .0.display())]
    ViewsPathNotReadable(PathBuf),

    #[error("renderer cannot find cache path at '{}'", .0.display())]
    CachePathNotFound(PathBuf),

    #[error("renderer cannot write to cache path at '{}'", .0.display())]
    CachePathNotWritable(PathBuf),

    #[error("renderer cannot find namespace path at '{}'", .1.display())]
    NamespacePathNotFound(String, PathBuf),

    #[error("namespace '{0}' is not defined")]
    NamespaceNotDefined(String),

    #[error("renderer cannot find template '{0}'")]
    TemplateNotFound(String),

    #[error("include depth exceeded while compiling '{0}' (include or extends cycle?)")]
    IncludeDepthExceeded(String),

    #[error("no active loop")]
    NoActiveLoop,

    #[error("loop parent access is not implemented")]
    LoopParentUnsupported,

    /// The compiled form did not parse; this is where malformed
    /// directives that passed through compilation surface.
    #[error("syntax error in compiled template: {0}")]
    Syntax(String),

    #[error("template execution error: {0}")]
    Exec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
