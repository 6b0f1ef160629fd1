//! Scythe, a template renderer. Templates are HTML with directives
//! (`@if`, `@foreach`, `@include`, `@extends` and friends) and echo
//! expressions (`{{ .. }}`, `{!! .. !!}`); compilation rewrites them
//! to an executable instruction-tag form which is cached on disk and
//! executed against JSON data.
//!
//! ```no_run
//! use scythe::{Scythe, Settings};
//!
//! let scythe = Scythe::new(Settings::new("views", "cache"))?;
//! let data = serde_json::json!({"name": "Kermit"});
//! let html = scythe.make("hello", data.as_object().unwrap())?;
//! # Ok::<(), scythe::ScytheError>(())
//! ```

pub mod cache;
pub mod error;
pub mod escape;
pub mod exec;
pub mod includes;
pub mod inheritance;
pub mod loopstack;
pub mod renderer;
pub mod rules;
pub mod scan;
pub mod views;

pub use error::{Result, ScytheError};
pub use exec::{Data, Executor, Interp};
pub use renderer::{Scythe, Settings};
pub use rules::{DirectiveHandler, UserDirective};
