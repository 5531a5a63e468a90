//! # stencil-renderer
//!
//! The generation backend: the [`GenerationBackend`] contract the engine
//! consumes and [`TeraBackend`], which renders template bundles with Tera.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use stencil_core::{TemplateLibrary, TemplateName, Variables};
//! use stencil_renderer::{GenerationBackend, TeraBackend};
//!
//! fn render(root: &Path, out: &Path) {
//!     let backend = TeraBackend::new(TemplateLibrary::new(root));
//!     if let Ok(loaded) = backend.load(&TemplateName::from("rust_lib")) {
//!         if let Ok(files) = backend.generate(&loaded.handle, out, &Variables::new()) {
//!             for path in files {
//!                 println!("{}", path.display());
//!             }
//!         }
//!     }
//! }
//! ```

pub mod backend;
pub mod context;
pub mod error;
pub mod tera_backend;
pub mod writer;

pub use backend::{BackendHandle, GenerationBackend, LoadedTemplate};
pub use context::RenderContext;
pub use error::BackendError;
pub use tera_backend::TeraBackend;
