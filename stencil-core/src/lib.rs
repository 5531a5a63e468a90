//! Stencil core library: domain types, template library, error taxonomy.
//!
//! - [`types`]: newtypes, descriptor schema, variable bindings
//! - [`error`]: [`ErrorKind`] and [`GenerationError`]
//! - [`library`]: on-disk template bundles and the capability traits the
//!   engine consumes

pub mod error;
pub mod library;
pub mod types;

pub use error::{io_err, ErrorKind, GenerationError};
pub use library::{
    DescriptorSource, ResolvedDescriptor, TemplateLibrary, TemplateLister, TemplateScaffolder,
};
pub use types::{
    HookDeclaration, HookInheritance, HookStage, TemplateDescriptor, TemplateName, VariableIssue,
    VariableSpec, VariableType, Variables,
};
