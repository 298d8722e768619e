//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use buildmacros_core::prelude::*;
//! ```

// Errors
pub use crate::error::{MacroError, MacroResult};

// Sessions
pub use crate::build::{BuildReport, BuildSession};

// Packages
pub use crate::package::PackageIdentity;
pub use crate::resolver::DependencyResolver;

// Registry
pub use crate::registry::{ConfigRegistry, DeepMerger, Merger, ShallowMerger};

// Expansion
pub use crate::classify::MacroKind;
pub use crate::expand::{expand_source, Expanded, ExpansionContext, ExpansionOptions};

// Reporting
pub use crate::diagnostics::{print_json, print_plain, Diagnostic};
