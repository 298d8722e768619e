//! buildmacros-core: compile-time macro expansion for Rust sources.
//!
//! Seven sentinel functions exported by the `buildmacros` crate look like
//! ordinary calls in source but are resolved and rewritten before the code is
//! compiled:
//!
//! - `dependency_satisfies("pkg", "^2.0.0")` becomes `true` or `false`
//! - `if macro_condition(..) { .. } else { .. }` keeps only the taken branch
//! - `each([..])` becomes its (array) argument
//! - `import_sync("pkg/sub")` becomes a module path
//! - `get_config::<T>("pkg")` and `get_own_config::<T>()` become literals
//!   holding merged, build-time configuration
//! - `fail_build("msg")` stops the build with a located diagnostic
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use buildmacros_core::prelude::*;
//!
//! let mut session = BuildSession::new();
//! session.load_config(Path::new("/my/package"))?;
//! let report = session.expand_package(Path::new("/my/package"))?;
//! report.write_to(Path::new("/my/package/target/expanded"))?;
//! ```
//!
//! # Module Organization
//!
//! - [`package`]: package identity and `package.json` manifests
//! - [`registry`]: per-package config contributions, mergers and the exposure rule
//! - [`resolver`]: `node_modules` resolution and semver range checks
//! - [`classify`]: binding-based recognition of macro calls
//! - [`expand`]: the rewriting pass
//! - [`diagnostics`]: located, build-fatal errors
//! - [`detect`]: recognising this transform among build plugins
//! - [`build`]: sessions tying the pieces together for a package
//! - [`config`]: `buildmacros.toml` loading
//! - [`scan`]: source file discovery
//! - [`error`]: typed error handling
//!
//! # Cargo Features
//!
//! - `parallel` (default): expand the files of a package with rayon

pub mod build;
pub mod classify;
pub mod config;
pub mod detect;
pub mod diagnostics;
pub mod error;
pub mod expand;
pub mod logging;
pub mod package;
pub mod prelude;
pub mod registry;
pub mod resolver;
pub mod scan;

// ============================================================================
// Explicit Re-exports
// ============================================================================

// Error types
pub use error::{IoResultExt, MacroError, MacroResult};

// Sessions
pub use build::{BuildReport, BuildSession, FileExpansion};

// Configuration
pub use config::{load_config, load_config_file, BuildConfig, ContributionConfig, MergerKind};

// Packages and resolution
pub use package::{Manifest, PackageIdentity};
pub use resolver::{parse_range, DependencyFact, DependencyResolver, ResolvedPackage};

// Registry
pub use registry::{ConfigContribution, ConfigRegistry, DeepMerger, Merger, ShallowMerger};

// Classification and expansion
pub use classify::{Classifier, MacroKind, SymbolTable};
pub use expand::{
    expand_file, expand_source, Expanded, ExpansionContext, ExpansionOptions, ExpansionStats,
};

// Reporting
pub use diagnostics::{print_json, print_plain, Diagnostic, Severity};

// Detection
pub use detect::{is_macros_transform, transform_descriptor};

// Logging
pub use logging::{init_structured_logging, log_event};

// File scanning
pub use scan::{gather_rs_files, gather_rs_files_with_excludes};

#[cfg(test)]
mod tests;
