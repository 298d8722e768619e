//! Typed error handling for macro expansion.
//!
//! Every failure the engine can raise is a variant of [`MacroError`]. All of
//! them are build-fatal for the tree they occur in; the engine attaches a
//! source location by wrapping them in a [`crate::diagnostics::Diagnostic`].

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for buildmacros operations.
#[derive(Error, Debug, Clone)]
pub enum MacroError {
    /// A macro argument references a runtime value.
    #[error("argument to {macro_name} must be statically evaluable: {detail}")]
    NonStaticArgument {
        macro_name: &'static str,
        detail: String,
    },

    /// Wrong number or type of arguments for a macro.
    #[error("invalid arguments to {macro_name}: {message}")]
    InvalidMacroArguments {
        macro_name: &'static str,
        message: String,
    },

    /// `each` received a static value that is not an array.
    #[error("the argument to each must be an array, found {found}")]
    NotAnArray { found: String },

    /// `macro_condition` used anywhere other than as an `if` condition.
    #[error("macro_condition can only be used as the condition of an if expression")]
    MisplacedMacroCondition,

    /// A macro call inside the body of another macro whose arguments are not
    /// plain expressions, so it cannot be rewritten.
    #[error("{macro_name} is called inside {host}! whose arguments are not expressions")]
    UnexpandableMacroBody {
        macro_name: &'static str,
        host: String,
    },

    /// The merger hit incompatible shapes for the same key.
    #[error(
        "conflicting config for {target} at key `{key}`: {first_origin} and {second_origin} disagree on its shape"
    )]
    MergeConflict {
        target: String,
        key: String,
        first_origin: String,
        second_origin: String,
    },

    /// A contribution payload was not a JSON object.
    #[error("config payload from {origin} for {target} must be an object, found {found}")]
    InvalidPayload {
        origin: String,
        target: String,
        found: String,
    },

    /// `get_config` for a package the requester does not depend on.
    #[error("{requester} cannot read the config of {target}: not a declared dependency")]
    UnauthorizedConfigAccess { requester: String, target: String },

    /// Explicit `fail_build` invocation.
    #[error("{message}")]
    UserBuildFailure { message: String },

    /// Registration attempted after the registry was sealed for reading.
    #[error("config registered by {origin} for {target} after expansion began reading the registry")]
    LateRegistration { origin: String, target: String },

    /// `import_sync` specifier cannot be resolved from the enclosing package.
    #[error("import_sync could not resolve `{specifier}` from {consumer}")]
    UnresolvableImport { specifier: String, consumer: String },

    /// `import_sync` specifier is not a valid module specifier.
    #[error("`{specifier}` is not a valid module specifier")]
    InvalidSpecifier { specifier: String },

    /// Malformed semver range passed to `dependency_satisfies`.
    #[error("invalid semver range `{range}`: {message}")]
    InvalidSemverRange { range: String, message: String },

    /// Unreadable or malformed package manifest.
    #[error("manifest error at {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    /// I/O error when reading or writing files.
    #[error("I/O error at {path}: {message}")]
    Io {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// Syntax error when parsing Rust source.
    #[error("parse error in {path}: {message}")]
    Parse {
        path: PathBuf,
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    /// Configuration file errors.
    #[error("config error at {path}: {message}")]
    Config { path: PathBuf, message: String },
}

impl MacroError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }

    /// Create a parse error from a `syn` error, keeping its location.
    pub fn parse(path: impl Into<PathBuf>, err: &syn::Error) -> Self {
        let start = err.span().start();
        Self::Parse {
            path: path.into(),
            message: err.to_string(),
            line: Some(start.line),
            column: Some(start.column + 1),
        }
    }

    /// Create a config error.
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a manifest error.
    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn non_static(macro_name: &'static str, detail: impl Into<String>) -> Self {
        Self::NonStaticArgument {
            macro_name,
            detail: detail.into(),
        }
    }

    pub fn invalid_args(macro_name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidMacroArguments {
            macro_name,
            message: message.into(),
        }
    }

    pub fn user_failure(message: impl Into<String>) -> Self {
        Self::UserBuildFailure {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NonStaticArgument { .. } => "non-static-argument",
            Self::InvalidMacroArguments { .. } => "invalid-macro-arguments",
            Self::NotAnArray { .. } => "not-an-array",
            Self::MisplacedMacroCondition => "misplaced-macro-condition",
            Self::UnexpandableMacroBody { .. } => "unexpandable-macro-body",
            Self::MergeConflict { .. } => "merge-conflict",
            Self::InvalidPayload { .. } => "invalid-payload",
            Self::UnauthorizedConfigAccess { .. } => "unauthorized-config-access",
            Self::UserBuildFailure { .. } => "user-build-failure",
            Self::LateRegistration { .. } => "late-registration",
            Self::UnresolvableImport { .. } => "unresolvable-import",
            Self::InvalidSpecifier { .. } => "invalid-specifier",
            Self::InvalidSemverRange { .. } => "invalid-semver-range",
            Self::Manifest { .. } => "manifest",
            Self::Io { .. } => "io",
            Self::Parse { .. } => "parse",
            Self::Config { .. } => "config",
        }
    }

    /// Get the path associated with this error, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. }
            | Self::Parse { path, .. }
            | Self::Config { path, .. }
            | Self::Manifest { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Convenience type alias for buildmacros results.
pub type MacroResult<T> = Result<T, MacroError>;

/// Extension trait for converting std::io::Error with path context.
pub trait IoResultExt<T> {
    /// Add path context to an I/O error.
    fn with_path(self, path: impl Into<PathBuf>) -> MacroResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> MacroResult<T> {
        self.map_err(|e| MacroError::io(path, e))
    }
}
