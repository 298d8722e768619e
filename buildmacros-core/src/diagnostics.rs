//! Build-fatal diagnostics and their plain/JSON rendering.

use std::fmt;
use std::path::{Path, PathBuf};

use proc_macro2::Span;
use serde::Serialize;
use serde_json::json;

use crate::error::MacroError;

/// Severity of a diagnostic. Macro resolution failures are always errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A located, build-fatal error for one source tree.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub file: PathBuf,
    /// 1-indexed line, 0 when the error has no source location.
    pub line: usize,
    /// 1-indexed column, 0 when the error has no source location.
    pub column: usize,
    pub severity: Severity,
    pub error: MacroError,
}

impl Diagnostic {
    /// Attach the start of `span` in `file` to `error`.
    pub fn at(file: &Path, span: Span, error: MacroError) -> Self {
        let start = span.start();
        Self {
            file: file.to_path_buf(),
            line: start.line,
            column: start.column + 1,
            severity: Severity::Error,
            error,
        }
    }

    /// A diagnostic for an error that is not tied to a location.
    pub fn unlocated(file: &Path, error: MacroError) -> Self {
        let (line, column) = match &error {
            MacroError::Parse { line, column, .. } => (line.unwrap_or(0), column.unwrap_or(0)),
            _ => (0, 0),
        };
        Self {
            file: file.to_path_buf(),
            line,
            column,
            severity: Severity::Error,
            error,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "file": self.file.display().to_string(),
            "line": self.line,
            "column": self.column,
            "severity": self.severity,
            "kind": self.kind(),
            "message": self.message(),
        })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}[{}]: {}",
            self.file.display(),
            self.line,
            self.column,
            self.severity,
            self.kind(),
            self.error
        )
    }
}

impl std::error::Error for Diagnostic {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Prints diagnostics in plain text format to stderr.
pub fn print_plain(diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        eprintln!("{}", d);
    }
    if !diagnostics.is_empty() {
        eprintln!("build failed: {} error(s)", diagnostics.len());
    }
}

/// Prints diagnostics as a JSON array to stdout.
///
/// Falls back to the plain format if serialization fails.
pub fn print_json(diagnostics: &[Diagnostic]) {
    let payload: Vec<_> = diagnostics.iter().map(Diagnostic::to_json).collect();
    match serde_json::to_string_pretty(&json!({ "errors": payload })) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("[WARN] JSON serialization failed: {}", e);
            print_plain(diagnostics);
        }
    }
}
