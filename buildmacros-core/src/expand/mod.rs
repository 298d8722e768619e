//! Expansion engine: resolves every macro call in a file and rewrites the
//! tree.
//!
//! | macro                       | becomes                                   |
//! |-----------------------------|-------------------------------------------|
//! | `dependency_satisfies(p, r)`| `true` / `false`                          |
//! | `if macro_condition(b) {..}`| the taken branch, or nothing              |
//! | `each(xs)`                  | `xs`                                      |
//! | `import_sync("path")`       | a module path (`::pkg::sub`, `self::x`)   |
//! | `get_config("pkg")`         | the merged config as a literal            |
//! | `get_own_config()`          | the merged config as a literal            |
//! | `fail_build("msg")`         | a build-fatal diagnostic                  |
//!
//! Expansion of one file is all-or-nothing: the first failure aborts it and
//! the partially rewritten tree is discarded.

mod engine;
pub mod materialize;
pub mod prune;
pub mod specifier;
pub mod static_eval;

use std::collections::BTreeMap;
use std::path::Path;

use quote::ToTokens;
use serde::Serialize;
use syn::File;
use tracing::{debug, warn};

use crate::classify::{
    Classifier, MacroKind, ModulePathContext, SymbolTable, DEFAULT_MACROS_CRATE,
};
use crate::diagnostics::Diagnostic;
use crate::error::MacroError;
use crate::package::PackageIdentity;
use crate::registry::ConfigRegistry;
use crate::resolver::DependencyResolver;
use engine::Expander;

/// Knobs for a single expansion pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionOptions {
    /// Crate whose exports are treated as macros.
    pub macros_crate: String,
    /// Remove `use` items that only imported macros.
    pub prune_imports: bool,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        Self {
            macros_crate: DEFAULT_MACROS_CRATE.to_string(),
            prune_imports: true,
        }
    }
}

/// Everything a pass needs to know about the package it runs in.
#[derive(Clone, Copy)]
pub struct ExpansionContext<'a> {
    pub package: &'a PackageIdentity,
    pub registry: &'a ConfigRegistry,
    pub resolver: &'a DependencyResolver,
    pub options: &'a ExpansionOptions,
}

/// What a pass resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpansionStats {
    /// Resolved call count per macro export name.
    pub resolved: BTreeMap<String, usize>,
    pub branches_eliminated: usize,
    pub imports_pruned: usize,
}

impl ExpansionStats {
    /// Total number of macro calls resolved.
    pub fn total(&self) -> usize {
        self.resolved.values().sum()
    }

    /// Nothing was resolved or pruned.
    pub fn is_empty(&self) -> bool {
        self.total() == 0 && self.imports_pruned == 0
    }

    pub fn count(&self, kind: MacroKind) -> usize {
        self.resolved.get(kind.export_name()).copied().unwrap_or(0)
    }

    pub(crate) fn record(&mut self, kind: MacroKind) {
        *self
            .resolved
            .entry(kind.export_name().to_string())
            .or_default() += 1;
    }

    /// Fold `other` into `self`.
    pub fn absorb(&mut self, other: &ExpansionStats) {
        for (name, count) in &other.resolved {
            *self.resolved.entry(name.clone()).or_default() += count;
        }
        self.branches_eliminated += other.branches_eliminated;
        self.imports_pruned += other.imports_pruned;
    }
}

/// A successfully expanded file.
#[derive(Debug, Clone)]
pub struct Expanded {
    pub file: File,
    pub stats: ExpansionStats,
}

impl Expanded {
    /// True when the pass found nothing to do.
    pub fn is_unchanged(&self) -> bool {
        self.stats.is_empty()
    }

    /// Render the tree back to source text.
    ///
    /// Comments and layout are lost; see [`Expanded::render`].
    pub fn to_source(&self) -> String {
        self.file.to_token_stream().to_string()
    }

    /// Output text for a file that read `original`: the original itself when
    /// the pass changed nothing, the rendered tree otherwise.
    pub fn render(&self, original: &str) -> String {
        if self.is_unchanged() {
            original.to_string()
        } else {
            self.to_source()
        }
    }
}

/// Expand every macro call in `file`.
///
/// `path` is the file's location relative to the package root; it decides
/// the module the top level lives in and is reported in diagnostics.
pub fn expand_file(
    mut file: File,
    path: &Path,
    ctx: &ExpansionContext<'_>,
) -> Result<Expanded, Diagnostic> {
    let module = ModulePathContext::from_file_path(path);
    let symbols = SymbolTable::build(&file, &module);
    let classifier = Classifier::new(&symbols, &ctx.options.macros_crate);

    let mut expander = Expander::new(*ctx, classifier, path, module.directory.clone());
    syn::visit_mut::VisitMut::visit_file_mut(&mut expander, &mut file);
    let mut stats = match expander.finish() {
        Ok(stats) => stats,
        Err(diagnostic) => {
            warn!(
                package = %ctx.package,
                file = %path.display(),
                kind = diagnostic.kind(),
                "expansion failed"
            );
            return Err(diagnostic);
        }
    };

    if ctx.options.prune_imports && stats.total() > 0 {
        stats.imports_pruned = prune::prune_macro_imports(&mut file, &ctx.options.macros_crate);
    }
    debug!(
        package = %ctx.package,
        file = %path.display(),
        resolved = stats.total(),
        branches_eliminated = stats.branches_eliminated,
        "file expanded"
    );
    Ok(Expanded { file, stats })
}

/// Parse `source` and expand it.
pub fn expand_source(
    source: &str,
    path: &Path,
    ctx: &ExpansionContext<'_>,
) -> Result<Expanded, Diagnostic> {
    let file = syn::parse_file(source)
        .map_err(|e| Diagnostic::unlocated(path, MacroError::parse(path, &e)))?;
    expand_file(file, path, ctx)
}
