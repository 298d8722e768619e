//! `import_sync` specifiers and the module paths they rewrite to.
//!
//! Relative specifiers are taken from the directory of the importing file
//! and rewritten relative to the module the call sits in:
//!
//! - `"./util/strings"` in `src/lib.rs` → `self::util::strings`
//! - `"./sibling"` in `src/api/handler.rs` → `super::sibling`
//! - `"../shared"` in `src/api/mod.rs` → `super::shared`
//! - `"lodash-es/debounce"` → `::lodash_es::debounce`
//! - `"@scope/pkg"` → `::scope_pkg`
//!
//! Bare specifiers must name a package the enclosing package can resolve.

use std::sync::OnceLock;

use proc_macro2::Span;
use regex::Regex;
use syn::punctuated::Punctuated;
use syn::{Ident, Path, PathSegment};

use crate::error::{MacroError, MacroResult};
use crate::package::PackageIdentity;
use crate::resolver::DependencyResolver;

/// File extensions dropped from the last segment of a specifier.
const STRIPPED_EXTENSIONS: &[&str] = &[".js", ".mjs", ".cjs", ".ts", ".rs"];

/// A parsed `import_sync` specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Specifier {
    /// `./a/b` (parents = 0) or `../../a` (parents = 2)
    Relative { parents: usize, segments: Vec<String> },
    /// `pkg/sub/path` or `@scope/pkg/sub`
    Package { package: String, subpath: Vec<String> },
}

fn package_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:@[A-Za-z0-9][A-Za-z0-9._~-]*/)?[A-Za-z0-9][A-Za-z0-9._~-]*$")
            .unwrap_or_else(|_| unreachable!("package name pattern is a valid regex"))
    })
}

fn invalid(specifier: &str) -> MacroError {
    MacroError::InvalidSpecifier {
        specifier: specifier.to_string(),
    }
}

fn strip_extension(segment: &str) -> &str {
    STRIPPED_EXTENSIONS
        .iter()
        .find_map(|ext| segment.strip_suffix(ext))
        .unwrap_or(segment)
}

/// Parse and validate `specifier`.
pub fn parse_specifier(specifier: &str) -> MacroResult<Specifier> {
    let parts: Vec<&str> = specifier.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(invalid(specifier));
    }

    if matches!(parts[0], "." | "..") {
        let parents = parts.iter().take_while(|p| **p == "..").count();
        let skip = if parts[0] == "." { 1 } else { parents };
        let rest = &parts[skip..];
        if rest.is_empty() || rest.iter().any(|p| matches!(*p, "." | "..")) {
            return Err(invalid(specifier));
        }
        let last = rest.len() - 1;
        let segments = rest
            .iter()
            .enumerate()
            .map(|(i, p)| if i == last { strip_extension(p) } else { p }.to_string())
            .collect();
        return Ok(Specifier::Relative { parents, segments });
    }

    let name_len = if parts[0].starts_with('@') { 2 } else { 1 };
    if parts.len() < name_len {
        return Err(invalid(specifier));
    }
    let package = parts[..name_len].join("/");
    if !package_name_pattern().is_match(&package) {
        return Err(invalid(specifier));
    }
    let subpath = parts[name_len..]
        .iter()
        .map(|p| strip_extension(p).to_string())
        .collect();
    Ok(Specifier::Package { package, subpath })
}

/// Identifier for a specifier segment: `lodash-es` → `lodash_es`.
fn segment_ident(segment: &str, span: Span) -> Ident {
    let mut name: String = segment
        .trim_start_matches('@')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    if matches!(name.as_str(), "self" | "super" | "crate" | "Self" | "_") {
        name.push('_');
    }
    match syn::parse_str::<Ident>(&name) {
        Ok(mut ident) => {
            ident.set_span(span);
            ident
        }
        // Reserved word
        Err(_) => Ident::new_raw(&name, span),
    }
}

fn build_path(leading: bool, idents: Vec<Ident>) -> Path {
    let segments: Punctuated<PathSegment, syn::Token![::]> =
        idents.into_iter().map(PathSegment::from).collect();
    Path {
        leading_colon: leading.then(Default::default),
        segments,
    }
}

/// Where an `import_sync` call sits.
#[derive(Debug, Clone, Copy)]
pub struct ImportSite<'a> {
    /// Module holding the call, inline modules included.
    pub module: &'a [String],
    /// Module owning the file's directory.
    pub directory: &'a [String],
}

impl ImportSite<'_> {
    /// Path from the calling module to the module at `target`.
    fn relative_path(&self, target: &[String], span: Span) -> Path {
        let common = self
            .module
            .iter()
            .zip(target)
            .take_while(|(a, b)| a == b)
            .count();
        let mut idents = Vec::new();
        if common == self.module.len() {
            idents.push(Ident::new("self", span));
        }
        for _ in common..self.module.len() {
            idents.push(Ident::new("super", span));
        }
        idents.extend(target[common..].iter().map(|name| module_ident(name, span)));
        build_path(false, idents)
    }
}

/// Ident for a module name that is already a valid identifier.
fn module_ident(name: &str, span: Span) -> Ident {
    match name.strip_prefix("r#") {
        Some(raw) => Ident::new_raw(raw, span),
        None => Ident::new(name, span),
    }
}

/// Resolve `specifier` from `enclosing` and build the module path it names.
pub fn module_path(
    specifier: &str,
    enclosing: &PackageIdentity,
    resolver: &DependencyResolver,
    site: ImportSite<'_>,
    span: Span,
) -> MacroResult<Path> {
    let unresolvable = || MacroError::UnresolvableImport {
        specifier: specifier.to_string(),
        consumer: enclosing.to_string(),
    };

    match parse_specifier(specifier)? {
        Specifier::Relative { parents, segments } => {
            if parents > site.directory.len() {
                return Err(unresolvable());
            }
            let mut target = site.directory[..site.directory.len() - parents].to_vec();
            target.extend(segments.iter().map(|s| segment_ident(s, span).to_string()));
            Ok(site.relative_path(&target, span))
        }
        Specifier::Package { package, subpath } => {
            let subpath = subpath.iter().map(|s| segment_ident(s, span));
            if package == enclosing.name {
                let idents = std::iter::once(Ident::new("crate", span)).chain(subpath).collect();
                return Ok(build_path(false, idents));
            }

            if resolver.resolve(enclosing, &package)?.is_none() {
                return Err(unresolvable());
            }
            let crate_ident = segment_ident(&package.replace('/', "_"), span);
            let idents = std::iter::once(crate_ident).chain(subpath).collect();
            Ok(build_path(true, idents))
        }
    }
}
