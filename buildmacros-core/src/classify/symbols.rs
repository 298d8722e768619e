//! Module-scope symbol table for one source file.
//!
//! Built in a single pre-pass before expansion. Every `use` binding, glob
//! import and locally defined item is recorded under the module it lives in,
//! so a call like `each(..)` can be traced back to the item it names:
//!
//! - `use buildmacros::each;` → `["buildmacros", "each"]`
//! - `use buildmacros::each as spread;` → `spread` → `["buildmacros", "each"]`
//! - `mod m { pub use buildmacros::each; } use m::each;` → chased through `m`
//!
//! Paths inside the file are canonicalised to `crate::...` form. Anything
//! outside the file (other files, other crates) is taken at face value.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use syn::{File, Item, UseTree};

/// Path of a module, relative to the crate root.
pub type ModulePath = Vec<String>;

/// Maximum number of re-export hops followed for a single name.
const MAX_ALIAS_DEPTH: usize = 16;

/// Module's position in the crate hierarchy.
///
/// Example: `src/api/v1/mod.rs` → `["api", "v1"]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulePathContext {
    /// Path segments from crate root (excluding "crate::")
    pub segments: Vec<String>,
    /// Module owning the file's directory; sibling files are its children.
    pub directory: Vec<String>,
}

impl ModulePathContext {
    /// Create context from file path relative to package root.
    ///
    /// - `src/lib.rs` → `[]`
    /// - `src/api/mod.rs` → `["api"]`
    /// - `src/api/v1/handler.rs` → `["api", "v1", "handler"]`
    pub fn from_file_path(path: &Path) -> Self {
        let mut segments = Vec::new();
        let mut inside_src = false;
        let mut owns_directory = true;

        for component in path.iter() {
            let part = component.to_string_lossy();

            if part == "src" {
                inside_src = true;
                continue;
            }

            if inside_src {
                if part == "mod.rs" || part == "lib.rs" || part == "main.rs" {
                    owns_directory = true;
                    continue;
                }
                owns_directory = part.strip_suffix(".rs").is_none();
                let segment = part.strip_suffix(".rs").unwrap_or(&part);
                segments.push(segment.to_string());
            }
        }

        let mut directory = segments.clone();
        if !owns_directory {
            directory.pop();
        }
        Self {
            segments,
            directory,
        }
    }
}

/// Bindings, globs and local items keyed by `(module, local name)`.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    bindings: HashMap<(ModulePath, String), Vec<String>>,
    globs: HashMap<ModulePath, Vec<Vec<String>>>,
    locals: HashSet<(ModulePath, String)>,
    modules: HashSet<ModulePath>,
    root: ModulePath,
}

impl SymbolTable {
    /// Build the table for `ast`, whose top level is module `ctx`.
    pub fn build(ast: &File, ctx: &ModulePathContext) -> Self {
        let mut table = Self {
            root: ctx.segments.clone(),
            ..Self::default()
        };
        table.modules.insert(table.root.clone());

        let root = table.root.clone();
        table.collect_modules(&ast.items, &root);
        table.collect_items(&ast.items, &root);
        table
    }

    /// Module path of the file's top level.
    pub fn root(&self) -> &[String] {
        &self.root
    }

    fn collect_modules(&mut self, items: &[Item], module: &[String]) {
        for item in items {
            if let Item::Mod(m) = item {
                let mut child = module.to_vec();
                child.push(m.ident.to_string());
                self.modules.insert(child.clone());
                if let Some((_, content)) = &m.content {
                    self.collect_modules(content, &child);
                }
            }
        }
    }

    fn collect_items(&mut self, items: &[Item], module: &[String]) {
        for item in items {
            match item {
                Item::Use(u) => self.handle_use_tree(&u.tree, module, Vec::new()),
                Item::ExternCrate(ext) => {
                    let name = ext.ident.to_string();
                    let local = ext
                        .rename
                        .as_ref()
                        .map(|(_, alias)| alias.to_string())
                        .unwrap_or_else(|| name.clone());
                    self.bindings.insert((module.to_vec(), local), vec![name]);
                }
                Item::Fn(f) => self.add_local(module, f.sig.ident.to_string()),
                Item::Const(c) => self.add_local(module, c.ident.to_string()),
                Item::Static(s) => self.add_local(module, s.ident.to_string()),
                Item::Struct(s) => self.add_local(module, s.ident.to_string()),
                Item::Mod(m) => {
                    if let Some((_, content)) = &m.content {
                        let mut child = module.to_vec();
                        child.push(m.ident.to_string());
                        self.collect_items(content, &child);
                    }
                }
                _ => {}
            }
        }
    }

    fn add_local(&mut self, module: &[String], name: String) {
        self.locals.insert((module.to_vec(), name));
    }

    /// Recursively process a use tree to extract all imports.
    fn handle_use_tree(&mut self, tree: &UseTree, module: &[String], mut prefix: Vec<String>) {
        match tree {
            UseTree::Path(p) => {
                prefix.push(p.ident.to_string());
                self.handle_use_tree(&p.tree, module, prefix);
            }
            UseTree::Name(n) => {
                let name = n.ident.to_string();
                // `use foo::{self}` binds `foo`
                let local = if name == "self" {
                    match prefix.last() {
                        Some(last) => last.clone(),
                        None => return,
                    }
                } else {
                    prefix.push(name.clone());
                    name
                };
                let resolved = self.resolve_prefix(&prefix, module);
                self.bindings.insert((module.to_vec(), local), resolved);
            }
            UseTree::Rename(r) => {
                let alias = r.rename.to_string();
                if r.ident != "self" {
                    prefix.push(r.ident.to_string());
                }
                let resolved = self.resolve_prefix(&prefix, module);
                self.bindings.insert((module.to_vec(), alias), resolved);
            }
            UseTree::Group(g) => {
                for t in &g.items {
                    self.handle_use_tree(t, module, prefix.clone());
                }
            }
            UseTree::Glob(_) => {
                if !prefix.is_empty() {
                    let resolved = self.resolve_prefix(&prefix, module);
                    self.globs.entry(module.to_vec()).or_default().push(resolved);
                }
            }
        }
    }

    /// Resolve a use path considering `crate`/`self`/`super` and local modules.
    fn resolve_prefix(&self, path: &[String], module: &[String]) -> Vec<String> {
        let Some(first) = path.first() else {
            return Vec::new();
        };

        let mut base: Vec<String> = match first.as_str() {
            "crate" => {
                return std::iter::once("crate".to_string())
                    .chain(path[1..].iter().cloned())
                    .collect();
            }
            "self" => module.to_vec(),
            "super" => module.to_vec(),
            _ => {
                let mut child = module.to_vec();
                child.push(first.clone());
                if !self.modules.contains(&child) {
                    // External crate, e.g. `buildmacros::each`
                    return path.to_vec();
                }
                module.to_vec()
            }
        };

        let mut rest = path;
        if first == "self" {
            rest = &path[1..];
        }
        while let Some(("super", tail)) = rest.split_first().map(|(h, t)| (h.as_str(), t)) {
            base.pop();
            rest = tail;
        }

        std::iter::once("crate".to_string())
            .chain(base)
            .chain(rest.iter().cloned())
            .collect()
    }

    /// Follow crate-internal re-exports until the path leaves the file's
    /// modules or names a local item.
    fn canonicalize(&self, path: Vec<String>, depth: usize) -> Vec<String> {
        if depth > MAX_ALIAS_DEPTH || path.first().map(String::as_str) != Some("crate") {
            return path;
        }
        let Some((last, parent)) = path[1..].split_last() else {
            return path;
        };
        let key = (parent.to_vec(), last.clone());
        if !self.modules.contains(&key.0) {
            return path;
        }

        if self.locals.contains(&key) {
            return path;
        }
        if let Some(target) = self.bindings.get(&key) {
            return self.canonicalize(target.clone(), depth + 1);
        }
        // Re-exported through a glob of an external crate
        if let Some(globs) = self.globs.get(&key.0) {
            for glob in globs {
                let source = self.canonicalize(glob.clone(), depth + 1);
                if source.first().map(String::as_str) != Some("crate") {
                    let mut full = source;
                    full.push(key.1.clone());
                    return full;
                }
            }
        }
        path
    }

    /// Canonical path for a single-segment name used in `module`, from a
    /// named binding or a local item. Glob imports are not consulted.
    pub fn resolve_name(&self, module: &[String], name: &str) -> Option<Vec<String>> {
        let key = (module.to_vec(), name.to_string());
        if let Some(target) = self.bindings.get(&key) {
            return Some(self.canonicalize(target.clone(), 0));
        }
        if self.locals.contains(&key) {
            let mut path = vec!["crate".to_string()];
            path.extend(module.iter().cloned());
            path.push(name.to_string());
            return Some(path);
        }
        None
    }

    /// Canonical path for a multi-segment path used in `module`.
    pub fn resolve_path(&self, module: &[String], segments: &[String]) -> Vec<String> {
        let Some((first, rest)) = segments.split_first() else {
            return Vec::new();
        };

        let full = match first.as_str() {
            "crate" | "self" | "super" => self.resolve_prefix(segments, module),
            _ => {
                let mut head = match self.bindings.get(&(module.to_vec(), first.clone())) {
                    Some(target) => self.canonicalize(target.clone(), 0),
                    None => self.resolve_prefix(std::slice::from_ref(first), module),
                };
                head.extend(rest.iter().cloned());
                head
            }
        };
        self.canonicalize(full, 0)
    }

    /// Canonical sources of every glob import in `module`.
    pub fn glob_sources(&self, module: &[String]) -> Vec<Vec<String>> {
        self.globs
            .get(module)
            .map(|globs| {
                globs
                    .iter()
                    .map(|g| self.canonicalize(g.clone(), 0))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Module path of the inline module `name` nested in `module`.
    pub fn child_module(&self, module: &[String], name: &str) -> Option<ModulePath> {
        let mut child = module.to_vec();
        child.push(name.to_string());
        self.modules.contains(&child).then_some(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn table(code: &str) -> SymbolTable {
        let ast = syn::parse_file(code).unwrap();
        SymbolTable::build(&ast, &ModulePathContext::default())
    }

    #[test]
    fn test_module_path_from_file() {
        let ctx = ModulePathContext::from_file_path(Path::new("src/api/v1/handler.rs"));
        assert_eq!(ctx.segments, vec!["api", "v1", "handler"]);
        assert_eq!(ctx.directory, vec!["api", "v1"]);
        let ctx = ModulePathContext::from_file_path(Path::new("src/api/mod.rs"));
        assert_eq!(ctx.segments, vec!["api"]);
        assert_eq!(ctx.directory, vec!["api"]);
        let ctx = ModulePathContext::from_file_path(Path::new("src/lib.rs"));
        assert!(ctx.segments.is_empty());
        assert!(ctx.directory.is_empty());
    }

    #[test]
    fn test_named_and_renamed_imports() {
        let t = table("use buildmacros::{each, get_config as cfg};");
        assert_eq!(t.resolve_name(&[], "each"), Some(path(&["buildmacros", "each"])));
        assert_eq!(t.resolve_name(&[], "cfg"), Some(path(&["buildmacros", "get_config"])));
        assert_eq!(t.resolve_name(&[], "get_config"), None);
    }

    #[test]
    fn test_local_items_are_recorded() {
        let t = table("fn each(v: Vec<u8>) -> Vec<u8> { v }");
        assert_eq!(t.resolve_name(&[], "each"), Some(path(&["crate", "each"])));
    }

    #[test]
    fn test_reexport_chased_through_inline_module() {
        let t = table(
            r#"
            mod shim { pub use buildmacros::each as spread; }
            use shim::spread;
            use self::shim::spread as other;
            "#,
        );
        assert_eq!(t.resolve_name(&[], "spread"), Some(path(&["buildmacros", "each"])));
        assert_eq!(t.resolve_name(&[], "other"), Some(path(&["buildmacros", "each"])));
    }

    #[test]
    fn test_glob_reexport_through_module() {
        let t = table(
            r#"
            mod shim { pub use buildmacros::*; }
            use crate::shim::each;
            "#,
        );
        assert_eq!(t.resolve_name(&[], "each"), Some(path(&["buildmacros", "each"])));
    }

    #[test]
    fn test_super_inside_nested_module() {
        let t = table(
            r#"
            use buildmacros::each;
            mod inner { use super::each; }
            "#,
        );
        let inner = path(&["inner"]);
        assert_eq!(t.resolve_name(&inner, "each"), Some(path(&["buildmacros", "each"])));
    }

    #[test]
    fn test_crate_alias_and_qualified_path() {
        let t = table("use buildmacros as bm; extern crate buildmacros as bmx;");
        assert_eq!(
            t.resolve_path(&[], &path(&["bm", "each"])),
            path(&["buildmacros", "each"])
        );
        assert_eq!(
            t.resolve_path(&[], &path(&["bmx", "fail_build"])),
            path(&["buildmacros", "fail_build"])
        );
    }

    #[test]
    fn test_glob_sources() {
        let t = table("use buildmacros::*; mod m { use std::collections::*; }");
        assert_eq!(t.glob_sources(&[]), vec![path(&["buildmacros"])]);
        assert_eq!(t.glob_sources(&path(&["m"])), vec![path(&["std", "collections"])]);
    }

    #[test]
    fn test_nested_module_does_not_inherit_parent_imports() {
        let t = table("use buildmacros::each; mod inner { pub fn f() {} }");
        assert_eq!(t.resolve_name(&path(&["inner"]), "each"), None);
        assert_eq!(t.child_module(&[], "inner"), Some(path(&["inner"])));
    }
}
