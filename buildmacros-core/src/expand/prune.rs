//! Dropping `use` items that only brought macros into scope.
//!
//! Runs after a successful pass. A private import of a macro export is
//! removed when nothing left in the file refers to its local name; a glob of
//! the macros crate goes when none of the crate's exports is referenced.
//! Public re-exports are never touched.

use std::collections::HashSet;

use proc_macro2::{TokenStream, TokenTree};
use syn::punctuated::Punctuated;
use syn::visit::{self, Visit};
use syn::{File, Item, ItemUse, Macro, UseGroup, UsePath, UseTree, Visibility};

use crate::classify::MacroKind;

/// First segments of every path outside `use` items, plus every identifier
/// inside macro invocations.
#[derive(Default)]
struct References(HashSet<String>);

impl References {
    fn collect_tokens(&mut self, tokens: TokenStream) {
        for token in tokens {
            match token {
                TokenTree::Ident(ident) => {
                    self.0.insert(ident.to_string());
                }
                TokenTree::Group(group) => self.collect_tokens(group.stream()),
                _ => {}
            }
        }
    }
}

impl<'ast> Visit<'ast> for References {
    fn visit_item_use(&mut self, _: &'ast ItemUse) {}

    fn visit_path(&mut self, path: &'ast syn::Path) {
        if let Some(first) = path.segments.first() {
            self.0.insert(first.ident.to_string());
        }
        visit::visit_path(self, path);
    }

    fn visit_macro(&mut self, mac: &'ast Macro) {
        self.collect_tokens(mac.tokens.clone());
        visit::visit_macro(self, mac);
    }
}

struct Pruner<'r> {
    macros_crate: String,
    referenced: &'r HashSet<String>,
    removed: usize,
}

impl Pruner<'_> {
    fn prune_items(&mut self, items: &mut Vec<Item>) {
        items.retain_mut(|item| match item {
            Item::Use(item_use) if matches!(item_use.vis, Visibility::Inherited) => {
                match self.prune_tree(&item_use.tree, &mut Vec::new()) {
                    Some(tree) => {
                        item_use.tree = tree;
                        true
                    }
                    None => false,
                }
            }
            Item::Mod(module) => {
                if let Some((_, content)) = &mut module.content {
                    self.prune_items(content);
                }
                true
            }
            _ => true,
        });
    }

    /// The tree with macro-only leaves removed; `None` when nothing is left.
    fn prune_tree(&mut self, tree: &UseTree, prefix: &mut Vec<String>) -> Option<UseTree> {
        match tree {
            UseTree::Path(path) => {
                prefix.push(path.ident.to_string());
                let inner = self.prune_tree(&path.tree, prefix);
                prefix.pop();
                inner.map(|inner| {
                    UseTree::Path(UsePath {
                        tree: Box::new(inner),
                        ..path.clone()
                    })
                })
            }
            UseTree::Name(name) => {
                let ident = name.ident.to_string();
                self.keep_leaf(tree, prefix, &ident, &ident)
            }
            UseTree::Rename(rename) => {
                let ident = rename.ident.to_string();
                let local = rename.rename.to_string();
                self.keep_leaf(tree, prefix, &ident, &local)
            }
            UseTree::Glob(_) => {
                if self.is_macros_crate(prefix) && !self.glob_in_use() {
                    self.removed += 1;
                    None
                } else {
                    Some(tree.clone())
                }
            }
            UseTree::Group(group) => {
                let items: Punctuated<UseTree, syn::Token![,]> = group
                    .items
                    .iter()
                    .filter_map(|item| self.prune_tree(item, prefix))
                    .collect();
                if items.is_empty() {
                    None
                } else {
                    Some(UseTree::Group(UseGroup {
                        brace_token: group.brace_token,
                        items,
                    }))
                }
            }
        }
    }

    fn keep_leaf(
        &mut self,
        tree: &UseTree,
        prefix: &[String],
        ident: &str,
        local: &str,
    ) -> Option<UseTree> {
        let is_macro = self.is_macros_crate(prefix) && MacroKind::from_export(ident).is_some();
        if is_macro && !self.referenced.contains(local) {
            self.removed += 1;
            None
        } else {
            Some(tree.clone())
        }
    }

    fn is_macros_crate(&self, prefix: &[String]) -> bool {
        matches!(prefix, [krate] if *krate == self.macros_crate)
    }

    fn glob_in_use(&self) -> bool {
        self.referenced.contains("MacroKind")
            || MacroKind::ALL
                .iter()
                .any(|kind| self.referenced.contains(kind.export_name()))
    }
}

/// Remove macro-only imports from `file`. Returns the number of leaves removed.
pub fn prune_macro_imports(file: &mut File, macros_crate: &str) -> usize {
    let mut references = References::default();
    references.visit_file(file);

    let mut pruner = Pruner {
        macros_crate: macros_crate.replace('-', "_"),
        referenced: &references.0,
        removed: 0,
    };
    pruner.prune_items(&mut file.items);
    pruner.removed
}
