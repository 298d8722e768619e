//! Macro classification: is this call one of ours?
//!
//! Classification is binding-based. A call is a macro only when its callee
//! traces, through the file's [`SymbolTable`], to one of the seven functions
//! exported by the macros crate. A function that merely shares a name with
//! a macro (a local `fn each`, a closure bound to `each`) is left alone.

pub mod symbols;

pub use buildmacros::MacroKind;
pub use symbols::{ModulePath, ModulePathContext, SymbolTable};

use syn::Path;

/// Default name of the crate exporting the macros.
pub const DEFAULT_MACROS_CRATE: &str = "buildmacros";

/// Classifies call expressions against a file's symbol table.
#[derive(Debug, Clone)]
pub struct Classifier<'a> {
    symbols: &'a SymbolTable,
    macros_crate: String,
}

impl<'a> Classifier<'a> {
    pub fn new(symbols: &'a SymbolTable, macros_crate: &str) -> Self {
        Self {
            symbols,
            // Crate names are written with `_` in paths
            macros_crate: macros_crate.replace('-', "_"),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        self.symbols
    }

    /// Classify the callee path of a call made inside `module`.
    pub fn classify(&self, callee: &Path, module: &[String]) -> Option<MacroKind> {
        let segments: Vec<String> = callee
            .segments
            .iter()
            .map(|s| s.ident.to_string())
            .collect();

        let full = if callee.leading_colon.is_some() {
            segments
        } else if let [name] = segments.as_slice() {
            match self.symbols.resolve_name(module, name) {
                Some(full) => full,
                None => {
                    let from_glob = self
                        .symbols
                        .glob_sources(module)
                        .iter()
                        .any(|source| source.len() == 1 && source[0] == self.macros_crate);
                    return if from_glob {
                        MacroKind::from_export(name)
                    } else {
                        None
                    };
                }
            }
        } else {
            self.symbols.resolve_path(module, &segments)
        };

        self.kind_of(&full)
    }

    fn kind_of(&self, full: &[String]) -> Option<MacroKind> {
        match full {
            [krate, export] if *krate == self.macros_crate => MacroKind::from_export(export),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(code: &str, callee: &str) -> Option<MacroKind> {
        classify_in(code, callee, &[])
    }

    fn classify_in(code: &str, callee: &str, module: &[&str]) -> Option<MacroKind> {
        let ast = syn::parse_file(code).unwrap();
        let symbols = SymbolTable::build(&ast, &ModulePathContext::default());
        let classifier = Classifier::new(&symbols, DEFAULT_MACROS_CRATE);
        let path: Path = syn::parse_str(callee).unwrap();
        let module: Vec<String> = module.iter().map(|s| s.to_string()).collect();
        classifier.classify(&path, &module)
    }

    #[test]
    fn test_named_import() {
        assert_eq!(
            classify("use buildmacros::each;", "each"),
            Some(MacroKind::Each)
        );
    }

    #[test]
    fn test_alias_import() {
        assert_eq!(
            classify("use buildmacros::macro_condition as when;", "when"),
            Some(MacroKind::MacroCondition)
        );
    }

    #[test]
    fn test_local_function_is_not_a_macro() {
        assert_eq!(classify("fn each(v: u8) -> u8 { v }", "each"), None);
        assert_eq!(
            classify("use buildmacros::*; fn each(v: u8) -> u8 { v }", "each"),
            None
        );
    }

    #[test]
    fn test_unimported_name_is_not_a_macro() {
        assert_eq!(classify("use other::each;", "each"), None);
        assert_eq!(classify("", "fail_build"), None);
    }

    #[test]
    fn test_glob_import() {
        assert_eq!(
            classify("use buildmacros::*;", "get_own_config"),
            Some(MacroKind::GetOwnConfig)
        );
        assert_eq!(classify("use buildmacros::*;", "unrelated"), None);
    }

    #[test]
    fn test_qualified_paths() {
        assert_eq!(classify("", "buildmacros::import_sync"), Some(MacroKind::ImportSync));
        assert_eq!(classify("", "::buildmacros::fail_build"), Some(MacroKind::FailBuild));
        assert_eq!(
            classify("use buildmacros as m;", "m::get_config"),
            Some(MacroKind::GetConfig)
        );
        assert_eq!(classify("", "other::get_config"), None);
    }

    #[test]
    fn test_nested_module_scope() {
        let code = r#"
            mod inner { use buildmacros::dependency_satisfies as sat; }
        "#;
        assert_eq!(classify_in(code, "sat", &["inner"]), Some(MacroKind::DependencySatisfies));
        assert_eq!(classify_in(code, "sat", &[]), None);
    }

    #[test]
    fn test_configured_crate_name() {
        let ast = syn::parse_file("use my_macros::each;").unwrap();
        let symbols = SymbolTable::build(&ast, &ModulePathContext::default());
        let classifier = Classifier::new(&symbols, "my-macros");
        let path: Path = syn::parse_str("each").unwrap();
        assert_eq!(classifier.classify(&path, &[]), Some(MacroKind::Each));
    }
}
