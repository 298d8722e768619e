//! Build-time macros.
//!
//! Every function in this crate is resolved and rewritten by the
//! `buildmacros-core` expansion pass before the code is compiled. What is
//! left here are runtime stand-ins: if a call survives into a compiled
//! program the transform was skipped, and the stand-in panics with a
//! "macro escaped expansion" error naming the macro. `each` is the one
//! exception and simply returns its argument.
//!
//! ```rust,ignore
//! use buildmacros::{dependency_satisfies, get_own_config, macro_condition};
//!
//! if macro_condition(dependency_satisfies("ember-data", "^3.0.0")) {
//!     legacy_store();
//! } else {
//!     modern_store();
//! }
//! let config = get_own_config::<serde_json::Value>();
//! ```

use std::fmt;

/// The closed set of macros understood by the expansion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MacroKind {
    DependencySatisfies,
    MacroCondition,
    Each,
    ImportSync,
    GetConfig,
    GetOwnConfig,
    FailBuild,
}

impl MacroKind {
    pub const ALL: [MacroKind; 7] = [
        MacroKind::DependencySatisfies,
        MacroKind::MacroCondition,
        MacroKind::Each,
        MacroKind::ImportSync,
        MacroKind::GetConfig,
        MacroKind::GetOwnConfig,
        MacroKind::FailBuild,
    ];

    /// Name of the function this crate exports for the macro.
    pub const fn export_name(self) -> &'static str {
        match self {
            MacroKind::DependencySatisfies => "dependency_satisfies",
            MacroKind::MacroCondition => "macro_condition",
            MacroKind::Each => "each",
            MacroKind::ImportSync => "import_sync",
            MacroKind::GetConfig => "get_config",
            MacroKind::GetOwnConfig => "get_own_config",
            MacroKind::FailBuild => "fail_build",
        }
    }

    pub fn from_export(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.export_name() == name)
    }
}

impl fmt::Display for MacroKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.export_name())
    }
}

#[cold]
#[track_caller]
fn macro_escaped(kind: MacroKind) -> ! {
    panic!(
        "macro escaped expansion: `{kind}` must be rewritten at build time by buildmacros-core; \
         the expansion pass did not run on this file"
    )
}

/// Whether the installed copy of `package_name` satisfies `semver_range`.
#[track_caller]
pub fn dependency_satisfies(package_name: &str, semver_range: &str) -> bool {
    let _ = (package_name, semver_range);
    macro_escaped(MacroKind::DependencySatisfies)
}

/// Marks an `if` condition for build-time branch elimination.
#[track_caller]
pub fn macro_condition(predicate: bool) -> bool {
    let _ = predicate;
    macro_escaped(MacroKind::MacroCondition)
}

/// Identity marker for arrays built from config.
pub fn each<T>(array: T) -> T {
    array
}

/// Synchronous reference to the module named by `specifier`.
#[track_caller]
pub fn import_sync<T>(specifier: &str) -> T {
    let _ = specifier;
    macro_escaped(MacroKind::ImportSync)
}

/// Build-time config of a dependency.
#[track_caller]
pub fn get_config<T>(package_name: &str) -> T {
    let _ = package_name;
    macro_escaped(MacroKind::GetConfig)
}

/// Build-time config this package declared for itself.
#[track_caller]
pub fn get_own_config<T>() -> T {
    macro_escaped(MacroKind::GetOwnConfig)
}

/// Abort the build with `message`.
#[track_caller]
pub fn fail_build(message: &str) {
    let _ = message;
    macro_escaped(MacroKind::FailBuild)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_names_round_trip() {
        for kind in MacroKind::ALL {
            assert_eq!(MacroKind::from_export(kind.export_name()), Some(kind));
        }
        assert_eq!(MacroKind::from_export("eachh"), None);
    }

    #[test]
    fn test_each_is_identity() {
        assert_eq!(each(vec![1, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "macro escaped expansion: `get_own_config`")]
    fn test_stand_in_panics() {
        let _: u32 = get_own_config();
    }

    #[test]
    #[should_panic(expected = "`dependency_satisfies`")]
    fn test_dependency_satisfies_panics() {
        dependency_satisfies("foo", "^1.0.0");
    }
}
