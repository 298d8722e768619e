//! Package identities and `package.json` manifests.
//!
//! A package is a directory holding a `package.json`. Two installed copies of
//! the same name are distinct packages, so identity is the name plus the
//! directory it was loaded from.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{IoResultExt, MacroError, MacroResult};

/// Manifest file name inside every package directory.
pub const MANIFEST_FILE: &str = "package.json";

/// Directory that holds installed packages.
pub const INSTALL_DIR: &str = "node_modules";

/// Stable key for a package: name + resolved location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageIdentity {
    pub name: String,
    pub root: PathBuf,
}

impl PackageIdentity {
    /// Create an identity; the root is canonicalised when it exists on disk.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            name: name.into(),
            root,
        }
    }

    /// Load the manifest in `dir` and build the identity from its name.
    pub fn from_dir(dir: &Path) -> MacroResult<Self> {
        let manifest = Manifest::load(dir)?;
        Ok(Self::new(manifest.name, dir))
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.root.display())
    }
}

/// The subset of `package.json` the engine reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,
}

impl Manifest {
    /// Read and parse `dir/package.json`.
    pub fn load(dir: &Path) -> MacroResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path).with_path(&path)?;
        Self::parse(&path, &content)
    }

    /// Parse manifest text; `path` is only used for error context.
    pub fn parse(path: &Path, content: &str) -> MacroResult<Self> {
        let manifest: Manifest = serde_json::from_str(content)
            .map_err(|e| MacroError::manifest(path, e.to_string()))?;
        if manifest.name.is_empty() {
            return Err(MacroError::manifest(path, "missing package name"));
        }
        Ok(manifest)
    }

    /// Whether `name` appears in any dependency table.
    pub fn declares(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
            || self.dev_dependencies.contains_key(name)
            || self.peer_dependencies.contains_key(name)
    }
}

/// Directory an installed package named `name` would occupy under `base`.
///
/// Scoped names (`@scope/pkg`) nest one level deeper.
pub fn install_path(base: &Path, name: &str) -> PathBuf {
    name.split('/')
        .fold(base.join(INSTALL_DIR), |path, segment| path.join(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_tables() {
        let manifest = Manifest::parse(
            Path::new("package.json"),
            r#"{
                "name": "app",
                "version": "1.0.0",
                "dependencies": { "addon": "^2.0.0" },
                "devDependencies": { "tester": "*" },
                "peerDependencies": { "@scope/peer": "^1" }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.name, "app");
        assert_eq!(manifest.version.as_deref(), Some("1.0.0"));
        assert!(manifest.declares("addon"));
        assert!(manifest.declares("tester"));
        assert!(manifest.declares("@scope/peer"));
        assert!(!manifest.declares("other"));
    }

    #[test]
    fn test_manifest_without_name_is_rejected() {
        let err = Manifest::parse(Path::new("package.json"), r#"{"version": "1.0.0"}"#)
            .unwrap_err();
        assert_eq!(err.kind(), "manifest");
    }

    #[test]
    fn test_install_path_scoped() {
        let base = Path::new("/app");
        assert_eq!(install_path(base, "lodash"), PathBuf::from("/app/node_modules/lodash"));
        assert_eq!(
            install_path(base, "@scope/pkg"),
            PathBuf::from("/app/node_modules/@scope/pkg")
        );
    }

    #[test]
    fn test_identity_display_includes_root() {
        let id = PackageIdentity::new("addon", "/nonexistent/addon");
        assert_eq!(id.to_string(), "addon (/nonexistent/addon)");
    }
}
