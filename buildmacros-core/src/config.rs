//! Configuration loading from buildmacros.toml.
//!
//! ```toml
//! macros_crate = "buildmacros"
//! prune_imports = true
//! merger = "deep"
//!
//! [[contribution]]
//! origin = "."
//! [contribution.payload]
//! mode = "dev"
//!
//! [[contribution]]
//! origin = "node_modules/addon"
//! [contribution.payload]
//! theme = "dark"
//! ```
//!
//! Contribution paths are package directories relative to the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::{fs, path::Path};

use crate::expand::ExpansionOptions;

/// Name of the configuration file at a package root.
pub const CONFIG_FILE: &str = "buildmacros.toml";

/// Main configuration structure for buildmacros.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Crate whose exports are treated as macros.
    pub macros_crate: Option<String>,
    /// Remove imports that only brought macros into scope.
    pub prune_imports: Option<bool>,
    /// Merge policy for the packages this file configures.
    pub merger: Option<MergerKind>,
    #[serde(default, rename = "contribution")]
    pub contributions: Vec<ContributionConfig>,
}

/// Which [`crate::registry::Merger`] to use.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MergerKind {
    #[default]
    Shallow,
    Deep,
}

/// One `[[contribution]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContributionConfig {
    /// Directory of the contributing package.
    pub origin: String,
    /// Directory of the configured package; the origin when absent.
    pub target: Option<String>,
    #[serde(default)]
    pub payload: toml::Table,
}

impl ContributionConfig {
    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.origin)
    }

    /// The payload as JSON.
    pub fn payload_json(&self) -> Result<Value> {
        serde_json::to_value(&self.payload)
            .context("Contribution payload is not representable as JSON")
    }
}

impl BuildConfig {
    /// Expansion options with this file's overrides applied to `base`.
    pub fn apply_to(&self, base: &ExpansionOptions) -> ExpansionOptions {
        ExpansionOptions {
            macros_crate: self
                .macros_crate
                .clone()
                .unwrap_or_else(|| base.macros_crate.clone()),
            prune_imports: self.prune_imports.unwrap_or(base.prune_imports),
        }
    }
}

/// Loads configuration from buildmacros.toml in `root` if it exists.
pub fn load_config(root: &Path) -> Result<Option<BuildConfig>> {
    let path = root.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Loads configuration from an explicit file.
pub fn load_config_file(path: &Path) -> Result<BuildConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cfg = toml::from_str(&content)
        .with_context(|| format!("Invalid {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_config() {
        let cfg: BuildConfig = toml::from_str(
            r#"
            macros_crate = "my-macros"
            prune_imports = false
            merger = "deep"

            [[contribution]]
            origin = "."
            [contribution.payload]
            mode = "dev"
            levels = [1, 2]

            [[contribution]]
            origin = "."
            target = "node_modules/addon"
            [contribution.payload.nested]
            on = true
            "#,
        )
        .unwrap();

        assert_eq!(cfg.merger, Some(MergerKind::Deep));
        assert_eq!(cfg.contributions.len(), 2);
        assert_eq!(cfg.contributions[0].target(), ".");
        assert_eq!(cfg.contributions[1].target(), "node_modules/addon");
        assert_eq!(
            cfg.contributions[0].payload_json().unwrap(),
            json!({"mode": "dev", "levels": [1, 2]})
        );

        let options = cfg.apply_to(&ExpansionOptions::default());
        assert_eq!(options.macros_crate, "my-macros");
        assert!(!options.prune_imports);
    }

    #[test]
    fn test_empty_config_keeps_defaults() {
        let cfg: BuildConfig = toml::from_str("").unwrap();
        assert!(cfg.contributions.is_empty());
        assert_eq!(cfg.apply_to(&ExpansionOptions::default()), ExpansionOptions::default());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(toml::from_str::<BuildConfig>("merger = \"fancy\"").is_err());
        assert!(toml::from_str::<BuildConfig>("colour = true").is_err());
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = std::env::temp_dir().join("buildmacros_config_absent_dir");
        assert!(load_config(&dir).unwrap().is_none());
    }
}
