//! Dependency resolution against the installed package graph.
//!
//! Answers "what version of `name` can `consumer` load?" by walking the
//! `node_modules` directories from the consumer upwards: nested installs are
//! found before hoisted ones and the first match wins. Answers are memoised
//! for the lifetime of the resolver (one build).
//!
//! Semver ranges follow npm syntax with prereleases included: every
//! comparator is checked against the full version, prerelease tag and all,
//! so `3.0.0-beta.2` satisfies `>=2.0.0` and `^3.0.0-alpha` but not `^2.0.0`
//! (whose upper bound `<3.0.0-0` sorts below it).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use semver::{BuildMetadata, Comparator, Op, Prerelease, Version, VersionReq};
use tracing::{debug, warn};

use crate::error::{MacroError, MacroResult};
use crate::package::{install_path, Manifest, PackageIdentity, INSTALL_DIR, MANIFEST_FILE};

/// A package found on the consumer's resolution path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub identity: PackageIdentity,
    pub version: Option<String>,
}

/// Memoised answer for one `(consumer, package name)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyFact {
    pub consumer: PackageIdentity,
    pub package_name: String,
    pub resolved: Option<ResolvedPackage>,
}

impl DependencyFact {
    pub fn resolved_version(&self) -> Option<&str> {
        self.resolved.as_ref().and_then(|r| r.version.as_deref())
    }
}

/// Shared, memoising resolver for one build.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    /// Manifests supplied by the host instead of read from disk.
    preloaded: HashMap<PathBuf, Arc<Manifest>>,
    manifests: Mutex<HashMap<PathBuf, Option<Arc<Manifest>>>>,
    facts: Mutex<HashMap<(PackageIdentity, String), Option<ResolvedPackage>>>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `dir` as holding `manifest`, without touching the filesystem.
    pub fn with_manifest(mut self, dir: impl Into<PathBuf>, manifest: Manifest) -> Self {
        self.preloaded.insert(dir.into(), Arc::new(manifest));
        self
    }

    /// The manifest in `dir`, if there is a package there.
    pub fn manifest(&self, dir: &Path) -> MacroResult<Option<Arc<Manifest>>> {
        if let Some(manifest) = self.preloaded.get(dir) {
            return Ok(Some(Arc::clone(manifest)));
        }

        let mut cache = self.manifests.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.get(dir) {
            return Ok(cached.clone());
        }

        let loaded = if dir.join(MANIFEST_FILE).is_file() {
            Some(Arc::new(Manifest::load(dir)?))
        } else {
            None
        };
        cache.insert(dir.to_path_buf(), loaded.clone());
        Ok(loaded)
    }

    /// Identity of the package rooted at `dir`.
    pub fn identify(&self, dir: &Path) -> MacroResult<PackageIdentity> {
        match self.manifest(dir)? {
            Some(manifest) => Ok(PackageIdentity::new(manifest.name.clone(), dir)),
            None => Err(MacroError::manifest(
                dir.join(MANIFEST_FILE),
                "no package manifest found",
            )),
        }
    }

    /// Whether `consumer`'s manifest lists `name` as a dependency.
    pub fn declares_dependency(&self, consumer: &PackageIdentity, name: &str) -> MacroResult<bool> {
        Ok(self
            .manifest(&consumer.root)?
            .is_some_and(|manifest| manifest.declares(name)))
    }

    /// The memoised fact for `(consumer, name)`, resolving it on first use.
    pub fn fact(&self, consumer: &PackageIdentity, name: &str) -> MacroResult<DependencyFact> {
        Ok(DependencyFact {
            consumer: consumer.clone(),
            package_name: name.to_string(),
            resolved: self.resolve(consumer, name)?,
        })
    }

    /// Find the copy of `name` that `consumer` would load.
    pub fn resolve(
        &self,
        consumer: &PackageIdentity,
        name: &str,
    ) -> MacroResult<Option<ResolvedPackage>> {
        let key = (consumer.clone(), name.to_string());
        if let Some(fact) = self
            .facts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(fact.clone());
        }

        let resolved = self.walk(&consumer.root, name)?;
        debug!(
            consumer = %consumer,
            package = name,
            version = resolved.as_ref().and_then(|r| r.version.as_deref()).unwrap_or("<none>"),
            "dependency resolved"
        );

        self.facts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, resolved.clone());
        Ok(resolved)
    }

    fn walk(&self, start: &Path, name: &str) -> MacroResult<Option<ResolvedPackage>> {
        for dir in start.ancestors() {
            if dir.file_name().is_some_and(|n| n == INSTALL_DIR) {
                continue;
            }
            let candidate = install_path(dir, name);
            if let Some(manifest) = self.manifest(&candidate)? {
                return Ok(Some(ResolvedPackage {
                    identity: PackageIdentity::new(manifest.name.clone(), &candidate),
                    version: manifest.version.clone(),
                }));
            }
        }
        Ok(None)
    }

    /// Whether the copy of `name` visible to `consumer` satisfies `range`.
    ///
    /// An unresolvable package is `false`, never an error.
    pub fn satisfies(
        &self,
        consumer: &PackageIdentity,
        name: &str,
        range: &str,
    ) -> MacroResult<bool> {
        let alternatives = parse_range(range)?;
        let fact = self.fact(consumer, name)?;

        let Some(raw) = fact.resolved_version() else {
            return Ok(false);
        };
        let version = match Version::parse(raw.trim_start_matches('v')) {
            Ok(v) => v,
            Err(e) => {
                warn!(package = name, version = raw, error = %e, "installed version is not valid semver");
                return Ok(false);
            }
        };

        Ok(alternatives.iter().any(|req| range_matches(req, &version)))
    }
}

/// Parse an npm-style range into `||` alternatives.
pub fn parse_range(range: &str) -> MacroResult<Vec<VersionReq>> {
    range
        .split("||")
        .map(|alt| {
            let normalized = normalize_alternative(alt.trim());
            VersionReq::parse(&normalized).map_err(|e| MacroError::InvalidSemverRange {
                range: range.to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

fn normalize_alternative(alt: &str) -> String {
    if alt.is_empty() || matches!(alt, "*" | "x" | "X") {
        return "*".to_string();
    }

    // `a - b` hyphen ranges
    if let Some((low, high)) = alt.split_once(" - ") {
        return format!(">={}, <={}", low.trim(), high.trim());
    }

    // Glue bare operators to the version that follows (`>= 1.2`)
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in alt.split_whitespace() {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(token);
            continue;
        }
        let token = token.strip_prefix('v').unwrap_or(token);
        let token = token
            .split('.')
            .map(|part| if matches!(part, "x" | "X") { "*" } else { part })
            .collect::<Vec<_>>()
            .join(".");
        let op = std::mem::take(&mut pending_op);
        let comparator = if op.is_empty()
            && token.starts_with(|c: char| c.is_ascii_digit())
            && !token.contains('*')
        {
            // npm treats a bare version as exact; the semver crate would read it as `^`
            format!("={token}")
        } else {
            format!("{op}{token}")
        };
        comparators.push(comparator);
    }
    comparators.join(", ")
}

fn release(version: &Version) -> Version {
    Version {
        build: BuildMetadata::EMPTY,
        ..version.clone()
    }
}

fn bound(major: u64, minor: u64, patch: u64, pre: Prerelease) -> Version {
    Version {
        major,
        minor,
        patch,
        pre,
        build: BuildMetadata::EMPTY,
    }
}

/// Exclusive upper bound that also keeps prereleases of `major.minor.patch` out.
fn upper(major: u64, minor: u64, patch: u64) -> Version {
    bound(major, minor, patch, Prerelease::new("0").unwrap_or(Prerelease::EMPTY))
}

fn range_matches(req: &VersionReq, version: &Version) -> bool {
    let version = release(version);
    req.comparators
        .iter()
        .all(|cmp| comparator_matches(cmp, &version))
}

fn comparator_matches(cmp: &Comparator, v: &Version) -> bool {
    let major = cmp.major;
    let floor = bound(
        major,
        cmp.minor.unwrap_or(0),
        cmp.patch.unwrap_or(0),
        cmp.pre.clone(),
    );
    // First version above the partial comparator (`1.2` → `1.3.0`)
    let next = match (cmp.minor, cmp.patch) {
        (None, _) => upper(major + 1, 0, 0),
        (Some(minor), None) => upper(major, minor + 1, 0),
        (Some(minor), Some(patch)) => upper(major, minor, patch + 1),
    };
    let partial = cmp.minor.is_none() || cmp.patch.is_none();

    match cmp.op {
        Op::Exact | Op::Wildcard => {
            if partial {
                *v >= floor && *v < next
            } else {
                *v == floor
            }
        }
        Op::Greater => {
            if partial {
                *v >= next
            } else {
                *v > floor
            }
        }
        Op::GreaterEq => *v >= floor,
        Op::Less => *v < floor,
        Op::LessEq => {
            if partial {
                *v < next
            } else {
                *v <= floor
            }
        }
        Op::Tilde => {
            let ceiling = match cmp.minor {
                None => upper(major + 1, 0, 0),
                Some(minor) => upper(major, minor + 1, 0),
            };
            *v >= floor && *v < ceiling
        }
        Op::Caret => {
            let ceiling = match (major, cmp.minor, cmp.patch) {
                (0, None, _) => upper(1, 0, 0),
                (0, Some(0), Some(patch)) => upper(0, 0, patch + 1),
                (0, Some(minor), _) => upper(0, minor + 1, 0),
                (major, _, _) => upper(major + 1, 0, 0),
            };
            *v >= floor && *v < ceiling
        }
        _ => cmp.matches(v),
    }
}
