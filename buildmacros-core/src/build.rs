//! Build sessions: one registry and one resolver shared by every file.
//!
//! A session runs in two phases:
//!
//! 1. **Registration**: [`BuildSession::register`], [`BuildSession::use_merger`]
//!    and [`BuildSession::load_config`] feed the config registry.
//! 2. **Expansion**: [`BuildSession::expand_package`] seals the registry and
//!    expands every source file of a package. Files are independent, so they
//!    run in parallel (feature `parallel`) against the shared, memoised
//!    registry and resolver. Syntax trees never leave the worker that parsed
//!    them; each file comes back as rendered text plus stats.
//!
//! ```rust,ignore
//! use buildmacros_core::prelude::*;
//!
//! let mut session = BuildSession::new();
//! session.load_config(Path::new("/my/package"))?;
//! let report = session.expand_package(Path::new("/my/package"))?;
//! if !report.is_success() {
//!     print_plain(&report.diagnostics);
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde_json::{json, Value};
use tracing::info;

use crate::config::{load_config, load_config_file, BuildConfig, MergerKind};
use crate::diagnostics::Diagnostic;
use crate::error::{IoResultExt, MacroError, MacroResult};
use crate::expand::{self, Expanded, ExpansionContext, ExpansionOptions, ExpansionStats};
use crate::package::PackageIdentity;
use crate::registry::{ConfigRegistry, DeepMerger, Merger, ShallowMerger};
use crate::resolver::DependencyResolver;
use crate::scan::gather_rs_files;

/// Shared state for one build.
pub struct BuildSession {
    registry: Arc<ConfigRegistry>,
    resolver: Arc<DependencyResolver>,
    options: ExpansionOptions,
}

impl Default for BuildSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildSession {
    /// A session reading packages from disk, with default options.
    pub fn new() -> Self {
        Self::with_resolver(DependencyResolver::new())
    }

    /// A session using `resolver` for package lookups.
    pub fn with_resolver(resolver: DependencyResolver) -> Self {
        Self {
            registry: Arc::new(ConfigRegistry::new()),
            resolver: Arc::new(resolver),
            options: ExpansionOptions::default(),
        }
    }

    /// Replace the expansion options.
    pub fn with_options(mut self, options: ExpansionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ExpansionOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<DependencyResolver> {
        &self.resolver
    }

    /// Identity of the package in `dir`.
    pub fn identify(&self, dir: &Path) -> MacroResult<PackageIdentity> {
        self.resolver.identify(dir)
    }

    /// `origin` configures `target` with `payload`.
    pub fn register(
        &self,
        origin: PackageIdentity,
        target: PackageIdentity,
        payload: Value,
    ) -> MacroResult<()> {
        self.registry.register(origin, target, payload)
    }

    /// Per-target merge policy.
    pub fn use_merger(
        &self,
        target: PackageIdentity,
        merger: impl Merger + 'static,
    ) -> MacroResult<()> {
        self.registry.use_merger(target, merger)
    }

    /// Load `buildmacros.toml` from `package_dir`, when there is one.
    ///
    /// Returns whether a file was found.
    pub fn load_config(&mut self, package_dir: &Path) -> Result<bool> {
        match load_config(package_dir)? {
            Some(cfg) => {
                self.apply_config(package_dir, &cfg)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load an explicit config file; its directory anchors relative paths.
    pub fn load_config_file(&mut self, path: &Path) -> Result<()> {
        let cfg = load_config_file(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        self.apply_config(base, &cfg)
    }

    /// Apply a parsed config whose relative paths start at `base`.
    ///
    /// Every entry is checked before anything is registered, so a bad entry
    /// leaves the session as it was.
    pub fn apply_config(&mut self, base: &Path, cfg: &BuildConfig) -> Result<()> {
        let mut pending = Vec::with_capacity(cfg.contributions.len());
        for contribution in &cfg.contributions {
            let origin = self
                .identify(&base.join(&contribution.origin))
                .with_context(|| format!("Unknown origin {}", contribution.origin))?;
            let target = self
                .identify(&base.join(contribution.target()))
                .with_context(|| format!("Unknown target {}", contribution.target()))?;
            let payload = contribution.payload_json()?;
            pending.push((origin, target, payload));
        }

        self.options = cfg.apply_to(&self.options);
        let mut targets = Vec::new();
        for (origin, target, payload) in pending {
            if !targets.contains(&target) {
                targets.push(target.clone());
            }
            self.register(origin, target, payload)?;
        }

        // Merge policy covers the configuring package and everything it configures
        if let Some(kind) = cfg.merger {
            if let Ok(own) = self.identify(base) {
                if !targets.contains(&own) {
                    targets.push(own);
                }
            }
            for target in targets {
                match kind {
                    MergerKind::Shallow => self.use_merger(target, ShallowMerger)?,
                    MergerKind::Deep => self.use_merger(target, DeepMerger)?,
                }
            }
        }
        Ok(())
    }

    fn context<'a>(&'a self, package: &'a PackageIdentity) -> ExpansionContext<'a> {
        ExpansionContext {
            package,
            registry: &self.registry,
            resolver: &self.resolver,
            options: &self.options,
        }
    }

    /// Expand a single source text belonging to `package`.
    pub fn expand_source(
        &self,
        path: &Path,
        source: &str,
        package: &PackageIdentity,
    ) -> std::result::Result<Expanded, Diagnostic> {
        expand::expand_source(source, path, &self.context(package))
    }

    /// Expand every source file of the package in `package_dir`.
    ///
    /// Per-file failures land in the report; only failures to find the
    /// package or list its files are returned as errors.
    pub fn expand_package(&self, package_dir: &Path) -> MacroResult<BuildReport> {
        let package = self.identify(package_dir)?;
        let files = gather_rs_files(&package.root)?;
        self.registry.seal();
        info!(
            package = %package,
            files = files.len(),
            contributions = self.registry.len(),
            "expanding package"
        );

        let ctx = self.context(&package);
        let expand_one = |path: &PathBuf| -> FileOutcome {
            let relative = path.strip_prefix(&package.root).unwrap_or(path).to_path_buf();
            let original = fs::read_to_string(path)
                .with_path(path)
                .map_err(|e| Diagnostic::unlocated(&relative, e))?;
            let expanded = expand::expand_source(&original, &relative, &ctx)?;
            Ok(FileExpansion {
                source: expanded.render(&original),
                stats: expanded.stats,
                path: relative,
            })
        };

        #[cfg(feature = "parallel")]
        let outcomes: Vec<FileOutcome> = files.par_iter().map(expand_one).collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<FileOutcome> = files.iter().map(expand_one).collect();

        let mut report = BuildReport {
            package: package.clone(),
            files: Vec::with_capacity(outcomes.len()),
            diagnostics: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                Ok(file) => report.files.push(file),
                Err(diagnostic) => report.diagnostics.push(diagnostic),
            }
        }

        info!(
            package = %package,
            expanded = report.files.len(),
            failed = report.diagnostics.len(),
            resolved = report.stats().total(),
            "package expanded"
        );
        Ok(report)
    }

    /// Own config of the package in `package_dir`.
    pub fn own_config(&self, package_dir: &Path) -> MacroResult<Arc<Value>> {
        let package = self.identify(package_dir)?;
        self.registry.get_own_config(&package)
    }

    /// `dependency_satisfies` evaluated for the package in `package_dir`.
    pub fn satisfies(&self, package_dir: &Path, name: &str, range: &str) -> MacroResult<bool> {
        let package = self.identify(package_dir)?;
        self.resolver.satisfies(&package, name, range)
    }
}

/// What a worker hands back for one file. Plain data only: syntax trees
/// cannot cross threads.
type FileOutcome = std::result::Result<FileExpansion, Diagnostic>;

/// One successfully expanded file.
#[derive(Debug, Clone)]
pub struct FileExpansion {
    /// Relative to the package root.
    pub path: PathBuf,
    /// Expanded text; the file as read when nothing was rewritten.
    pub source: String,
    pub stats: ExpansionStats,
}

impl FileExpansion {
    pub fn is_unchanged(&self) -> bool {
        self.stats.is_empty()
    }
}

/// Outcome of expanding a whole package.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub package: PackageIdentity,
    pub files: Vec<FileExpansion>,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildReport {
    /// The build fails if any file failed.
    pub fn is_success(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Stats summed over every expanded file.
    pub fn stats(&self) -> ExpansionStats {
        let mut total = ExpansionStats::default();
        for file in &self.files {
            total.absorb(&file.stats);
        }
        total
    }

    /// Write every expanded file under `out_dir`, keeping relative paths.
    ///
    /// Returns the number of files written.
    pub fn write_to(&self, out_dir: &Path) -> MacroResult<usize> {
        for file in &self.files {
            let dest = out_dir.join(&file.path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).with_path(parent)?;
            }
            fs::write(&dest, &file.source).with_path(&dest)?;
        }
        Ok(self.files.len())
    }

    /// Machine-readable summary.
    pub fn to_json(&self) -> Value {
        let files: Vec<Value> = self
            .files
            .iter()
            .map(|f| {
                json!({
                    "path": f.path.display().to_string(),
                    "stats": f.stats,
                })
            })
            .collect();
        json!({
            "package": self.package.name,
            "root": self.package.root.display().to_string(),
            "success": self.is_success(),
            "stats": self.stats(),
            "files": files,
            "errors": self.diagnostics.iter().map(Diagnostic::to_json).collect::<Vec<_>>(),
        })
    }

    /// First diagnostic as an error, for callers that stop at one.
    pub fn first_error(&self) -> Option<&MacroError> {
        self.diagnostics.first().map(|d| &d.error)
    }
}
