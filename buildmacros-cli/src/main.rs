//! buildmacros CLI - expands build-time macros across a package.
//!
//! Subcommands:
//! - `expand`: rewrite every source file of a package, reporting failures
//! - `config`: print the merged own config of a package
//! - `satisfies`: evaluate `dependency_satisfies` from a package directory

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use buildmacros_core::{
    init_structured_logging, log_event, print_json, print_plain, BuildReport, BuildSession,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Build-time macro expansion for Rust packages")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand every macro call in a package
    Expand {
        /// Package directory (contains package.json)
        #[arg(default_value = ".")]
        path: String,

        /// Config file to use instead of <PATH>/buildmacros.toml
        #[arg(long, value_name = "FILE")]
        config: Option<String>,

        /// Write expanded sources under this directory (relative)
        #[arg(long, value_name = "DIR")]
        out_dir: Option<String>,

        /// Output the report in JSON format
        #[arg(long)]
        json: bool,

        /// Only check that expansion succeeds; write nothing
        #[arg(long, conflicts_with = "out_dir")]
        check: bool,
    },

    /// Print the merged own config of a package
    Config {
        #[arg(default_value = ".")]
        path: String,

        /// Compact JSON instead of pretty-printed
        #[arg(long)]
        json: bool,
    },

    /// Check whether the dependency visible from a package satisfies a range
    Satisfies {
        /// Dependency name
        package: String,

        /// npm-style semver range
        range: String,

        #[arg(default_value = ".")]
        path: String,
    },
}

/// Validates an output path to prevent path traversal attacks.
///
/// Rejects absolute paths, `..` components and null bytes.
fn validate_output_path(path: &str) -> Result<PathBuf> {
    if path.contains('\0') {
        return Err(anyhow!("Output path contains null bytes"));
    }

    let p = PathBuf::from(path);
    if p.is_absolute() {
        return Err(anyhow!(
            "Output path must be relative, not absolute: {}",
            path
        ));
    }

    for component in p.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err(anyhow!(
                "Path traversal (..) not allowed in output paths: {}",
                path
            ));
        }
    }

    Ok(p)
}

fn package_dir(path: &str) -> Result<PathBuf> {
    Path::new(path)
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize path: {}", path))
}

fn load_session(root: &Path, config: Option<&str>) -> Result<BuildSession> {
    let mut session = BuildSession::new();
    match config {
        Some(file) => {
            session
                .load_config_file(Path::new(file))
                .with_context(|| format!("Failed to load config: {}", file))?;
            log_event("INFO", &format!("config loaded from {}", file));
        }
        None => {
            if session.load_config(root)? {
                log_event("INFO", &format!("config loaded from {}", root.display()));
            }
        }
    }
    Ok(session)
}

fn report_expansion(report: &BuildReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
        return Ok(());
    }

    if report.is_success() {
        let stats = report.stats();
        println!(
            "{}: expanded {} file(s), resolved {} macro call(s), eliminated {} branch(es)",
            report.package.name,
            report.files.len(),
            stats.total(),
            stats.branches_eliminated
        );
    } else {
        print_plain(&report.diagnostics);
    }
    Ok(())
}

fn run_expand(
    path: &str,
    config: Option<&str>,
    out_dir: Option<&str>,
    json: bool,
    check: bool,
) -> Result<bool> {
    let out_dir = out_dir.map(validate_output_path).transpose()?;
    let root = package_dir(path)?;
    let session = load_session(&root, config)?;

    let report = session
        .expand_package(&root)
        .with_context(|| format!("Failed to expand package at {}", root.display()))?;

    if !report.is_success() {
        if json {
            print_json(&report.diagnostics);
        } else {
            report_expansion(&report, false)?;
        }
        log_event(
            "ERROR",
            &format!("{} file(s) failed to expand", report.diagnostics.len()),
        );
        return Ok(false);
    }

    if let (Some(out_dir), false) = (out_dir, check) {
        let written = report
            .write_to(&out_dir)
            .with_context(|| format!("Failed to write expanded sources to {}", out_dir.display()))?;
        eprintln!("[buildmacros] {} file(s) written → {}", written, out_dir.display());
    }
    report_expansion(&report, json)?;
    Ok(true)
}

fn run_config(path: &str, json: bool) -> Result<bool> {
    let root = package_dir(path)?;
    let session = load_session(&root, None)?;
    let config = session
        .own_config(&root)
        .with_context(|| format!("Failed to merge config for {}", root.display()))?;
    let rendered = if json {
        serde_json::to_string(config.as_ref())?
    } else {
        serde_json::to_string_pretty(config.as_ref())?
    };
    println!("{}", rendered);
    Ok(true)
}

fn run_satisfies(package: &str, range: &str, path: &str) -> Result<bool> {
    let root = package_dir(path)?;
    let session = BuildSession::new();
    let satisfied = session.satisfies(&root, package, range)?;
    println!("{}", satisfied);
    Ok(satisfied)
}

fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("[PANIC] buildmacros internal error: {}", info);
        eprintln!("[PANIC] The process will exit with code 2.");
    }));

    // JSON to stderr, respects RUST_LOG
    init_structured_logging();

    let cli = Cli::parse();
    let ok = match &cli.command {
        Command::Expand {
            path,
            config,
            out_dir,
            json,
            check,
        } => run_expand(path, config.as_deref(), out_dir.as_deref(), *json, *check)?,
        Command::Config { path, json } => run_config(path, *json)?,
        Command::Satisfies {
            package,
            range,
            path,
        } => run_satisfies(package, range, path)?,
    };

    std::process::exit(if ok { 0 } else { 1 });
}
