#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use mods_registry::config::Config;
use mods_registry::index::{IndexCompiler, Status};
use mods_registry::links::{collect_targets, LinkChecker, LinkKind};
use mods_registry::manifest::{load_targets, ManifestFile};
use mods_registry::net::{HttpTransport, Transport};
use mods_registry::probe::RemoteHashProber;
use mods_registry::verify::{
    BatchReport, HashVerifier, ItemFailure, Outcome, Selection, VerifyFailure, VerifyOptions,
};
use mods_registry::RegistryError;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mods-registry")]
#[command(about = "Validate, index and audit model registry manifests", long_about = None)]
struct Cli {
    /// Config file (default: ./registry.toml, then ~/.config/mods-registry/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for this tool
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate manifests against the schema rules
    Validate {
        /// Manifest files or directories (default: the whole set)
        paths: Vec<PathBuf>,
        /// Treat placeholder hashes as errors
        #[arg(long)]
        strict: bool,
    },
    /// Compile the registry index
    Build {
        /// Output path (default: registry.index_path)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Treat placeholder hashes as errors
        #[arg(long)]
        strict: bool,
    },
    /// Download files and check their SHA-256
    Verify {
        /// Manifest files or directories (default: the whole set)
        paths: Vec<PathBuf>,
        /// Only this variant id
        #[arg(long)]
        variant: Option<String>,
        /// Re-check verified hashes across the whole set (named manifests are always fully checked)
        #[arg(long)]
        all: bool,
        /// Report without rewriting manifests
        #[arg(long)]
        dry_run: bool,
    },
    /// Fill placeholder hashes from provider metadata
    Probe {
        /// Manifest files or directories (default: the whole set)
        paths: Vec<PathBuf>,
        /// Report without rewriting manifests
        #[arg(long)]
        dry_run: bool,
    },
    /// Check that every declared URL is reachable
    CheckLinks {
        /// Manifest files or directories (default: the whole set)
        paths: Vec<PathBuf>,
        /// Write a JSON report to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip homepage URLs
        #[arg(long)]
        no_homepages: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "info,mods_registry=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns whether the command fully succeeded
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Validate { paths, strict } => {
            let files = load(&paths, &config)?;
            let compiler = IndexCompiler::new(&config)?.strict(config.registry.strict || strict);
            let report = compiler.check(&files);
            print_statuses(&report);
            println!(
                "\n{} manifest(s): {} ok, {} with warnings, {} with errors",
                report.total(),
                report.count(Status::Ok),
                report.count(Status::Warnings),
                report.failing_count()
            );
            Ok(report.is_ok())
        }
        Commands::Build { output, strict } => {
            let files = load(&[], &config)?;
            let compiler = IndexCompiler::new(&config)?.strict(config.registry.strict || strict);
            let output = output.unwrap_or_else(|| config.registry.index_path.clone());
            match compiler.build(&files, &output) {
                Ok((index, report)) => {
                    print_statuses(&report);
                    println!(
                        "\nBuilt index with {} items -> {}",
                        index.total_count,
                        output.display()
                    );
                    if report.count(Status::Warnings) > 0 {
                        println!("WARNING: Some hashes are placeholders. Run `mods-registry probe` or `mods-registry verify`.");
                    }
                    Ok(true)
                }
                Err(RegistryError::CompilationBlocked(report)) => {
                    print_statuses(&report);
                    eprintln!("\n{}", RegistryError::CompilationBlocked(report));
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Verify {
            paths,
            variant,
            all,
            dry_run,
        } => {
            let files = load(&paths, &config)?;
            let selection = if all || !paths.is_empty() {
                Selection::All
            } else {
                Selection::Unverified
            };
            let options = VerifyOptions {
                selection,
                variant,
                dry_run,
                progress: std::io::stderr().is_terminal(),
            };
            let verifier = HashVerifier::new(&config, transport(&config)?, options)?;
            let report = verifier.verify(&files).await;
            print_batch(&report);
            Ok(!report.has_blocking())
        }
        Commands::Probe { paths, dry_run } => {
            let files = load(&paths, &config)?;
            let prober = RemoteHashProber::new(&config, transport(&config)?, dry_run)?;
            let report = prober.probe(&files).await;
            print_batch(&report);
            // Unresolvable placeholders are expected; only broken manifests fail the run
            let write_failed = report.results.iter().any(|r| {
                matches!(
                    r.outcome,
                    Outcome::Failed(ItemFailure::Verify(VerifyFailure::Rewrite(_)))
                )
            });
            Ok(report.skipped.is_empty() && !write_failed)
        }
        Commands::CheckLinks {
            paths,
            output,
            no_homepages,
        } => {
            let files = load(&paths, &config)?;
            let targets = collect_targets(&files, config.links.check_homepages && !no_homepages);
            let checker = LinkChecker::new(&config, transport(&config)?);
            let report = checker.check(&targets).await;

            for link in &report.links {
                let kind = match link.kind {
                    LinkKind::Download => "download",
                    LinkKind::Homepage => "homepage",
                };
                let label = format!("[{kind}] {}", link.referenced_by.join(", "));
                if !link.reachable {
                    println!(
                        "  ✗ {label} -> {} ({})",
                        link.url,
                        link.error.as_deref().unwrap_or("unreachable")
                    );
                } else if link.degraded {
                    println!("  ~ {label} ({} redirects)", link.redirect_chain_length);
                } else {
                    println!("  ✓ {label}");
                }
            }
            println!(
                "\nResults: {} OK, {} degraded, {} broken",
                report.ok, report.degraded, report.broken
            );

            if let Some(output) = output {
                report.write(&output)?;
                println!("Report written to {}", output.display());
            }
            Ok(!report.has_broken())
        }
    }
}

fn load(paths: &[PathBuf], config: &Config) -> anyhow::Result<Vec<ManifestFile>> {
    load_targets(paths, &config.registry.manifests_dir).with_context(|| {
        format!(
            "Failed to load manifests from {}",
            describe(paths, &config.registry.manifests_dir)
        )
    })
}

fn describe(paths: &[PathBuf], default: &Path) -> String {
    if paths.is_empty() {
        default.display().to_string()
    } else {
        paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn transport(config: &Config) -> anyhow::Result<Arc<dyn Transport>> {
    Ok(Arc::new(HttpTransport::new(&config.network)?))
}

fn print_statuses(report: &mods_registry::index::CompileReport) {
    for manifest in &report.manifests {
        let marker = match manifest.status() {
            Status::Ok => "✓",
            Status::Warnings => "!",
            Status::Errors => "✗",
        };
        println!("{marker} {}", manifest.path.display());
        for violation in &manifest.violations {
            println!("    {violation}");
        }
    }
}

fn print_batch(report: &BatchReport) {
    for (path, reason) in &report.skipped {
        println!("  SKIPPED {}: {reason}", path.display());
    }
    for result in &report.results {
        println!("  {} [{}] {}", result.manifest, result.label, result.outcome);
        if let Some(computed) = &result.computed_hash {
            if result.outcome == Outcome::Mismatch {
                println!("    Expected: {}", result.declared_hash);
                println!("    Got:      {computed}");
            }
        }
    }

    let resolved = report.count(|o| matches!(o, Outcome::Resolved | Outcome::Promoted));
    println!(
        "\nDone: {} checked, {} match, {resolved} resolved, {} mismatch, {} failed",
        report.results.len(),
        report.count(|o| *o == Outcome::Match),
        report.count(|o| *o == Outcome::Mismatch),
        report.count(|o| matches!(o, Outcome::Failed(_)))
    );
    if report.dry_run && resolved > 0 {
        println!("Run without --dry-run to apply changes.");
    } else if !report.rewritten.is_empty() {
        println!("Rewrote {} manifest(s)", report.rewritten.len());
    }
}
