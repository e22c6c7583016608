use std::path::{Path, PathBuf};
use std::process;

use anyhow::{anyhow, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use triage_packager::cli::{Args, Operation};
use triage_packager::error::PackagerError;
use triage_packager::models::{DependencyStatus, OfflinePackage, ValidationResult};
use triage_packager::operations::{self, DownloadOutcome, Session};

const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_INVALID: i32 = 2;

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                _ => EXIT_FAILURE,
            };
            let _ = e.print();
            process::exit(code);
        }
    };

    if let Err(e) = initialize_logging(args.verbose) {
        eprintln!("{:#}", e);
    }

    let code = match run(&args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_FAILURE
        }
    };
    process::exit(code);
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ).context("Failed to initialize logger")?;
    Ok(())
}

fn required<'a>(value: &'a Option<PathBuf>, flag: &str, op: Operation) -> Result<&'a Path> {
    value
        .as_deref()
        .ok_or_else(|| anyhow!("{} is required for the {} operation", flag, op))
}

fn run(args: &Args) -> Result<i32> {
    let op = args.operation;
    let config = args.packager_config()?;

    if op.needs_output() {
        required(&args.output_path, "--output-path", op)?;
    }

    if !op.needs_catalog() {
        let output = required(&args.output_path, "--output-path", op)?;
        let result = operations::deploy(output);
        print_validation(&output.display().to_string(), &result);
        return Ok(if result.valid { EXIT_OK } else { EXIT_FAILURE });
    }

    let collections_path = required(&args.collections_path, "--collections-path", op)?;
    let session = match Session::open(collections_path, config) {
        Ok(session) => session,
        Err(e @ PackagerError::Catalog { .. }) | Err(e @ PackagerError::Config { .. }) => {
            error!("{}", e);
            return Ok(EXIT_FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;
    runtime.block_on(run_operation(args, &session))
}

async fn run_operation(args: &Args, session: &Session) -> Result<i32> {
    let op = args.operation;

    let selection = session.selection(&args.include, &args.exclude);
    info!("{} collections selected for {}", selection.len(), op);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling pending downloads");
            ctrl_c.cancel();
        }
    });

    match op {
        Operation::List => {
            for summary in session.list(&selection) {
                println!("{} [{}]", summary.name, summary.collection_type);
                for dependency in &summary.dependencies {
                    print_dependency(dependency);
                }
            }
            Ok(EXIT_OK)
        }
        Operation::Download => {
            let fetcher = session.fetcher()?;
            match session.download(&fetcher, &selection, args.validate_only, &cancel).await {
                DownloadOutcome::Plan(plan) => {
                    for status in &plan {
                        print_dependency(status);
                    }
                    Ok(EXIT_OK)
                }
                DownloadOutcome::Report(report) => {
                    for result in &report.results {
                        println!("{}: {} ({})", result.name, result.status, result.message);
                    }
                    info!(
                        "{} of {} tools ready, {} failed",
                        report.succeeded_count(),
                        report.results.len(),
                        report.failed_count()
                    );
                    Ok(if report.success() { EXIT_OK } else { EXIT_FAILURE })
                }
            }
        }
        Operation::Validate => {
            let mut code = EXIT_OK;
            for (name, result) in session.validate(&selection) {
                print_validation(&name, &result);
                if !result.valid {
                    code = EXIT_INVALID;
                }
            }
            Ok(code)
        }
        Operation::Build | Operation::Package => {
            let output = required(&args.output_path, "--output-path", op)?;
            let fetcher = if args.offline { Some(session.fetcher()?) } else { None };

            let result = if op == Operation::Package {
                session
                    .package(fetcher.as_ref(), &selection, output, args.offline, &cancel)
                    .await
                    .map(|(package, zip_path)| {
                        info!("Package archive: {}", zip_path.display());
                        package
                    })
            } else {
                session
                    .build(fetcher.as_ref(), &selection, output, args.offline, &cancel)
                    .await
            };

            match result {
                Ok(package) => {
                    print_package(&package);
                    Ok(if package.success { EXIT_OK } else { EXIT_FAILURE })
                }
                Err(e) => {
                    error!("{}", e);
                    Ok(EXIT_FAILURE)
                }
            }
        }
        Operation::Deploy => unreachable!("deploy runs without a catalog"),
    }
}

fn print_dependency(status: &DependencyStatus) {
    let location = status
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .or_else(|| status.download_url.clone())
        .unwrap_or_default();
    println!("  - {}: {} {}", status.name, status.status, location);
}

fn print_validation(subject: &str, result: &ValidationResult) {
    println!("{}: {}", subject, if result.valid { "valid" } else { "INVALID" });
    for error in &result.errors {
        println!("  error: {}", error);
    }
    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
}

fn print_package(package: &OfflinePackage) {
    println!("Package: {}", package.path.display());
    println!("  collections: {}", package.included_collections.len());
    println!("  tools: {}", package.bundled_tools.len());
    println!("  size: {} bytes", package.size_bytes);
    for warning in &package.warnings {
        println!("  warning: {}", warning);
    }
}
