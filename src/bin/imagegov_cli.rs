//! ImageGov CLI - base image governance for the component catalog
//!
//! Commands: validate, check-tags, override, locate
//! Human-readable report on stdout, or JSON with --json; logs go to stderr.
//! Returns non-zero when any record is invalid or an error stops the run.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use imagegov_core::{
    discovery::{discover_assets, resolve_asset},
    get_image_literal_locations,
    policy::DEFAULT_ALLOWLIST_PATH,
    AllowlistPolicy, DecoratorKind, GovernancePipeline, PythonInterpreter, TagPolicy, ValidationReport,
    DEFAULT_IMAGE_PREFIX, SENTINEL_TAG,
};

#[derive(Parser)]
#[command(name = "imagegov-cli", version)]
#[command(about = "ImageGov CLI - Base image governance for pipeline components")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Python interpreter used to load and compile assets
    #[arg(long, global = true, env = "IMAGEGOV_PYTHON", default_value = "python3")]
    python: PathBuf,

    /// Extra import roots for loaded assets (repeatable)
    #[arg(long = "python-path", global = true)]
    python_path: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile assets and validate resolved base images against the allowlist
    Validate {
        /// Component directory or component.py to validate (repeatable)
        #[arg(long)]
        component: Vec<PathBuf>,

        /// Pipeline directory or pipeline.py to validate (repeatable)
        #[arg(long)]
        pipeline: Vec<PathBuf>,

        /// Base image allowlist YAML
        #[arg(long = "allow-list", env = "IMAGEGOV_ALLOWLIST")]
        allow_list: Option<PathBuf>,

        /// Repository root holding components/ and pipelines/
        #[arg(long, default_value = ".")]
        repo_root: PathBuf,
    },

    /// Check that resolved images under the prefix use the expected tag
    CheckTags {
        /// Image prefix to check
        #[arg(env = "IMAGEGOV_IMAGE_PREFIX", default_value = DEFAULT_IMAGE_PREFIX)]
        image_prefix: String,

        /// Directories to scan
        #[arg(long, required = true, num_args = 1..)]
        directories: Vec<PathBuf>,

        /// Tag every governed image must carry
        #[arg(long)]
        expected_tag: String,
    },

    /// Rewrite sentinel-tagged base_image literals to a container tag
    Override {
        /// New container tag (commit SHA or release tag)
        container_tag: String,

        /// Image prefix to override
        #[arg(env = "IMAGEGOV_IMAGE_PREFIX", default_value = DEFAULT_IMAGE_PREFIX)]
        image_prefix: String,

        /// Directories to scan
        #[arg(long, required = true, num_args = 1..)]
        directories: Vec<PathBuf>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the base_image literal locations of one file
    Locate {
        file: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => error!(error = %e, "failed to serialize output"),
    }
}

fn interpreter(cli: &Cli, extra_root: Option<&Path>) -> PythonInterpreter {
    let mut python = PythonInterpreter::new(&cli.python);
    for root in extra_root.into_iter().chain(cli.python_path.iter().map(PathBuf::as_path)) {
        python = python.with_search_path(root);
    }
    python
}

fn print_report(report: &ValidationReport, heading: &str) {
    println!("{}", heading);
    for r in report.invalid() {
        println!("  ❌ {}", r.file.display());
        match (&r.found, &r.expected, &r.error) {
            (_, _, Some(err)) => println!("    Error: {}", err),
            (Some(found), Some(expected), _) => {
                println!("    Found: {}", found);
                println!("    Expected: {}", expected);
            }
            (Some(found), None, _) => println!("    Invalid image: {}", found),
            _ => {}
        }
    }
    if !report.images.is_empty() {
        println!();
        println!("All unique base images found:");
        for image in &report.images {
            let invalid = report.invalid().any(|r| r.found.as_deref() == Some(image.as_str()));
            println!("  - {} [{}]", image, if invalid { "INVALID" } else { "VALID" });
        }
    }
    println!();
    println!(
        "{} file(s) checked, {} invalid record(s): {}",
        report.files_checked,
        report.invalid().count(),
        if report.valid { "SUCCESS" } else { "FAILED" }
    );
}

fn report_exit(report: &ValidationReport) -> ExitCode {
    if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_validate(
    cli: &Cli,
    component: &[PathBuf],
    pipeline: &[PathBuf],
    allow_list: Option<&Path>,
    repo_root: &Path,
) -> ExitCode {
    let allowlist_path = allow_list
        .map(Path::to_path_buf)
        .unwrap_or_else(|| repo_root.join(DEFAULT_ALLOWLIST_PATH));

    // A broken policy makes every later result meaningless.
    let allowlist = match AllowlistPolicy::load(&allowlist_path) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let targeted = component
        .iter()
        .map(|raw| (DecoratorKind::Component, raw))
        .chain(pipeline.iter().map(|raw| (DecoratorKind::Pipeline, raw)));
    let assets = if component.is_empty() && pipeline.is_empty() {
        let mut assets = Vec::new();
        for kind in [DecoratorKind::Component, DecoratorKind::Pipeline] {
            match discover_assets(&repo_root.join(kind.root_dir()), kind) {
                Ok(found) => assets.extend(found),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        assets
    } else {
        let mut assets = Vec::new();
        for (kind, raw) in targeted {
            match resolve_asset(repo_root, raw, kind) {
                Ok(asset) => assets.push(asset),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        assets
    };

    if assets.is_empty() && !cli.json {
        println!("No components or pipelines were discovered.");
        println!("Components should be at: components/<category>/<name>/component.py");
        println!("Pipelines should be at: pipelines/<category>/<name>/pipeline.py");
    }

    let governance = GovernancePipeline::new(interpreter(cli, Some(repo_root)));
    match governance.validate_assets(&assets, &allowlist) {
        Ok(report) => {
            if cli.json {
                print_json(&report);
            } else {
                print_report(&report, &format!("Allowlist: {}", allowlist_path.display()));
            }
            report_exit(&report)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Validate {
            component,
            pipeline,
            allow_list,
            repo_root,
        } => run_validate(&cli, component, pipeline, allow_list.as_deref(), repo_root),

        Commands::CheckTags {
            image_prefix,
            directories,
            expected_tag,
        } => {
            let tags = TagPolicy::new(image_prefix.as_str(), expected_tag.as_str());
            let governance = GovernancePipeline::new(interpreter(&cli, None));
            match governance.check_base_image_tags(directories, &tags) {
                Ok(report) => {
                    if cli.json {
                        print_json(&report);
                    } else {
                        print_report(
                            &report,
                            &format!("🔍 Checking that base_image references use :{} tag...", expected_tag),
                        );
                        if !report.valid {
                            println!(
                                "   Update your decorators: base_image=\"<prefix>-<name>:{}\"",
                                expected_tag
                            );
                        }
                    }
                    report_exit(&report)
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Override {
            container_tag,
            image_prefix,
            directories,
            dry_run,
        } => {
            if !cli.json {
                println!("Overriding base_image references from :{} to :{}", SENTINEL_TAG, container_tag);
            }
            match imagegov_core::override_base_images(directories, container_tag, image_prefix, *dry_run) {
                Ok(modified) => {
                    if cli.json {
                        print_json(&serde_json::json!({
                            "dry_run": dry_run,
                            "modified": modified,
                        }));
                    } else {
                        let action = if *dry_run { "Would update" } else { "Updated" };
                        for file in &modified {
                            println!("{}: {}", action, file.display());
                        }
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Locate { file } => match get_image_literal_locations(file) {
            Ok(locations) => {
                if cli.json {
                    print_json(&locations);
                } else {
                    for loc in &locations {
                        println!(
                            "{}:{}:{} {} {}",
                            file.display(),
                            loc.start_line,
                            loc.start_col,
                            loc.function_name,
                            loc.value
                        );
                    }
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}
