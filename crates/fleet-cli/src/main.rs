//! Fleet - run tasks across many git repositories
//!
//! The `fleet` command applies one operation to every repository of a fleet,
//! a bounded number at a time, and reports a per-repository verdict.
//!
//! ## Commands
//!
//! - `list`: Show the configured fleet and which working copies exist
//! - `lint`: Lint every repository, skipping ones already linted at HEAD
//! - `sync`: Fast-forward every repository and reinstall dependencies
//! - `checkout`: Move every repository to the state a manifest declares
//! - `diff`: Explain what changed between two manifests
//! - `snapshot`: Write a manifest from the current working copies

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};

use fleet_core::{
    diff_manifests, render_outcomes, CheckoutMode, CheckoutTask, FleetConfig, FleetError,
    FleetReport, FleetRunner, GitCli, LintTask, Manifest, RepoSelection, RepoTask, SyncTask,
    VersionControl,
};

/// Exit status after Ctrl-C.
const INTERRUPTED_EXIT: i32 = 130;

#[derive(Parser)]
#[command(name = "fleet")]
#[command(author = "Stevedores Org")]
#[command(version = fleet_core::VERSION)]
#[command(about = "Run tasks across a fleet of git repositories", long_about = None)]
struct Cli {
    /// Config file (default: ./fleet.toml if present)
    #[arg(short, long, global = true, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the working copies
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Maximum repositories processed at once
    #[arg(short = 'j', long, global = true)]
    workers: Option<usize>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured fleet
    List,

    /// Run the lint command in every repository
    Lint {
        /// Repositories to lint (default: the configured fleet)
        repos: Vec<String>,
    },

    /// Pull and reinstall every repository
    Sync {
        /// Repositories to sync (default: the configured fleet)
        repos: Vec<String>,
    },

    /// Check out every repository at the state a manifest declares
    Checkout {
        /// Manifest file (JSON)
        manifest: PathBuf,

        /// What each working copy is moved to
        #[arg(short, long, value_enum, default_value_t = ModeArg::Revision)]
        mode: ModeArg,
    },

    /// Show commits and issues between two manifests
    Diff {
        /// Older manifest
        old: PathBuf,

        /// Newer manifest
        new: PathBuf,

        /// Report format
        #[arg(short, long, value_enum, default_value_t = DiffFormat::Text)]
        format: DiffFormat,
    },

    /// Write a manifest from the current working copies
    Snapshot {
        /// Output manifest path
        #[arg(short, long)]
        out: PathBuf,

        /// Comment stored in the manifest
        #[arg(long)]
        comment: Option<String>,

        /// Repositories to record (default: the configured fleet)
        repos: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Detached at the declared revision
    Revision,
    /// Declared branch reset to the declared revision
    Branch,
    /// The shared trunk branch
    Trunk,
}

impl From<ModeArg> for CheckoutMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Revision => CheckoutMode::Revision,
            ModeArg::Branch => CheckoutMode::Branch,
            ModeArg::Trunk => CheckoutMode::Trunk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DiffFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fleet_core::init_tracing(cli.json, level);

    tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(event = "cli.interrupted");
            eprintln!("interrupted");
            std::process::exit(INTERRUPTED_EXIT)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let vcs: Arc<dyn VersionControl> = Arc::new(GitCli::with_program(config.git.clone()));

    match cli.command {
        Commands::List => cmd_list(&config),
        Commands::Lint { repos } => {
            let task = LintTask::new(
                &config.root,
                config.lint_command(),
                config.lint_cache_dir(),
                vcs,
            );
            cmd_fleet(&config, "lint", &fleet_selection(repos, &config), Arc::new(task)).await
        }
        Commands::Sync { repos } => {
            let task = SyncTask::new(&config.root, config.install_command(), vcs);
            cmd_fleet(&config, "sync", &fleet_selection(repos, &config), Arc::new(task)).await
        }
        Commands::Checkout { manifest, mode } => cmd_checkout(&config, &manifest, mode, vcs).await,
        Commands::Diff { old, new, format } => {
            cmd_diff(&config, &old, &new, format, vcs.as_ref()).await
        }
        Commands::Snapshot { out, comment, repos } => {
            cmd_snapshot(&config, &out, comment, repos, vcs.as_ref()).await
        }
    }
}

/// File, then environment, then command-line flags.
fn load_config(cli: &Cli) -> Result<FleetConfig> {
    let mut config =
        FleetConfig::load(cli.config.as_deref()).context("Failed to load fleet configuration")?;
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    Ok(config)
}

fn fleet_selection(repos: Vec<String>, config: &FleetConfig) -> RepoSelection {
    if repos.is_empty() {
        RepoSelection::Fleet(config.repos.clone())
    } else {
        RepoSelection::Explicit(repos)
    }
}

/// Print the report; a failed repository makes the command fail.
fn finish(report: &FleetReport) -> Result<()> {
    print!("{}", report.render());
    if report.exit_code() != 0 {
        bail!(
            "{} of {} repositories failed ({})",
            report.report.failed_count(),
            report.report.submitted,
            report.operation
        );
    }
    Ok(())
}

fn cmd_list(config: &FleetConfig) -> Result<()> {
    if config.repos.is_empty() {
        return Err(FleetError::EmptyFleet.into());
    }
    for repo in &config.repos {
        let marker = if config.repo_dir(repo).is_dir() {
            "✓"
        } else {
            "✗"
        };
        println!("  {marker} {repo}");
    }
    println!("{} repositories under {}", config.repos.len(), config.root.display());
    Ok(())
}

async fn cmd_fleet(
    config: &FleetConfig,
    operation: &str,
    selection: &RepoSelection,
    task: Arc<dyn RepoTask>,
) -> Result<()> {
    let report = match FleetRunner::new(config.workers)
        .run(operation, selection, task)
        .await
    {
        Ok(report) => report,
        Err(e) => {
            if let FleetError::WorkerAborted { completed, .. } = &e {
                print!("{}", render_outcomes(completed));
            }
            return Err(e).with_context(|| format!("{operation} did not complete"));
        }
    };
    finish(&report)
}

async fn cmd_checkout(
    config: &FleetConfig,
    manifest_path: &Path,
    mode: ModeArg,
    vcs: Arc<dyn VersionControl>,
) -> Result<()> {
    let manifest = Manifest::load(manifest_path)
        .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;
    let task = CheckoutTask::new(
        manifest.clone(),
        mode.into(),
        &config.root,
        &config.trunk_branch,
        vcs,
    )?;
    let selection = RepoSelection::Manifest {
        manifest,
        owner: config.owner.clone(),
    };
    cmd_fleet(config, "checkout", &selection, Arc::new(task)).await
}

async fn cmd_diff(
    config: &FleetConfig,
    old: &Path,
    new: &Path,
    format: DiffFormat,
    vcs: &dyn VersionControl,
) -> Result<()> {
    let old_manifest = Manifest::load(old)
        .with_context(|| format!("Failed to read manifest {}", old.display()))?;
    let new_manifest = Manifest::load(new)
        .with_context(|| format!("Failed to read manifest {}", new.display()))?;

    let diff = diff_manifests(
        &old_manifest,
        &new_manifest,
        &config.root,
        vcs,
        &config.issue_url_prefix,
    )
    .await;

    match format {
        DiffFormat::Text => print!("{}", diff.render()),
        DiffFormat::Json => println!("{}", serde_json::to_string_pretty(&diff)?),
    }
    Ok(())
}

async fn cmd_snapshot(
    config: &FleetConfig,
    out: &Path,
    comment: Option<String>,
    repos: Vec<String>,
    vcs: &dyn VersionControl,
) -> Result<()> {
    let repos = fleet_selection(repos, config).resolve();
    if repos.is_empty() {
        return Err(FleetError::EmptyFleet.into());
    }

    let mut manifest = Manifest::capture(vcs, &config.root, &repos).await?;
    if let Some(comment) = comment {
        manifest = manifest.with_comment(comment);
    }
    manifest
        .save(out)
        .with_context(|| format!("Failed to write manifest {}", out.display()))?;

    info!(event = "snapshot.written", path = %out.display(), repos = manifest.len());
    println!("Wrote {} repositories to {}", manifest.len(), out.display());
    Ok(())
}
