//! ConflictLens CLI: one-shot conflict inspection tool.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use conflictlens_core::config::AppConfig;
use conflictlens_core::fetcher::ContentFetcher;
use conflictlens_core::models::{VersionId, VersionInfo};
use conflictlens_core::vcs::build_backend;
use conflictlens_core::{
    compare, CompareWith, ConflictInfo, ConflictSession, DiskBuffer, Recalculation, Services,
    Trigger, VersionControl,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// ConflictLens command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "conflictlens",
    version,
    about = "Find local edits that collide with changes already committed upstream"
)]
struct Cli {
    /// Path to the configuration file (defaults to ~/.config/conflictlens/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare each file's saved edits against the latest upstream version.
    Check {
        /// Files to check.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print results as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show the latest upstream version of a file.
    Latest {
        /// File to query.
        file: PathBuf,
    },

    /// Print a unified diff from the latest upstream version to the saved file.
    Compare {
        /// File to compare.
        file: PathBuf,

        /// Compare with the version the working copy was synced to instead.
        #[arg(long)]
        workspace: bool,
    },

    /// Show who committed a given version of a file, and when.
    Show {
        /// File the version belongs to.
        file: PathBuf,

        /// Revision number or commit id.
        version: String,
    },

    /// Bring a file's working copy up to the latest upstream version.
    Update {
        /// File to update.
        file: PathBuf,
    },

    /// Write a default configuration file.
    Init {
        /// Output path for the config file.
        #[arg(short, long, default_value = "conflictlens.toml")]
        output: PathBuf,
    },

    /// Validate the configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&config_path(cli.config.as_deref())?),
        Commands::Check { files, json } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_check(&config, &files, json).await
        }
        Commands::Latest { file } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_latest(build_backend(&config.backend), &file).await
        }
        Commands::Compare { file, workspace } => {
            let config = load_config(cli.config.as_deref())?;
            let with = if workspace {
                CompareWith::Workspace
            } else {
                CompareWith::Latest
            };
            cmd_compare(build_backend(&config.backend), &file, with).await
        }
        Commands::Show { file, version } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_show(build_backend(&config.backend), &file, &VersionId::new(version)).await
        }
        Commands::Update { file } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_update(build_backend(&config.backend), &file).await
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("conflictlens").join("config.toml"))
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path().context("could not determine the user config directory"),
    }
}

/// Load, resolve and validate the configuration. An explicit path must
/// exist; a missing default file means built-in defaults.
fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let mut config = match explicit {
        Some(path) => AppConfig::load_from_file(path).context("failed to load configuration file")?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                AppConfig::load_from_file(&path).context("failed to load configuration file")?
            }
            None => AppConfig::default(),
        },
    };
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config
        .validate()
        .context("configuration validation failed")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Outcome of checking one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum FileStatus {
    NotTracked,
    /// A version lookup or diff failed; details are in the log.
    Unavailable,
    Checked,
}

impl From<Recalculation> for FileStatus {
    fn from(outcome: Recalculation) -> Self {
        match outcome {
            Recalculation::NotTracked => Self::NotTracked,
            Recalculation::Deferred => Self::Unavailable,
            Recalculation::Unchanged | Recalculation::Changed => Self::Checked,
        }
    }
}

/// Result of checking one file, as printed by `check --json`.
#[derive(Debug, Serialize)]
struct FileReport {
    path: PathBuf,
    status: FileStatus,
    conflicts: Vec<ConflictInfo>,
    latest_version: Option<VersionInfo>,
}

async fn check_file(config: &AppConfig, path: &Path) -> FileReport {
    let services = Services::with_line_differ(build_backend(&config.backend));
    let session = ConflictSession::new(
        path,
        Arc::new(DiskBuffer::new(path)),
        services,
        &config.session.settings(),
    );
    let outcome = session.recalculate(Trigger::None).await;
    let conflicts = session
        .current_conflicts()
        .map(|c| c.to_vec())
        .unwrap_or_default();
    let report = FileReport {
        path: path.to_path_buf(),
        status: outcome.into(),
        conflicts,
        latest_version: session.latest_version(),
    };
    session.close();
    report
}

async fn cmd_check(config: &AppConfig, files: &[PathBuf], json: bool) -> Result<()> {
    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        if !file.is_file() {
            bail!("not a file: {}", file.display());
        }
        reports.push(check_file(config, file).await);
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("failed to serialize results")?
        );
        return Ok(());
    }

    for report in &reports {
        print_report(report);
    }
    Ok(())
}

fn print_report(report: &FileReport) {
    println!();
    println!("{}", style::header(&report.path.display().to_string()));

    match report.status {
        FileStatus::NotTracked => {
            println!("{}", style::dim("not under version control"));
            return;
        }
        FileStatus::Unavailable => {
            println!("{}", style::warn("versions could not be fetched, see log output"));
            return;
        }
        FileStatus::Checked => {}
    }

    if let Some(ref latest) = report.latest_version {
        println!(
            "{}",
            style::dim(&format!(
                "latest {} by {} on {}: {}",
                latest.id,
                latest.owner_display_name,
                latest.created_at.format("%Y-%m-%d %H:%M"),
                latest.display_comment()
            ))
        );
    }

    if report.conflicts.is_empty() {
        println!("{}", style::success("No conflicts"));
        return;
    }

    println!(
        "{}",
        style::error(&format!("{} conflict(s)", report.conflicts.len()))
    );
    println!("{}", conflict_table(&report.conflicts));
}

fn conflict_table(conflicts: &[ConflictInfo]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Your lines".to_string(),
        "Base lines".to_string(),
        style::local_label(),
        style::remote_label(),
    ]);

    for conflict in conflicts {
        let buffer = conflict.buffer_range();
        let base = conflict.base_range();
        table.add_row(vec![
            Cell::new(style::line_span(buffer.start, buffer.end)),
            Cell::new(style::line_span(base.start, base.end)),
            Cell::new(conflict.local.kind.to_string()).fg(Color::Cyan),
            Cell::new(conflict.remote.kind.to_string()).fg(Color::Magenta),
        ]);
    }
    table
}

async fn cmd_latest(vcs: Arc<dyn VersionControl>, file: &Path) -> Result<()> {
    if !vcs.is_under_version_control(file).await {
        bail!("{} is not under version control", file.display());
    }

    let local = vcs
        .local_version(file)
        .await
        .context("failed to read the local version")?;
    let Some(latest) = vcs
        .latest_version(file)
        .await
        .context("failed to query the latest version")?
    else {
        println!("{}", style::warn("no upstream version found"));
        return Ok(());
    };
    let email = vcs
        .owner_email(&latest.owner_account)
        .await
        .context("failed to resolve owner email")?;

    println!();
    println!("{}", style::header(&file.display().to_string()));
    println!(
        "  Local version : {}",
        local.map(|v| v.to_string()).unwrap_or_else(|| "(none)".into())
    );
    println!("  Latest        : {}", latest.id);
    print_version_details(&latest, email.as_deref());
    println!();
    Ok(())
}

fn print_version_details(info: &VersionInfo, email: Option<&str>) {
    println!(
        "  Owner         : {} ({})",
        info.owner_display_name, info.owner_account
    );
    if let Some(email) = email {
        println!("  Email         : {}", email);
    }
    println!(
        "  Date          : {}",
        info.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Comment       : {}", info.display_comment());
}

async fn cmd_compare(vcs: Arc<dyn VersionControl>, file: &Path, with: CompareWith) -> Result<()> {
    if !vcs.is_under_version_control(file).await {
        bail!("{} is not under version control", file.display());
    }

    let fetcher = ContentFetcher::new(vcs);
    let buffer = DiskBuffer::new(file);
    let Some(comparison) = compare(&fetcher, file, &buffer, with)
        .await
        .with_context(|| format!("failed to compare {}", file.display()))?
    else {
        println!("{}", style::warn("no version to compare with"));
        return Ok(());
    };

    if comparison.is_identical() {
        println!(
            "{}",
            style::success(&format!("No differences from {}", comparison.version))
        );
    } else {
        print!("{}", comparison.patch);
    }
    Ok(())
}

async fn cmd_show(vcs: Arc<dyn VersionControl>, file: &Path, version: &VersionId) -> Result<()> {
    if !vcs.is_under_version_control(file).await {
        bail!("{} is not under version control", file.display());
    }

    let Some(info) = vcs
        .version_info(file, version)
        .await
        .with_context(|| format!("failed to look up version {}", version))?
    else {
        bail!("no version {} of {}", version, file.display());
    };
    let email = vcs
        .owner_email(&info.owner_account)
        .await
        .context("failed to resolve owner email")?;

    println!();
    println!("{}", style::header(&file.display().to_string()));
    println!("  Version       : {}", info.id);
    print_version_details(&info, email.as_deref());
    println!();
    Ok(())
}

async fn cmd_update(vcs: Arc<dyn VersionControl>, file: &Path) -> Result<()> {
    if !vcs.is_under_version_control(file).await {
        bail!("{} is not under version control", file.display());
    }
    if vcs
        .has_pending_changes(file)
        .await
        .context("failed to read working copy status")?
    {
        println!(
            "{}",
            style::warn("file has local changes; the backend may refuse the update")
        );
    }

    vcs.get_latest(file)
        .await
        .with_context(|| format!("failed to update {}", file.display()))?;

    let version = vcs
        .local_version(file)
        .await
        .context("failed to read the local version")?;
    let msg = match version {
        Some(v) => format!("{} is now at {}", file.display(), v),
        None => format!("{} updated", file.display()),
    };
    println!("{}", style::success(&msg));
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# ConflictLens Configuration

[daemon]
log_level = "info"
# log_file = "/var/log/conflictlens/daemon.log"

[session]
debounce_ms = 500
poll_interval_secs = 120
watch_files = true

[backend]
kind = "svn"

[backend.svn]
binary = "svn"
# username = "svn_user"
# password_env = "SVN_PASSWORD"
# email_domain = "example.com"

[backend.git]
remote = "origin"
# branch = "main"
fetch_on_poll = true
# token_env = "GIT_TOKEN"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Pick the backend (svn or git) and fill in its section");
    println!("  2. Set any referenced environment variables (SVN_PASSWORD, GIT_TOKEN)");
    println!(
        "  3. Validate with: conflictlens validate --config {}",
        output.display()
    );
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    // Missing variables only warn
    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            bail!("configuration validation failed");
        }
    }

    let set = |present: bool| if present { "set" } else { "not set" };

    println!();
    println!("Configuration summary:");
    println!("  Backend       : {}", config.backend.kind);
    println!("  SVN binary    : {}", config.backend.svn.binary);
    println!(
        "  SVN password  : {}",
        set(config.backend.svn.password.is_some())
    );
    println!("  Git remote    : {}", config.backend.git.remote);
    println!(
        "  Git branch    : {}",
        config.backend.git.branch.as_deref().unwrap_or("(upstream)")
    );
    println!("  Git token     : {}", set(config.backend.git.token.is_some()));
    println!("  Debounce      : {}ms", config.session.debounce_ms);
    println!("  Poll interval : {}s", config.session.poll_interval_secs);
    println!("  Watch files   : {}", config.session.watch_files);
    println!();
    println!("Configuration is valid.");
    Ok(())
}
