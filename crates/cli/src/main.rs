//! confdraft CLI: edit configuration files kept in a git repository through
//! drafts, then commit, resolve and merge them.

mod branches;
mod files;
mod runner;
mod style;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use confdraft_core::models::ResolveStrategy;
use confdraft_core::{EngineConfig, EngineError, ErrorStatus};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "confdraft",
    about = "Draft, commit and merge configuration files kept in git",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file.
    Init {
        /// Where to write the file (defaults to the user config directory).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration file.
    Validate,

    /// Clone the repository, or reopen and fetch the existing clone.
    Access,

    /// Fetch the current and default branches.
    Refresh,

    /// List branches in the remote repository.
    Branches,

    /// Switch to a branch, or create one from the default branch.
    Checkout {
        branch: String,
        /// Create the branch upstream first.
        #[arg(long)]
        create: bool,
    },

    /// List files of the current branch together with drafts.
    Files,

    /// Print a file (draft if one exists).
    Show {
        /// File as <application>/<file>; use /<file> for repository root files.
        file: String,
        /// Print the repository copy even when a draft exists.
        #[arg(long)]
        original: bool,
    },

    /// Replace a file's draft with the contents of a local file.
    Edit {
        file: String,
        /// Local file holding the new contents.
        #[arg(long)]
        from: PathBuf,
    },

    /// Drop a file's draft.
    Revert { file: String },

    /// Commit drafts to the current branch (all drafts when no file is given).
    Commit {
        #[arg(short, long)]
        message: String,
        files: Vec<String>,
    },

    /// Commit drafts and settle conflicts interactively.
    Resolve {
        #[arg(short, long, default_value = "Resolve conflicts")]
        message: String,
        /// Apply one strategy to every conflict instead of prompting.
        #[arg(long, value_enum)]
        keep: Option<Keep>,
        files: Vec<String>,
    },

    /// Delete a file upstream and drop its draft.
    Delete {
        file: String,
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show what merging a branch into another would change.
    Diff {
        src: String,
        /// Target branch (defaults to the default branch).
        #[arg(long)]
        into: Option<String>,
    },

    /// Merge a branch into another.
    Merge {
        src: String,
        /// Target branch (defaults to the default branch).
        #[arg(long)]
        into: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Keep {
    /// Keep my draft.
    Local,
    /// Take the repository version.
    Remote,
}

impl From<Keep> for ResolveStrategy {
    fn from(keep: Keep) -> Self {
        match keep {
            Keep::Local => ResolveStrategy::KeepLocal,
            Keep::Remote => ResolveStrategy::KeepRemote,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    init_tracing(&config_path);

    match run(cli, config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            if let Some(hint) = hint_for(&e) {
                eprintln!("  {}", style::dim(hint));
            }
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise the config file's level, or `warn` when the
/// file cannot be read yet.
fn init_tracing(config_path: &std::path::Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = EngineConfig::load_from_file(config_path)
            .map(|c| c.engine.log_level)
            .unwrap_or_else(|_| "warn".into());
        EnvFilter::new(level)
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    let engine = err.downcast_ref::<EngineError>()?;
    match engine.status() {
        ErrorStatus::Conflict if engine.conflict().is_some() => {
            Some("Run `confdraft resolve` to choose which side to keep.")
        }
        ErrorStatus::Unauthorized => Some("Check remote.username and the password_env variable."),
        ErrorStatus::BranchDeleted => Some("The session moved back to the default branch."),
        _ => None,
    }
}

async fn run(cli: Cli, config_path: PathBuf) -> Result<()> {
    let config = || load_config(&config_path);
    match cli.command {
        Commands::Init { output } => cmd_init(output.unwrap_or_else(|| config_path.clone())),
        Commands::Validate => cmd_validate(&config_path),
        Commands::Access => branches::cmd_access(&config()?).await,
        Commands::Refresh => branches::cmd_refresh(&config()?).await,
        Commands::Branches => branches::cmd_branches(&config()?).await,
        Commands::Checkout { branch, create } => {
            branches::cmd_checkout(&config()?, branch, create).await
        }
        Commands::Files => files::cmd_files(&config()?).await,
        Commands::Show { file, original } => files::cmd_show(&config()?, &file, original).await,
        Commands::Edit { file, from } => files::cmd_edit(&config()?, &file, &from).await,
        Commands::Revert { file } => files::cmd_revert(&config()?, &file).await,
        Commands::Commit { message, files } => files::cmd_commit(&config()?, message, &files).await,
        Commands::Resolve {
            message,
            keep,
            files,
        } => files::cmd_resolve(&config()?, message, keep.map(Into::into), &files).await,
        Commands::Delete { file, yes } => files::cmd_delete(&config()?, &file, yes).await,
        Commands::Diff { src, into } => branches::cmd_diff(&config()?, src, into).await,
        Commands::Merge { src, into } => branches::cmd_merge(&config()?, src, into).await,
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("confdraft").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("confdraft.toml"))
}

fn load_config(path: &std::path::Path) -> Result<EngineConfig> {
    EngineConfig::load_and_resolve(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

// ---------------------------------------------------------------------------
// init / validate
// ---------------------------------------------------------------------------

fn cmd_init(output: PathBuf) -> Result<()> {
    if output.exists() {
        bail!(
            "config file already exists at {} (remove it first or use --output)",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let data_dir = dirs::data_dir()
        .map(|d| d.join("confdraft"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/confdraft"));
    let template = format!(
        r#"# confdraft configuration

[engine]
log_level = "info"
data_dir = "{data_dir}"

[remote]
url = "https://github.com/org/app-config.git"
username = "your-username"
# Environment variable holding the password or access token.
password_env = "CONFDRAFT_TOKEN"
default_branch = "master"
# 0 clones the full history.
clone_depth = 1
locked_branches = []

[layout]
apps_folder = "apps"
settings_file = ".confrc"

# [author]
# name = "Your Name"
# email = "you@example.com"
"#,
        data_dir = data_dir.display()
    );

    std::fs::write(&output, template)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("{}", style::success(&format!("Config written to {}", output.display())));
    println!();
    println!("{}", style::header("Next steps"));
    println!("  1. Set remote.url and remote.username");
    println!("  2. export CONFDRAFT_TOKEN=<token>");
    println!("  3. confdraft validate");
    println!("  4. confdraft access");
    Ok(())
}

fn cmd_validate(path: &std::path::Path) -> Result<()> {
    let mut config = EngineConfig::load_from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    println!("{} config parsed", style::success("[OK]"));

    config.resolve_env_vars().context("environment variables")?;
    println!("{} environment variables resolved", style::success("[OK]"));

    config.validate().context("validation")?;
    println!("{} values valid", style::success("[OK]"));

    println!();
    println!("{}", style::header("Summary"));
    println!("  remote:          {}", config.remote.url);
    println!("  username:        {}", config.remote.username);
    println!("  default branch:  {}", config.remote.default_branch);
    println!("  clone depth:     {}", config.remote.clone_depth);
    println!("  apps folder:     {}", config.layout.apps_folder);
    println!("  settings file:   {}", config.layout.settings_file);
    println!("  data dir:        {}", config.engine.data_dir.display());
    if config.remote.password.is_none() {
        println!("{}", style::warn("no password_env set; the remote must allow anonymous access"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        cmd_init(path.clone()).unwrap();

        let config = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.remote.default_branch, "master");
        assert_eq!(config.remote.password_env.as_deref(), Some("CONFDRAFT_TOKEN"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "x").unwrap();
        assert!(cmd_init(path.clone()).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x");
    }

    #[test]
    fn test_hint_for_wrapped_conflict() {
        use confdraft_core::models::ConflictReport;
        let err = EngineError::Conflict(Box::new(ConflictReport {
            conflict_files: Vec::new(),
            diff: None,
            src_branch: None,
            target_branch: None,
        }));
        let err = anyhow::Error::new(err).context("commit failed");
        assert!(hint_for(&err).unwrap().contains("resolve"));
    }

    #[test]
    fn test_cli_parses_resolve_flags() {
        let cli = Cli::try_parse_from(["confdraft", "resolve", "--keep", "remote", "app1/a.yaml"])
            .unwrap();
        match cli.command {
            Commands::Resolve { keep, files, message } => {
                assert!(matches!(keep, Some(Keep::Remote)));
                assert_eq!(files, vec!["app1/a.yaml".to_string()]);
                assert_eq!(message, "Resolve conflicts");
            }
            _ => panic!("expected resolve"),
        }
    }
}
