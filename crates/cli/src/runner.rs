//! Running engine calls on the blocking pool, and argument helpers shared by
//! the commands.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use confdraft_core::git::GitStore;
use confdraft_core::models::{ConfigFile, FileType};
use confdraft_core::{open_session, EngineConfig, GitBackend, RepoSession};

pub type Session = RepoSession<GitStore>;

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&[
                "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓",
            ]),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Run `f` on the blocking pool behind a spinner. Git and filesystem work
/// never runs on the async executor.
pub async fn blocking<T, F>(message: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let pb = spinner(message);
    let joined = tokio::task::spawn_blocking(f).await;
    pb.finish_and_clear();
    joined.context("engine task panicked")?
}

/// Reopen the accessed repository and run `f` against the session.
pub async fn with_session<T, F>(config: &EngineConfig, message: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Session) -> Result<T> + Send + 'static,
{
    let config = config.clone();
    blocking(message, move || {
        let credentials = config.credentials();
        let mut session = open_session(config, &GitBackend, credentials)?;
        f(&mut session)
    })
    .await
}

/// Parse `<application>/<file>`; a leading `/` addresses a repository root
/// file and a bare apps-folder name addresses its shared settings.
pub fn parse_file(file_arg: &str, config: &EngineConfig) -> Result<ConfigFile> {
    let (application, name) = file_arg
        .rsplit_once('/')
        .ok_or_else(|| anyhow!("expected <application>/<file>, got '{file_arg}'"))?;
    if name.is_empty() {
        return Err(anyhow!("missing file name in '{file_arg}'"));
    }
    let file_type = FileType::from_file_name(name, &config.layout.settings_file)
        .ok_or_else(|| anyhow!("'{name}' is not a YAML, Markdown or settings file"))?;
    Ok(ConfigFile::new(application, name, file_type))
}

pub fn parse_files(file_args: &[String], config: &EngineConfig) -> Result<Vec<ConfigFile>> {
    file_args.iter().map(|s| parse_file(s, config)).collect()
}

/// Unified diff from `before` to `after`.
pub fn preview(before: Option<&str>, after: Option<&str>) -> String {
    let patch = diffy::create_patch(before.unwrap_or(""), after.unwrap_or(""));
    patch.to_string()
}

/// Display label used in tables: root files show as `/<file>`.
pub fn display_label(file: &ConfigFile) -> String {
    if file.application_name.is_empty() {
        format!("/{}", file.file_name)
    } else {
        file.label()
    }
}
