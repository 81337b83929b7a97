//! File commands: listing, drafts, commit, conflict resolution and delete.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dialoguer::{Confirm, Select};
use tracing::debug;

use confdraft_core::models::{ConfigFile, ConflictFile, ResolveStrategy};
use confdraft_core::{EngineConfig, ErrorStatus};

use crate::runner::{display_label, parse_file, parse_files, preview, with_session, Session};
use crate::style;

pub async fn cmd_files(config: &EngineConfig) -> Result<()> {
    let (branch, default_branch, listing) = with_session(config, "Loading files...", |s| {
        let listing = s.list_files()?;
        Ok((s.current_branch().to_string(), s.default_branch().to_string(), listing))
    })
    .await?;

    println!("{}", style::header(&format!("Files on '{}'", branch)));
    if listing.files.is_empty() {
        println!("  {}", style::dim("(no managed files)"));
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["File", "Type", "Size", "State"]);
    for file in &listing.files {
        table.add_row(vec![
            Cell::new(display_label(file)),
            Cell::new(file.file_type.to_string()),
            Cell::new(file.size.map(|s| s.to_string()).unwrap_or_default()),
            Cell::new(style::file_state(file.modified, file.oid.is_none())),
        ]);
    }
    println!("{table}");

    let drafts = listing.files.iter().filter(|f| f.modified).count();
    println!(
        "{} file(s) in {} application(s), {} draft(s)",
        listing.files.len(),
        listing.applications.len(),
        drafts
    );
    if branch != default_branch {
        if listing.can_pull_request {
            let note = format!("  '{branch}' has changes to merge into '{default_branch}'");
            println!("{}", style::dim(&note));
        }
        if listing.can_sync_default {
            let note = format!("  '{default_branch}' has changes to merge into '{branch}'");
            println!("{}", style::dim(&note));
        }
    }
    Ok(())
}

pub async fn cmd_show(config: &EngineConfig, file_arg: &str, original: bool) -> Result<()> {
    let file = parse_file(file_arg, config)?;
    let loaded =
        with_session(config, "Reading file...", move |s| Ok(s.get_file_content(&file)?)).await?;

    let text = if original {
        loaded.original_content.as_deref()
    } else {
        loaded.draft_content.as_deref().or(loaded.original_content.as_deref())
    };
    match text {
        Some(text) => print!("{text}"),
        None => println!("{}", style::dim("(file exists only as a draft; drop --original)")),
    }
    if loaded.modified && !original {
        eprintln!("{}", style::dim("(draft)"));
    }
    Ok(())
}

pub async fn cmd_edit(config: &EngineConfig, file_arg: &str, from: &Path) -> Result<()> {
    let file = parse_file(file_arg, config)?;
    let content = std::fs::read_to_string(from)
        .with_context(|| format!("failed to read {}", from.display()))?;

    let saved = with_session(config, "Saving draft...", move |s| {
        let current = match s.get_file_content(&file) {
            Ok(current) => current,
            Err(e) if e.status() == ErrorStatus::NotFound => file,
            Err(e) => return Err(e.into()),
        };
        Ok(s.save_draft(&current.with_draft(content))?)
    })
    .await?;

    if saved.modified {
        println!("{}", style::success(&format!("Draft saved for {}", display_label(&saved))));
        let patch = preview(saved.original_content.as_deref(), saved.draft_content.as_deref());
        println!("{}", style::patch(&patch));
    } else {
        println!(
            "{}",
            style::warn(&format!("{} matches the repository; draft dropped", display_label(&saved)))
        );
    }
    Ok(())
}

pub async fn cmd_revert(config: &EngineConfig, file_arg: &str) -> Result<()> {
    let file = parse_file(file_arg, config)?;
    let reverted = with_session(config, "Dropping draft...", move |s| {
        let mut current = s.get_file_content(&file)?;
        let had_draft = current.modified;
        current.draft_content = None;
        s.save_draft(&current)?;
        Ok(had_draft)
    })
    .await?;

    if reverted {
        println!("{}", style::success(&format!("Draft of {file_arg} dropped")));
    } else {
        println!("{}", style::dim(&format!("{file_arg} has no draft")));
    }
    Ok(())
}

/// Requested files with their drafts loaded, or every draft on the branch
/// when none are requested. Files without a draft are skipped.
fn load_drafts(session: &mut Session, requested: Vec<ConfigFile>) -> Result<Vec<ConfigFile>> {
    let candidates = if requested.is_empty() {
        session
            .list_files()?
            .files
            .into_iter()
            .filter(|f| f.modified)
            .collect()
    } else {
        requested
    };

    let mut drafts = Vec::with_capacity(candidates.len());
    for file in candidates {
        let loaded = session.get_file_content(&file)?;
        if loaded.modified {
            drafts.push(loaded);
        } else {
            debug!(file = %loaded.label(), "no draft, skipping");
        }
    }
    Ok(drafts)
}

fn print_committed(committed: &[ConfigFile]) {
    if committed.is_empty() {
        println!("{}", style::dim("Nothing to commit"));
        return;
    }
    println!("{}", style::success(&format!("Committed {} file(s)", committed.len())));
    for file in committed {
        println!("  {}", display_label(file));
    }
}

pub async fn cmd_commit(
    config: &EngineConfig,
    message: String,
    file_args: &[String],
) -> Result<()> {
    let requested = parse_files(file_args, config)?;
    let committed = with_session(config, "Committing...", move |s| {
        let drafts = load_drafts(s, requested)?;
        Ok(s.commit_files(drafts, &message, false)?)
    })
    .await?;
    print_committed(&committed);
    Ok(())
}

enum CommitAttempt {
    Committed(Vec<ConfigFile>),
    Conflicts(Vec<ConflictFile>),
}

pub async fn cmd_resolve(
    config: &EngineConfig,
    message: String,
    keep: Option<ResolveStrategy>,
    file_args: &[String],
) -> Result<()> {
    let requested = parse_files(file_args, config)?;
    let attempt_message = message.clone();
    let attempt = with_session(config, "Checking for conflicts...", move |s| {
        let drafts = load_drafts(s, requested)?;
        match s.commit_files(drafts, &attempt_message, false) {
            Ok(committed) => Ok(CommitAttempt::Committed(committed)),
            Err(e) => match e.conflict() {
                Some(report) => Ok(CommitAttempt::Conflicts(report.conflict_files.clone())),
                None => Err(e.into()),
            },
        }
    })
    .await?;

    let conflicts = match attempt {
        CommitAttempt::Committed(committed) => {
            print_committed(&committed);
            return Ok(());
        }
        CommitAttempt::Conflicts(conflicts) => conflicts,
    };

    let count = conflicts.len();
    println!(
        "{}",
        style::warn(&format!("{count} file(s) changed upstream since they were drafted"))
    );
    let mut decided = Vec::with_capacity(conflicts.len());
    for conflict in conflicts {
        let strategy = match keep {
            Some(strategy) => strategy,
            None => prompt_strategy(&conflict)?,
        };
        decided.push(conflict.resolved(strategy));
    }

    let resolved = with_session(config, "Resolving...", move |s| {
        Ok(s.resolve_conflicts(decided, &message)?)
    })
    .await?;
    println!("{}", style::success(&format!("Resolved {} file(s)", resolved.len())));
    for file in &resolved {
        let state = if file.modified { "draft kept" } else { "in sync" };
        println!("  {} {}", display_label(file), style::dim(state));
    }
    Ok(())
}

fn prompt_strategy(conflict: &ConflictFile) -> Result<ResolveStrategy> {
    let file = &conflict.file;
    println!();
    println!("{}", style::header(&display_label(file)));
    println!("{}", style::dim("--- repository  +++ your draft"));
    let patch = preview(file.original_content.as_deref(), file.draft_content.as_deref());
    println!("{}", style::patch(&patch));

    let choices = ["Keep my draft", "Take the repository version"];
    let selection = Select::new()
        .with_prompt("Which side should win?")
        .items(&choices)
        .default(0)
        .interact()
        .context("failed to read selection")?;
    Ok(match selection {
        0 => ResolveStrategy::KeepLocal,
        _ => ResolveStrategy::KeepRemote,
    })
}

pub async fn cmd_delete(config: &EngineConfig, file_arg: &str, yes: bool) -> Result<()> {
    let file = parse_file(file_arg, config)?;
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete {file_arg} from the repository?"))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("{}", style::dim("Cancelled"));
            return Ok(());
        }
    }

    let pulled = with_session(config, "Deleting...", move |s| Ok(s.delete_file(&file)?)).await?;
    println!("{}", style::success(&format!("Deleted {file_arg}")));
    if pulled {
        let note = "  (the branch had new upstream commits; they were fetched first)";
        println!("{}", style::dim(note));
    }
    Ok(())
}
