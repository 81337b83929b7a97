//! Repository and branch commands: access, refresh, checkout, diff, merge.

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use confdraft_core::models::{BranchDiff, CheckoutMode, RefreshOutcome};
use confdraft_core::{access_repo, EngineConfig, EngineError, GitBackend};

use crate::runner::{blocking, display_label, preview, with_session};
use crate::style;

pub async fn cmd_access(config: &EngineConfig) -> Result<()> {
    let config = config.clone();
    let (repo_name, repo_folder, branch) = blocking("Accessing repository...", move || {
        let credentials = config.credentials();
        let session = access_repo(config, &GitBackend, credentials)?;
        let meta = session.metadata();
        Ok((meta.repo_name.clone(), meta.repo_folder.clone(), meta.branch_name.clone()))
    })
    .await?;

    println!("{}", style::success(&format!("Repository '{repo_name}' ready")));
    println!("  folder: {}", style::dim(&repo_folder));
    println!("  branch: {branch}");
    Ok(())
}

pub async fn cmd_refresh(config: &EngineConfig) -> Result<()> {
    let outcome = with_session(config, "Fetching...", |s| match s.refresh() {
        Ok(outcome) => Ok(Ok(outcome)),
        Err(EngineError::CurrentBranchDeleted(branch)) => {
            Ok(Err((branch, s.current_branch().to_string())))
        }
        Err(e) => Err(e.into()),
    })
    .await?;

    match outcome {
        Ok(RefreshOutcome {
            pulled_commit: false,
            ..
        }) => println!("{}", style::dim("Already up to date")),
        Ok(outcome) => {
            if outcome.branch_changed {
                println!("{}", style::success("Current branch updated"));
            }
            if outcome.default_changed {
                println!("{}", style::success("Default branch updated"));
            }
        }
        Err((deleted, now_on)) => println!(
            "{}",
            style::warn(&format!(
                "Branch '{deleted}' was deleted upstream; switched to '{now_on}'"
            ))
        ),
    }
    Ok(())
}

pub async fn cmd_branches(config: &EngineConfig) -> Result<()> {
    let (branches, current) = with_session(config, "Listing branches...", |s| {
        Ok((s.list_branches()?, s.current_branch().to_string()))
    })
    .await?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["", "Branch"]);
    for branch in &branches {
        table.add_row(vec![
            Cell::new(style::current_marker(*branch == current)),
            Cell::new(branch),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn cmd_checkout(config: &EngineConfig, branch: String, create: bool) -> Result<()> {
    let mode = if create {
        CheckoutMode::Create
    } else {
        CheckoutMode::Switch
    };
    let target = branch.clone();
    let message = if create {
        "Creating branch..."
    } else {
        "Switching branch..."
    };
    with_session(config, message, move |s| Ok(s.checkout_branch(mode, &target)?)).await?;

    let verb = if create { "Created and switched to" } else { "Switched to" };
    println!("{}", style::success(&format!("{verb} '{branch}'")));
    Ok(())
}

fn resolve_target(config: &EngineConfig, into: Option<String>) -> String {
    into.unwrap_or_else(|| config.remote.default_branch.clone())
}

fn print_diff(src: &str, target: &str, diff: &BranchDiff) {
    println!("{}", style::header(&format!("{src} → {target}")));
    if diff.to_save.is_empty() && diff.to_delete.is_empty() && diff.conflict_files.is_empty() {
        println!("  {}", style::dim("(nothing to merge)"));
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Change", "File"]);
    for file in &diff.to_save {
        table.add_row(vec![Cell::new("save"), Cell::new(display_label(file))]);
    }
    for file in &diff.to_delete {
        table.add_row(vec![Cell::new("delete"), Cell::new(display_label(file))]);
    }
    for conflict in &diff.conflict_files {
        table.add_row(vec![
            Cell::new(style::warn("conflict")),
            Cell::new(display_label(&conflict.file)),
        ]);
    }
    println!("{table}");

    for conflict in &diff.conflict_files {
        let file = &conflict.file;
        println!();
        println!("{}", style::header(&display_label(file)));
        println!("{}", style::dim(&format!("--- {target}  +++ {src}")));
        let patch = preview(file.original_content.as_deref(), file.draft_content.as_deref());
        println!("{}", style::patch(&patch));
    }
}

pub async fn cmd_diff(config: &EngineConfig, src: String, into: Option<String>) -> Result<()> {
    let target = resolve_target(config, into);
    let (s_name, t_name) = (src.clone(), target.clone());
    let diff = with_session(config, "Comparing branches...", move |s| {
        Ok(s.branch_diff(&s_name, &t_name)?)
    })
    .await?;
    print_diff(&src, &target, &diff);
    Ok(())
}

pub async fn cmd_merge(config: &EngineConfig, src: String, into: Option<String>) -> Result<()> {
    let target = resolve_target(config, into);
    let (s_name, t_name) = (src.clone(), target.clone());
    let commit = with_session(config, "Merging...", move |s| {
        Ok(s.merge_branch(&s_name, &t_name, None)?)
    })
    .await?;
    println!(
        "{}",
        style::success(&format!("Merged '{src}' into '{target}' ({})", commit.short()))
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_target_defaults_to_default_branch() {
        let mut config = EngineConfig::new(
            "https://github.com/acme/conf.git",
            "alice",
            PathBuf::from("/tmp/x"),
        );
        config.remote.default_branch = "main".into();
        assert_eq!(resolve_target(&config, None), "main");
        assert_eq!(resolve_target(&config, Some("release".into())), "release");
    }
}
