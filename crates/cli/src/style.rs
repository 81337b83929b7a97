//! Terminal styling helpers.

use console::{style, Style};

pub fn success(msg: &str) -> String {
    format!("{} {}", style("✓").green(), msg)
}

pub fn error(msg: &str) -> String {
    format!("{} {}", style("✗").red(), msg)
}

pub fn warn(msg: &str) -> String {
    format!("{} {}", style("⚠").yellow(), msg)
}

pub fn header(msg: &str) -> String {
    style(msg).bold().to_string()
}

pub fn dim(msg: &str) -> String {
    style(msg).dim().to_string()
}

/// State column for file tables.
pub fn file_state(modified: bool, is_new: bool) -> String {
    match (modified, is_new) {
        (true, true) => style("new draft").green().to_string(),
        (true, false) => style("modified").yellow().to_string(),
        _ => dim("clean"),
    }
}

/// Marker in front of the session's branch.
pub fn current_marker(current: bool) -> String {
    if current {
        style("*").green().bold().to_string()
    } else {
        " ".to_string()
    }
}

/// Colour a unified diff line by line.
pub fn patch(text: &str) -> String {
    let added = Style::new().green();
    let removed = Style::new().red();
    let hunk = Style::new().cyan();
    text.lines()
        .map(|line| {
            if line.starts_with("+++") || line.starts_with("---") {
                style(line).bold().to_string()
            } else if line.starts_with('+') {
                added.apply_to(line).to_string()
            } else if line.starts_with('-') {
                removed.apply_to(line).to_string()
            } else if line.starts_with("@@") {
                hunk.apply_to(line).to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
