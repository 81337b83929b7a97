//! Derivation of local folder names from a remote URL.
//!
//! Every user gets their own clone, draft overlay and metadata file for each
//! repository. All three are keyed by the same `repo_folder` string, derived
//! deterministically from the username and the clone URL.

/// Repository name and per-user folder for a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFolder {
    /// Repository path on the host, e.g. `acme/app-config`.
    pub repo_name: String,
    /// Folder name shared by the clone, the overlay and the metadata file.
    pub repo_folder: String,
}

/// Derive the repository name from a clone URL.
///
/// Handles the common forms:
/// - `https://host/owner/name.git` → `owner/name`
/// - `https://user@host:8443/owner/name/` → `owner/name`
/// - `git@host:owner/name.git` → `owner/name`
/// - a local path `/srv/git/name.git` → `srv/git/name`
pub fn derive_repo_name(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');

    let path = if let Some((_, rest)) = url.split_once("://") {
        // Drop the authority (user@host:port).
        rest.split_once('/').map(|(_, p)| p).unwrap_or("")
    } else if let Some((_, rest)) = url.split_once(':').filter(|(host, _)| !host.contains('/')) {
        // scp-like syntax.
        rest
    } else {
        url
    };

    let path = path.trim_matches('/');
    path.strip_suffix(".git").unwrap_or(path).to_string()
}

/// Derive the folder name for `username`'s copy of `url`.
///
/// Path separators and anything outside `[A-Za-z0-9._-]` become `-`, so the
/// result is always a single path segment.
pub fn derive_repo_folder(username: &str, url: &str) -> RepoFolder {
    let repo_name = derive_repo_name(url);
    let sanitized: String = repo_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let user: String = username
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect();

    RepoFolder {
        repo_folder: format!("{}@{}", user, sanitized.trim_matches('.')),
        repo_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_url() {
        assert_eq!(
            derive_repo_name("https://github.com/acme/app-config.git"),
            "acme/app-config"
        );
    }

    #[test]
    fn test_https_url_with_credentials_and_port() {
        assert_eq!(
            derive_repo_name("https://bot@git.internal.io:8443/team/conf/"),
            "team/conf"
        );
    }

    #[test]
    fn test_scp_like_url() {
        assert_eq!(derive_repo_name("git@github.com:acme/app-config.git"), "acme/app-config");
    }

    #[test]
    fn test_local_path() {
        assert_eq!(derive_repo_name("/srv/git/conf.git"), "srv/git/conf");
    }

    #[test]
    fn test_repo_folder_is_single_segment() {
        let folder = derive_repo_folder("alice", "https://github.com/acme/app-config.git");
        assert_eq!(folder.repo_name, "acme/app-config");
        assert_eq!(folder.repo_folder, "alice@acme-app-config");
        assert!(!folder.repo_folder.contains('/'));
    }

    #[test]
    fn test_repo_folder_differs_per_user() {
        let a = derive_repo_folder("alice", "https://github.com/acme/app-config.git");
        let b = derive_repo_folder("bob", "https://github.com/acme/app-config.git");
        assert_ne!(a.repo_folder, b.repo_folder);
    }
}
