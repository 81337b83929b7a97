//! Ref name helpers.

pub const REMOTE_NAME: &str = "origin";
pub const HEAD: &str = "HEAD";

const HEADS_PREFIX: &str = "refs/heads/";
const REMOTES_PREFIX: &str = "refs/remotes/origin/";

/// `refs/heads/<branch>`
pub fn local_ref(branch: &str) -> String {
    format!("{HEADS_PREFIX}{branch}")
}

/// `refs/remotes/origin/<branch>`
pub fn remote_ref(branch: &str) -> String {
    format!("{REMOTES_PREFIX}{branch}")
}

/// Short branch name of a `refs/heads/*` ref.
pub fn branch_of_local(name: &str) -> Option<&str> {
    name.strip_prefix(HEADS_PREFIX)
}

/// Short branch name of a `refs/remotes/origin/*` ref.
pub fn branch_of_remote(name: &str) -> Option<&str> {
    name.strip_prefix(REMOTES_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_names() {
        assert_eq!(local_ref("feature/x"), "refs/heads/feature/x");
        assert_eq!(remote_ref("master"), "refs/remotes/origin/master");
        assert_eq!(branch_of_local("refs/heads/feature/x"), Some("feature/x"));
        assert_eq!(branch_of_remote("refs/remotes/origin/HEAD"), Some("HEAD"));
        assert_eq!(branch_of_remote("refs/heads/master"), None);
    }
}
