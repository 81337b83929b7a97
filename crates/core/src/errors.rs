//! Error types for the confdraft core library.
//!
//! The object-store adapter and the configuration loader each have their own
//! error type derived with `thiserror`. [`EngineError`] is what every
//! workflow operation returns; it carries the status classification callers
//! use to decide how to react (redirect, prompt for resolution, re-login).

use std::fmt;

use thiserror::Error;

use crate::models::ConflictReport;

// ---------------------------------------------------------------------------
// Object store errors
// ---------------------------------------------------------------------------

/// Errors from an [`ObjectStore`](crate::git::ObjectStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object is not held locally (expected beyond a shallow boundary).
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// The path does not exist in the commit's tree.
    #[error("path '{path}' not found in commit {commit}")]
    PathNotFound { commit: String, path: String },

    /// A ref could not be resolved, locally or on the remote.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// The object exists but is of another kind than requested.
    #[error("object {oid} is not a {expected}")]
    UnexpectedKind { oid: String, expected: &'static str },

    /// The remote rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The credentials were accepted but lack permission.
    #[error("access denied: {0}")]
    Forbidden(String),

    /// Connectivity / transport problem.
    #[error("network error: {0}")]
    Network(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// The local repository has no remote to talk to.
    #[error("no remote configured for repository")]
    NoRemote,

    /// An object could not be encoded or decoded.
    #[error("object codec error: {0}")]
    Codec(String),

    /// A `git2` library error that has no more specific category.
    #[error("git2 error: {0}")]
    Git(#[source] git2::Error),

    /// Generic I/O wrapper.
    #[error("object store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this error means "not held locally" for an object read.
    pub fn is_missing_object(&self) -> bool {
        matches!(self, Self::ObjectNotFound(_))
    }

    /// Whether this error means the path is absent from the tree.
    pub fn is_missing_path(&self) -> bool {
        matches!(self, Self::PathNotFound { .. })
    }
}

impl From<git2::Error> for StoreError {
    fn from(err: git2::Error) -> Self {
        use git2::{ErrorClass, ErrorCode};

        let message = err.message().to_string();
        if message.contains("couldn't find remote ref") {
            return Self::RefNotFound(message);
        }
        match (err.code(), err.class()) {
            (ErrorCode::Auth, _) => Self::Auth(message),
            (ErrorCode::Certificate, _) => Self::Network(message),
            (ErrorCode::NotFastForward, _) => Self::PushRejected {
                branch: String::new(),
                detail: message,
            },
            (_, ErrorClass::Http) if message.contains("403") => Self::Forbidden(message),
            (_, ErrorClass::Http) if message.contains("401") => Self::Auth(message),
            (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl | ErrorClass::Ssh) => {
                Self::Network(message)
            }
            (ErrorCode::NotFound | ErrorCode::UnbornBranch, ErrorClass::Reference) => {
                Self::RefNotFound(message)
            }
            (ErrorCode::NotFound, _) => Self::ObjectNotFound(message),
            _ => Self::Git(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error(
        "required environment variable '{var}' is not set (referenced by config field '{field}')"
    )]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Status classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    NotFound,
    Conflict,
    Unauthorized,
    Forbidden,
    /// The session's branch no longer exists upstream; redirect to the
    /// default branch.
    BranchDeleted,
    BadRequest,
    Internal,
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::BranchDeleted => write!(f, "branch_deleted"),
            Self::BadRequest => write!(f, "bad_request"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Error returned by every workflow operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A file, branch, or repository does not exist.
    #[error("{0} does not exist")]
    NotFound(String),

    /// Optimistic-concurrency violation or branch-merge conflict.
    #[error("{}", conflict_message(.0))]
    Conflict(Box<ConflictReport>),

    /// The remote rejected the credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The remote refused the operation for these credentials.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The session's current branch was deleted in the remote repository.
    #[error("branch '{0}' has been deleted in the remote repository")]
    CurrentBranchDeleted(String),

    /// A branch with this name already exists upstream.
    #[error("branch '{0}' already exists")]
    BranchExists(String),

    /// A conflict was submitted without a resolve strategy.
    #[error("conflict on '{0}' has no resolve strategy")]
    UnresolvedConflict(String),

    /// The mutation or its push failed; the local branch was rolled back.
    #[error("transaction on branch '{branch}' rolled back: {source}")]
    TransactionFailed {
        branch: String,
        #[source]
        source: Box<EngineError>,
    },

    /// The persisted repository metadata could not be read or written.
    #[error("repository metadata error at '{path}': {detail}")]
    Metadata { path: String, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Translate a network-facing store error into the engine taxonomy.
    ///
    /// Used at the sync boundary (clone, fetch, push, remote listing).
    pub fn from_remote(err: StoreError) -> Self {
        match err {
            StoreError::Auth(detail) => Self::Unauthorized(detail),
            StoreError::Forbidden(detail) => Self::Forbidden(detail),
            other => Self::Store(other),
        }
    }

    /// Status classification for callers.
    pub fn status(&self) -> ErrorStatus {
        match self {
            Self::NotFound(_) => ErrorStatus::NotFound,
            Self::Conflict(_) => ErrorStatus::Conflict,
            Self::Unauthorized(_) => ErrorStatus::Unauthorized,
            Self::Forbidden(_) => ErrorStatus::Forbidden,
            Self::CurrentBranchDeleted(_) => ErrorStatus::BranchDeleted,
            Self::BranchExists(_) | Self::UnresolvedConflict(_) => ErrorStatus::BadRequest,
            Self::TransactionFailed { source, .. } => source.status(),
            Self::Store(StoreError::Auth(_)) => ErrorStatus::Unauthorized,
            Self::Store(StoreError::Forbidden(_)) => ErrorStatus::Forbidden,
            Self::Store(StoreError::PushRejected { .. }) => ErrorStatus::Conflict,
            Self::Metadata { .. } | Self::Store(_) | Self::Config(_) | Self::Io(_) => {
                ErrorStatus::Internal
            }
        }
    }

    /// The conflict payload, if this is (or wraps) a conflict.
    pub fn conflict(&self) -> Option<&ConflictReport> {
        match self {
            Self::Conflict(report) => Some(report),
            Self::TransactionFailed { source, .. } => source.conflict(),
            _ => None,
        }
    }
}

fn conflict_message(report: &ConflictReport) -> String {
    let names = report
        .conflict_files
        .iter()
        .map(|c| format!("• {}/{}", c.file.application_name, c.file.file_name))
        .collect::<Vec<_>>()
        .join("\n");
    match (&report.src_branch, &report.target_branch) {
        (Some(src), Some(target)) => format!(
            "merging '{}' into '{}' conflicts on the following file(s):\n{}",
            src, target, names
        ),
        _ => format!(
            "the following file(s) are already changed in the repository:\n{}",
            names
        ),
    }
}
