//! confdraft core library.
//!
//! A draft/commit engine for configuration files kept in a remote git
//! repository. The engine works on git objects directly: it clones without
//! a checkout, reads files from trees, finds merge bases in shallow history,
//! keeps uncommitted edits in an on-disk overlay, and commits through
//! transactions that roll back when the push fails.

pub mod codec;
pub mod config;
pub mod diff;
pub mod errors;
pub mod git;
pub mod history;
pub mod manifest;
pub mod metadata;
pub mod models;
pub mod overlay;
pub mod paths;
pub mod sync;
pub mod transaction;
pub mod workflow;

// Re-exports for convenience.
pub use codec::{ContentCodec, DefaultCodec};
pub use config::EngineConfig;
pub use errors::{EngineError, ErrorStatus};
pub use git::{GitBackend, MemoryRemote};
pub use sync::{access_repo, open_session, RepoSession};
