//! TOML-based configuration for confdraft.
//!
//! Secrets are never written into the file: the remote password is given as
//! the name of an environment variable (`password_env`) and resolved at
//! runtime via [`EngineConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::git::{Credentials, Signature};

/// Schema version of the persisted repository metadata. A metadata file
/// carrying any other version forces a fresh clone.
pub const METADATA_VERSION: &str = "1";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Local storage and logging.
    #[serde(default)]
    pub engine: EngineSection,

    /// The remote repository holding the configuration files.
    pub remote: RemoteConfig,

    /// Repository layout conventions.
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Commit author; defaults to the remote username.
    #[serde(default)]
    pub author: Option<AuthorConfig>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Root for local clones, draft overlays and metadata files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/confdraft")
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl EngineSection {
    /// Parent directory of the local clones.
    pub fn repos_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }

    /// Parent directory of the per-repository draft overlays.
    pub fn drafts_dir(&self) -> PathBuf {
        self.data_dir.join("drafts")
    }

    /// Directory holding one metadata JSON file per repository folder.
    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir.join("metadata")
    }
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Clone URL of the repository.
    pub url: String,

    /// Username presented to the remote.
    pub username: String,

    /// Name of the environment variable holding the password or token.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Branch cloned first and used as the base of new branches.
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// History depth of the initial clone; 0 clones the full history.
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,

    /// Branches hidden from listings.
    #[serde(default)]
    pub locked_branches: Vec<String>,

    /// Resolved password (populated at runtime, not serialized).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_branch() -> String {
    "master".into()
}
fn default_clone_depth() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Top-level folder holding one sub-folder per application.
    #[serde(default = "default_apps_folder")]
    pub apps_folder: String,

    /// Per-folder settings file name (JSON).
    #[serde(default = "default_settings_file")]
    pub settings_file: String,
}

fn default_apps_folder() -> String {
    "apps".into()
}
fn default_settings_file() -> String {
    ".confrc".into()
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            apps_folder: default_apps_folder(),
            settings_file: default_settings_file(),
        }
    }
}

// ---------------------------------------------------------------------------
// Author
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorConfig {
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl EngineConfig {
    /// Build a configuration in code, with every optional section defaulted.
    pub fn new(url: impl Into<String>, username: impl Into<String>, data_dir: PathBuf) -> Self {
        Self {
            engine: EngineSection {
                data_dir,
                ..EngineSection::default()
            },
            remote: RemoteConfig {
                url: url.into(),
                username: username.into(),
                password_env: None,
                default_branch: default_branch(),
                clone_depth: default_clone_depth(),
                locked_branches: Vec::new(),
                password: None,
            },
            layout: LayoutConfig::default(),
            author: None,
        }
    }

    /// Load an [`EngineConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the `*_env` fields from environment variables.
    ///
    /// A referenced variable that is unset is an error: a configured
    /// `password_env` means the remote requires it.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.remote.password_env {
            self.remote.password = resolve_optional_env(env_name, "remote.password_env");
            if self.remote.password.is_none() {
                return Err(ConfigError::EnvVarMissing {
                    var: env_name.clone(),
                    field: "remote.password_env".into(),
                });
            }
        }
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "remote.url".into(),
                detail: "remote URL must not be empty".into(),
            });
        }
        if self.remote.username.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "remote.username".into(),
                detail: "remote username must not be empty".into(),
            });
        }
        if self.remote.default_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "remote.default_branch".into(),
                detail: "default branch must not be empty".into(),
            });
        }
        if self
            .remote
            .locked_branches
            .iter()
            .any(|b| b == &self.remote.default_branch)
        {
            return Err(ConfigError::InvalidValue {
                field: "remote.locked_branches".into(),
                detail: "the default branch cannot be locked".into(),
            });
        }
        if self.layout.apps_folder.is_empty() || self.layout.apps_folder.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "layout.apps_folder".into(),
                detail: "apps folder must be a single, non-empty path segment".into(),
            });
        }
        if self.layout.settings_file.is_empty() || self.layout.settings_file.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "layout.settings_file".into(),
                detail: "settings file must be a plain file name".into(),
            });
        }
        if let Some(ref author) = self.author {
            if author.name.trim().is_empty() || !author.email.contains('@') {
                return Err(ConfigError::InvalidValue {
                    field: "author".into(),
                    detail: "author needs a name and an email address".into(),
                });
            }
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Credentials presented to the remote on clone, fetch and push.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.remote.username.clone(),
            password: self.remote.password.clone(),
        }
    }

    /// Commit author, stamped with the current time.
    pub fn author(&self) -> Signature {
        match self.author {
            Some(ref a) => Signature::now(&a.name, &a.email),
            None => Signature::now(&self.remote.username, &self.remote.username),
        }
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[engine]
log_level = "debug"
data_dir = "/tmp/confdraft"

[remote]
url = "https://github.com/acme/app-config.git"
username = "alice"
password_env = "CONFDRAFT_TEST_PASSWORD"
default_branch = "main"
clone_depth = 5
locked_branches = ["release"]

[layout]
apps_folder = "applications"
settings_file = ".settings"

[author]
name = "Alice"
email = "alice@example.com"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: EngineConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.engine.log_level, "debug");
        assert_eq!(config.remote.default_branch, "main");
        assert_eq!(config.remote.clone_depth, 5);
        assert_eq!(config.remote.locked_branches, vec!["release"]);
        assert_eq!(config.layout.apps_folder, "applications");
        assert_eq!(config.author.as_ref().map(|a| a.name.as_str()), Some("Alice"));
        assert_eq!(
            config.engine.drafts_dir(),
            PathBuf::from("/tmp/confdraft/drafts")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = EngineConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.remote.username, "alice");
    }

    #[test]
    fn test_file_not_found() {
        let result = EngineConfig::load_from_file("/nonexistent/confdraft.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let mut config: EngineConfig = toml::from_str(sample_toml()).unwrap();
        config.remote.url = String::new();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "remote.url"
        ));
    }

    #[test]
    fn test_validate_rejects_locked_default_branch() {
        let mut config: EngineConfig = toml::from_str(sample_toml()).unwrap();
        config.remote.locked_branches.push("main".into());
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "remote.locked_branches"
        ));
    }

    #[test]
    fn test_validate_rejects_nested_apps_folder() {
        let mut config: EngineConfig = toml::from_str(sample_toml()).unwrap();
        config.layout.apps_folder = "a/b".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("CONFDRAFT_TEST_PASSWORD", "s3cret");

        let mut config: EngineConfig = toml::from_str(sample_toml()).unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.remote.password.as_deref(), Some("s3cret"));
        assert_eq!(config.credentials().password.as_deref(), Some("s3cret"));

        std::env::remove_var("CONFDRAFT_TEST_PASSWORD");
    }

    #[test]
    fn test_missing_password_var_is_an_error() {
        let toml_str = r#"
[remote]
url = "https://github.com/acme/app-config.git"
username = "bob"
password_env = "CONFDRAFT_TEST_UNSET_VAR"
"#;
        let mut config: EngineConfig = toml::from_str(toml_str).unwrap();
        let result = config.resolve_env_vars();
        assert!(matches!(result, Err(ConfigError::EnvVarMissing { .. })));
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[remote]
url = "https://github.com/acme/app-config.git"
username = "bob"
"#;
        let config: EngineConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.engine.log_level, "info");
        assert_eq!(config.engine.data_dir, PathBuf::from("/var/lib/confdraft"));
        assert_eq!(config.remote.default_branch, "master");
        assert_eq!(config.remote.clone_depth, 1);
        assert_eq!(config.layout.apps_folder, "apps");
        assert_eq!(config.layout.settings_file, ".confrc");
        assert!(config.author.is_none());
        assert_eq!(config.author().name, "bob");
        assert!(config.validate().is_ok());
    }
}
