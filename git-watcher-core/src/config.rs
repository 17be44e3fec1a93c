//! Configuration shapes consumed by the engine.
//!
//! These are plain serde types with camelCase keys; the binary crate loads
//! them from YAML/JSON and applies its environment overlay. Descriptors are
//! built from them once, when the [`crate::manager::Manager`] is constructed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::credentials::{AuthConfig, AuthDescriptor};
use crate::error::{Result, WatcherError};

/// Author identity and message template for commits the engine creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommitIdentity {
    pub user_name: String,
    pub user_email: String,
    pub message: String,
}

impl CommitIdentity {
    /// Field-by-field merge where non-empty fields of `overrides` win.
    pub fn merged_with(&self, overrides: &CommitIdentity) -> CommitIdentity {
        fn pick(base: &str, over: &str) -> String {
            let chosen = if over.is_empty() { base } else { over };
            chosen.to_string()
        }
        CommitIdentity {
            user_name: pick(&self.user_name, &overrides.user_name),
            user_email: pick(&self.user_email, &overrides.user_email),
            message: pick(&self.message, &overrides.message),
        }
    }

    pub fn message_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.message.is_empty() {
            default
        } else {
            &self.message
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepositoryConfig {
    pub url: String,
    pub branch: String,
    pub directory: String,
    pub auth: AuthConfig,
    pub commit_config: CommitIdentity,
}

impl RepositoryConfig {
    pub(crate) fn require_complete(&self, what: &str) -> Result<()> {
        for (field, value) in [
            ("url", &self.url),
            ("branch", &self.branch),
            ("directory", &self.directory),
        ] {
            if value.trim().is_empty() {
                return Err(WatcherError::InvalidConfig(format!(
                    "{what} {field} is required"
                )));
            }
        }
        AuthDescriptor::try_from(&self.auth)
            .map_err(|e| WatcherError::InvalidConfig(format!("{what} auth: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtifactsRepoConfig {
    #[serde(flatten)]
    pub repository: RepositoryConfig,
    pub use_main_auth: bool,
    pub use_main_commit: bool,
    /// Integration branch feature branches merge into; the repository branch when empty.
    pub auto_branch_name: String,
}

impl ArtifactsRepoConfig {
    pub fn integration_branch(&self) -> &str {
        if self.auto_branch_name.is_empty() {
            &self.repository.branch
        } else {
            &self.auto_branch_name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GitSettings {
    pub working_dir: PathBuf,
    pub use_submodules: bool,
    pub branches: Vec<String>,
    pub auto_commit: bool,
    pub commit_config: CommitIdentity,
    pub main_repo: RepositoryConfig,
    pub artifacts_repo: Option<ArtifactsRepoConfig>,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("./repos"),
            use_submodules: false,
            branches: Vec::new(),
            auto_commit: false,
            commit_config: CommitIdentity::default(),
            main_repo: RepositoryConfig::default(),
            artifacts_repo: None,
        }
    }
}

impl GitSettings {
    /// Branches to watch: the configured list, or the main repository branch.
    pub fn watched_branches(&self) -> Vec<String> {
        if self.branches.is_empty() {
            vec![self.main_repo.branch.clone()]
        } else {
            self.branches.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.main_repo.require_complete("main repository")?;
        if let Some(artifacts) = &self.artifacts_repo {
            artifacts
                .repository
                .require_complete("artifacts repository")?;
        }
        if self.watched_branches().iter().any(|b| b.trim().is_empty()) {
            return Err(WatcherError::InvalidConfig(
                "branch names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
