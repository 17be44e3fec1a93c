//! Repository descriptors: the validated, immutable view of one repository
//! an operation works against.

use std::path::{Path, PathBuf};

use crate::config::{CommitIdentity, RepositoryConfig};
use crate::credentials::AuthDescriptor;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepositoryRole {
    #[default]
    Main,
    Artifacts,
}

/// Identity is `(url, directory)`; the branch is swapped per operation via [`Self::for_branch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    pub url: String,
    pub branch: String,
    pub directory: String,
    pub auth: AuthDescriptor,
    pub commit: CommitIdentity,
    pub role: RepositoryRole,
}

impl RepositoryDescriptor {
    pub fn from_config(config: &RepositoryConfig, role: RepositoryRole) -> Result<Self> {
        config.require_complete(match role {
            RepositoryRole::Main => "main repository",
            RepositoryRole::Artifacts => "artifacts repository",
        })?;
        Ok(Self {
            url: config.url.clone(),
            branch: config.branch.clone(),
            directory: config.directory.clone(),
            auth: AuthDescriptor::try_from(&config.auth)?,
            commit: config.commit_config.clone(),
            role,
        })
    }

    pub fn for_branch(&self, branch: &str) -> Self {
        Self {
            branch: branch.to_string(),
            ..self.clone()
        }
    }

    pub fn working_copy(&self, working_dir: &Path) -> PathBuf {
        working_dir.join(&self.directory)
    }

    pub fn same_repository(&self, other: &RepositoryDescriptor) -> bool {
        self.url == other.url && self.directory == other.directory
    }
}
