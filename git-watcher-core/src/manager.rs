//! # manager: the long-lived coordinator every caller shares
//!
//! ## Responsibilities
//! - Own the validated repository descriptors and the command runner.
//! - Own the lock state: one mutex per target document, one per watched
//!   branch, and the publication lock serialising whole publish sequences.
//! - Orchestrate a branch check: sync, submodules, optional auto-commit.
//!
//! ## Navigation
//! - Synchronisation lives in [`crate::synchronise`], submodules in
//!   [`crate::submodules`], auto-commit in [`crate::autocommit`] and
//!   publication in [`crate::publish`]; each adds an `impl Manager` block.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::command::{run_checked, CommandRunner, Invocation, ProcessRunner};
use crate::config::GitSettings;
use crate::error::{Result, WatcherError};
use crate::locks::{acquire, LockRegistry};
use crate::repository::{RepositoryDescriptor, RepositoryRole};

/// The artifacts repository together with the branch publications merge into.
#[derive(Debug, Clone)]
pub struct ArtifactsTarget {
    pub repository: RepositoryDescriptor,
    pub integration_branch: String,
}

/// Result of checking one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchReport {
    pub branch: String,
    /// The main repository or at least one submodule advanced.
    pub updated: bool,
    pub repository_updated: bool,
    pub submodules_updated: bool,
    /// Submodule changes were committed back to the branch.
    pub committed: bool,
    pub head: String,
}

pub struct Manager {
    settings: GitSettings,
    working_dir: PathBuf,
    main_repo: RepositoryDescriptor,
    artifacts: Option<ArtifactsTarget>,
    runner: Arc<dyn CommandRunner>,
    pub(crate) file_locks: LockRegistry<PathBuf>,
    branch_locks: LockRegistry<String>,
    pub(crate) publish_lock: Mutex<()>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("working_dir", &self.working_dir)
            .field("main_repo", &self.main_repo)
            .field("artifacts", &self.artifacts)
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Validates `settings`, creates the working directory and builds descriptors.
    pub fn new(settings: GitSettings, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        settings.validate()?;

        std::fs::create_dir_all(&settings.working_dir).map_err(|e| {
            WatcherError::io(
                format!("creating working directory {}", settings.working_dir.display()),
                e,
            )
        })?;
        let working_dir = std::fs::canonicalize(&settings.working_dir).map_err(|e| {
            WatcherError::io(
                format!("resolving working directory {}", settings.working_dir.display()),
                e,
            )
        })?;

        let mut main_repo = RepositoryDescriptor::from_config(&settings.main_repo, RepositoryRole::Main)?;
        main_repo.commit = settings.commit_config.merged_with(&main_repo.commit);

        let artifacts = match &settings.artifacts_repo {
            None => None,
            Some(config) => {
                let mut repository =
                    RepositoryDescriptor::from_config(&config.repository, RepositoryRole::Artifacts)?;
                if config.use_main_auth {
                    repository.auth = main_repo.auth.clone();
                }
                repository.commit = if config.use_main_commit {
                    settings.commit_config.clone()
                } else {
                    settings.commit_config.merged_with(&repository.commit)
                };
                Some(ArtifactsTarget {
                    integration_branch: config.integration_branch().to_string(),
                    repository,
                })
            }
        };

        tracing::info!(
            working_dir = %working_dir.display(),
            main_repo = %main_repo.url,
            artifacts_repo = artifacts.as_ref().map(|a| a.repository.url.as_str()).unwrap_or("none"),
            "Repository manager ready"
        );

        Ok(Self {
            settings,
            working_dir,
            main_repo,
            artifacts,
            runner,
            file_locks: LockRegistry::new(),
            branch_locks: LockRegistry::new(),
            publish_lock: Mutex::new(()),
        })
    }

    pub fn with_process_runner(settings: GitSettings) -> Result<Self> {
        Self::new(settings, Arc::new(ProcessRunner))
    }

    pub fn settings(&self) -> &GitSettings {
        &self.settings
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn main_repository(&self) -> &RepositoryDescriptor {
        &self.main_repo
    }

    pub fn artifacts_target(&self) -> Option<&ArtifactsTarget> {
        self.artifacts.as_ref()
    }

    pub fn branches(&self) -> Vec<String> {
        self.settings.watched_branches()
    }

    /// Syncs `branch` of the main repository, reconciles submodules and
    /// commits their changes when configured.
    ///
    /// Calls for the same branch are serialised, and so are calls that share a working copy.
    pub fn check_and_update_branch(&self, branch: &str) -> Result<BranchReport> {
        let handle = self.branch_locks.handle(&branch.to_string());
        let _guard = acquire(&handle);

        let repo = self.main_repo.for_branch(branch);
        // Branches share one working copy, so the checkout itself is exclusive too.
        let copy_handle = self.file_locks.handle(&repo.working_copy(&self.working_dir));
        let _copy_guard = acquire(&copy_handle);
        let sync = self.sync_branch(&repo)?;

        let mut submodules_updated = false;
        if self.settings.use_submodules {
            submodules_updated = if sync.cloned {
                sync.submodules_initialized
            } else if sync.updated {
                self.initialize_submodules(&repo)?
            } else {
                self.ensure_checked_out(&repo)?;
                self.reconcile_submodules(&repo)?
            };
        }

        let mut committed = false;
        if self.settings.auto_commit && submodules_updated {
            committed = self.propagate_submodule_changes(&repo, branch)?;
        }

        let head = if submodules_updated || committed {
            self.last_commit_hash(&repo)?
        } else {
            sync.head
        };
        let report = BranchReport {
            branch: branch.to_string(),
            updated: sync.updated || submodules_updated,
            repository_updated: sync.updated,
            submodules_updated,
            committed,
            head,
        };
        tracing::info!(
            branch,
            updated = report.updated,
            submodules_updated,
            committed,
            head = %report.head,
            "Branch check complete"
        );
        Ok(report)
    }

    /// Checks every watched branch, one at a time. A failing branch does not stop the rest.
    pub fn check_all_branches(&self) -> Vec<(String, Result<BranchReport>)> {
        self.branches()
            .into_iter()
            .map(|branch| {
                let result = self.check_and_update_branch(&branch);
                if let Err(e) = &result {
                    tracing::error!(branch = %branch, error = %e, "Branch check failed");
                }
                (branch, result)
            })
            .collect()
    }

    pub(crate) fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub(crate) fn git(&self, invocation: Invocation) -> Result<String> {
        run_checked(self.runner.as_ref(), &invocation)
    }

    pub(crate) fn head_of(&self, working_copy: &Path) -> Result<String> {
        self.rev_parse(working_copy, "HEAD")
    }

    pub(crate) fn rev_parse(&self, working_copy: &Path, rev: &str) -> Result<String> {
        let invocation = Invocation::git(["rev-parse", rev]).in_dir(working_copy);
        let output = self.git(invocation.clone())?;
        output
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| WatcherError::UnexpectedOutput {
                operation: invocation.label(),
                output,
            })
    }
}
