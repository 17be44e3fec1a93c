//! # publish: record an artifact version and merge it into the integration branch
//!
//! One publication runs at a time per process (the manager's publication
//! lock). Inside it, the target document's own lock is held from read to
//! the end of the sequence.
//!
//! Sequence, for source repository `R`:
//! 1. clone the artifacts repository if absent
//! 2. switch to `feature-R`, tracking the remote branch when it exists
//! 3. set `R.jsonnet[R][package][family] = version` unless already equal
//! 4. stage, commit and force-push the feature branch
//! 5. reset and pull the integration branch, merge the feature branch with
//!    `--strategy-option=theirs`, push
//!
//! A failing step aborts the rest. A failed merge is aborted before the retry
//! and again before the error is returned; nothing else is rolled back, and republishing
//! resumes from whatever state the repository was left in.

use std::path::Path;

use chrono::Utc;

use crate::artifacts::{
    artifact_commit_message, document_file_name, validate_repo_name, version_family,
    ArtifactDocument, DEFAULT_ARTIFACT_MESSAGE,
};
use crate::command::{run_raw, Invocation};
use crate::credentials::provision;
use crate::error::{Result, WatcherError};
use crate::locks::acquire;
use crate::manager::Manager;
use crate::repository::RepositoryDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The family already held exactly this version; nothing was written.
    AlreadyPublished,
    /// The document was rewritten but git saw no change to commit.
    NoChanges,
    Merged {
        feature_branch: String,
        target_branch: String,
    },
}

pub fn feature_branch_name(repo_name: &str) -> String {
    format!("feature-{repo_name}")
}

impl Manager {
    pub fn publish(&self, repo_name: &str, package: &str, version: &str) -> Result<PublishOutcome> {
        validate_repo_name(repo_name)?;
        if package.trim().is_empty() || version.trim().is_empty() {
            return Err(WatcherError::InvalidArtifact(
                "package and version must not be empty".to_string(),
            ));
        }
        let target = self
            .artifacts_target()
            .ok_or(WatcherError::ArtifactsNotConfigured)?;
        let repo = &target.repository;

        let _publication = acquire(&self.publish_lock);
        tracing::info!(repo = repo_name, package, version, "Publishing artifact version");

        let path = repo.working_copy(self.working_dir());
        if !path.exists() {
            self.clone_repository(repo, &path)?;
        }

        let feature_branch = feature_branch_name(repo_name);
        self.switch_to_feature_branch(repo, &feature_branch)?;

        let file_name = document_file_name(repo_name);
        let document_path = path.join(&file_name);
        let file_lock = self.file_locks.handle(&document_path);
        let _document = acquire(&file_lock);

        let mut document = ArtifactDocument::load(&document_path)?;
        if !document.record(repo_name, package, version) {
            tracing::info!(
                repo = repo_name,
                package,
                version,
                family = version_family(version),
                "Version already published"
            );
            return Ok(PublishOutcome::AlreadyPublished);
        }
        document.write_atomic(&document_path)?;

        self.git(Invocation::git(["add", "--", file_name.as_str()]).in_dir(&path))?;
        let status = self.git(
            Invocation::git(["status", "--porcelain", "--", file_name.as_str()]).in_dir(&path),
        )?;
        if status.trim().is_empty() {
            tracing::info!(repo = repo_name, file = %file_name, "Artifact document unchanged, nothing to commit");
            return Ok(PublishOutcome::NoChanges);
        }

        self.apply_identity(&path, &repo.commit)?;
        let message = artifact_commit_message(
            repo.commit.message_or(DEFAULT_ARTIFACT_MESSAGE),
            Utc::now(),
            repo_name,
            package,
            version,
        );
        self.git(Invocation::git(["commit", "-m", message.as_str()]).in_dir(&path))?;
        self.remote_git(repo, &["push", "-f", "origin", feature_branch.as_str()])?;

        let target_branch = target.integration_branch.as_str();
        self.git(Invocation::git(["checkout", target_branch]).in_dir(&path))?;
        self.git(Invocation::git(["reset", "--hard", "HEAD"]).in_dir(&path))?;
        self.remote_git(repo, &["pull", "origin", target_branch])?;

        let merge = Invocation::git([
            "merge",
            "--no-ff",
            "--no-edit",
            "--strategy-option=theirs",
            feature_branch.as_str(),
        ])
        .in_dir(&path);
        if let Err(first) = self.git(merge.clone()) {
            tracing::warn!(
                feature_branch = %feature_branch,
                target_branch,
                error = %first,
                "Merge failed, retrying once"
            );
            self.abort_merge(&path);
            if let Err(retry) = self.git(merge) {
                self.abort_merge(&path);
                return Err(WatcherError::MergeFailed {
                    feature_branch,
                    target_branch: target_branch.to_string(),
                    first: failure_output(first),
                    retry: failure_output(retry),
                });
            }
        }
        self.remote_git(repo, &["push", "origin", target_branch])?;

        tracing::info!(
            repo = repo_name,
            package,
            version,
            feature_branch = %feature_branch,
            target_branch,
            "Artifact version merged"
        );
        Ok(PublishOutcome::Merged {
            feature_branch,
            target_branch: target_branch.to_string(),
        })
    }

    fn switch_to_feature_branch(&self, repo: &RepositoryDescriptor, feature_branch: &str) -> Result<()> {
        let path = repo.working_copy(self.working_dir());
        let heads = self.remote_git(repo, &["ls-remote", "--heads", "origin", feature_branch])?;

        if heads.trim().is_empty() {
            tracing::debug!(feature_branch, "Creating feature branch from current HEAD");
            self.git(Invocation::git(["checkout", "-B", feature_branch]).in_dir(&path))?;
            return Ok(());
        }

        if let Err(e) = self.git(Invocation::git(["checkout", feature_branch]).in_dir(&path)) {
            tracing::debug!(feature_branch, error = %e, "No local feature branch, tracking remote");
            self.remote_git(repo, &["fetch", "origin", feature_branch])?;
            let upstream = format!("origin/{feature_branch}");
            self.git(
                Invocation::git(["checkout", "-b", feature_branch, upstream.as_str()]).in_dir(&path),
            )?;
        }
        Ok(())
    }

    /// Leaves the working copy without a half-finished merge. Failure means none was in progress.
    fn abort_merge(&self, path: &Path) {
        let abort = Invocation::git(["merge", "--abort"]).in_dir(path);
        match run_raw(self.runner(), &abort) {
            Ok(output) if !output.success => {
                tracing::debug!(output = %output.combined.trim(), "No merge to abort");
            }
            Ok(_) => tracing::info!(path = %path.display(), "Aborted failed merge"),
            Err(e) => tracing::warn!(error = %e, "Could not run merge --abort"),
        }
    }

    /// Runs a remote-touching git command in the repository with its credentials.
    fn remote_git(&self, repo: &RepositoryDescriptor, args: &[&str]) -> Result<String> {
        let overlay = provision(&repo.auth);
        self.git(
            Invocation::git(args.iter().copied())
                .in_dir(repo.working_copy(self.working_dir()))
                .with_overlay(&overlay),
        )
    }
}

fn failure_output(error: WatcherError) -> String {
    match error {
        WatcherError::CommandFailed { output, .. } => output,
        other => other.to_string(),
    }
}
