//! Auto-commit of submodule pointer changes back to the main repository.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::command::Invocation;
use crate::config::CommitIdentity;
use crate::credentials::provision;
use crate::error::Result;
use crate::manager::Manager;
use crate::repository::RepositoryDescriptor;
use crate::submodules::read_submodules;

pub const DEFAULT_SUBMODULE_MESSAGE: &str = "Update submodules [Git Watcher Auto-Commit]";

/// Commit message for a submodule bump: template, branch, timestamp, then one
/// `name: revision` line per submodule.
pub fn submodule_commit_message(
    template: &str,
    branch: &str,
    timestamp: DateTime<Utc>,
    revisions: &[(String, String)],
) -> String {
    let lines: Vec<String> = revisions
        .iter()
        .map(|(name, rev)| format!("{name}: {rev}"))
        .collect();
    format!(
        "{template}\n\nBranch: {branch}\nTimestamp: {}\n\nUpdated submodules:\n{}",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        lines.join("\n")
    )
}

impl Manager {
    /// Writes `user.name` / `user.email` into the working copy config when set.
    pub(crate) fn apply_identity(&self, working_copy: &std::path::Path, identity: &CommitIdentity) -> Result<()> {
        if !identity.user_name.is_empty() {
            self.git(
                Invocation::git(["config", "user.name", identity.user_name.as_str()])
                    .in_dir(working_copy),
            )?;
        }
        if !identity.user_email.is_empty() {
            self.git(
                Invocation::git(["config", "user.email", identity.user_email.as_str()])
                    .in_dir(working_copy),
            )?;
        }
        Ok(())
    }

    /// Commits changed submodule pointers on `branch` and pushes when the
    /// repository has credentials. Returns whether a commit was made.
    ///
    /// A failure part-way leaves the index as-is for inspection.
    pub fn propagate_submodule_changes(&self, repo: &RepositoryDescriptor, branch: &str) -> Result<bool> {
        let path = repo.working_copy(self.working_dir());
        self.apply_identity(&path, &repo.commit)?;

        let status = self.git(Invocation::git(["status", "--porcelain"]).in_dir(&path))?;
        if status.trim().is_empty() {
            tracing::info!(branch, "No submodule changes to commit");
            return Ok(false);
        }
        tracing::info!(branch, changes = %status.trim_end(), "Committing submodule changes");

        let names = read_submodules(&path)?.unwrap_or_default();
        self.git(Invocation::git(["add", "--all"]).in_dir(&path))?;

        let mut revisions = Vec::with_capacity(names.len());
        for name in names {
            match self.head_of(&path.join(&name)) {
                Ok(rev) => revisions.push((name, rev)),
                Err(e) => tracing::warn!(branch, submodule = %name, error = %e, "Could not resolve submodule revision"),
            }
        }
        let message = submodule_commit_message(
            repo.commit.message_or(DEFAULT_SUBMODULE_MESSAGE),
            branch,
            Utc::now(),
            &revisions,
        );
        self.git(Invocation::git(["commit", "-m", message.as_str()]).in_dir(&path))?;

        if repo.auth.is_none() {
            tracing::info!(branch, "Committed submodule changes locally, no credentials to push with");
            return Ok(true);
        }
        let overlay = provision(&repo.auth);
        self.git(
            Invocation::git(["push", "origin", branch])
                .in_dir(&path)
                .with_overlay(&overlay),
        )?;
        tracing::info!(branch, "Pushed submodule changes");
        Ok(true)
    }
}
