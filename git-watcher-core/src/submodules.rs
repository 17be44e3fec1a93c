//! Submodule coordination for the main working copy.
//!
//! Submodule names are re-read from `.gitmodules` on every pass. A failing
//! submodule is logged and skipped so the others still advance.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::command::Invocation;
use crate::credentials::{provision, CredentialOverlay};
use crate::error::{Result, WatcherError};
use crate::manager::Manager;
use crate::repository::RepositoryDescriptor;

pub const GITMODULES: &str = ".gitmodules";

fn submodule_header() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\[submodule "([^"]+)"\]"#)
            .expect("submodule header pattern should compile")
    })
}

/// Declared submodule names, in file order.
pub fn list_submodules(gitmodules: &str) -> Vec<String> {
    submodule_header()
        .captures_iter(gitmodules)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Reads declared submodule names; `None` when the working copy has no `.gitmodules`.
pub fn read_submodules(working_copy: &Path) -> Result<Option<Vec<String>>> {
    let path = working_copy.join(GITMODULES);
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| WatcherError::io(format!("reading {}", path.display()), e))?;
    Ok(Some(list_submodules(&content)))
}

fn ssh_overlay(repo: &RepositoryDescriptor) -> CredentialOverlay {
    if repo.auth.is_ssh() {
        provision(&repo.auth)
    } else {
        CredentialOverlay::empty()
    }
}

impl Manager {
    /// Updates every declared submodule to its remote tip. Returns whether any advanced.
    pub fn reconcile_submodules(&self, repo: &RepositoryDescriptor) -> Result<bool> {
        let path = repo.working_copy(self.working_dir());
        let names = match read_submodules(&path)? {
            Some(names) if !names.is_empty() => names,
            _ => return Ok(false),
        };

        let status = self.git(Invocation::git(["submodule", "status"]).in_dir(&path))?;
        tracing::debug!(branch = %repo.branch, status = %status.trim_end(), "Submodule status before update");

        let mut any_updated = false;
        for name in &names {
            match self.update_submodule(repo, &path, name) {
                Ok(Some(head)) => {
                    tracing::info!(branch = %repo.branch, submodule = %name, head = %head, "Submodule advanced");
                    any_updated = true;
                }
                Ok(None) => {
                    tracing::debug!(branch = %repo.branch, submodule = %name, "Submodule already at remote tip");
                }
                Err(e) => {
                    tracing::warn!(branch = %repo.branch, submodule = %name, error = %e, "Submodule update failed, skipping");
                }
            }
        }

        match self.git(Invocation::git(["status"]).in_dir(&path)) {
            Ok(status) => {
                tracing::debug!(branch = %repo.branch, status = %status.trim_end(), "Working copy status after submodule updates")
            }
            Err(e) => tracing::warn!(branch = %repo.branch, error = %e, "Could not capture working copy status"),
        }
        Ok(any_updated)
    }

    /// Initialises and updates all submodules. Returns `false` when none are declared.
    pub fn initialize_submodules(&self, repo: &RepositoryDescriptor) -> Result<bool> {
        let path = repo.working_copy(self.working_dir());
        let names = match read_submodules(&path)? {
            Some(names) => names,
            None => return Ok(false),
        };

        self.git(Invocation::git(["submodule", "init"]).in_dir(&path))?;
        let overlay = ssh_overlay(repo);
        self.git(
            Invocation::git(["submodule", "update", "--recursive", "--remote"])
                .in_dir(&path)
                .with_overlay(&overlay),
        )?;
        tracing::info!(branch = %repo.branch, count = names.len(), submodules = ?names, "Initialised submodules");
        Ok(true)
    }

    /// Returns the new head when the submodule moved.
    fn update_submodule(
        &self,
        repo: &RepositoryDescriptor,
        working_copy: &Path,
        name: &str,
    ) -> Result<Option<String>> {
        let submodule_dir = working_copy.join(name);
        let before = if submodule_dir.join(".git").exists() {
            self.head_of(&submodule_dir).ok()
        } else {
            None
        };

        let overlay = ssh_overlay(repo);
        self.git(
            Invocation::git(["submodule", "update", "--init", "--recursive", "--remote", name])
                .in_dir(working_copy)
                .with_overlay(&overlay),
        )?;
        drop(overlay);

        let after = self.head_of(&submodule_dir)?;
        if before.as_deref() == Some(after.as_str()) {
            Ok(None)
        } else {
            Ok(Some(after))
        }
    }
}
