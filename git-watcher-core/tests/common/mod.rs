#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Once;

use git_watcher_core::config::{ArtifactsRepoConfig, GitSettings, RepositoryConfig};

static GIT_ENV: Once = Once::new();

/// Commits need an identity and local submodule URLs need the file protocol.
pub fn init_git_env() {
    GIT_ENV.call_once(|| {
        std::env::set_var("GIT_AUTHOR_NAME", "Fixture");
        std::env::set_var("GIT_AUTHOR_EMAIL", "fixture@example.com");
        std::env::set_var("GIT_COMMITTER_NAME", "Fixture");
        std::env::set_var("GIT_COMMITTER_EMAIL", "fixture@example.com");
        std::env::set_var("GIT_CONFIG_COUNT", "2");
        std::env::set_var("GIT_CONFIG_KEY_0", "protocol.file.allow");
        std::env::set_var("GIT_CONFIG_VALUE_0", "always");
        std::env::set_var("GIT_CONFIG_KEY_1", "pull.rebase");
        std::env::set_var("GIT_CONFIG_VALUE_1", "false");
    });
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should be installed");
    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}{}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn bare_remote(root: &Path, name: &str) -> PathBuf {
    let remote = root.join(format!("{name}.git"));
    std::fs::create_dir_all(&remote).unwrap();
    git(&remote, &["init", "--bare", "--initial-branch=main"]);
    remote
}

/// Creates a bare remote whose `main` holds `files`.
pub fn seeded_remote(root: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let remote = bare_remote(root, name);
    let seed = root.join(format!("{name}-seed"));
    std::fs::create_dir_all(&seed).unwrap();
    git(&seed, &["init", "-b", "main"]);
    for (file, content) in files {
        write_file(&seed.join(file), content);
    }
    git(&seed, &["add", "--all"]);
    git(&seed, &["commit", "-m", "initial"]);
    git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
    git(&seed, &["push", "origin", "main"]);
    remote
}

/// Pushes one commit touching `file` to `branch` of `remote` and returns the new head.
pub fn push_commit(remote: &Path, branch: &str, file: &str, content: &str) -> String {
    let scratch = tempfile::tempdir().unwrap();
    let clone = scratch.path().join("clone");
    git(
        scratch.path(),
        &["clone", remote.to_str().unwrap(), clone.to_str().unwrap()],
    );
    let remote_branch = format!("origin/{branch}");
    let exists = Command::new("git")
        .args(["rev-parse", "--verify", "--quiet", remote_branch.as_str()])
        .current_dir(&clone)
        .status()
        .unwrap()
        .success();
    if exists {
        git(&clone, &["checkout", "-B", branch, remote_branch.as_str()]);
    } else {
        git(&clone, &["checkout", "-b", branch]);
    }
    write_file(&clone.join(file), content);
    git(&clone, &["add", "--all"]);
    git(&clone, &["commit", "-m", &format!("update {file}")]);
    git(&clone, &["push", "origin", branch]);
    git(&clone, &["rev-parse", "HEAD"])
}

pub fn remote_head(remote: &Path, branch: &str) -> String {
    git(remote, &["rev-parse", branch])
}

pub fn remote_file(remote: &Path, branch: &str, file: &str) -> String {
    git(remote, &["show", &format!("{branch}:{file}")])
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn settings(work: &Path, main_remote: &Path, branches: &[&str]) -> GitSettings {
    GitSettings {
        working_dir: work.to_path_buf(),
        branches: branches.iter().map(|b| b.to_string()).collect(),
        main_repo: RepositoryConfig {
            url: main_remote.to_string_lossy().into_owned(),
            branch: "main".into(),
            directory: "app".into(),
            ..RepositoryConfig::default()
        },
        ..GitSettings::default()
    }
}

pub fn with_artifacts(mut settings: GitSettings, artifacts_remote: &Path) -> GitSettings {
    settings.artifacts_repo = Some(ArtifactsRepoConfig {
        repository: RepositoryConfig {
            url: artifacts_remote.to_string_lossy().into_owned(),
            branch: "main".into(),
            directory: "artifacts".into(),
            ..RepositoryConfig::default()
        },
        ..ArtifactsRepoConfig::default()
    });
    settings
}
