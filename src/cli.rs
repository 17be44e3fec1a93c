use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use git_watcher_core::contract::{NotificationPayload, Notifier, RepoUpdate};
use git_watcher_core::{BranchReport, Manager, PublishOutcome};

use crate::load_config::load_config;
use crate::notify::WebhookClient;
use crate::server::serve;

/// CLI for git-watcher: keep working copies in sync and publish artifact versions.
#[derive(Parser)]
#[clap(
    name = "git-watcher",
    version,
    about = "Watch git branches, sync submodules and publish artifact versions"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler and the webhook server
    Serve {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Check one branch, or every watched branch, once
    Check {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        branch: Option<String>,
        /// Send the update notification to the configured callback
        #[clap(long)]
        notify: bool,
    },
    /// Record an artifact version in the artifacts repository
    Publish {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        repo: String,
        #[clap(long)]
        package: String,
        #[clap(long)]
        version: String,
    },
}

/// Async CLI entrypoint shared by main() and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Serve { config } => serve(load_config(config)?).await,
        Commands::Check {
            config,
            branch,
            notify,
        } => {
            let config = load_config(config)?;
            let manager = Arc::new(Manager::with_process_runner(config.git.clone())?);
            let reports = check(&manager, branch).await?;

            let mut failures = 0;
            for (branch, result) in &reports {
                match result {
                    Ok(report) => println!(
                        "{branch}: {} ({})",
                        if report.updated { "updated" } else { "up to date" },
                        report.head
                    ),
                    Err(e) => {
                        failures += 1;
                        eprintln!("[ERROR] {branch}: {e}");
                    }
                }
            }

            if notify {
                let updated: Vec<&BranchReport> = reports
                    .iter()
                    .filter_map(|(_, r)| r.as_ref().ok())
                    .filter(|r| r.updated)
                    .collect();
                if !updated.is_empty() {
                    let client = WebhookClient::new(&config.webhook)?;
                    let payload = update_payload(&manager.main_repository().url, &updated);
                    client
                        .send_notification(&payload)
                        .await
                        .map_err(|e| anyhow::anyhow!("failed to send notification: {e}"))?;
                }
            }

            if failures > 0 {
                return Err(anyhow::anyhow!("{failures} branch check(s) failed"));
            }
            Ok(())
        }
        Commands::Publish {
            config,
            repo,
            package,
            version,
        } => {
            let config = load_config(config)?;
            let manager = Manager::with_process_runner(config.git)?;
            let outcome = tokio::task::spawn_blocking(move || {
                manager.publish(&repo, &package, &version)
            })
            .await
            .context("publish task failed")??;
            match outcome {
                PublishOutcome::AlreadyPublished => println!("Version already published."),
                PublishOutcome::NoChanges => println!("No changes to commit."),
                PublishOutcome::Merged {
                    feature_branch,
                    target_branch,
                } => println!("Published on {feature_branch} and merged into {target_branch}."),
            }
            Ok(())
        }
    }
}

async fn check(
    manager: &Arc<Manager>,
    branch: Option<String>,
) -> Result<Vec<(String, git_watcher_core::Result<BranchReport>)>> {
    let manager = Arc::clone(manager);
    tokio::task::spawn_blocking(move || match branch {
        Some(branch) => {
            let result = manager.check_and_update_branch(&branch);
            vec![(branch, result)]
        }
        None => manager.check_all_branches(),
    })
    .await
    .context("branch check task failed")
}

fn update_payload(repository: &str, reports: &[&BranchReport]) -> NotificationPayload {
    let names: Vec<&str> = reports.iter().map(|r| r.branch.as_str()).collect();
    let mut payload = NotificationPayload::repository_update(format!(
        "Updated {} branches: [{}]",
        names.len(),
        names.join(" ")
    ));
    let now = Utc::now();
    for report in reports {
        payload.repo_updates.insert(
            report.branch.clone(),
            RepoUpdate {
                repository: repository.to_string(),
                branch: report.branch.clone(),
                timestamp: now,
                commit_hash: report.head.clone(),
            },
        );
    }
    payload
}
