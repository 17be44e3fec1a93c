//! # contract: types exchanged with the outside world
//!
//! Payloads sent to the notification endpoint, the inbound trigger and
//! artifact events, and the [`Notifier`] trait the glue implements.
//!
//! ## Mocking & Testing
//! - [`Notifier`] is annotated for `mockall` (`MockNotifier`) behind the
//!   `test-export-mocks` feature so dependents can assert on notifications.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};

pub const REPOSITORY_UPDATE_EVENT: &str = "repository_update";

/// Error type for notifier implementations.
pub type NotifyError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoUpdate {
    pub repository: String,
    pub branch: String,
    pub timestamp: DateTime<Utc>,
    pub commit_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub repo_updates: BTreeMap<String, RepoUpdate>,
    pub message: String,
}

impl NotificationPayload {
    pub fn repository_update(message: impl Into<String>) -> Self {
        Self {
            event: REPOSITORY_UPDATE_EVENT.to_string(),
            timestamp: Utc::now(),
            branch: None,
            repo_updates: BTreeMap::new(),
            message: message.into(),
        }
    }
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, payload: &NotificationPayload) -> Result<(), NotifyError>;
}

/// Body of an inbound trigger request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TriggerRequest {
    pub event: String,
    pub branch: Option<String>,
    pub reference: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
}

impl TriggerRequest {
    /// Explicit branch first, then a `refs/heads/<name>` reference. Tags and
    /// other refs resolve to no branch.
    pub fn resolved_branch(&self) -> Option<String> {
        if let Some(branch) = self.branch.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            return Some(branch.to_string());
        }
        [self.reference.as_deref(), self.git_ref.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|r| r.trim().strip_prefix("refs/heads/"))
            .filter(|b| !b.is_empty())
            .map(str::to_string)
    }
}

/// Artifact metadata delivered by the ingestion callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtifactInfo {
    pub user_id: i64,
    pub user_name: String,
    pub project_id: i64,
    pub project_name: String,
    pub team_id: i64,
    pub action: String,
    pub artifact_type: String,
    pub artifact_repo_id: i64,
    pub artifact_repo_name: String,
    pub artifact_pkg_id: i64,
    pub artifact_pkg_name: String,
    pub artifact_version_id: i64,
    pub artifact_version_name: String,
    pub size: f64,
}

impl ArtifactInfo {
    pub fn has_required_fields(&self) -> bool {
        !self.artifact_repo_name.trim().is_empty()
            && !self.artifact_pkg_name.trim().is_empty()
            && !self.artifact_version_name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEvent {
    #[serde(default)]
    pub artifact: ArtifactInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn payload_serialises_camel_case_and_omits_missing_branch() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let mut payload = NotificationPayload {
            timestamp: ts,
            ..NotificationPayload::repository_update("Updated 1 branches: [develop]")
        };
        payload.repo_updates.insert(
            "develop".into(),
            RepoUpdate {
                repository: "https://example.com/app.git".into(),
                branch: "develop".into(),
                timestamp: ts,
                commit_hash: "abc123".into(),
            },
        );
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event"], "repository_update");
        assert!(json.get("branch").is_none());
        assert_eq!(json["repoUpdates"]["develop"]["commitHash"], "abc123");
        assert_eq!(json["timestamp"], "2024-05-01T09:00:00Z");
    }

    #[test]
    fn trigger_branch_resolution() {
        struct TestCase {
            name: &'static str,
            body: &'static str,
            expected: Option<&'static str>,
        }
        let cases = [
            TestCase { name: "explicit branch", body: r#"{"event":"push","branch":"develop","reference":"refs/heads/main"}"#, expected: Some("develop") },
            TestCase { name: "reference", body: r#"{"event":"push","reference":"refs/heads/release/2024"}"#, expected: Some("release/2024") },
            TestCase { name: "ref alias", body: r#"{"ref":"refs/heads/main"}"#, expected: Some("main") },
            TestCase { name: "tag", body: r#"{"reference":"refs/tags/v1"}"#, expected: None },
            TestCase { name: "nothing", body: r#"{"event":"push"}"#, expected: None },
            TestCase { name: "blank branch", body: r#"{"branch":"  "}"#, expected: None },
        ];
        for case in cases {
            let request: TriggerRequest = serde_json::from_str(case.body).unwrap();
            assert_eq!(request.resolved_branch().as_deref(), case.expected, "{}", case.name);
        }
    }

    #[test]
    fn artifact_event_requires_repo_package_and_version() {
        let event: ArtifactEvent = serde_json::from_str(
            r#"{"artifact":{"artifactRepoName":"web","artifactPkgName":"frontend","artifactVersionName":"1.2.0-9","size":2048}}"#,
        )
        .unwrap();
        assert!(event.artifact.has_required_fields());
        assert_eq!(event.artifact.size, 2048.0);

        let partial: ArtifactEvent =
            serde_json::from_str(r#"{"artifact":{"artifactRepoName":"web"}}"#).unwrap();
        assert!(!partial.artifact.has_required_fields());
    }
}
