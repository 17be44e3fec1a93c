//! # artifacts: the per-source-repository version document
//!
//! Each source repository owns one `<repo>.jsonnet` file holding
//! `repo -> package -> version family -> version`. A family holds exactly
//! one version; publishing a newer build of the same family overwrites it.
//!
//! Writes go through a temporary file in the same directory that is synced
//! and renamed over the target, so readers never see a partial document.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{Result, WatcherError};

pub const DEFAULT_ARTIFACT_MESSAGE: &str = "Update artifacts";

/// `"1.2.3-45"` becomes `"1.2.3"`. The last dash-delimited segment is always
/// dropped, so a version without a dash belongs to the empty family `""`.
pub fn version_family(version: &str) -> &str {
    version.rsplit_once('-').map_or("", |(family, _)| family)
}

pub fn document_file_name(repo_name: &str) -> String {
    format!("{repo_name}.jsonnet")
}

/// Source repository names become file and branch names, so they are held
/// to a conservative shape.
pub fn validate_repo_name(repo_name: &str) -> Result<()> {
    let bad = repo_name.is_empty()
        || repo_name.starts_with('-')
        || repo_name.starts_with('.')
        || repo_name.contains("..")
        || repo_name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control());
    if bad {
        return Err(WatcherError::InvalidArtifact(format!(
            "source repository name `{repo_name}` cannot be used as a file or branch name"
        )));
    }
    Ok(())
}

pub fn artifact_commit_message(
    template: &str,
    timestamp: DateTime<Utc>,
    repo_name: &str,
    package: &str,
    version: &str,
) -> String {
    format!(
        "{template}\n\nTime: {}\nArtifactRepoName: {repo_name}\nPackage: {package}\nVersion: {version}",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactDocument {
    root: Map<String, Value>,
}

impl ArtifactDocument {
    /// Reads the document at `path`; a missing or blank file is an empty document.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(WatcherError::io(format!("reading {}", path.display()), e)),
        };
        Self::parse(&text).map_err(|source| WatcherError::Document {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> serde_json::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        match serde_json::from_str::<Value>(text)? {
            Value::Object(root) => Ok(Self { root }),
            other => Err(serde::de::Error::custom(format!(
                "expected a JSON object at the top level, found {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn version(&self, repo_name: &str, package: &str, family: &str) -> Option<&str> {
        self.root
            .get(repo_name)?
            .get(package)?
            .get(family)?
            .as_str()
    }

    /// Stores `version` under its family. Returns `false` when it was already stored.
    pub fn record(&mut self, repo_name: &str, package: &str, version: &str) -> bool {
        let family = version_family(version);
        if self.version(repo_name, package, family) == Some(version) {
            return false;
        }
        let mut packages = take_object(&mut self.root, repo_name);
        let mut families = take_object(&mut packages, package);
        families.insert(family.to_string(), Value::String(version.to_string()));
        packages.insert(package.to_string(), Value::Object(families));
        self.root
            .insert(repo_name.to_string(), Value::Object(packages));
        true
    }

    /// Pretty-printed with two-space indentation and keys in sorted order.
    pub fn render(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(&self.root).map_err(|e| {
            WatcherError::io("serialising artifact document", std::io::Error::other(e))
        })?;
        text.push('\n');
        Ok(text)
    }

    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let text = self.render()?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let context = || format!("writing {}", path.display());

        let mut tmp = tempfile::Builder::new()
            .prefix(".artifact-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| WatcherError::io(context(), e))?;
        tmp.write_all(text.as_bytes())
            .map_err(|e| WatcherError::io(context(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| WatcherError::io(context(), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(|e| WatcherError::io(context(), e))?;
        }
        tmp.persist(path)
            .map_err(|e| WatcherError::io(context(), e.error))?;
        Ok(())
    }
}

/// Removes `key`, yielding its object or a fresh one when absent or not an object.
fn take_object(map: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match map.remove(key) {
        Some(Value::Object(inner)) => inner,
        _ => Map::new(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn version_family_drops_last_dash_segment() {
        struct TestCase {
            version: &'static str,
            family: &'static str,
        }
        let cases = [
            TestCase { version: "1.2.3-45", family: "1.2.3" },
            TestCase { version: "1.2.0-rc-7", family: "1.2.0-rc" },
            TestCase { version: "2.0.0", family: "" },
            TestCase { version: "3.1-", family: "3.1" },
        ];
        for case in cases {
            assert_eq!(version_family(case.version), case.family, "{}", case.version);
        }
    }

    #[test]
    fn newer_build_overwrites_family() {
        let mut doc = ArtifactDocument::default();
        assert!(doc.record("web", "frontend", "1.2.0-9"));
        assert!(doc.record("web", "frontend", "1.2.0-10"));
        assert!(doc.record("web", "frontend", "1.3.0-1"));
        assert!(!doc.record("web", "frontend", "1.3.0-1"));

        assert_eq!(doc.version("web", "frontend", "1.2.0"), Some("1.2.0-10"));
        let rendered = doc.render().unwrap();
        assert_eq!(
            rendered,
            "{\n  \"web\": {\n    \"frontend\": {\n      \"1.2.0\": \"1.2.0-10\",\n      \"1.3.0\": \"1.3.0-1\"\n    }\n  }\n}\n"
        );
    }

    #[test]
    fn dashless_versions_share_the_empty_family() {
        let mut doc = ArtifactDocument::parse(r#"{"web": {"frontend": {"": "0.9"}}}"#).unwrap();
        assert!(doc.record("web", "frontend", "1.0"));
        assert!(doc.record("web", "frontend", "2.0"));
        assert!(!doc.record("web", "frontend", "2.0"));

        assert_eq!(doc.version("web", "frontend", ""), Some("2.0"));
        assert_eq!(
            doc.render().unwrap(),
            "{\n  \"web\": {\n    \"frontend\": {\n      \"\": \"2.0\"\n    }\n  }\n}\n"
        );
    }

    #[test]
    fn non_object_nodes_are_replaced() {
        let mut doc = ArtifactDocument::parse(r#"{"web": "legacy", "other": {"keep": {"1": "1-1"}}}"#).unwrap();
        assert!(doc.record("web", "frontend", "1.0.0-1"));
        assert_eq!(doc.version("web", "frontend", "1.0.0"), Some("1.0.0-1"));
        assert_eq!(doc.version("other", "keep", "1"), Some("1-1"));
    }

    #[test]
    fn rejects_invalid_json_and_non_object_roots() {
        assert!(ArtifactDocument::parse("{not json").is_err());
        let err = ArtifactDocument::parse("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("an array"));
        assert_eq!(ArtifactDocument::parse("  \n").unwrap(), ArtifactDocument::default());
    }

    #[test]
    fn atomic_write_replaces_target_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.jsonnet");
        std::fs::write(&path, "{\"web\": {}}\n").unwrap();

        let mut doc = ArtifactDocument::load(&path).unwrap();
        doc.record("web", "api", "0.9.1-3");
        doc.write_atomic(&path).unwrap();

        let reloaded = ArtifactDocument::load(&path).unwrap();
        assert_eq!(reloaded.version("web", "api", "0.9.1"), Some("0.9.1-3"));
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn load_reports_path_of_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.jsonnet");
        std::fs::write(&path, "{\"web\":").unwrap();
        match ArtifactDocument::load(&path) {
            Err(WatcherError::Document { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn repo_names_that_escape_the_working_copy_are_rejected() {
        for name in ["", "../etc", "a/b", "-rf", ".hidden", "with space"] {
            assert!(validate_repo_name(name).is_err(), "{name:?}");
        }
        validate_repo_name("payments-service_v2").unwrap();
    }

    #[test]
    fn commit_message_lists_publication() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        assert_eq!(
            artifact_commit_message(DEFAULT_ARTIFACT_MESSAGE, ts, "web", "frontend", "1.2.0-10"),
            "Update artifacts\n\nTime: 2024-05-01T08:00:00Z\nArtifactRepoName: web\nPackage: frontend\nVersion: 1.2.0-10"
        );
    }
}
