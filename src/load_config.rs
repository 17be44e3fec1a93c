/// `load_config` module: reads the watcher configuration file, overlays
/// `GIT_WATCHER_*` environment variables and validates the result.
///
/// # Responsibilities
/// - Parse YAML (or JSON, which YAML accepts verbatim) into [`AppConfig`].
/// - Accept the check interval as nanoseconds or a duration string (`"90s"`, `"1h30m"`).
/// - Apply the environment overlay after parsing and before validation.
/// - Reject incomplete configuration before anything starts serving.
///
/// # Errors
/// All errors use `anyhow::Error` with context and are logged where they occur.
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use git_watcher_core::config::{ArtifactsRepoConfig, GitSettings};
use git_watcher_core::credentials::AuthConfig;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use tracing::{error, info, warn};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub git: GitSettings,
    pub webhook: WebhookConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookConfig {
    pub callback_url: String,
    pub secret: String,
    pub method: String,
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("callback_url", &self.callback_url)
            .field("secret_set", &!self.secret.is_empty())
            .field("method", &self.method)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleConfig {
    #[serde(deserialize_with = "deserialize_interval")]
    pub check_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInterval {
    Nanos(u64),
    Text(String),
}

fn deserialize_interval<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawInterval>::deserialize(deserializer)? {
        None => Ok(DEFAULT_CHECK_INTERVAL),
        Some(RawInterval::Nanos(n)) => Ok(Duration::from_nanos(n)),
        Some(RawInterval::Text(text)) => parse_interval(&text).map_err(serde::de::Error::custom),
    }
}

fn duration_component() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|ms|s|m|h)")
            .expect("duration pattern should compile")
    })
}

/// Parses `"1h30m"`-style durations, or a bare integer as nanoseconds.
pub fn parse_interval(text: &str) -> Result<Duration> {
    let text = text.trim();
    if let Ok(nanos) = text.parse::<u64>() {
        return Ok(Duration::from_nanos(nanos));
    }
    if text.is_empty() {
        return Err(anyhow!("invalid check interval: empty"));
    }

    let mut consumed = 0;
    let mut total = 0f64;
    for caps in duration_component().captures_iter(text) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        if whole.start != consumed {
            return Err(anyhow!("invalid check interval: {text}"));
        }
        consumed = whole.end;
        let value: f64 = caps[1]
            .parse()
            .with_context(|| format!("invalid check interval: {text}"))?;
        let unit_secs = match &caps[2] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            _ => 3600.0,
        };
        total += value * unit_secs;
    }
    if consumed != text.len() {
        return Err(anyhow!("invalid check interval: {text}"));
    }
    Duration::try_from_secs_f64(total).map_err(|e| anyhow!("invalid check interval {text}: {e}"))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn overlay_auth(auth: &mut AuthConfig, prefix: &str, lookup: &impl Fn(&str) -> Option<String>) {
    let var = |suffix: &str| lookup(&format!("{prefix}_{suffix}"));
    if let Some(v) = var("TYPE") {
        auth.kind = v;
    }
    if let Some(v) = var("USERNAME") {
        auth.username = v;
    }
    if let Some(v) = var("PASSWORD") {
        auth.password = v;
    }
    if let Some(v) = var("SSH_KEY_PATH") {
        auth.ssh_key_path = v;
    }
    if let Some(v) = var("SSH_PRIVATE_KEY") {
        auth.ssh_private_key = v;
    }
}

/// Applies `GIT_WATCHER_*` overrides. `lookup` returns the value of a variable, if set.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
    let get_bool = |key: &str| {
        let raw = get(key)?;
        let parsed = parse_bool(&raw);
        if parsed.is_none() {
            warn!(variable = key, value = %raw, "Ignoring unparsable boolean");
        }
        parsed
    };

    if let Some(v) = get("GIT_WATCHER_SERVER_PORT") {
        match v.parse() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!(variable = "GIT_WATCHER_SERVER_PORT", value = %v, "Ignoring unparsable port"),
        }
    }

    let git = &mut config.git;
    if let Some(v) = get("GIT_WATCHER_MAIN_REPO_URL") {
        git.main_repo.url = v;
    }
    if let Some(v) = get("GIT_WATCHER_MAIN_REPO_BRANCH") {
        git.main_repo.branch = v;
    }
    if let Some(v) = get("GIT_WATCHER_MAIN_REPO_DIRECTORY") {
        git.main_repo.directory = v;
    }
    if let Some(v) = get("GIT_WATCHER_WORKING_DIR") {
        git.working_dir = v.into();
    }
    if let Some(v) = get_bool("GIT_WATCHER_USE_SUBMODULES") {
        git.use_submodules = v;
    }
    if let Some(v) = get("GIT_WATCHER_BRANCHES") {
        git.branches = v
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = get_bool("GIT_WATCHER_AUTO_COMMIT") {
        git.auto_commit = v;
    }
    if let Some(v) = get("GIT_WATCHER_COMMIT_USER_NAME") {
        git.commit_config.user_name = v;
    }
    if let Some(v) = get("GIT_WATCHER_COMMIT_USER_EMAIL") {
        git.commit_config.user_email = v;
    }
    if let Some(v) = get("GIT_WATCHER_COMMIT_MESSAGE") {
        git.commit_config.message = v;
    }
    overlay_auth(&mut git.main_repo.auth, "GIT_WATCHER_AUTH", &get);

    let artifacts_keys = [
        "GIT_WATCHER_ARTIFACTS_REPO_URL",
        "GIT_WATCHER_ARTIFACTS_REPO_BRANCH",
        "GIT_WATCHER_ARTIFACTS_REPO_DIRECTORY",
    ];
    if git.artifacts_repo.is_none() && artifacts_keys.iter().any(|k| get(k).is_some()) {
        git.artifacts_repo = Some(ArtifactsRepoConfig::default());
    }
    if let Some(artifacts) = git.artifacts_repo.as_mut() {
        if let Some(v) = get("GIT_WATCHER_ARTIFACTS_REPO_URL") {
            artifacts.repository.url = v;
        }
        if let Some(v) = get("GIT_WATCHER_ARTIFACTS_REPO_BRANCH") {
            artifacts.repository.branch = v;
        }
        if let Some(v) = get("GIT_WATCHER_ARTIFACTS_REPO_DIRECTORY") {
            artifacts.repository.directory = v;
        }
        if let Some(v) = get_bool("GIT_WATCHER_ARTIFACTS_USE_MAIN_AUTH") {
            artifacts.use_main_auth = v;
        }
        if let Some(v) = get_bool("GIT_WATCHER_ARTIFACTS_USE_MAIN_COMMIT") {
            artifacts.use_main_commit = v;
        }
        if !artifacts.use_main_auth {
            overlay_auth(&mut artifacts.repository.auth, "GIT_WATCHER_ARTIFACTS_AUTH", &get);
        }
    }

    if let Some(v) = get("GIT_WATCHER_WEBHOOK_CALLBACK_URL") {
        config.webhook.callback_url = v;
    }
    if let Some(v) = get("GIT_WATCHER_WEBHOOK_SECRET") {
        config.webhook.secret = v;
    }
    if let Some(v) = get("GIT_WATCHER_WEBHOOK_METHOD") {
        config.webhook.method = v;
    }
    if let Some(v) = get("GIT_WATCHER_CHECK_INTERVAL") {
        match parse_interval(&v) {
            Ok(interval) => config.schedule.check_interval = interval,
            Err(e) => warn!(variable = "GIT_WATCHER_CHECK_INTERVAL", error = %e, "Ignoring invalid interval"),
        }
    }
}

fn apply_defaults(config: &mut AppConfig) {
    if config.git.branches.is_empty() {
        config.git.branches = vec![config.git.main_repo.branch.clone()];
    }
    if config.webhook.method.is_empty() {
        config.webhook.method = "POST".to_string();
    }
}

pub fn validate(config: &AppConfig) -> Result<()> {
    if config.server.port == 0 {
        return Err(anyhow!("invalid config: server port must be greater than 0"));
    }
    config
        .git
        .validate()
        .map_err(|e| anyhow!("invalid config: {e}"))?;
    if config.webhook.callback_url.trim().is_empty() {
        return Err(anyhow!("invalid config: webhook callbackUrl is required"));
    }
    if config.schedule.check_interval.is_zero() {
        return Err(anyhow!("invalid config: schedule checkInterval must be greater than 0"));
    }
    Ok(())
}

/// Parses configuration text, then applies defaults, the overlay and validation.
pub fn parse_config(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<AppConfig> {
    let mut config: AppConfig = if content.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(content).map_err(|e| anyhow!("Failed to parse config YAML: {e}"))?
    };
    if config.git.main_repo.branch.is_empty() {
        config.git.main_repo.branch = "main".to_string();
    }
    apply_env_overrides(&mut config, lookup);
    apply_defaults(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Loads the configuration file at `path` with the process environment as overlay.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    match parse_config(&content, |key| std::env::var(key).ok()) {
        Ok(config) => {
            info!(
                config_path = ?path_ref,
                port = config.server.port,
                branches = ?config.git.branches,
                interval_secs = config.schedule.check_interval.as_secs(),
                artifacts = config.git.artifacts_repo.is_some(),
                "Configuration loaded"
            );
            Ok(config)
        }
        Err(e) => {
            error!(error = %e, config_path = ?path_ref, "Invalid configuration");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
git:
  mainRepo:
    url: https://example.com/app.git
    directory: app
webhook:
  callbackUrl: https://hooks.example.com/notify
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parses_duration_strings() {
        struct TestCase {
            input: &'static str,
            expected: Option<Duration>,
        }
        let cases = [
            TestCase { input: "90s", expected: Some(Duration::from_secs(90)) },
            TestCase { input: "1h30m", expected: Some(Duration::from_secs(5400)) },
            TestCase { input: "250ms", expected: Some(Duration::from_millis(250)) },
            TestCase { input: "1.5m", expected: Some(Duration::from_secs(90)) },
            TestCase { input: "60000000000", expected: Some(Duration::from_secs(60)) },
            TestCase { input: "10 minutes", expected: None },
            TestCase { input: "5x", expected: None },
            TestCase { input: "", expected: None },
        ];
        for case in cases {
            assert_eq!(parse_interval(case.input).ok(), case.expected, "{:?}", case.input);
        }
    }

    #[test]
    fn applies_defaults() {
        let config = parse_config(MINIMAL, env(&[])).unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.git.main_repo.branch, "main");
        assert_eq!(config.git.branches, vec!["main"]);
        assert_eq!(config.webhook.method, "POST");
        assert_eq!(config.schedule.check_interval, DEFAULT_CHECK_INTERVAL);
        assert!(config.git.artifacts_repo.is_none());
    }

    #[test]
    fn accepts_numeric_nanoseconds_and_json_input() {
        let json = r#"{
            "server": {"port": 9000},
            "git": {"mainRepo": {"url": "https://example.com/app.git", "branch": "trunk", "directory": "app"}},
            "webhook": {"callbackUrl": "https://hooks.example.com"},
            "schedule": {"checkInterval": 30000000000}
        }"#;
        let config = parse_config(json, env(&[])).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.git.branches, vec!["trunk"]);
        assert_eq!(config.schedule.check_interval, Duration::from_secs(30));
    }

    #[test]
    fn environment_overrides_file_values() {
        let config = parse_config(
            MINIMAL,
            env(&[
                ("GIT_WATCHER_SERVER_PORT", "9100"),
                ("GIT_WATCHER_BRANCHES", "main, develop ,"),
                ("GIT_WATCHER_USE_SUBMODULES", "yes"),
                ("GIT_WATCHER_AUTO_COMMIT", "maybe"),
                ("GIT_WATCHER_AUTH_TYPE", "basic"),
                ("GIT_WATCHER_AUTH_USERNAME", "bot"),
                ("GIT_WATCHER_AUTH_PASSWORD", "pw"),
                ("GIT_WATCHER_CHECK_INTERVAL", "2m"),
                ("GIT_WATCHER_ARTIFACTS_REPO_URL", "https://example.com/artifacts.git"),
                ("GIT_WATCHER_ARTIFACTS_REPO_BRANCH", "main"),
                ("GIT_WATCHER_ARTIFACTS_REPO_DIRECTORY", "artifacts"),
                ("GIT_WATCHER_ARTIFACTS_USE_MAIN_AUTH", "true"),
                ("GIT_WATCHER_ARTIFACTS_AUTH_TYPE", "ssh"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.git.branches, vec!["main", "develop"]);
        assert!(config.git.use_submodules);
        assert!(!config.git.auto_commit);
        assert_eq!(config.git.main_repo.auth.kind, "basic");
        assert_eq!(config.schedule.check_interval, Duration::from_secs(120));
        let artifacts = config.git.artifacts_repo.unwrap();
        assert!(artifacts.use_main_auth);
        assert_eq!(artifacts.repository.auth.kind, "", "artifacts auth env ignored with useMainAuth");
    }

    #[test]
    fn validation_failures() {
        struct TestCase {
            name: &'static str,
            content: &'static str,
            vars: Vec<(&'static str, &'static str)>,
            message: &'static str,
        }
        let cases = vec![
            TestCase {
                name: "missing callback",
                content: "git:\n  mainRepo:\n    url: u\n    directory: d\n",
                vars: vec![],
                message: "callbackUrl",
            },
            TestCase {
                name: "missing directory",
                content: "git:\n  mainRepo:\n    url: u\nwebhook:\n  callbackUrl: c\n",
                vars: vec![],
                message: "directory",
            },
            TestCase {
                name: "zero port",
                content: MINIMAL,
                vars: vec![("GIT_WATCHER_SERVER_PORT", "0")],
                message: "port",
            },
            TestCase {
                name: "zero interval",
                content: MINIMAL,
                vars: vec![("GIT_WATCHER_CHECK_INTERVAL", "0s")],
                message: "checkInterval",
            },
            TestCase {
                name: "incomplete basic auth",
                content: MINIMAL,
                vars: vec![("GIT_WATCHER_AUTH_TYPE", "basic")],
                message: "basic auth",
            },
            TestCase {
                name: "bad yaml",
                content: "git: [unclosed",
                vars: vec![],
                message: "parse",
            },
        ];
        for case in cases {
            let err = parse_config(case.content, env(&case.vars)).unwrap_err();
            assert!(
                err.to_string().contains(case.message),
                "{}: {}",
                case.name,
                err
            );
        }
    }

    #[test]
    fn webhook_secret_is_not_debug_printed() {
        let webhook = WebhookConfig {
            callback_url: "https://hooks.example.com".into(),
            secret: "s3cr3t".into(),
            method: "POST".into(),
        };
        assert!(!format!("{webhook:?}").contains("s3cr3t"));
    }
}
