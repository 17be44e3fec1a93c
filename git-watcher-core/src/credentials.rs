//! Credential provisioning for git invocations.
//!
//! An [`AuthDescriptor`] is turned into a [`CredentialOverlay`]: the extra
//! environment a single invocation needs. Inline SSH keys are written into a
//! private temporary directory owned by the overlay, so the key file lives
//! exactly as long as the invocation that uses it.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::error::WatcherError;

/// Authentication settings as they appear in configuration.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub username: String,
    pub password: String,
    pub ssh_private_key: String,
    pub ssh_key_path: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("type", &self.kind)
            .field("username", &self.username)
            .field("ssh_key_path", &self.ssh_key_path)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub enum AuthDescriptor {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    SshKeyFile {
        path: PathBuf,
    },
    SshKeyInline {
        key: String,
    },
}

impl AuthDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthDescriptor::None => "none",
            AuthDescriptor::Basic { .. } => "basic",
            AuthDescriptor::SshKeyFile { .. } | AuthDescriptor::SshKeyInline { .. } => "ssh",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AuthDescriptor::None)
    }

    pub fn is_ssh(&self) -> bool {
        matches!(
            self,
            AuthDescriptor::SshKeyFile { .. } | AuthDescriptor::SshKeyInline { .. }
        )
    }
}

impl fmt::Debug for AuthDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthDescriptor::None => f.write_str("None"),
            AuthDescriptor::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            AuthDescriptor::SshKeyFile { path } => {
                f.debug_struct("SshKeyFile").field("path", path).finish()
            }
            AuthDescriptor::SshKeyInline { .. } => {
                f.debug_struct("SshKeyInline").finish_non_exhaustive()
            }
        }
    }
}

impl TryFrom<&AuthConfig> for AuthDescriptor {
    type Error = WatcherError;

    fn try_from(raw: &AuthConfig) -> Result<Self, Self::Error> {
        match raw.kind.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(AuthDescriptor::None),
            "basic" => {
                if raw.username.is_empty() || raw.password.is_empty() {
                    return Err(WatcherError::InvalidConfig(
                        "basic auth requires both username and password".to_string(),
                    ));
                }
                Ok(AuthDescriptor::Basic {
                    username: raw.username.clone(),
                    password: raw.password.clone(),
                })
            }
            "ssh" => {
                if !raw.ssh_key_path.is_empty() {
                    Ok(AuthDescriptor::SshKeyFile {
                        path: PathBuf::from(&raw.ssh_key_path),
                    })
                } else if !raw.ssh_private_key.is_empty() {
                    Ok(AuthDescriptor::SshKeyInline {
                        key: raw.ssh_private_key.clone(),
                    })
                } else {
                    Err(WatcherError::InvalidConfig(
                        "ssh auth requires sshKeyPath or sshPrivateKey".to_string(),
                    ))
                }
            }
            other => Err(WatcherError::InvalidConfig(format!(
                "unknown auth type `{other}`"
            ))),
        }
    }
}

/// Environment additions for one git invocation.
#[derive(Default)]
pub struct CredentialOverlay {
    env: Vec<(String, String)>,
    secrets: Vec<String>,
    key_dir_guard: Option<TempDir>,
}

impl CredentialOverlay {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub(crate) fn secrets(&self) -> &[String] {
        &self.secrets
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Directory holding a materialised inline key, if any.
    pub fn key_dir(&self) -> Option<&Path> {
        self.key_dir_guard.as_ref().map(TempDir::path)
    }
}

/// The password as typed and as percent-encoded inside a URL userinfo.
fn password_forms(password: &str) -> Vec<String> {
    let mut forms = vec![password.to_string()];
    if let Ok(mut probe) = url::Url::parse("https://host") {
        if probe.set_password(Some(password)).is_ok() {
            if let Some(encoded) = probe.password() {
                if encoded != password {
                    forms.push(encoded.to_string());
                }
            }
        }
    }
    forms
}

fn ssh_command(key_path: &Path) -> String {
    format!(
        "ssh -i {} -o StrictHostKeyChecking=no",
        key_path.display()
    )
}

/// Builds the environment overlay for `auth`.
///
/// Inline key material that cannot be written degrades to an empty overlay
/// with a warning; the invocation then runs unauthenticated.
pub fn provision(auth: &AuthDescriptor) -> CredentialOverlay {
    match auth {
        AuthDescriptor::None => CredentialOverlay::empty(),
        AuthDescriptor::Basic { username, password } => CredentialOverlay {
            env: vec![
                ("GIT_ASKPASS".to_string(), "echo".to_string()),
                ("GIT_USERNAME".to_string(), username.clone()),
                ("GIT_PASSWORD".to_string(), password.clone()),
            ],
            secrets: password_forms(password),
            key_dir_guard: None,
        },
        AuthDescriptor::SshKeyFile { path } => CredentialOverlay {
            env: vec![("GIT_SSH_COMMAND".to_string(), ssh_command(path))],
            secrets: Vec::new(),
            key_dir_guard: None,
        },
        AuthDescriptor::SshKeyInline { key } => match materialise_key(key) {
            Ok((dir, key_path)) => CredentialOverlay {
                env: vec![("GIT_SSH_COMMAND".to_string(), ssh_command(&key_path))],
                secrets: Vec::new(),
                key_dir_guard: Some(dir),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write inline SSH key, continuing without credentials");
                CredentialOverlay::empty()
            }
        },
    }
}

fn materialise_key(key: &str) -> std::io::Result<(TempDir, PathBuf)> {
    let dir = tempfile::Builder::new().prefix("git-ssh-key").tempdir()?;
    let key_path = dir.path().join("id_rsa");

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&key_path)?;
    file.write_all(key.as_bytes())?;
    if !key.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.sync_all()?;
    Ok((dir, key_path))
}

/// Embeds basic-auth credentials into an HTTP(S) clone URL.
///
/// Other URL shapes and other auth variants are returned unchanged.
pub fn authenticated_url(raw_url: &str, auth: &AuthDescriptor) -> String {
    let AuthDescriptor::Basic { username, password } = auth else {
        return raw_url.to_string();
    };
    let Ok(mut parsed) = url::Url::parse(raw_url) else {
        return raw_url.to_string();
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return raw_url.to_string();
    }
    if parsed.set_username(username).is_err() || parsed.set_password(Some(password)).is_err() {
        return raw_url.to_string();
    }
    parsed.to_string()
}
