use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Host key fingerprint GitHub publishes for `github.com`.
pub const GITHUB_HOST: &str = "github.com";
pub const GITHUB_FINGERPRINT: &str = "SHA256:nThbg6kXUpJWGl7E1IGOCspRomTxdCARLviKw6E5SY8";

// ── Trampoline transport ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrampolineConfig {
    /// Unix socket the dispatcher listens on.  Overridden at runtime by the
    /// `TRAMPOLINE_SOCKET_PATH` environment variable when set.
    pub socket_path: String,
    /// Program handed to git/ssh as `GIT_ASKPASS` / `SSH_ASKPASS`.  Empty
    /// means "the currently running `trampoline` binary".
    pub helper_path: String,
}

impl Default for TrampolineConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/trampoline.sock".to_string(),
            helper_path: String::new(),
        }
    }
}

// ── Git invocation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub git_path: String,
    /// Append `--recurse-submodules` to branch and commit checkouts.
    pub recurse_submodules: bool,
    /// URL used for proxy resolution when neither the repository nor the
    /// account provides one.
    pub fallback_remote_url: String,
    /// Also recognise git-lfs "Filtering content" lines as checkout progress.
    pub track_lfs_progress: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            git_path: "git".to_string(),
            recurse_submodules: false,
            fallback_remote_url: "https://github.com".to_string(),
            track_lfs_progress: true,
        }
    }
}

// ── Host trust ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedHost {
    pub host: String,
    pub fingerprint: String,
}

/// SSH hosts answered with `yes` without asking anyone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub pinned_hosts: Vec<PinnedHost>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            pinned_hosts: vec![PinnedHost {
                host: GITHUB_HOST.to_string(),
                fingerprint: GITHUB_FINGERPRINT.to_string(),
            }],
        }
    }
}

// ── Credential store ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// JSON file backing the token store used by the CLI.
    pub store_path: String,
    /// Prefix of the store key derived from an endpoint
    /// (`"<prefix> - <endpoint>"`).
    pub key_prefix: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            store_path: ".trampoline/credentials.json".to_string(),
            key_prefix: "Trampoline".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub trampoline: TrampolineConfig,
    pub git: GitConfig,
    pub trust: TrustConfig,
    pub credentials: CredentialsConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("TRAMPOLINE_SOCKET_PATH") {
            if !value.is_empty() {
                config.trampoline.socket_path = value;
            }
        }

        if let Ok(value) = env::var("TRAMPOLINE_RECURSE_SUBMODULES") {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.git.recurse_submodules = true,
                "0" | "false" | "no" | "off" => config.git.recurse_submodules = false,
                _ => {}
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
