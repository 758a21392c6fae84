use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Which authentication symptom git reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// `fatal: Authentication failed for '<url>'`
    AuthenticationFailed,
    /// `could not read Username`: no credentials were available to git.
    UsernameUnavailable,
    /// `invalid username or password`
    InvalidCredentials,
    /// HTTP 403 from the remote.
    Forbidden,
    /// The remote denies the repository exists (what hosts answer for
    /// private repositories without access).
    RepositoryNotFound,
    /// `Could not read from remote repository`, usually SSH key trouble.
    RepositoryUnreadable,
}

// Ordered: the more specific symptom wins when git prints several.
static AUTH_PATTERNS: LazyLock<Vec<(Regex, AuthFailure)>> = LazyLock::new(|| {
    [
        (r"fatal: Authentication failed", AuthFailure::AuthenticationFailed),
        (r"(?i)could not read Username", AuthFailure::UsernameUnavailable),
        (r"(?i)invalid username or password", AuthFailure::InvalidCredentials),
        (r"The requested URL returned error: 403", AuthFailure::Forbidden),
        (r"ERROR: Repository not found", AuthFailure::RepositoryNotFound),
        (r"fatal: repository '.+' not found", AuthFailure::RepositoryNotFound),
        (r"Could not read from remote repository", AuthFailure::RepositoryUnreadable),
    ]
    .into_iter()
    .map(|(pattern, kind)| {
        (
            Regex::new(pattern).expect("authentication pattern is valid"),
            kind,
        )
    })
    .collect()
});

impl AuthFailure {
    /// The first authentication symptom found in `stderr`.
    pub fn classify(stderr: &str) -> Option<Self> {
        AUTH_PATTERNS
            .iter()
            .find(|(pattern, _)| pattern.is_match(stderr))
            .map(|(_, kind)| *kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication failed",
            Self::UsernameUnavailable => "no credentials available",
            Self::InvalidCredentials => "invalid username or password",
            Self::Forbidden => "access forbidden",
            Self::RepositoryNotFound => "repository not found",
            Self::RepositoryUnreadable => "could not read from remote repository",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {kind}: {stderr}")]
    Authentication { kind: AuthFailure, stderr: String },

    #[error("git exited with {}: {stderr}", exit_label(.code))]
    Failed { code: Option<i32>, stderr: String },

    #[error("git i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl GitError {
    /// Error for a git process that exited unsuccessfully.
    pub fn from_exit(code: Option<i32>, stderr: String) -> Self {
        match AuthFailure::classify(&stderr) {
            Some(kind) => Self::Authentication { kind, stderr },
            None => Self::Failed { code, stderr },
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Authentication { stderr, .. } | Self::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
