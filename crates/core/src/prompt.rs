//! Classification of free-text prompts written by `ssh` and `git`.
//!
//! The process boundary only gives us the prompt string, so matching is by
//! prefix and regex.  Host-authenticity and passphrase prompts are matched in
//! full because their fields are extracted; username and password prompts are
//! matched by prefix because their trailing text differs between versions.

use std::sync::LazyLock;

use regex::Regex;

const HOST_PREFIX: &str = "The authenticity of host ";
const PASSPHRASE_PREFIX: &str = "Enter passphrase for key ";

static HOST_AUTHENTICITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^The authenticity of host '([^ ]+) \(([^)]+)\)' can't be established\.\n[A-Z0-9-]+ key fingerprint is ([^.\n]+)\.\nAre you sure you want to continue connecting \(yes/no/\[fingerprint\]\)\? $",
    )
    .expect("host authenticity pattern is valid")
});

static KEY_PASSPHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Enter passphrase for key '(.+)': $").expect("passphrase pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedPrompt {
    HostAuthenticity {
        host: String,
        ip: String,
        fingerprint: String,
    },
    KeyPassphrase {
        key_path: String,
    },
    UsernameRequest,
    PasswordRequest,
}

impl ClassifiedPrompt {
    /// Short label for logs.  Never includes prompt contents.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HostAuthenticity { .. } => "host-authenticity",
            Self::KeyPassphrase { .. } => "key-passphrase",
            Self::UsernameRequest => "username",
            Self::PasswordRequest => "password",
        }
    }
}

/// Classify a raw prompt, or `None` when it is not one we answer.
pub fn classify(raw: &str) -> Option<ClassifiedPrompt> {
    if raw.starts_with(HOST_PREFIX) {
        let caps = HOST_AUTHENTICITY.captures(raw)?;
        return Some(ClassifiedPrompt::HostAuthenticity {
            host: caps[1].to_string(),
            ip: caps[2].to_string(),
            fingerprint: caps[3].to_string(),
        });
    }

    if raw.starts_with(PASSPHRASE_PREFIX) {
        let caps = KEY_PASSPHRASE.captures(raw)?;
        return Some(ClassifiedPrompt::KeyPassphrase {
            key_path: caps[1].to_string(),
        });
    }

    if raw.starts_with("Username") {
        Some(ClassifiedPrompt::UsernameRequest)
    } else if raw.starts_with("Password") {
        Some(ClassifiedPrompt::PasswordRequest)
    } else {
        None
    }
}
