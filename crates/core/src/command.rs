use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Environment variables shared by the invocation wrapper (which sets them on
/// the git process), the helper (which forwards them) and the handlers (which
/// read them).
pub mod env {
    /// Set to `askpass` to make the `trampoline` binary act as the helper.
    pub const HELPER: &str = "TRAMPOLINE_HELPER";
    pub const SOCKET: &str = "TRAMPOLINE_SOCKET";
    pub const TOKEN: &str = "TRAMPOLINE_TOKEN";
    pub const ENDPOINT: &str = "TRAMPOLINE_ENDPOINT";
    pub const USERNAME: &str = "TRAMPOLINE_USERNAME";

    /// Prefix of every variable the helper forwards to the dispatcher.
    pub const PREFIX: &str = "TRAMPOLINE_";
}

/// One interactive request surfaced by a blocked subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrampolineCommand {
    /// The arguments the helper was invoked with; for askpass this is the
    /// literal prompt text.
    pub parameters: Vec<String>,
    pub environment_variables: HashMap<String, String>,
}

impl TrampolineCommand {
    pub fn new(parameters: Vec<String>, environment_variables: HashMap<String, String>) -> Self {
        Self {
            parameters,
            environment_variables,
        }
    }

    pub fn context(&self) -> TrampolineContext {
        TrampolineContext::from_environment(&self.environment_variables)
    }
}

/// Identity of the operation that spawned the prompting process.
///
/// Prompt text never says which account a git operation runs as, so the
/// invocation wrapper passes it alongside.  Empty values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrampolineContext {
    pub endpoint: Option<String>,
    pub username: Option<String>,
}

impl TrampolineContext {
    pub fn from_environment(vars: &HashMap<String, String>) -> Self {
        let non_empty = |name: &str| vars.get(name).filter(|v| !v.is_empty()).cloned();
        Self {
            endpoint: non_empty(env::ENDPOINT),
            username: non_empty(env::USERNAME),
        }
    }

    /// `(endpoint, username)` when both are known.
    pub fn identity(&self) -> Option<(&str, &str)> {
        Some((self.endpoint.as_deref()?, self.username.as_deref()?))
    }
}
