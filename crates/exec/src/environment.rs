//! Environment for git processes that may need to authenticate.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::debug;

use trampoline_core::env;

/// An account on a hosting service.  The token never enters the child
/// environment; the resolver answers password prompts from the token store.
/// An empty token means none is on record for this login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitAccount {
    pub endpoint: String,
    pub login: String,
    pub token: String,
}

/// Working directory of a repository and, when configured, its remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub path: PathBuf,
    pub remote_url: Option<String>,
}

impl Repository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            remote_url: None,
        }
    }

    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }
}

/// Where a spawned process finds the trampoline: the helper program, the
/// server socket, and the token the server expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrampolineSession {
    pub helper_path: PathBuf,
    pub socket_path: PathBuf,
    pub token: String,
}

impl TrampolineSession {
    pub fn new(
        helper_path: impl Into<PathBuf>,
        socket_path: impl AsRef<Path>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            helper_path: helper_path.into(),
            socket_path: socket_path.as_ref().to_path_buf(),
            token: token.into(),
        }
    }

}

// ── Proxies ──────────────────────────────────────────────────────────────────

/// Finds the proxy git should use to reach a URL.
pub trait ProxyResolver: Send + Sync {
    fn resolve(&self, url: &str) -> Option<String>;
}

/// Never proxies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProxy;

impl ProxyResolver for NoProxy {
    fn resolve(&self, _url: &str) -> Option<String> {
        None
    }
}

/// Resolves proxies from the conventional environment variables
/// (`HTTPS_PROXY`, `ALL_PROXY`, `NO_PROXY`) of the parent process.
///
/// Returns `None` when git would already find the proxy on its own, i.e.
/// when the lowercase `<scheme>_proxy` variable is set.
#[derive(Debug, Clone, Default)]
pub struct SystemProxyResolver {
    vars: HashMap<String, String>,
}

impl SystemProxyResolver {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: vars.into_iter().collect(),
        }
    }

    fn var(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|name| self.vars.get(*name))
            .map(String::as_str)
            .find(|v| !v.is_empty())
    }

    fn bypassed(&self, host: &str) -> bool {
        let Some(no_proxy) = self.var(&["no_proxy", "NO_PROXY"]) else {
            return false;
        };
        no_proxy.split(',').map(str::trim).any(|entry| {
            let entry = entry.trim_start_matches('.');
            entry == "*"
                || (!entry.is_empty()
                    && (host == entry || host.ends_with(&format!(".{entry}"))))
        })
    }
}

impl ProxyResolver for SystemProxyResolver {
    fn resolve(&self, url: &str) -> Option<String> {
        let (scheme, host) = scheme_and_host(url)?;
        let lowercase = format!("{scheme}_proxy");
        if self.var(&[lowercase.as_str()]).is_some() || self.bypassed(&host) {
            return None;
        }
        let candidates: &[&str] = if scheme == "https" {
            &["HTTPS_PROXY", "all_proxy", "ALL_PROXY"]
        } else {
            &["all_proxy", "ALL_PROXY"]
        };
        self.var(candidates).map(str::to_string)
    }
}

/// Lowercased `http`/`https` scheme and host of `url`; `None` for any other
/// scheme (ssh remotes are never proxied this way).
fn scheme_and_host(url: &str) -> Option<(String, String)> {
    let (scheme, rest) = url.split_once("://")?;
    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let host = match host_port.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or(v6),
        None => host_port.split(':').next().unwrap_or(host_port),
    };
    Some((scheme, host.to_ascii_lowercase()))
}

/// URL used to pick a proxy: the repository remote, else the account
/// endpoint, else `generic_url`.
pub fn fallback_url_for_proxy_resolve(
    account: Option<&GitAccount>,
    repository: &Repository,
    generic_url: &str,
) -> String {
    repository
        .remote_url
        .clone()
        .or_else(|| account.map(|a| a.endpoint.clone()))
        .unwrap_or_else(|| generic_url.to_string())
}

/// The variables to set on a git process so every credential prompt it or
/// `ssh` raises is routed to the trampoline.
pub fn env_for_remote_operation(
    session: &TrampolineSession,
    account: Option<&GitAccount>,
    proxy_url: &str,
    proxies: &dyn ProxyResolver,
) -> BTreeMap<String, String> {
    let helper = session.helper_path.to_string_lossy().into_owned();
    let mut vars = BTreeMap::from([
        ("GIT_ASKPASS".to_string(), helper.clone()),
        ("SSH_ASKPASS".to_string(), helper),
        ("SSH_ASKPASS_REQUIRE".to_string(), "force".to_string()),
        ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
        (env::HELPER.to_string(), "askpass".to_string()),
        (
            env::SOCKET.to_string(),
            session.socket_path.to_string_lossy().into_owned(),
        ),
        (env::TOKEN.to_string(), session.token.clone()),
    ]);

    if let Some(account) = account {
        vars.insert(env::ENDPOINT.to_string(), account.endpoint.clone());
        vars.insert(env::USERNAME.to_string(), account.login.clone());
    }

    if let Some((scheme, _)) = scheme_and_host(proxy_url) {
        if let Some(proxy) = proxies.resolve(proxy_url) {
            debug!(url = proxy_url, "routing git through proxy");
            vars.insert(format!("{scheme}_proxy"), proxy);
        }
    }

    vars
}
