use std::sync::Arc;

use tracing::{debug, info, warn};

use trampoline_credentials::{CredentialCache, TokenStore, key_for_endpoint};

use crate::command::TrampolineContext;
use crate::prompt::ClassifiedPrompt;
use crate::ui::TrampolineUi;

/// The two answers `ssh` accepts for an unknown host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostDecision {
    Yes,
    No,
}

impl HostDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }
}

/// Decides the answer to a classified prompt.
///
/// Consults, in order: the host trust allowlist or passphrase cache, the
/// token store, and finally the human through [`TrampolineUi`].  Approved
/// hosts are written back to the cache; entered passphrases are staged there
/// until the caller confirms the operation succeeded.
#[derive(Clone)]
pub struct Resolver {
    cache: Arc<CredentialCache>,
    tokens: Arc<dyn TokenStore>,
    ui: Arc<dyn TrampolineUi>,
    key_prefix: String,
}

impl Resolver {
    pub fn new(
        cache: Arc<CredentialCache>,
        tokens: Arc<dyn TokenStore>,
        ui: Arc<dyn TrampolineUi>,
    ) -> Self {
        Self {
            cache,
            tokens,
            ui,
            key_prefix: "Trampoline".to_string(),
        }
    }

    /// Prefix used to derive token store keys from endpoints.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The cache the caller confirms passphrases on after a successful
    /// operation.
    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// The answer for `prompt`, or `None` when this resolver cannot claim it.
    pub async fn resolve(
        &self,
        prompt: &ClassifiedPrompt,
        context: &TrampolineContext,
    ) -> Option<String> {
        match prompt {
            ClassifiedPrompt::HostAuthenticity {
                host,
                ip,
                fingerprint,
            } => Some(
                self.resolve_host(host, ip, fingerprint)
                    .await
                    .as_str()
                    .to_string(),
            ),
            ClassifiedPrompt::KeyPassphrase { key_path } => {
                Some(self.resolve_passphrase(key_path).await)
            }
            ClassifiedPrompt::UsernameRequest => {
                let (_, username) = self.identity(context, prompt)?;
                Some(username.to_string())
            }
            ClassifiedPrompt::PasswordRequest => {
                let (endpoint, username) = self.identity(context, prompt)?;
                self.stored_token(endpoint, username).await
            }
        }
    }

    pub async fn resolve_host(&self, host: &str, ip: &str, fingerprint: &str) -> HostDecision {
        if self.cache.is_host_trusted(host, fingerprint) {
            debug!(host, "host key already trusted");
            return HostDecision::Yes;
        }

        let _guard = self.cache.lock_key(&format!("host:{host}:{fingerprint}")).await;
        // Another prompt for the same key may have been approved while we waited.
        if self.cache.is_host_trusted(host, fingerprint) {
            return HostDecision::Yes;
        }

        if self.ui.confirm_ssh_host(host, ip, fingerprint).await {
            self.cache.trust_host(host, fingerprint);
            info!(host, ip, "user trusted ssh host key");
            HostDecision::Yes
        } else {
            info!(host, ip, "user declined ssh host key");
            HostDecision::No
        }
    }

    /// Always produces an answer: a cancelled dialog yields `""` so the
    /// waiting `ssh` gets a reply instead of hanging.
    pub async fn resolve_passphrase(&self, key_path: &str) -> String {
        let arrived_at = self.cache.passphrase_generation();
        let _guard = self.cache.lock_key(&format!("key:{key_path}")).await;
        if let Some(passphrase) = self.cache.passphrase(key_path, arrived_at).await {
            debug!(key_path, "using cached ssh key passphrase");
            return passphrase;
        }

        match self.ui.request_ssh_key_passphrase(key_path).await {
            Some(reply) => {
                if !reply.passphrase.is_empty() {
                    self.cache
                        .stage_passphrase(key_path, &reply.passphrase, reply.remember);
                }
                reply.passphrase
            }
            None => {
                info!(key_path, "ssh key passphrase prompt cancelled");
                String::new()
            }
        }
    }

    fn identity<'a>(
        &self,
        context: &'a TrampolineContext,
        prompt: &ClassifiedPrompt,
    ) -> Option<(&'a str, &'a str)> {
        let identity = context.identity();
        if identity.is_none() {
            debug!(kind = prompt.kind(), "no endpoint/username in context; not claiming");
        }
        identity
    }

    async fn stored_token(&self, endpoint: &str, username: &str) -> Option<String> {
        let key = key_for_endpoint(&self.key_prefix, endpoint);
        match self.tokens.get_item(&key, username).await {
            Ok(Some(token)) => Some(token),
            Ok(None) => {
                debug!(endpoint, username, "no stored token; not claiming");
                None
            }
            Err(err) => {
                warn!(%err, endpoint, "token store lookup failed; not claiming");
                None
            }
        }
    }
}
