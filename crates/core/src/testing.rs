//! Scripted [`TrampolineUi`] shared by the crate's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::ui::{PassphraseReply, TrampolineUi};

pub(crate) struct ScriptedUi {
    approve_hosts: bool,
    passphrase: Option<PassphraseReply>,
    delay: Duration,
    host_prompts: AtomicUsize,
    passphrase_prompts: AtomicUsize,
}

impl ScriptedUi {
    fn build(approve_hosts: bool, passphrase: Option<PassphraseReply>) -> Self {
        Self {
            approve_hosts,
            passphrase,
            delay: Duration::ZERO,
            host_prompts: AtomicUsize::new(0),
            passphrase_prompts: AtomicUsize::new(0),
        }
    }

    /// Trusts every host; cancels passphrase dialogs.
    pub(crate) fn approving() -> Self {
        Self::build(true, None)
    }

    /// Declines every host; cancels passphrase dialogs.
    pub(crate) fn declining() -> Self {
        Self::build(false, None)
    }

    pub(crate) fn with_passphrase(passphrase: &str, remember: bool) -> Self {
        Self::build(
            false,
            Some(PassphraseReply {
                passphrase: passphrase.to_string(),
                remember,
            }),
        )
    }

    /// Make every answer take `delay`, so concurrent prompts overlap.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn host_prompts(&self) -> usize {
        self.host_prompts.load(Ordering::SeqCst)
    }

    pub(crate) fn passphrase_prompts(&self) -> usize {
        self.passphrase_prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrampolineUi for ScriptedUi {
    async fn confirm_ssh_host(&self, _host: &str, _ip: &str, _fingerprint: &str) -> bool {
        self.host_prompts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.approve_hosts
    }

    async fn request_ssh_key_passphrase(&self, _key_path: &str) -> Option<PassphraseReply> {
        self.passphrase_prompts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.passphrase.clone()
    }
}
