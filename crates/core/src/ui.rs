//! The human-in-the-loop side of resolution.
//!
//! The resolver never draws anything itself; it asks a [`TrampolineUi`].
//! [`ChannelUi`] is the implementation an application embeds: every question
//! is sent down an mpsc channel together with a oneshot for the answer, and
//! the UI replies whenever the user gets to it.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// What the user typed into the passphrase dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassphraseReply {
    pub passphrase: String,
    /// Persist the passphrase in the token store, not just for this session.
    pub remember: bool,
}

#[async_trait]
pub trait TrampolineUi: Send + Sync {
    /// Ask whether to trust an unknown SSH host key.  `false` on decline or
    /// dismissal.
    async fn confirm_ssh_host(&self, host: &str, ip: &str, fingerprint: &str) -> bool;

    /// Ask for the passphrase of `key_path`.  `None` when cancelled.
    async fn request_ssh_key_passphrase(&self, key_path: &str) -> Option<PassphraseReply>;
}

// ── Channel-backed UI ────────────────────────────────────────────────────────

/// A question for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiPrompt {
    AddSshHost {
        host: String,
        ip: String,
        fingerprint: String,
    },
    SshKeyPassphrase {
        key_path: String,
    },
}

/// The user's answer.  A reply of the wrong shape counts as a refusal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiReply {
    HostDecision(bool),
    Passphrase(Option<PassphraseReply>),
}

pub type UiSender = mpsc::Sender<(UiPrompt, oneshot::Sender<UiReply>)>;
pub type UiReceiver = mpsc::Receiver<(UiPrompt, oneshot::Sender<UiReply>)>;

/// Create a [`ChannelUi`] and the receiver the application answers from.
pub fn ui_channel() -> (ChannelUi, UiReceiver) {
    let (tx, rx) = mpsc::channel(16);
    (ChannelUi { tx }, rx)
}

#[derive(Debug, Clone)]
pub struct ChannelUi {
    tx: UiSender,
}

impl ChannelUi {
    async fn ask(&self, prompt: UiPrompt) -> Option<UiReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((prompt, reply_tx)).await.is_err() {
            warn!("ui prompt channel closed; treating prompt as declined");
            return None;
        }
        match reply_rx.await {
            Ok(reply) => Some(reply),
            Err(_) => {
                warn!("ui dropped prompt without answering; treating it as declined");
                None
            }
        }
    }
}

#[async_trait]
impl TrampolineUi for ChannelUi {
    async fn confirm_ssh_host(&self, host: &str, ip: &str, fingerprint: &str) -> bool {
        let prompt = UiPrompt::AddSshHost {
            host: host.to_string(),
            ip: ip.to_string(),
            fingerprint: fingerprint.to_string(),
        };
        matches!(self.ask(prompt).await, Some(UiReply::HostDecision(true)))
    }

    async fn request_ssh_key_passphrase(&self, key_path: &str) -> Option<PassphraseReply> {
        let prompt = UiPrompt::SshKeyPassphrase {
            key_path: key_path.to_string(),
        };
        match self.ask(prompt).await {
            Some(UiReply::Passphrase(reply)) => reply,
            _ => None,
        }
    }
}

// ── Headless ─────────────────────────────────────────────────────────────────

/// UI for contexts with nobody to ask: every host is declined and every
/// passphrase request is cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessUi;

#[async_trait]
impl TrampolineUi for HeadlessUi {
    async fn confirm_ssh_host(&self, host: &str, _ip: &str, _fingerprint: &str) -> bool {
        warn!(host, "no ui attached; declining unknown ssh host");
        false
    }

    async fn request_ssh_key_passphrase(&self, _key_path: &str) -> Option<PassphraseReply> {
        warn!("no ui attached; cancelling ssh key passphrase request");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_ui_round_trips_host_decision() {
        let (ui, mut rx) = ui_channel();
        let responder = tokio::spawn(async move {
            let (prompt, reply) = rx.recv().await.unwrap();
            assert_eq!(
                prompt,
                UiPrompt::AddSshHost {
                    host: "example.com".into(),
                    ip: "10.0.0.1".into(),
                    fingerprint: "SHA256:AAAA".into(),
                }
            );
            reply.send(UiReply::HostDecision(true)).unwrap();
        });
        assert!(ui.confirm_ssh_host("example.com", "10.0.0.1", "SHA256:AAAA").await);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn channel_ui_passphrase_reply() {
        let (ui, mut rx) = ui_channel();
        tokio::spawn(async move {
            let (_prompt, reply) = rx.recv().await.unwrap();
            let _ = reply.send(UiReply::Passphrase(Some(PassphraseReply {
                passphrase: "pw".into(),
                remember: false,
            })));
        });
        let reply = ui.request_ssh_key_passphrase("/k").await.unwrap();
        assert_eq!(reply.passphrase, "pw");
        assert!(!reply.remember);
    }

    #[tokio::test]
    async fn closed_channel_declines() {
        let (ui, rx) = ui_channel();
        drop(rx);
        assert!(!ui.confirm_ssh_host("h", "ip", "fp").await);
        assert_eq!(ui.request_ssh_key_passphrase("/k").await, None);
    }

    #[tokio::test]
    async fn dropped_reply_declines() {
        let (ui, mut rx) = ui_channel();
        tokio::spawn(async move {
            let (_prompt, reply) = rx.recv().await.unwrap();
            drop(reply);
        });
        assert!(!ui.confirm_ssh_host("h", "ip", "fp").await);
    }

    #[tokio::test]
    async fn mismatched_reply_declines() {
        let (ui, mut rx) = ui_channel();
        tokio::spawn(async move {
            let (_prompt, reply) = rx.recv().await.unwrap();
            let _ = reply.send(UiReply::HostDecision(true));
        });
        assert_eq!(ui.request_ssh_key_passphrase("/k").await, None);
    }

    #[tokio::test]
    async fn headless_declines_everything() {
        assert!(!HeadlessUi.confirm_ssh_host("h", "ip", "fp").await);
        assert_eq!(HeadlessUi.request_ssh_key_passphrase("/k").await, None);
    }
}
