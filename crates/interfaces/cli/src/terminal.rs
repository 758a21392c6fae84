//! Answers host-trust and passphrase prompts at the controlling terminal.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use trampoline_core::{PassphraseReply, TrampolineUi};

/// Prompts on stderr and reads answers from stdin, one question at a time.
#[derive(Default)]
pub(crate) struct TerminalUi {
    // Concurrent prompts would interleave on the terminal.
    turn: Mutex<()>,
    offer_remember: bool,
}

impl TerminalUi {
    /// Also ask whether an entered passphrase should be kept in the token
    /// store once the operation succeeds.
    pub(crate) fn offering_remember() -> Self {
        Self {
            offer_remember: true,
            ..Self::default()
        }
    }

    async fn ask(&self, question: String) -> Option<String> {
        let _turn = self.turn.lock().await;
        let answer = tokio::task::spawn_blocking(move || read_answer(&question)).await;
        match answer {
            Ok(Ok(line)) => line,
            Ok(Err(err)) => {
                warn!(%err, "failed to read answer from terminal");
                None
            }
            Err(err) => {
                warn!(%err, "terminal prompt task failed");
                None
            }
        }
    }
}

/// `None` at end of input.
fn read_answer(question: &str) -> io::Result<Option<String>> {
    let mut stderr = io::stderr().lock();
    write!(stderr, "{question}")?;
    stderr.flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl TrampolineUi for TerminalUi {
    async fn confirm_ssh_host(&self, host: &str, ip: &str, fingerprint: &str) -> bool {
        let question = format!(
            "\nThe authenticity of host '{host}' ({ip}) can't be established.\n\
             Key fingerprint: {fingerprint}\n\
             Trust this host and continue connecting? [y/N] "
        );
        self.ask(question).await.is_some_and(|a| is_affirmative(&a))
    }

    async fn request_ssh_key_passphrase(&self, key_path: &str) -> Option<PassphraseReply> {
        let passphrase = self
            .ask(format!("\nPassphrase for SSH key {key_path} (empty to cancel): "))
            .await
            .filter(|p| !p.is_empty())?;
        let remember = self.offer_remember
            && self
                .ask("Remember this passphrase? [y/N] ".to_string())
                .await
                .is_some_and(|a| is_affirmative(&a));
        Some(PassphraseReply {
            passphrase,
            remember,
        })
    }
}
