//! Helper mode: forward one prompt to the trampoline server and print the
//! answer for the waiting git or ssh process.

use std::io::Write;

use anyhow::Result;
use tracing::{debug, warn};

use trampoline_runtime::{TrampolineClient, forwarded_environment};

/// Exit code for the process: 0 with the answer on stdout, 1 with nothing on
/// stdout when the prompt went unanswered or the server was unreachable.
pub(crate) async fn run_helper() -> i32 {
    let outcome = forward_prompt().await;
    emit_answer(&mut std::io::stdout().lock(), outcome)
}

async fn forward_prompt() -> Result<Option<String>> {
    let client = TrampolineClient::from_env()?;
    // Prompt text names paths, which need not be UTF-8.
    let parameters = std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    let environment = forwarded_environment(std::env::vars_os());
    Ok(client.send(parameters, environment).await?)
}

fn emit_answer(out: &mut impl Write, outcome: Result<Option<String>>) -> i32 {
    match outcome {
        Ok(Some(answer)) => {
            if writeln!(out, "{answer}").and_then(|_| out.flush()).is_err() {
                return 1;
            }
            0
        }
        Ok(None) => {
            debug!("prompt not answered");
            1
        }
        Err(err) => {
            warn!(%err, "trampoline helper failed");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn answer_is_printed_with_newline() {
        let mut out = Vec::new();
        assert_eq!(emit_answer(&mut out, Ok(Some("yes".into()))), 0);
        assert_eq!(out, b"yes\n");
    }

    #[test]
    fn empty_answer_still_succeeds() {
        let mut out = Vec::new();
        assert_eq!(emit_answer(&mut out, Ok(Some(String::new()))), 0);
        assert_eq!(out, b"\n");
    }

    #[test]
    fn unanswered_prompt_prints_nothing() {
        let mut out = Vec::new();
        assert_eq!(emit_answer(&mut out, Ok(None)), 1);
        assert!(out.is_empty());
    }

    #[test]
    fn failure_prints_nothing() {
        let mut out = Vec::new();
        assert_eq!(emit_answer(&mut out, Err(anyhow!("socket unreachable"))), 1);
        assert!(out.is_empty());
    }
}
