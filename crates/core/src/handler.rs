use async_trait::async_trait;
use tracing::debug;

use crate::command::TrampolineCommand;
use crate::prompt::classify;
use crate::resolver::Resolver;

/// Something that can answer a [`TrampolineCommand`].
///
/// `None` means "not mine": the dispatcher moves on to the next handler.  A
/// handler that claims a command must return `Some`, even when the answer is
/// a refusal such as `"no"` or `""`.
#[async_trait]
pub trait TrampolineCommandHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, command: &TrampolineCommand) -> Option<String>;
}

/// Answers `GIT_ASKPASS` / `SSH_ASKPASS` prompts.
///
/// Claims only commands with exactly one parameter (the prompt text) that
/// [`classify`] recognises.
pub struct AskpassHandler {
    resolver: Resolver,
}

impl AskpassHandler {
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl TrampolineCommandHandler for AskpassHandler {
    fn name(&self) -> &str {
        "askpass"
    }

    async fn handle(&self, command: &TrampolineCommand) -> Option<String> {
        let [raw] = command.parameters.as_slice() else {
            debug!(
                parameters = command.parameters.len(),
                "askpass expects exactly one parameter"
            );
            return None;
        };

        let Some(prompt) = classify(raw) else {
            debug!("unrecognized askpass prompt");
            return None;
        };

        debug!(kind = prompt.kind(), "classified askpass prompt");
        self.resolver.resolve(&prompt, &command.context()).await
    }
}
