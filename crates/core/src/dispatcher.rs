use std::sync::Arc;

use tracing::debug;

use crate::command::TrampolineCommand;
use crate::handler::{AskpassHandler, TrampolineCommandHandler};
use crate::resolver::Resolver;

/// Ordered chain of command handlers.
///
/// Built once at startup and shared by every connection.  Handlers are tried
/// in registration order; the first `Some` answer wins.
#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: Vec<Arc<dyn TrampolineCommandHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher with the askpass handler as its only entry.
    pub fn with_askpass(resolver: Resolver) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(AskpassHandler::new(resolver)));
        dispatcher
    }

    pub fn register(&mut self, handler: Arc<dyn TrampolineCommandHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub async fn dispatch(&self, command: &TrampolineCommand) -> Option<String> {
        for handler in &self.handlers {
            if let Some(answer) = handler.handle(command).await {
                debug!(handler = handler.name(), "command claimed");
                return Some(answer);
            }
        }
        debug!(
            handlers = self.handlers.len(),
            "no handler claimed the command"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Answers with a fixed string (or declines) and counts its calls.
    struct FixedHandler {
        name: &'static str,
        answer: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FixedHandler {
        fn new(name: &'static str, answer: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                answer,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TrampolineCommandHandler for FixedHandler {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, _command: &TrampolineCommand) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.map(str::to_string)
        }
    }

    fn cmd() -> TrampolineCommand {
        TrampolineCommand::new(vec!["Username: ".into()], Default::default())
    }

    #[tokio::test]
    async fn empty_dispatcher_answers_nothing() {
        assert_eq!(Dispatcher::new().dispatch(&cmd()).await, None);
    }

    #[tokio::test]
    async fn first_claiming_handler_wins() {
        let skip = FixedHandler::new("skip", None);
        let first = FixedHandler::new("first", Some("one"));
        let second = FixedHandler::new("second", Some("two"));

        let mut d = Dispatcher::new();
        d.register(skip.clone());
        d.register(first.clone());
        d.register(second.clone());

        assert_eq!(d.dispatch(&cmd()).await.as_deref(), Some("one"));
        assert_eq!(skip.calls(), 1);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn all_declining_yields_none() {
        let a = FixedHandler::new("a", None);
        let b = FixedHandler::new("b", None);
        let mut d = Dispatcher::new();
        d.register(a.clone());
        d.register(b.clone());

        assert_eq!(d.dispatch(&cmd()).await, None);
        assert_eq!((a.calls(), b.calls()), (1, 1));
    }

    #[test]
    fn handler_names_keep_registration_order() {
        let mut d = Dispatcher::new();
        d.register(FixedHandler::new("a", None));
        d.register(FixedHandler::new("b", None));
        assert_eq!(d.handler_names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn with_askpass_registers_askpass_handler() {
        use trampoline_credentials::{CredentialCache, MemoryTokenStore};

        use crate::ui::HeadlessUi;

        let resolver = Resolver::new(
            Arc::new(CredentialCache::default()),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(HeadlessUi),
        );
        let d = Dispatcher::with_askpass(resolver);
        assert_eq!(d.handler_names(), vec!["askpass"]);
        // Headless UI declines unknown hosts.
        let prompt = "The authenticity of host 'example.com (192.0.2.1)' can't be established.\nED25519 key fingerprint is SHA256:AAAA.\nAre you sure you want to continue connecting (yes/no/[fingerprint])? ";
        let answer = d
            .dispatch(&TrampolineCommand::new(vec![prompt.into()], Default::default()))
            .await;
        assert_eq!(answer.as_deref(), Some("no"));
    }
}
