//! Prompt classification, credential resolution and command dispatch.
//!
//! A blocked `git`/`ssh` process hands its prompt to the helper, the helper
//! forwards it as a [`TrampolineCommand`], and the [`Dispatcher`] finds a
//! handler that can answer it.

pub mod command;
pub mod dispatcher;
pub mod handler;
pub mod prompt;
pub mod resolver;
pub mod ui;

#[cfg(test)]
mod testing;

pub use command::{TrampolineCommand, TrampolineContext, env};
pub use dispatcher::Dispatcher;
pub use handler::{AskpassHandler, TrampolineCommandHandler};
pub use prompt::{ClassifiedPrompt, classify};
pub use resolver::{HostDecision, Resolver};
pub use ui::{
    ChannelUi, HeadlessUi, PassphraseReply, TrampolineUi, UiPrompt, UiReceiver, UiReply,
    UiSender, ui_channel,
};
