use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use trampoline_config::AppConfig;
use trampoline_core::{Dispatcher, Resolver, TrampolineUi};
use trampoline_credentials::{CredentialCache, TokenStore};
use trampoline_runtime::TrampolineServer;

use crate::terminal::TerminalUi;
use crate::token;

/// Askpass resolver over the configured token store and pinned hosts.
pub(crate) fn build_resolver(config: &AppConfig, ui: Arc<dyn TrampolineUi>) -> Resolver {
    let tokens: Arc<dyn TokenStore> = Arc::new(token::store(config));
    let cache = CredentialCache::new(config.trust.pinned_hosts.clone()).with_store(tokens.clone());
    Resolver::new(Arc::new(cache), tokens, ui).with_key_prefix(config.credentials.key_prefix.clone())
}

pub(crate) async fn run(config: &AppConfig) -> Result<()> {
    // Outside an in-process checkout nothing reports success, so entered
    // passphrases are never confirmed and offering to remember them is moot.
    let resolver = build_resolver(config, Arc::new(TerminalUi::default()));
    let server = TrampolineServer::bind(
        &config.trampoline.socket_path,
        Dispatcher::with_askpass(resolver),
    )?;

    println!("export TRAMPOLINE_SOCKET={}", server.socket_path().display());
    println!("export TRAMPOLINE_TOKEN={}", server.token());

    let shutdown = server.shutdown_handle();
    let serving = tokio::spawn(server.run());

    tokio::signal::ctrl_c().await?;
    info!("interrupt received; stopping trampoline server");
    shutdown.shutdown();
    serving.await??;
    Ok(())
}
