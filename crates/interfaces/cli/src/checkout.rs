use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{ArgGroup, Args};
use tokio::sync::mpsc;
use tracing::info;

use trampoline_config::AppConfig;
use trampoline_core::Dispatcher;
use trampoline_credentials::{TokenStore, key_for_endpoint};
use trampoline_exec::{
    Checkout, CheckoutProgress, CheckoutTarget, ConflictResolution, GitAccount, Repository,
    TrampolineSession,
};
use trampoline_runtime::TrampolineServer;

use crate::serve::build_resolver;
use crate::terminal::TerminalUi;
use crate::token;

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("target")
        .required(true)
        .args(["branch", "commit", "ours", "theirs"])
))]
pub(crate) struct CheckoutArgs {
    /// Repository working directory.
    #[arg(long, default_value = ".")]
    repo: PathBuf,
    /// Remote URL used to pick a proxy.
    #[arg(long)]
    remote_url: Option<String>,
    #[arg(long)]
    branch: Option<String>,
    /// Treat `--branch` as living on this remote and create a local branch.
    #[arg(long, requires = "branch")]
    remote: Option<String>,
    #[arg(long)]
    commit: Option<String>,
    /// Resolve a conflicted path with our side.
    #[arg(long, value_name = "PATH")]
    ours: Option<String>,
    /// Resolve a conflicted path with their side.
    #[arg(long, value_name = "PATH")]
    theirs: Option<String>,
    /// Account endpoint, e.g. https://api.github.com.
    #[arg(long, requires = "login")]
    endpoint: Option<String>,
    #[arg(long, requires = "endpoint")]
    login: Option<String>,
    /// Print progress events as JSON lines on stderr.
    #[arg(long)]
    progress: bool,
}

impl CheckoutArgs {
    fn target(&self) -> Result<CheckoutTarget> {
        if let Some(branch) = &self.branch {
            return Ok(match &self.remote {
                Some(remote) => CheckoutTarget::RemoteBranch {
                    name: format!("{remote}/{branch}"),
                    name_without_remote: branch.clone(),
                },
                None => CheckoutTarget::LocalBranch {
                    name: branch.clone(),
                },
            });
        }
        if let Some(sha) = &self.commit {
            return Ok(CheckoutTarget::Commit { sha: sha.clone() });
        }
        let side = |path: &String, resolution| CheckoutTarget::ConflictSide {
            path: path.clone(),
            resolution,
        };
        match (&self.ours, &self.theirs) {
            (Some(path), _) => Ok(side(path, ConflictResolution::Ours)),
            (_, Some(path)) => Ok(side(path, ConflictResolution::Theirs)),
            _ => bail!("nothing to check out"),
        }
    }

    /// The account named on the command line, with its token looked up in
    /// `store` (empty when none is stored).
    async fn account(&self, store: &dyn TokenStore, prefix: &str) -> Result<Option<GitAccount>> {
        let (Some(endpoint), Some(login)) = (&self.endpoint, &self.login) else {
            return Ok(None);
        };
        let token = store
            .get_item(&key_for_endpoint(prefix, endpoint), login)
            .await?
            .unwrap_or_default();
        Ok(Some(GitAccount {
            endpoint: endpoint.clone(),
            login: login.clone(),
            token,
        }))
    }

    fn repository(&self) -> Repository {
        let repository = Repository::new(&self.repo);
        match &self.remote_url {
            Some(url) => repository.with_remote_url(url),
            None => repository,
        }
    }
}

pub(crate) async fn run(config: &AppConfig, args: CheckoutArgs) -> Result<()> {
    let target = args.target()?;
    let account = args
        .account(&token::store(config), &config.credentials.key_prefix)
        .await?;

    let resolver = build_resolver(config, Arc::new(TerminalUi::offering_remember()));
    let cache = resolver.cache().clone();
    let socket_path =
        std::env::temp_dir().join(format!("trampoline-{}.sock", std::process::id()));
    let server = TrampolineServer::bind(&socket_path, Dispatcher::with_askpass(resolver))?;
    let session = TrampolineSession::new(
        crate::helper_path(config)?,
        server.socket_path(),
        server.token(),
    );
    let shutdown = server.shutdown_handle();
    let serving = tokio::spawn(server.run());

    let (tx, mut rx) = mpsc::unbounded_channel::<CheckoutProgress>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                eprintln!("{line}");
            }
        }
    });

    let checkout = Checkout::new(&config.git, session);
    let result = checkout
        .checkout(
            &args.repository(),
            &target,
            account.as_ref(),
            args.progress.then_some(&tx),
        )
        .await;
    drop(tx);
    let _ = printer.await;

    shutdown.shutdown();
    serving.await??;

    result?;
    // Passphrases entered during a successful checkout are known good.
    cache.confirm_passphrases().await;
    info!(checkout = target.label(), "checkout complete");
    Ok(())
}
