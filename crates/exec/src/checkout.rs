use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use trampoline_config::GitConfig;

use crate::environment::{
    GitAccount, ProxyResolver, Repository, SystemProxyResolver, TrampolineSession,
    env_for_remote_operation, fallback_url_for_proxy_resolve,
};
use crate::error::GitError;
use crate::progress::{CheckoutProgress, CheckoutProgressParser, ProgressLineSplitter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    Ours,
    Theirs,
}

impl ConflictResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ours => "ours",
            Self::Theirs => "theirs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutTarget {
    LocalBranch {
        name: String,
    },
    /// `name` is the remote-tracking ref (`origin/feature`); checking it out
    /// creates the local branch `name_without_remote`.
    RemoteBranch {
        name: String,
        name_without_remote: String,
    },
    Commit {
        sha: String,
    },
    ConflictSide {
        path: String,
        resolution: ConflictResolution,
    },
}

impl CheckoutTarget {
    /// `RemoteBranch` from a remote-tracking name such as `origin/feature`.
    pub fn remote_branch(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        let (_, local) = name.split_once('/')?;
        if local.is_empty() {
            return None;
        }
        let name_without_remote = local.to_string();
        Some(Self::RemoteBranch {
            name,
            name_without_remote,
        })
    }

    /// What progress events report as their target.
    pub fn label(&self) -> &str {
        match self {
            Self::LocalBranch { name } | Self::RemoteBranch { name, .. } => name,
            Self::Commit { sha } => sha,
            Self::ConflictSide { path, .. } => path,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::LocalBranch { name } | Self::RemoteBranch { name, .. } => {
                format!("Checking out branch {name}")
            }
            Self::Commit { sha } => format!("Checking out commit {sha}"),
            Self::ConflictSide { path, resolution } => {
                format!("Checking out {} version of {path}", resolution.as_str())
            }
        }
    }

    fn is_branch(&self) -> bool {
        matches!(self, Self::LocalBranch { .. } | Self::RemoteBranch { .. })
    }
}

/// Arguments that keep any configured credential helper out of the way so
/// prompts reach the trampoline.
pub fn network_arguments() -> [&'static str; 2] {
    ["-c", "credential.helper="]
}

pub fn checkout_args(target: &CheckoutTarget, progress: bool, recurse_submodules: bool) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if target.is_branch() {
        args.extend(network_arguments().map(String::from));
    }
    args.push("checkout".into());
    if progress {
        args.push("--progress".into());
    }

    match target {
        CheckoutTarget::LocalBranch { name } => args.push(name.clone()),
        CheckoutTarget::RemoteBranch {
            name,
            name_without_remote,
        } => args.extend([name.clone(), "-b".into(), name_without_remote.clone()]),
        CheckoutTarget::Commit { sha } => args.push(sha.clone()),
        CheckoutTarget::ConflictSide { path, resolution } => {
            args.extend([format!("--{}", resolution.as_str()), "--".into(), path.clone()]);
            return args;
        }
    }

    if recurse_submodules {
        args.push("--recurse-submodules".into());
    }
    args.push("--".into());
    args
}

/// Runs `git checkout` with the trampoline wired in.
pub struct Checkout {
    git_path: PathBuf,
    session: TrampolineSession,
    recurse_submodules: bool,
    track_lfs_progress: bool,
    fallback_remote_url: String,
    proxies: Arc<dyn ProxyResolver>,
}

impl Checkout {
    pub fn new(config: &GitConfig, session: TrampolineSession) -> Self {
        Self {
            git_path: PathBuf::from(&config.git_path),
            session,
            recurse_submodules: config.recurse_submodules,
            track_lfs_progress: config.track_lfs_progress,
            fallback_remote_url: config.fallback_remote_url.clone(),
            proxies: Arc::new(SystemProxyResolver::from_env()),
        }
    }

    pub fn with_proxy_resolver(mut self, proxies: Arc<dyn ProxyResolver>) -> Self {
        self.proxies = proxies;
        self
    }

    /// Check out `target` in `repository`.
    ///
    /// With a `progress` sender, `--progress` is passed, an initial event
    /// with value 0 is sent before git starts, and every recognised progress
    /// line on stderr becomes a further event.
    pub async fn checkout(
        &self,
        repository: &Repository,
        target: &CheckoutTarget,
        account: Option<&GitAccount>,
        progress: Option<&UnboundedSender<CheckoutProgress>>,
    ) -> Result<(), GitError> {
        let proxy_url =
            fallback_url_for_proxy_resolve(account, repository, &self.fallback_remote_url);
        let env = env_for_remote_operation(&self.session, account, &proxy_url, self.proxies.as_ref());
        let args = checkout_args(target, progress.is_some(), self.recurse_submodules);
        if let Some(account) = account.filter(|a| a.token.is_empty()) {
            warn!(
                endpoint = %account.endpoint,
                login = %account.login,
                "account has no token; password prompts will go unanswered"
            );
        }

        let reporter = progress.map(|tx| {
            let title = target.title();
            let label = target.label().to_string();
            let _ = tx.send(CheckoutProgress::new(&title, &label, 0.0));
            ProgressReporter {
                tx,
                title,
                target: label,
                parser: CheckoutProgressParser::new(self.track_lfs_progress),
            }
        });

        info!(checkout = target.label(), repo = %repository.path.display(), "git checkout");
        self.run(&repository.path, &args, &env, reporter.as_ref()).await
    }

    /// Restore `paths` from `HEAD`, discarding working-tree changes.
    pub async fn checkout_paths<S: AsRef<str>>(
        &self,
        repository: &Repository,
        paths: &[S],
    ) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["checkout".to_string(), "HEAD".into(), "--".into()];
        args.extend(paths.iter().map(|p| p.as_ref().to_string()));
        debug!(count = paths.len(), "git checkout HEAD -- <paths>");
        self.run(&repository.path, &args, &BTreeMap::new(), None).await
    }

    async fn run(
        &self,
        cwd: &Path,
        args: &[String],
        env: &BTreeMap<String, String>,
        reporter: Option<&ProgressReporter<'_>>,
    ) -> Result<(), GitError> {
        let mut child = tokio::process::Command::new(&self.git_path)
            .args(args)
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GitError::Spawn {
                program: self.git_path.display().to_string(),
                source,
            })?;

        let mut stderr_text = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            let mut splitter = ProgressLineSplitter::default();
            let mut buf = [0u8; 4096];
            loop {
                let n = stderr.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                for line in splitter.push(&buf[..n]) {
                    handle_line(&line, reporter, &mut stderr_text);
                }
            }
            if let Some(line) = splitter.finish() {
                handle_line(&line, reporter, &mut stderr_text);
            }
        }

        let status = child.wait().await?;
        if status.success() {
            return Ok(());
        }
        let err = GitError::from_exit(status.code(), stderr_text);
        warn!(code = ?status.code(), authentication = err.is_authentication(), "git checkout failed");
        Err(err)
    }
}

struct ProgressReporter<'a> {
    tx: &'a UnboundedSender<CheckoutProgress>,
    title: String,
    target: String,
    parser: CheckoutProgressParser,
}

impl ProgressReporter<'_> {
    /// `true` when the line was a progress line.
    fn report(&self, line: &str) -> bool {
        let Some(parsed) = self.parser.parse(line) else {
            return false;
        };
        let event = CheckoutProgress::new(&self.title, &self.target, parsed.fraction)
            .with_description(parsed.text);
        let _ = self.tx.send(event);
        true
    }
}

fn handle_line(line: &str, reporter: Option<&ProgressReporter<'_>>, stderr_text: &mut String) {
    if reporter.is_some_and(|r| r.report(line)) {
        return;
    }
    stderr_text.push_str(line);
    stderr_text.push('\n');
}
