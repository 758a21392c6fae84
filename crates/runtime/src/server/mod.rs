//! Unix-socket server that answers helper requests through a [`Dispatcher`].

mod connection;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use trampoline_core::Dispatcher;

/// Stops a running [`TrampolineServer`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// A bound trampoline socket with its session token.
///
/// Every accepted connection is served on its own task.  Requests whose token
/// does not match are answered with `null` and never reach the dispatcher.
pub struct TrampolineServer {
    listener: UnixListener,
    socket_path: PathBuf,
    token: Arc<str>,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TrampolineServer {
    /// Bind `socket_path` (replacing a stale socket file) with a fresh random
    /// session token.
    pub fn bind(socket_path: impl AsRef<Path>, dispatcher: Dispatcher) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if let Some(parent) = socket_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create socket directory {}", parent.display())
                })?;
            }
        }
        if socket_path.exists() {
            let _ = std::fs::remove_file(&socket_path);
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("failed to bind trampoline socket {}", socket_path.display()))?;
        restrict_permissions(&socket_path)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(socket = %socket_path.display(), "trampoline server listening");
        Ok(Self {
            listener,
            socket_path,
            token: Arc::from(uuid::Uuid::new_v4().to_string()),
            dispatcher: Arc::new(dispatcher),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// The secret a helper must present; handed to subprocesses through
    /// their environment.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Serve until [`ShutdownHandle::shutdown`] is called.  In-flight
    /// connections are aborted on shutdown and the socket file is removed.
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            socket_path,
            token,
            dispatcher,
            shutdown_tx: _shutdown_tx,
            mut shutdown_rx,
        } = self;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                accept = listener.accept() => {
                    let (stream, _) = accept.context("failed to accept trampoline connection")?;
                    let token = token.clone();
                    let dispatcher = dispatcher.clone();
                    connections.spawn(async move {
                        if let Err(err) = connection::handle_connection(stream, token, dispatcher).await {
                            error!(%err, "trampoline connection failed");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!(in_flight = connections.len(), "trampoline server shutting down");
        connections.shutdown().await;
        if let Err(err) = std::fs::remove_file(&socket_path) {
            debug!(%err, "socket file already gone");
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;
    use tokio::sync::oneshot;

    use trampoline_core::{TrampolineCommand, TrampolineCommandHandler, env};

    use super::*;
    use crate::TrampolineClient;
    use crate::protocol::{TrampolineRequest, TrampolineResponse, read_message, write_message};

    /// Answers `"echo:<parameter>"`, optionally suffixed with the forwarded
    /// username, and counts its calls.
    #[derive(Default)]
    struct EchoHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TrampolineCommandHandler for EchoHandler {
        fn name(&self) -> &str {
            "echo"
        }

        async fn handle(&self, command: &TrampolineCommand) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let first = command.parameters.first()?;
            match command.context().username {
                Some(user) => Some(format!("echo:{first}:{user}")),
                None => Some(format!("echo:{first}")),
            }
        }
    }

    /// Never answers; signals through `dropped` when its future is cancelled.
    struct HangingHandler {
        dropped: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    }

    struct DropSignal(Option<oneshot::Sender<()>>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    #[async_trait]
    impl TrampolineCommandHandler for HangingHandler {
        fn name(&self) -> &str {
            "hang"
        }

        async fn handle(&self, _command: &TrampolineCommand) -> Option<String> {
            let _signal = DropSignal(self.dropped.lock().unwrap().take());
            std::future::pending::<Option<String>>().await
        }
    }

    fn start(
        dir: &tempfile::TempDir,
        dispatcher: Dispatcher,
    ) -> (PathBuf, String, ShutdownHandle, tokio::task::JoinHandle<Result<()>>) {
        let socket = dir.path().join("trampoline.sock");
        let server = TrampolineServer::bind(&socket, dispatcher).unwrap();
        let token = server.token().to_string();
        let handle = server.shutdown_handle();
        let join = tokio::spawn(server.run());
        (socket, token, handle, join)
    }

    #[tokio::test]
    async fn claimed_request_gets_answer() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(EchoHandler::default()));
        let (socket, token, shutdown, join) = start(&dir, dispatcher);

        let client = TrampolineClient::new(&socket, token);
        let answer = client.send(vec!["Username: ".into()], HashMap::new()).await.unwrap();
        assert_eq!(answer.as_deref(), Some("echo:Username: "));

        shutdown.shutdown();
        join.await.unwrap().unwrap();
        assert!(!socket.exists(), "socket file removed on shutdown");
    }

    #[tokio::test]
    async fn environment_reaches_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(EchoHandler::default()));
        let (socket, token, shutdown, _join) = start(&dir, dispatcher);

        let client = TrampolineClient::new(&socket, token);
        let env = HashMap::from([(env::USERNAME.to_string(), "octocat".to_string())]);
        let answer = client.send(vec!["p".into()], env).await.unwrap();
        assert_eq!(answer.as_deref(), Some("echo:p:octocat"));
        shutdown.shutdown();
    }

    #[tokio::test]
    async fn unclaimed_request_gets_null() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, token, shutdown, _join) = start(&dir, Dispatcher::new());

        let client = TrampolineClient::new(&socket, token);
        let answer = client.send(vec!["Username: ".into()], HashMap::new()).await.unwrap();
        assert_eq!(answer, None);
        shutdown.shutdown();
    }

    #[tokio::test]
    async fn bad_token_is_rejected_without_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(EchoHandler::default());
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(handler.clone());
        let (socket, _token, shutdown, _join) = start(&dir, dispatcher);

        let client = TrampolineClient::new(&socket, "not-the-token");
        let answer = client.send(vec!["Username: ".into()], HashMap::new()).await.unwrap();
        assert_eq!(answer, None);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        shutdown.shutdown();
    }

    #[tokio::test]
    async fn helper_disconnect_cancels_pending_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(HangingHandler {
            dropped: std::sync::Mutex::new(Some(dropped_tx)),
        }));
        let (socket, token, shutdown, _join) = start(&dir, dispatcher);

        let stream = UnixStream::connect(&socket).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let request = TrampolineRequest {
            token,
            parameters: vec!["Username: ".into()],
            environment: HashMap::new(),
        };
        write_message(&mut write_half, &request).await.unwrap();
        // Give the server time to start dispatching, then hang up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(read_half);
        drop(write_half);

        tokio::time::timeout(Duration::from_secs(2), dropped_rx)
            .await
            .expect("pending dispatch should be dropped")
            .unwrap();
        shutdown.shutdown();
    }

    #[tokio::test]
    async fn shutdown_aborts_in_flight_connections() {
        let dir = tempfile::tempdir().unwrap();
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(HangingHandler {
            dropped: std::sync::Mutex::new(Some(dropped_tx)),
        }));
        let (socket, token, shutdown, join) = start(&dir, dispatcher);

        let stream = UnixStream::connect(&socket).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let request = TrampolineRequest {
            token,
            parameters: vec!["p".into()],
            environment: HashMap::new(),
        };
        write_message(&mut write_half, &request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
        dropped_rx.await.unwrap();

        // The helper side sees end of stream, not an answer.
        let mut reader = BufReader::new(read_half);
        let response: Option<TrampolineResponse> = read_message(&mut reader).await.unwrap();
        assert!(response.is_none());
        write_half.shutdown().await.ok();
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_and_restricts_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("nested").join("trampoline.sock");
        std::fs::create_dir_all(socket.parent().unwrap()).unwrap();
        std::fs::write(&socket, b"stale").unwrap();

        let server = TrampolineServer::bind(&socket, Dispatcher::new()).unwrap();
        let mode = std::fs::metadata(&socket).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(server.token().len(), 36);
    }
}
