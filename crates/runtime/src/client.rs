use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::UnixStream;
use tracing::warn;

use trampoline_core::env;

use crate::protocol::{
    ProtocolError, TrampolineRequest, TrampolineResponse, read_message, write_message,
};

const CONNECT_ATTEMPTS: usize = 3;

/// Helper-side connection to a [`crate::TrampolineServer`].
#[derive(Debug, Clone)]
pub struct TrampolineClient {
    socket_path: PathBuf,
    token: String,
}

impl TrampolineClient {
    pub fn new(socket_path: impl AsRef<Path>, token: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            token: token.into(),
        }
    }

    /// Socket and token from the environment the invocation wrapper set up.
    pub fn from_env() -> Result<Self, ProtocolError> {
        let socket = std::env::var_os(env::SOCKET).ok_or(ProtocolError::MissingEnv(env::SOCKET))?;
        let token = std::env::var(env::TOKEN).map_err(|_| ProtocolError::MissingEnv(env::TOKEN))?;
        Ok(Self::new(PathBuf::from(socket), token))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Forward one command and wait for the answer.  `Ok(None)` means the
    /// server answered but no handler claimed the command.
    pub async fn send(
        &self,
        parameters: Vec<String>,
        environment: HashMap<String, String>,
    ) -> Result<Option<String>, ProtocolError> {
        let stream = self.connect_with_backoff(CONNECT_ATTEMPTS).await?;
        let (read_half, mut write_half) = stream.into_split();

        let request = TrampolineRequest {
            token: self.token.clone(),
            parameters,
            environment,
        };
        write_message(&mut write_half, &request).await?;

        // The write half stays open: closing it tells the server we gave up.
        let mut reader = BufReader::new(read_half);
        let response: TrampolineResponse = read_message(&mut reader)
            .await?
            .ok_or(ProtocolError::ConnectionClosed)?;
        Ok(response.answer)
    }

    async fn connect_with_backoff(&self, max_attempts: usize) -> Result<UnixStream, ProtocolError> {
        let mut delay = Duration::from_millis(50);
        let attempts = max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => return Ok(stream),
                Err(err) if attempt + 1 < attempts => {
                    warn!(attempt, %err, "trampoline connect failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(ProtocolError::Connect {
                        path: self.socket_path.clone(),
                        source,
                    });
                }
            }
        }
    }
}

/// The subset of `vars` the helper forwards: every `TRAMPOLINE_*` variable
/// except the socket token, which travels in the request itself.
///
/// Takes the raw process environment; unrelated variables may hold any bytes.
pub fn forwarded_environment(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> HashMap<String, String> {
    vars.into_iter()
        .filter_map(|(name, value)| {
            let name = name.into_string().ok()?;
            (name.starts_with(env::PREFIX) && name != env::TOKEN)
                .then(|| (name, value.to_string_lossy().into_owned()))
        })
        .collect()
}
