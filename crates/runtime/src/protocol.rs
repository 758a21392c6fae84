use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use trampoline_core::TrampolineCommand;

/// Longest line either side accepts.  Prompts and the forwarded environment
/// are far smaller.
pub(crate) const MAX_MESSAGE_BYTES: u64 = 64 * 1024;

/// One line from the helper: the session token plus the command it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrampolineRequest {
    pub token: String,
    pub parameters: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl TrampolineRequest {
    pub fn into_command(self) -> TrampolineCommand {
        TrampolineCommand::new(self.parameters, self.environment)
    }
}

/// One line back to the helper.  `answer: null` means nobody claimed it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrampolineResponse {
    pub answer: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("failed to connect to trampoline socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("trampoline socket i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed trampoline message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("trampoline server closed the connection without answering")]
    ConnectionClosed,

    #[error("trampoline message exceeds the size limit")]
    MessageTooLarge,
}

pub(crate) async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = serde_json::to_string(message)?;
    writer.write_all(encoded.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// `Ok(None)` on a clean end of stream before any bytes.
pub(crate) async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let read = (&mut *reader)
        .take(MAX_MESSAGE_BYTES)
        .read_line(&mut line)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if read as u64 == MAX_MESSAGE_BYTES && !line.ends_with('\n') {
        return Err(ProtocolError::MessageTooLarge);
    }
    Ok(Some(serde_json::from_str(line.trim())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let json = r#"{"token":"t","parameters":["Username: "],"environment":{"TRAMPOLINE_USERNAME":"octocat"}}"#;
        let request: TrampolineRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.token, "t");
        let command = request.into_command();
        assert_eq!(command.parameters, vec!["Username: ".to_string()]);
        assert_eq!(
            command.context().username.as_deref(),
            Some("octocat")
        );
    }

    #[test]
    fn request_environment_defaults_to_empty() {
        let request: TrampolineRequest =
            serde_json::from_str(r#"{"token":"t","parameters":[]}"#).unwrap();
        assert!(request.environment.is_empty());
    }

    #[test]
    fn unclaimed_response_is_null() {
        let encoded = serde_json::to_string(&TrampolineResponse::default()).unwrap();
        assert_eq!(encoded, r#"{"answer":null}"#);
    }

    #[tokio::test]
    async fn read_message_handles_eof() {
        let mut empty: &[u8] = b"";
        let message: Option<TrampolineResponse> = read_message(&mut empty).await.unwrap();
        assert!(message.is_none());

        let mut line: &[u8] = b"{\"answer\":\"yes\"}\n";
        let message: Option<TrampolineResponse> = read_message(&mut line).await.unwrap();
        assert_eq!(message.unwrap().answer.as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn oversized_line_is_rejected() {
        let mut oversized = vec![b'a'; MAX_MESSAGE_BYTES as usize + 10];
        oversized.push(b'\n');
        let mut reader: &[u8] = &oversized;
        let err = read_message::<_, TrampolineResponse>(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge), "{err}");
    }
}
