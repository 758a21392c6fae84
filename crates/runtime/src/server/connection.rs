//! One helper connection: read a request, dispatch it, write the answer.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use trampoline_core::Dispatcher;

use crate::protocol::{TrampolineRequest, TrampolineResponse, read_message, write_message};

pub(super) async fn handle_connection(
    stream: UnixStream,
    token: Arc<str>,
    dispatcher: Arc<Dispatcher>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let Some(request) = read_message::<_, TrampolineRequest>(&mut reader).await? else {
        return Ok(());
    };

    if !tokens_match(&request.token, &token) {
        warn!("rejected trampoline request with invalid session token");
        write_message(&mut write_half, &TrampolineResponse::default()).await?;
        return Ok(());
    }

    let command = request.into_command();
    debug!(parameters = command.parameters.len(), "dispatching trampoline command");

    // The helper holds its end open until it has the answer; end of stream
    // means the prompting process is gone and nobody is waiting.
    let answer = tokio::select! {
        answer = dispatcher.dispatch(&command) => answer,
        _ = wait_for_hangup(&mut reader) => {
            info!("helper disconnected; abandoning pending command");
            return Ok(());
        }
    };

    write_message(&mut write_half, &TrampolineResponse { answer }).await?;
    Ok(())
}

/// Compares every byte, so timing does not reveal how long a matching
/// prefix was.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (presented, expected) = (presented.as_bytes(), expected.as_bytes());
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

async fn wait_for_hangup<R: AsyncRead + Unpin>(reader: &mut R) {
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}
