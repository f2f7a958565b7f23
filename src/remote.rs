//! Line-based remote control over TCP.
//!
//! Clients send one command per line and receive one notification per line:
//!
//! ```text
//! -> TAKE_SAMPLE          <- SAMPLE 0.0125
//! -> ZERO                 <- ZERO_COMPLETE
//! -> BOGUS                <- ERROR Protocol error: unknown command 'BOGUS'
//! ```
//!
//! Completion notifications are pushed to every connected client whenever a
//! session completes, whoever started it. Sample values are sent in
//! millimetres regardless of the display unit.

use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::acquisition::SessionMode;
use crate::actor::LevelHandle;
use crate::error::{AppResult, LevelError};
use crate::messages::{Completion, LevelEvent};

/// Inbound command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Append a sample.
    TakeSample,
    /// Establish a new zero reference.
    Zero,
}

impl RemoteCommand {
    /// Session mode this command starts.
    pub fn mode(self) -> SessionMode {
        match self {
            RemoteCommand::TakeSample => SessionMode::SAMPLE,
            RemoteCommand::Zero => SessionMode::Zeroing,
        }
    }
}

impl FromStr for RemoteCommand {
    type Err = LevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "TAKE_SAMPLE" => Ok(RemoteCommand::TakeSample),
            "ZERO" => Ok(RemoteCommand::Zero),
            other => Err(LevelError::Protocol(format!("unknown command '{}'", other))),
        }
    }
}

/// Outbound notification.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteReply {
    /// A sample was committed at this height (mm).
    Sample(f64),
    /// A zeroing session completed.
    ZeroComplete,
    /// A command failed or a session was aborted.
    Error(String),
}

impl fmt::Display for RemoteReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteReply::Sample(y) => write!(f, "SAMPLE {}", y),
            RemoteReply::ZeroComplete => f.write_str("ZERO_COMPLETE"),
            RemoteReply::Error(msg) => write!(f, "ERROR {}", msg),
        }
    }
}

/// Notification for a completed session.
pub fn reply_for(completion: &Completion) -> RemoteReply {
    match (completion.was_zeroing, completion.latest_sample) {
        (true, _) => RemoteReply::ZeroComplete,
        (false, Some(sample)) => RemoteReply::Sample(sample.y),
        (false, None) => RemoteReply::Sample(completion.value),
    }
}

/// Accept clients until the listener fails.
pub async fn serve(listener: TcpListener, handle: LevelHandle) -> AppResult<()> {
    info!("Remote control listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Remote client connected: {}", peer);
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_client(stream, handle).await {
                warn!("Remote client {} failed: {}", peer, e);
            }
            info!("Remote client disconnected: {}", peer);
        });
    }
}

async fn serve_client(stream: TcpStream, handle: LevelHandle) -> AppResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut events = handle.subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                debug!("Remote command: {}", line.trim());
                let started = match line.parse::<RemoteCommand>() {
                    Ok(command) => handle.start(command.mode()).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = started {
                    if matches!(e, LevelError::ActorUnavailable) {
                        return Err(e);
                    }
                    send(&mut writer, &RemoteReply::Error(e.to_string())).await?;
                }
            }
            event = events.recv() => match event {
                Ok(LevelEvent::Completed(completion)) => {
                    send(&mut writer, &reply_for(&completion)).await?;
                }
                Ok(LevelEvent::Aborted { reason, .. }) => {
                    send(&mut writer, &RemoteReply::Error(reason)).await?;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Remote client missed {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, reply: &RemoteReply) -> AppResult<()> {
    writer.write_all(format!("{}\n", reply).as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
