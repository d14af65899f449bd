//! Interactive TTY bridge
//!
//! Runs a shell under exec with a pseudo-terminal inside a container and relays it to one
//! WebSocket client. Each session owns exactly one exec attachment and one connection; it ends
//! as soon as either side stops, and both are released on every exit path.

mod utf8;

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message};
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TtyConfig;
use crate::engine::{ContainerEngine, EngineError, ExecAttachment, ExecInput, ExecOutput, ExecSpec};

use utf8::Utf8Carry;

/// Step of session setup that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    CreateExec,
    AttachExec,
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupStage::CreateExec => f.write_str("create exec"),
            SetupStage::AttachExec => f.write_str("attach to exec"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TtyError {
    #[error("container id is required")]
    MissingContainerId,

    #[error("failed to {stage} in container {container_id}: {source}")]
    SessionSetup {
        container_id: String,
        stage: SetupStage,
        source: EngineError,
    },
}

/// Why a relay stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    ClientError(String),
    Idle,
    ShellExited,
    ShellError(String),
    InputFailed(String),
    DeliveryFailed(String),
    Shutdown,
}

impl SessionEnd {
    fn close_frame(&self) -> CloseFrame<'static> {
        let (code, reason) = match self {
            SessionEnd::ClientClosed => (close_code::NORMAL, "client closed"),
            SessionEnd::ShellExited => (close_code::NORMAL, "shell exited"),
            SessionEnd::Idle => (close_code::NORMAL, "idle timeout"),
            SessionEnd::Shutdown => (close_code::AWAY, "server shutting down"),
            SessionEnd::ClientError(_) => (close_code::ERROR, "client error"),
            SessionEnd::ShellError(_) => (close_code::ERROR, "shell stream error"),
            SessionEnd::InputFailed(_) => (close_code::ERROR, "shell input failed"),
            SessionEnd::DeliveryFailed(_) => (close_code::ERROR, "delivery failed"),
        };
        CloseFrame {
            code,
            reason: reason.into(),
        }
    }
}

/// An attached exec waiting to be relayed
pub struct TtySession {
    pub session_id: Uuid,
    pub container_id: String,
    pub exec_id: String,
    pub created_at: DateTime<Utc>,
    attachment: ExecAttachment,
}

impl std::fmt::Debug for TtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtySession")
            .field("session_id", &self.session_id)
            .field("container_id", &self.container_id)
            .field("exec_id", &self.exec_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Opens exec sessions and relays them to clients
pub struct TtyBridge {
    engine: Arc<dyn ContainerEngine>,
    config: TtyConfig,
    active: AtomicU64,
}

/// Counts a session as active for as long as it lives
struct ActiveSession<'a>(&'a AtomicU64);

impl<'a> ActiveSession<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_tty_session_opened();
        Self(counter)
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::record_tty_session_closed();
    }
}

impl TtyBridge {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: TtyConfig) -> Self {
        Self {
            engine,
            config,
            active: AtomicU64::new(0),
        }
    }

    /// Reject a blank target before any engine resource or connection upgrade is spent on it
    pub fn validate_target(container_id: &str) -> Result<&str, TtyError> {
        let container_id = container_id.trim();
        if container_id.is_empty() {
            return Err(TtyError::MissingContainerId);
        }
        Ok(container_id)
    }

    /// Create an exec running the configured shell and attach to it
    pub async fn open(&self, container_id: &str) -> Result<TtySession, TtyError> {
        let container_id = Self::validate_target(container_id)?;

        let spec = ExecSpec {
            cmd: self.config.shell.clone(),
            env: self
                .config
                .term
                .iter()
                .map(|term| format!("TERM={}", term))
                .collect(),
        };

        let setup_error = |stage: SetupStage| {
            move |source: EngineError| TtyError::SessionSetup {
                container_id: container_id.to_string(),
                stage,
                source,
            }
        };

        let exec_id = self
            .engine
            .create_exec(container_id, &spec)
            .await
            .map_err(setup_error(SetupStage::CreateExec))?;

        let attachment = self
            .engine
            .attach_exec(&exec_id)
            .await
            .map_err(setup_error(SetupStage::AttachExec))?;

        Ok(TtySession {
            session_id: Uuid::new_v4(),
            container_id: container_id.to_string(),
            exec_id,
            created_at: Utc::now(),
            attachment,
        })
    }

    /// Open a session and relay it. Setup failures are reported to this client only.
    pub async fn serve<Si, St, E>(
        &self,
        container_id: &str,
        mut outgoing: Si,
        incoming: St,
        shutdown: CancellationToken,
    ) -> Result<SessionEnd, TtyError>
    where
        Si: Sink<Message> + Unpin,
        Si::Error: Display,
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let session = match self.open(container_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "Console session setup failed");
                let _ = outgoing.send(Message::Text(format!("\r\n{}\r\n", e))).await;
                let _ = outgoing
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::ERROR,
                        reason: "session setup failed".into(),
                    })))
                    .await;
                return Err(e);
            }
        };

        Ok(self.relay(session, outgoing, incoming, shutdown).await)
    }

    /// Pump bytes both ways until either side stops, then release both
    pub async fn relay<Si, St, E>(
        &self,
        session: TtySession,
        mut outgoing: Si,
        mut incoming: St,
        shutdown: CancellationToken,
    ) -> SessionEnd
    where
        Si: Sink<Message> + Unpin,
        Si::Error: Display,
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let TtySession {
            session_id,
            container_id,
            exec_id,
            created_at,
            attachment,
        } = session;
        let ExecAttachment {
            mut output,
            mut input,
        } = attachment;

        let _active = ActiveSession::enter(&self.active);
        let write_timeout = self.config.write_timeout();
        let (activity, idle_watch) = watch::channel(());

        info!(
            session_id = %session_id,
            container_id = %container_id,
            exec_id = %exec_id,
            "Console session started"
        );

        let end = tokio::select! {
            end = pump_inbound(&mut incoming, &mut input, &activity, write_timeout) => end,
            end = pump_outbound(&mut output, &mut outgoing, &activity, self.config.chunk_size, write_timeout) => end,
            end = idle_watchdog(idle_watch, self.config.idle_timeout()) => end,
            _ = shutdown.cancelled() => SessionEnd::Shutdown,
        };

        // Teardown: close the shell's input, tell the client, then drop both sides
        if let Err(e) = tokio::time::timeout(write_timeout, input.shutdown())
            .await
            .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into()))
        {
            debug!(session_id = %session_id, error = %e, "Exec input shutdown failed");
        }
        let _ = tokio::time::timeout(
            write_timeout,
            outgoing.send(Message::Close(Some(end.close_frame()))),
        )
        .await;
        drop(input);
        drop(output);

        info!(
            session_id = %session_id,
            container_id = %container_id,
            duration_secs = (Utc::now() - created_at).num_seconds(),
            end = ?end,
            "Console session closed"
        );

        end
    }

    pub fn active_sessions(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

/// Ends the session once neither direction has moved data for `idle_timeout`
async fn idle_watchdog(mut activity: watch::Receiver<()>, idle_timeout: Option<Duration>) -> SessionEnd {
    let Some(limit) = idle_timeout else {
        return std::future::pending().await;
    };

    loop {
        match tokio::time::timeout(limit, activity.changed()).await {
            Ok(Ok(())) => continue,
            // Sender lives as long as the relay
            Ok(Err(_)) => return std::future::pending().await,
            Err(_) => return SessionEnd::Idle,
        }
    }
}

/// Client messages into the shell's stdin
async fn pump_inbound<St, E>(
    incoming: &mut St,
    input: &mut ExecInput,
    activity: &watch::Sender<()>,
    write_timeout: Duration,
) -> SessionEnd
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = incoming.next().await;
        if matches!(next, Some(Ok(_))) {
            activity.send_replace(());
        }

        let payload = match next {
            None | Some(Ok(Message::Close(_))) => return SessionEnd::ClientClosed,
            Some(Err(e)) => return SessionEnd::ClientError(e.to_string()),
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            // Ping/pong only keep the session alive
            Some(Ok(_)) => continue,
        };

        if payload.is_empty() {
            continue;
        }

        let write = async {
            input.write_all(&payload).await?;
            input.flush().await
        };
        match tokio::time::timeout(write_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return SessionEnd::InputFailed(e.to_string()),
            Err(_) => {
                return SessionEnd::InputFailed(format!(
                    "write timed out after {}s",
                    write_timeout.as_secs()
                ))
            }
        }
    }
}

/// Shell output to the client as text messages of at most `chunk_size` input bytes
async fn pump_outbound<Si>(
    output: &mut ExecOutput,
    outgoing: &mut Si,
    activity: &watch::Sender<()>,
    chunk_size: usize,
    write_timeout: Duration,
) -> SessionEnd
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let mut carry = Utf8Carry::default();

    loop {
        let bytes = match output.next().await {
            Some(Ok(bytes)) => {
                activity.send_replace(());
                bytes
            }
            Some(Err(e)) => return SessionEnd::ShellError(e.to_string()),
            None => {
                let rest = carry.finish();
                if let Err(end) = send_text(outgoing, rest, write_timeout).await {
                    return end;
                }
                return SessionEnd::ShellExited;
            }
        };

        for chunk in bytes.chunks(chunk_size.max(1)) {
            let text = carry.decode(chunk);
            if let Err(end) = send_text(outgoing, text, write_timeout).await {
                return end;
            }
        }
    }
}

async fn send_text<Si>(outgoing: &mut Si, text: String, write_timeout: Duration) -> Result<(), SessionEnd>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    if text.is_empty() {
        return Ok(());
    }

    match tokio::time::timeout(write_timeout, outgoing.send(Message::Text(text))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionEnd::DeliveryFailed(e.to_string())),
        Err(_) => Err(SessionEnd::DeliveryFailed(format!(
            "send timed out after {}s",
            write_timeout.as_secs()
        ))),
    }
}
