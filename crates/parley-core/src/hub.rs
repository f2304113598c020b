//! The single task that owns the [`SignalingGateway`].
//!
//! Socket tasks never touch gateway state directly; they send [`Command`]s
//! over a bounded queue and the hub applies them one at a time.

use std::time::Duration;

use chrono::Utc;
use parley_models::gateway::InboundEvent;
use parley_models::meeting::MeetingSummary;
use parley_models::{ChatId, ConnectionId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::CoreError;
use crate::gateway::{GatewayStats, SignalingGateway};
use crate::rooms::Outbox;
use crate::GatewayConfig;

#[derive(Debug)]
pub enum Command {
    Connect {
        connection_id: ConnectionId,
        outbox: Outbox,
    },
    Inbound {
        connection_id: ConnectionId,
        event: InboundEvent,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<GatewayStats>,
    },
    ActiveMeeting {
        chat_id: ChatId,
        reply: oneshot::Sender<Option<MeetingSummary>>,
    },
    Shutdown,
}

/// Cloneable sender side of the hub queue.
#[derive(Clone, Debug)]
pub struct GatewayHandle {
    commands: mpsc::Sender<Command>,
}

impl GatewayHandle {
    async fn send(&self, command: Command) -> Result<(), CoreError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CoreError::Unavailable)
    }

    pub async fn connect(&self, connection_id: ConnectionId, outbox: Outbox) -> Result<(), CoreError> {
        self.send(Command::Connect {
            connection_id,
            outbox,
        })
        .await
    }

    pub async fn dispatch(&self, connection_id: ConnectionId, event: InboundEvent) -> Result<(), CoreError> {
        self.send(Command::Inbound {
            connection_id,
            event,
        })
        .await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), CoreError> {
        self.send(Command::Disconnect { connection_id }).await
    }

    pub async fn stats(&self) -> Result<GatewayStats, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| CoreError::Unavailable)
    }

    pub async fn active_meeting(&self, chat_id: &str) -> Result<Option<MeetingSummary>, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ActiveMeeting {
            chat_id: chat_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| CoreError::Unavailable)
    }

    /// Ask the hub to stop after the commands already queued.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.send(Command::Shutdown).await
    }
}

/// Start the hub on the current runtime.
pub fn spawn(config: GatewayConfig) -> (GatewayHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
    let task = tokio::spawn(run(SignalingGateway::new(&config), rx, config.sweep_interval()));
    (GatewayHandle { commands: tx }, task)
}

async fn run(mut gateway: SignalingGateway, mut commands: mpsc::Receiver<Command>, sweep_every: Duration) {
    let mut sweep = tokio::time::interval(sweep_every);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(sweep_secs = sweep_every.as_secs(), "signaling hub started");

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                match command {
                    Command::Connect { connection_id, outbox } => gateway.connect(connection_id, outbox),
                    Command::Inbound { connection_id, event } => gateway.handle(connection_id, event),
                    Command::Disconnect { connection_id } => gateway.disconnect(connection_id),
                    Command::Stats { reply } => {
                        let _ = reply.send(gateway.stats());
                    }
                    Command::ActiveMeeting { chat_id, reply } => {
                        let _ = reply.send(gateway.active_meeting(&chat_id));
                    }
                    Command::Shutdown => break,
                }
            }
            _ = sweep.tick() => {
                let report = gateway.sweep(Utc::now());
                if !report.expired_calls.is_empty() {
                    tracing::debug!(expired = report.expired_calls.len(), "sweep expired ringing calls");
                }
            }
        }
    }

    let stats = gateway.stats();
    tracing::info!(
        connections = stats.connections,
        active_calls = stats.active_calls,
        active_meetings = stats.active_meetings,
        "signaling hub stopped"
    );
}
