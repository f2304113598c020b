use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use parley_core::{AppConfig, AppState};
use parley_models::gateway::{InboundEvent, OutboundEvent, ERR_INVALID_EVENT, ERR_RATE_LIMITED};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use crate::session::Session;

const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_INTERNAL_ERROR: u16 = 1011;
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

fn wire_log_ws_in(session: &Session, payload: &str, frame_type: &str) {
    tracing::trace!(
        target: "wire",
        transport = "socket",
        direction = "in",
        frame_type,
        connection_id = %session.connection_id,
        user_id = session.user_label(),
        bytes = payload.len(),
        payload,
        "server_in"
    );
}

fn wire_log_ws_out(session: &Session, payload: &str, event: &str) {
    tracing::trace!(
        target: "wire",
        transport = "socket",
        direction = "out",
        event,
        connection_id = %session.connection_id,
        user_id = session.user_label(),
        bytes = payload.len(),
        payload,
        "server_out"
    );
}

async fn send_event_logged(
    sender: &mut (impl SinkExt<Message> + Unpin),
    session: &Session,
    event: &OutboundEvent,
) -> Result<(), ()> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(event = event.name(), "failed to encode outbound event: {e}");
            return Ok(());
        }
    };
    wire_log_ws_out(session, &payload, event.name());
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn send_ws_close_logged(
    sender: &mut (impl SinkExt<Message> + Unpin),
    code: u16,
    reason: &str,
    connection_id: Option<&uuid::Uuid>,
) -> Result<(), ()> {
    tracing::trace!(
        target: "wire",
        transport = "socket",
        direction = "out",
        frame_type = "close",
        connection_id = ?connection_id,
        code,
        reason,
        "server_out"
    );
    sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
        .map_err(|_| ())
}

/// Releases the global slot however the socket task ends.
struct ConnectionGuard {
    acquired: bool,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.acquired {
            ACTIVE_CONNECTIONS.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }
}

fn try_acquire_global_connection_slot(max: usize) -> bool {
    let mut current = ACTIVE_CONNECTIONS.load(AtomicOrdering::SeqCst);
    loop {
        if current >= max {
            return false;
        }
        match ACTIVE_CONNECTIONS.compare_exchange(
            current,
            current + 1,
            AtomicOrdering::SeqCst,
            AtomicOrdering::SeqCst,
        ) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

/// Inbound budgets keyed by user once identified, by connection before that.
/// Shared by every socket of the process.
struct EventRateLimits {
    /// Every inbound event.
    events: DefaultKeyedRateLimiter<String>,
    /// `typing` / `stop typing` on top of the general budget.
    typing: DefaultKeyedRateLimiter<String>,
}

static EVENT_RATE_LIMITS: OnceLock<EventRateLimits> = OnceLock::new();

fn per_minute(limit: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN))
}

fn event_rate_limits(config: &AppConfig) -> &'static EventRateLimits {
    EVENT_RATE_LIMITS.get_or_init(|| {
        let rate_limits = EventRateLimits {
            events: RateLimiter::keyed(per_minute(config.max_events_per_minute)),
            typing: RateLimiter::keyed(per_minute(config.max_typing_events_per_minute)),
        };

        // Drop idle keys so departed users do not accumulate.
        tokio::spawn(async {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Some(rl) = EVENT_RATE_LIMITS.get() {
                    rl.events.retain_recent();
                    rl.typing.retain_recent();
                    rl.events.shrink_to_fit();
                    rl.typing.shrink_to_fit();
                    tracing::trace!("rate limiter cleanup: pruned stale entries");
                }
            }
        });

        rate_limits
    })
}

impl EventRateLimits {
    /// `Err(retry_after_ms)` when over budget.
    fn check(&self, key: &String, event: &InboundEvent) -> Result<(), u64> {
        let now = DefaultClock::default().now();
        if let Err(not_until) = self.events.check_key(key) {
            return Err(not_until.wait_time_from(now).as_millis().max(1) as u64);
        }
        if event.is_typing() {
            if let Err(not_until) = self.typing.check_key(key) {
                return Err(not_until.wait_time_from(now).as_millis().max(1) as u64);
            }
        }
        Ok(())
    }
}

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let mut connection_guard = ConnectionGuard { acquired: false };
    if !try_acquire_global_connection_slot(state.config.max_connections) {
        let (mut sender, _) = socket.split();
        tracing::warn!(
            max = state.config.max_connections,
            "socket refused: server at connection capacity"
        );
        let _ = send_ws_close_logged(
            &mut sender,
            CLOSE_TRY_AGAIN_LATER,
            "Server is at connection capacity",
            None,
        )
        .await;
        return;
    }
    connection_guard.acquired = true;

    let (mut sender, receiver) = socket.split();
    let session = Session::new();
    let connection_id = session.connection_id;
    let (outbox, outbound_rx) = mpsc::channel(state.config.outbound_buffer.max(1));

    if let Err(e) = state.gateway.connect(connection_id, outbox).await {
        tracing::error!(connection_id = %connection_id, "signaling hub rejected connection: {e}");
        let _ = send_ws_close_logged(
            &mut sender,
            CLOSE_INTERNAL_ERROR,
            "Signaling unavailable",
            Some(&connection_id),
        )
        .await;
        return;
    }
    tracing::debug!(
        connection_id = %connection_id,
        active = ACTIVE_CONNECTIONS.load(AtomicOrdering::SeqCst),
        "socket connected"
    );

    let session = run_session(sender, receiver, session, &state, outbound_rx).await;

    if let Err(e) = state.gateway.disconnect(connection_id).await {
        tracing::warn!(connection_id = %connection_id, "disconnect not delivered to hub: {e}");
    }
    drop(connection_guard);
    let lifetime = chrono::Utc::now() - session.connected_at;
    tracing::debug!(
        connection_id = %connection_id,
        user_id = session.user_label(),
        lifetime_secs = lifetime.num_seconds(),
        "socket released"
    );
}

async fn run_session(
    mut sender: impl SinkExt<Message> + Unpin,
    mut receiver: impl StreamExt<Item = Result<Message, axum::Error>> + Unpin,
    mut session: Session,
    state: &AppState,
    mut outbound_rx: mpsc::Receiver<OutboundEvent>,
) -> Session {
    let idle_timeout = Duration::from_secs(state.config.idle_timeout_secs.max(1));
    let rate_limits = event_rate_limits(&state.config);
    let mut ws_ping_interval =
        tokio::time::interval(Duration::from_secs(state.config.ping_interval_secs.max(1)));
    ws_ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let idle_sleep = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle_sleep);
    let shutdown = state.shutdown.notified();
    tokio::pin!(shutdown);

    let (disconnect_reason, timed_out) = loop {
        tokio::select! {
            msg = receiver.next() => {
                idle_sleep.as_mut().reset(Instant::now() + idle_timeout);
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        wire_log_ws_in(&session, &text, "text");
                        let event = match serde_json::from_str::<InboundEvent>(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                tracing::debug!(
                                    connection_id = %session.connection_id,
                                    "undecodable frame: {e}"
                                );
                                let reply = OutboundEvent::error(ERR_INVALID_EVENT, e.to_string());
                                if send_event_logged(&mut sender, &session, &reply).await.is_err() {
                                    break ("websocket send error".to_string(), false);
                                }
                                continue;
                            }
                        };
                        if let Err(retry_after_ms) = rate_limits.check(&session.rate_key(), &event) {
                            if event.is_typing() {
                                tracing::debug!(
                                    connection_id = %session.connection_id,
                                    user_id = session.user_label(),
                                    "rate limited (silent drop)"
                                );
                                continue;
                            }
                            let reply = OutboundEvent::error(
                                ERR_RATE_LIMITED,
                                format!("{} rate limited, retry after {retry_after_ms}ms", event.name()),
                            );
                            if send_event_logged(&mut sender, &session, &reply).await.is_err() {
                                break ("websocket send error".to_string(), false);
                            }
                            continue;
                        }
                        session.observe(&event);
                        if state.gateway.dispatch(session.connection_id, event).await.is_err() {
                            let _ = send_ws_close_logged(
                                &mut sender,
                                CLOSE_INTERNAL_ERROR,
                                "Signaling unavailable",
                                Some(&session.connection_id),
                            )
                            .await;
                            break ("signaling hub unavailable".to_string(), false);
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        wire_log_ws_in(&session, &format!("<{} bytes>", bytes.len()), "binary");
                        let reply = OutboundEvent::error(ERR_INVALID_EVENT, "binary frames are not supported");
                        if send_event_logged(&mut sender, &session, &reply).await.is_err() {
                            break ("websocket send error".to_string(), false);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break (
                            if let Some(frame) = frame {
                                format!(
                                    "client close frame (code={}, reason={})",
                                    frame.code,
                                    frame.reason
                                )
                            } else {
                                "client close frame (no code/reason)".to_string()
                            },
                            false,
                        );
                    }
                    Some(Err(err)) => {
                        break (format!("websocket receive error: {err}"), false);
                    }
                    None => {
                        break ("websocket stream ended".to_string(), false);
                    }
                    _ => {}
                }
            }
            event = outbound_rx.recv() => {
                let Some(event) = event else {
                    break ("outbound queue closed".to_string(), false);
                };
                if send_event_logged(&mut sender, &session, &event).await.is_err() {
                    break ("websocket send error".to_string(), false);
                }
            }
            () = &mut idle_sleep => {
                break (
                    format!("idle timeout after {}s", idle_timeout.as_secs()),
                    true,
                );
            }
            _ = ws_ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break ("websocket ping send error".to_string(), false);
                }
            }
            () = &mut shutdown => {
                let _ = send_ws_close_logged(
                    &mut sender,
                    CLOSE_GOING_AWAY,
                    "Server shutting down",
                    Some(&session.connection_id),
                )
                .await;
                break ("server shutdown".to_string(), false);
            }
        }
    };
    if timed_out {
        tracing::warn!(
            connection_id = %session.connection_id,
            user_id = session.user_label(),
            "client disconnected: {disconnect_reason}"
        );
    } else {
        tracing::info!(
            connection_id = %session.connection_id,
            user_id = session.user_label(),
            "client disconnected: {disconnect_reason}"
        );
    }
    session
}
