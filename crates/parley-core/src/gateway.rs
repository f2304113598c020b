//! Event dispatch over the signaling tables.
//!
//! `SignalingGateway` owns every table and is driven by exactly one task (see
//! [`crate::hub`]), so its methods take `&mut self` and never lock.

use chrono::{DateTime, Duration, Utc};
use parley_models::call::CallInitiate;
use parley_models::gateway::{InboundEvent, OutboundEvent};
use parley_models::meeting::MeetingSummary;
use parley_models::user::Setup;
use parley_models::{CallId, ConnectionId, MeetingId, UserId};
use serde::Serialize;

use crate::call::{CallPolicy, CallSessionManager, REASON_BUSY, REASON_DISCONNECT};
use crate::error::CoreError;
use crate::meeting::MeetingSessionManager;
use crate::presence;
use crate::registry::ConnectionRegistry;
use crate::relay;
use crate::rooms::{Outbox, Room, RoomMultiplexer};
use crate::GatewayConfig;

/// Point-in-time counters for the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub registered_connections: usize,
    pub online_users: usize,
    pub active_calls: usize,
    pub active_meetings: usize,
    pub meeting_participants: usize,
}

/// What a periodic sweep cleaned up.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_calls: Vec<CallId>,
}

/// 0 disables expiry. Values chrono cannot represent also disable it.
fn ring_timeout(secs: u64) -> Option<Duration> {
    if secs == 0 {
        return None;
    }
    let timeout = i64::try_from(secs).ok().and_then(Duration::try_seconds);
    if timeout.is_none() {
        tracing::warn!(
            ring_timeout_secs = secs,
            "ring timeout out of range, ringing calls will not expire"
        );
    }
    timeout
}

pub struct SignalingGateway {
    max_connections_per_user: usize,
    registry: ConnectionRegistry,
    rooms: RoomMultiplexer,
    calls: CallSessionManager,
    meetings: MeetingSessionManager,
}

impl SignalingGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        let ring_timeout = ring_timeout(config.ring_timeout_secs);
        Self {
            max_connections_per_user: config.max_connections_per_user,
            registry: ConnectionRegistry::new(),
            rooms: RoomMultiplexer::new(),
            calls: CallSessionManager::new(CallPolicy {
                reject_duplicates: config.reject_duplicate_initiate,
                ring_timeout,
            }),
            meetings: MeetingSessionManager::new(config.max_meeting_participants),
        }
    }

    /// Attach a transport connection. It receives broadcasts right away but
    /// has no identity until `setup`.
    pub fn connect(&mut self, connection_id: ConnectionId, outbox: Outbox) {
        self.rooms.attach(connection_id, outbox);
        tracing::debug!(connection_id = %connection_id, "connection attached");
    }

    pub fn handle(&mut self, connection_id: ConnectionId, event: InboundEvent) {
        if !self.rooms.is_attached(connection_id) {
            tracing::debug!(
                connection_id = %connection_id,
                event = event.name(),
                "event from detached connection ignored"
            );
            return;
        }

        match event {
            InboundEvent::Setup(setup) => self.setup(connection_id, setup),
            InboundEvent::GetOnlineUsers => {
                presence::send_online_users_to(&self.registry, &self.rooms, connection_id);
            }
            InboundEvent::JoinChat(chat_id) => {
                if self.rooms.join(connection_id, Room::Chat(chat_id.clone())) {
                    tracing::debug!(connection_id = %connection_id, chat_id = %chat_id, "joined chat");
                }
            }
            InboundEvent::LeaveChat(chat_id) => {
                self.rooms.leave(connection_id, &Room::Chat(chat_id));
            }
            InboundEvent::Typing(chat_id) => {
                relay::relay_typing(&self.rooms, connection_id, chat_id, true);
            }
            InboundEvent::StopTyping(chat_id) => {
                relay::relay_typing(&self.rooms, connection_id, chat_id, false);
            }
            InboundEvent::NewMessage(message) => {
                relay::relay_new_message(&self.rooms, message);
            }
            other => {
                let Some(user_id) = self.registry.user_of(connection_id).cloned() else {
                    self.rooms.emit_to_connection(
                        connection_id,
                        OutboundEvent::error(
                            CoreError::SetupRequired.code(),
                            format!("{} requires setup first", other.name()),
                        ),
                    );
                    return;
                };
                self.handle_registered(connection_id, &user_id, other);
            }
        }
    }

    fn setup(&mut self, connection_id: ConnectionId, setup: Setup) {
        let info = setup.info();
        let already_registered = self.registry.connection(connection_id).is_some();
        if !already_registered
            && self.registry.connections_of(&setup.user_id) >= self.max_connections_per_user
        {
            let err = CoreError::TooManyConnections(self.max_connections_per_user);
            tracing::warn!(
                connection_id = %connection_id,
                user_id = %setup.user_id,
                "setup refused: {err}"
            );
            self.rooms
                .emit_to_connection(connection_id, OutboundEvent::error(err.code(), err.to_string()));
            return;
        }

        let changed = self.registry.register(connection_id, &setup.user_id, info);
        // A repeated setup naming someone else keeps the original identity.
        let Some(user_id) = self.registry.user_of(connection_id).cloned() else {
            return;
        };
        self.rooms.join(connection_id, Room::User(user_id.clone()));
        self.rooms
            .emit_to_connection(connection_id, OutboundEvent::Connected);
        presence::send_online_users_to(&self.registry, &self.rooms, connection_id);
        if changed {
            presence::broadcast_online_users(&self.registry, &self.rooms);
        }
        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            devices = self.registry.connections_of(&user_id),
            "connection registered"
        );
    }

    fn handle_registered(&mut self, connection_id: ConnectionId, user_id: &str, event: InboundEvent) {
        match event {
            InboundEvent::CallInitiate(request) => self.initiate_call(connection_id, user_id, request),
            InboundEvent::CallAccept(request) => {
                let call_id = request.call_id.clone();
                let result = self.calls.accept(&mut self.rooms, connection_id, user_id, request);
                self.report_call(connection_id, Some(call_id), result);
            }
            InboundEvent::CallReject(request) => {
                let call_id = request.call_id.clone();
                let result = self.calls.reject(&mut self.rooms, user_id, request);
                self.report_call(connection_id, Some(call_id), result);
            }
            InboundEvent::CallEnd(request) => {
                let call_id = request.call_id.clone();
                let result = self.calls.end(&mut self.rooms, user_id, request);
                self.report_call(connection_id, Some(call_id), result);
            }
            InboundEvent::CallIceCandidate(request) => {
                self.calls
                    .relay_ice_candidate(&self.rooms, connection_id, user_id, request);
            }

            InboundEvent::MeetingCreate(request) => {
                let chat_id = request.chat_id.clone();
                match self.meetings.create(&mut self.rooms, connection_id, user_id, request) {
                    Ok(_) => {}
                    Err(err @ CoreError::Conflict(_)) => {
                        // Point the creator at the meeting that already runs.
                        self.send_active_status(connection_id, chat_id);
                        self.report_meeting(connection_id, None, err);
                    }
                    Err(err) => self.report_meeting(connection_id, None, err),
                }
            }
            InboundEvent::MeetingCheckActive(request) => {
                self.send_active_status(connection_id, request.chat_id);
            }
            InboundEvent::MeetingJoin(request) => {
                let meeting_id = request.meeting_id.clone();
                if let Err(err) = self.meetings.join(&mut self.rooms, connection_id, user_id, request) {
                    self.report_meeting(connection_id, Some(meeting_id), err);
                }
            }
            InboundEvent::MeetingLeave(request) => {
                self.meetings
                    .leave(&mut self.rooms, connection_id, &request.meeting_id);
            }
            InboundEvent::MeetingOffer(signal) => {
                self.meetings.relay_offer(&self.rooms, connection_id, signal);
            }
            InboundEvent::MeetingAnswer(signal) => {
                self.meetings.relay_answer(&self.rooms, connection_id, signal);
            }
            InboundEvent::MeetingIceCandidate(signal) => {
                self.meetings
                    .relay_ice_candidate(&self.rooms, connection_id, signal);
            }
            InboundEvent::MeetingToggleMedia(request) => {
                self.meetings.toggle_media(&self.rooms, connection_id, request);
            }
            InboundEvent::MeetingScreenShareStart(request) => {
                self.meetings
                    .set_screen_sharing(&self.rooms, connection_id, &request.meeting_id, true);
            }
            InboundEvent::MeetingScreenShareStop(request) => {
                self.meetings
                    .set_screen_sharing(&self.rooms, connection_id, &request.meeting_id, false);
            }
            other => {
                tracing::debug!(event = other.name(), "event needs no registered identity");
            }
        }
    }

    fn initiate_call(&mut self, connection_id: ConnectionId, user_id: &str, request: CallInitiate) {
        let callee = request.to.clone();
        match self.calls.initiate(&mut self.rooms, connection_id, user_id, request) {
            Ok(_) => {}
            Err(CoreError::Conflict(_)) => {
                let existing = self
                    .calls
                    .sessions_for(user_id)
                    .find(|s| s.counterpart(user_id) == Some(&callee))
                    .map(|s| s.id.clone())
                    .unwrap_or_default();
                tracing::info!(
                    caller = %user_id,
                    callee = %callee,
                    existing_call = %existing,
                    "duplicate call refused"
                );
                self.rooms.emit_to_connection(
                    connection_id,
                    OutboundEvent::CallRejected {
                        call_id: existing,
                        reason: Some(REASON_BUSY.to_string()),
                    },
                );
            }
            Err(err) => self.report_call(connection_id, None, Err::<(), _>(err)),
        }
    }

    fn report_call<T>(
        &self,
        connection_id: ConnectionId,
        call_id: Option<CallId>,
        result: Result<T, CoreError>,
    ) {
        let Err(err) = result else {
            return;
        };
        tracing::debug!(connection_id = %connection_id, call_id = ?call_id, "call request refused: {err}");
        self.rooms.emit_to_connection(
            connection_id,
            OutboundEvent::CallError {
                call_id,
                code: err.code().to_string(),
                message: err.to_string(),
            },
        );
    }

    fn report_meeting(&self, connection_id: ConnectionId, meeting_id: Option<MeetingId>, err: CoreError) {
        tracing::debug!(connection_id = %connection_id, meeting_id = ?meeting_id, "meeting request refused: {err}");
        self.rooms.emit_to_connection(
            connection_id,
            OutboundEvent::MeetingError {
                meeting_id,
                code: err.code().to_string(),
                message: err.to_string(),
            },
        );
    }

    fn send_active_status(&self, connection_id: ConnectionId, chat_id: String) {
        let active_meeting = self.meetings.check_active(&chat_id);
        self.rooms.emit_to_connection(
            connection_id,
            OutboundEvent::MeetingActiveStatus {
                chat_id,
                active_meeting,
            },
        );
    }

    /// Tear down everything the connection owns. Safe to call twice.
    pub fn disconnect(&mut self, connection_id: ConnectionId) {
        let left = self.meetings.remove_connection(&mut self.rooms, connection_id);
        let user_id: Option<UserId> = self.registry.user_of(connection_id).cloned();
        let ended = match &user_id {
            Some(user_id) => self
                .calls
                .end_all_for_user(&mut self.rooms, user_id, REASON_DISCONNECT),
            None => Vec::new(),
        };
        if let Some(departure) = self.registry.unregister(connection_id) {
            if departure.went_offline {
                presence::broadcast_online_users(&self.registry, &self.rooms);
            }
        }
        let rooms = self.rooms.detach(connection_id);
        tracing::info!(
            connection_id = %connection_id,
            user_id = user_id.as_deref().unwrap_or("-"),
            meetings_left = left.len(),
            calls_ended = ended.len(),
            rooms = rooms.len(),
            "connection closed"
        );
    }

    /// Periodic housekeeping driven by the hub's interval.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        SweepReport {
            expired_calls: self.calls.expire_ringing(&mut self.rooms, now),
        }
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.rooms.connection_count(),
            registered_connections: self.registry.connection_count(),
            online_users: self.registry.online_count(),
            active_calls: self.calls.len(),
            active_meetings: self.meetings.len(),
            meeting_participants: self.meetings.participant_count(),
        }
    }

    pub fn active_meeting(&self, chat_id: &str) -> Option<MeetingSummary> {
        self.meetings.check_active(chat_id)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomMultiplexer {
        &self.rooms
    }

    pub fn calls(&self) -> &CallSessionManager {
        &self.calls
    }

    pub fn meetings(&self) -> &MeetingSessionManager {
        &self.meetings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_models::call::{CallAccept, CallKind};
    use parley_models::gateway::ERR_SETUP_REQUIRED;
    use parley_models::meeting::{MeetingCreate, MeetingJoin};
    use parley_models::user::UserInfo;
    use serde_json::json;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Client {
        id: ConnectionId,
        rx: mpsc::Receiver<OutboundEvent>,
    }

    impl Client {
        fn events(&mut self) -> Vec<OutboundEvent> {
            std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
        }
    }

    fn connect(gateway: &mut SignalingGateway) -> Client {
        let (tx, rx) = mpsc::channel(64);
        let id = Uuid::new_v4();
        gateway.connect(id, tx);
        Client { id, rx }
    }

    fn setup(gateway: &mut SignalingGateway, client: &Client, user_id: &str) {
        gateway.handle(
            client.id,
            InboundEvent::Setup(Setup {
                user_id: user_id.to_string(),
                name: user_id.to_uppercase(),
                pic: None,
            }),
        );
    }

    fn presence_updates(events: &[OutboundEvent]) -> Vec<Vec<UserId>> {
        events
            .iter()
            .filter_map(|e| match e {
                OutboundEvent::OnlineUsers(ids) => Some(ids.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn second_device_does_not_rebroadcast_presence() {
        let mut gateway = SignalingGateway::new(&GatewayConfig::default());
        let mut observer = connect(&mut gateway);
        setup(&mut gateway, &observer, "O");
        observer.events();

        let phone = connect(&mut gateway);
        let laptop = connect(&mut gateway);
        setup(&mut gateway, &phone, "U");
        setup(&mut gateway, &laptop, "U");
        assert_eq!(
            presence_updates(&observer.events()),
            vec![vec!["O".to_string(), "U".to_string()]]
        );

        gateway.disconnect(phone.id);
        assert!(presence_updates(&observer.events()).is_empty());
        assert!(gateway.registry().is_online("U"));

        gateway.disconnect(laptop.id);
        assert_eq!(presence_updates(&observer.events()), vec![vec!["O".to_string()]]);
    }

    #[test]
    fn setup_replies_connected_then_online_list() {
        let mut gateway = SignalingGateway::new(&GatewayConfig::default());
        let mut client = connect(&mut gateway);
        setup(&mut gateway, &client, "U");
        let events = client.events();
        assert_eq!(events[0], OutboundEvent::Connected);
        assert_eq!(events[1], OutboundEvent::OnlineUsers(vec!["U".to_string()]));
    }

    #[test]
    fn per_user_connection_cap() {
        let config = GatewayConfig {
            max_connections_per_user: 1,
            ..GatewayConfig::default()
        };
        let mut gateway = SignalingGateway::new(&config);
        let first = connect(&mut gateway);
        let mut second = connect(&mut gateway);
        setup(&mut gateway, &first, "U");
        second.events();
        setup(&mut gateway, &second, "U");

        assert!(matches!(
            second.events().as_slice(),
            [OutboundEvent::Error { code, .. }] if code == "TOO_MANY_CONNECTIONS"
        ));
        assert!(gateway.registry().connection(second.id).is_none());
        // A repeated setup on the registered connection is not counted twice.
        setup(&mut gateway, &first, "U");
        assert_eq!(gateway.registry().connections_of("U"), 1);
    }

    #[test]
    fn calls_require_setup() {
        let mut gateway = SignalingGateway::new(&GatewayConfig::default());
        let mut client = connect(&mut gateway);
        gateway.handle(
            client.id,
            InboundEvent::CallInitiate(CallInitiate {
                to: "R".into(),
                call_type: CallKind::Voice,
                offer: json!({}),
                caller_info: UserInfo::default(),
            }),
        );
        assert!(matches!(
            client.events().as_slice(),
            [OutboundEvent::Error { code, .. }] if code == ERR_SETUP_REQUIRED
        ));
        assert!(gateway.calls().is_empty());
    }

    #[test]
    fn disconnect_leaves_nothing_behind() {
        let mut gateway = SignalingGateway::new(&GatewayConfig::default());
        let caller = connect(&mut gateway);
        let mut callee = connect(&mut gateway);
        let mut peer = connect(&mut gateway);
        setup(&mut gateway, &caller, "C");
        setup(&mut gateway, &callee, "R");
        setup(&mut gateway, &peer, "P");
        for client in [&caller, &peer] {
            gateway.handle(client.id, InboundEvent::JoinChat("X".into()));
        }

        gateway.handle(
            caller.id,
            InboundEvent::CallInitiate(CallInitiate {
                to: "R".into(),
                call_type: CallKind::Video,
                offer: json!({ "sdp": "o" }),
                caller_info: UserInfo::default(),
            }),
        );
        let call_id = gateway.calls().sessions_for("C").next().unwrap().id.clone();
        gateway.handle(
            callee.id,
            InboundEvent::CallAccept(CallAccept {
                call_id: call_id.clone(),
                answer: json!({ "sdp": "a" }),
                to: None,
            }),
        );
        gateway.handle(
            caller.id,
            InboundEvent::MeetingCreate(MeetingCreate {
                chat_id: "X".into(),
                creator_info: UserInfo::default(),
                meeting_type: None,
            }),
        );
        let meeting_id = gateway.active_meeting("X").unwrap().meeting_id;
        gateway.handle(
            peer.id,
            InboundEvent::MeetingJoin(MeetingJoin {
                meeting_id: meeting_id.clone(),
                user_info: UserInfo::default(),
            }),
        );
        callee.events();
        peer.events();

        gateway.disconnect(caller.id);
        gateway.disconnect(caller.id);

        assert!(gateway.calls().is_empty());
        assert!(!gateway.meetings().references(caller.id));
        assert_eq!(gateway.active_meeting("X").unwrap().participant_count, 1);
        assert!(!gateway.rooms().is_attached(caller.id));
        assert_eq!(gateway.rooms().rooms_of(caller.id).count(), 0);
        assert!(!gateway.registry().is_online("C"));

        assert!(callee.events().iter().any(|e| matches!(
            e,
            OutboundEvent::CallEnded { call_id: id, reason: Some(reason) }
                if *id == call_id && reason == REASON_DISCONNECT
        )));
        let seen = peer.events();
        assert!(seen.iter().any(|e| matches!(e, OutboundEvent::MeetingUserLeft { .. })));
        assert_eq!(
            presence_updates(&seen),
            vec![vec!["P".to_string(), "R".to_string()]]
        );
    }

    #[test]
    fn duplicate_initiate_answered_busy_when_configured() {
        let config = GatewayConfig {
            reject_duplicate_initiate: true,
            ..GatewayConfig::default()
        };
        let mut gateway = SignalingGateway::new(&config);
        let mut caller = connect(&mut gateway);
        let callee = connect(&mut gateway);
        setup(&mut gateway, &caller, "C");
        setup(&mut gateway, &callee, "R");
        let initiate = || {
            InboundEvent::CallInitiate(CallInitiate {
                to: "R".into(),
                call_type: CallKind::Voice,
                offer: json!({}),
                caller_info: UserInfo::default(),
            })
        };
        gateway.handle(caller.id, initiate());
        caller.events();
        gateway.handle(caller.id, initiate());

        assert_eq!(gateway.calls().len(), 1);
        let existing = gateway.calls().sessions_for("C").next().unwrap().id.clone();
        assert_eq!(
            caller.events(),
            vec![OutboundEvent::CallRejected {
                call_id: existing,
                reason: Some(REASON_BUSY.to_string()),
            }]
        );
    }

    #[test]
    fn meeting_conflict_reports_running_meeting() {
        let mut gateway = SignalingGateway::new(&GatewayConfig::default());
        let first = connect(&mut gateway);
        let mut second = connect(&mut gateway);
        setup(&mut gateway, &first, "A");
        setup(&mut gateway, &second, "B");
        let create = || {
            InboundEvent::MeetingCreate(MeetingCreate {
                chat_id: "X".into(),
                creator_info: UserInfo::default(),
                meeting_type: None,
            })
        };
        gateway.handle(first.id, create());
        second.events();
        gateway.handle(second.id, create());

        let events = second.events();
        assert!(matches!(
            events.as_slice(),
            [
                OutboundEvent::MeetingActiveStatus { active_meeting: Some(_), .. },
                OutboundEvent::MeetingError { code, .. },
            ] if code == "CONFLICT"
        ));
        assert_eq!(gateway.stats().active_meetings, 1);
    }

    #[test]
    fn ringing_call_expires_on_sweep() {
        let mut gateway = SignalingGateway::new(&GatewayConfig::default());
        let caller = connect(&mut gateway);
        let callee = connect(&mut gateway);
        setup(&mut gateway, &caller, "C");
        setup(&mut gateway, &callee, "R");
        gateway.handle(
            caller.id,
            InboundEvent::CallInitiate(CallInitiate {
                to: "R".into(),
                call_type: CallKind::Voice,
                offer: json!({}),
                caller_info: UserInfo::default(),
            }),
        );

        assert!(gateway.sweep(Utc::now()).expired_calls.is_empty());
        let report = gateway.sweep(Utc::now() + Duration::seconds(120));
        assert_eq!(report.expired_calls.len(), 1);
        assert_eq!(gateway.stats().active_calls, 0);
    }

    #[test]
    fn unrepresentable_ring_timeout_disables_expiry() {
        assert_eq!(ring_timeout(0), None);
        assert_eq!(ring_timeout(45), Some(Duration::seconds(45)));
        assert_eq!(ring_timeout(10_000_000_000_000_000), None);
        assert_eq!(ring_timeout(u64::MAX), None);

        let config = GatewayConfig {
            ring_timeout_secs: 10_000_000_000_000_000,
            ..GatewayConfig::default()
        };
        let mut gateway = SignalingGateway::new(&config);
        let caller = connect(&mut gateway);
        let callee = connect(&mut gateway);
        setup(&mut gateway, &caller, "C");
        setup(&mut gateway, &callee, "R");
        gateway.handle(
            caller.id,
            InboundEvent::CallInitiate(CallInitiate {
                to: "R".into(),
                call_type: CallKind::Voice,
                offer: json!({}),
                caller_info: UserInfo::default(),
            }),
        );

        let report = gateway.sweep(Utc::now() + Duration::days(365));
        assert!(report.expired_calls.is_empty());
        assert_eq!(gateway.stats().active_calls, 1);
    }

    #[test]
    fn leaving_a_chat_stops_typing_delivery() {
        let mut gateway = SignalingGateway::new(&GatewayConfig::default());
        let typist = connect(&mut gateway);
        let mut reader = connect(&mut gateway);
        for client in [&typist, &reader] {
            gateway.handle(client.id, InboundEvent::JoinChat("X".into()));
        }

        gateway.handle(typist.id, InboundEvent::Typing("X".into()));
        assert_eq!(reader.events(), vec![OutboundEvent::Typing("X".into())]);

        gateway.handle(reader.id, InboundEvent::LeaveChat("X".into()));
        gateway.handle(typist.id, InboundEvent::Typing("X".into()));
        gateway.handle(typist.id, InboundEvent::StopTyping("X".into()));
        assert!(reader.events().is_empty());
        assert!(!gateway.rooms().is_member(reader.id, &Room::Chat("X".into())));
    }
}
