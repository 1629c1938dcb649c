use std::net::SocketAddr;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::annotation::Annotation;
use crate::annotation::VideoBounds;
use crate::error::BoxfishError;
use crate::registry::PlayerRegistry;

/// Environment variable overriding the control port from settings.
pub const CONTROL_PORT_ENV: &str = "BOXFISH_CONTROL_PORT";

const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// How often the responder re-checks the shutdown flag while idle.
const RESPONDER_POLL: Duration = Duration::from_millis(50);

/// Resolve the control port: the environment override wins over settings.
pub fn control_port(settings_port: u16) -> u16 {
    std::env::var(CONTROL_PORT_ENV).ok().and_then(|value| value.parse().ok()).unwrap_or(settings_port)
}

/// A spatial annotation as carried on the wire, in video-space pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Localization {
    pub uuid: Uuid,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    /// Playback position in milliseconds.
    #[serde(default)]
    pub elapsed_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
}

impl Localization {
    pub fn video_bounds(&self) -> Result<VideoBounds, BoxfishError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(BoxfishError::invalid_argument(format!(
                "localization {} must have positive dimensions, got {}x{}",
                self.uuid, self.width, self.height
            )));
        }
        let x = i32::try_from(self.x);
        let y = i32::try_from(self.y);
        let width = u32::try_from(self.width);
        let height = u32::try_from(self.height);
        match (x, y, width, height) {
            (Ok(x), Ok(y), Ok(width), Ok(height)) => Ok(VideoBounds { x, y, width, height }),
            _ => Err(BoxfishError::invalid_argument(format!(
                "localization {} has coordinates outside the representable range",
                self.uuid
            ))),
        }
    }

    pub fn to_annotation(&self) -> Result<Annotation, BoxfishError> {
        Ok(Annotation::with_id(self.uuid, self.video_bounds()?, self.concept.as_deref(), self.elapsed_time))
    }

}

/// A validated remote command, ready for UI-thread dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    Connect { port: Option<u16> },
    Open { id: Option<Uuid>, url: String },
    Show { id: Uuid },
    Play { id: Uuid },
    Pause { id: Uuid },
    Seek { id: Uuid, elapsed_time_ms: u64 },
    FrameAdvance { id: Uuid },
    AddLocalizations { id: Uuid, localizations: Vec<Localization> },
    RemoveLocalizations { id: Uuid, localizations: Vec<Uuid> },
    UpdateLocalizations { id: Uuid, localizations: Vec<Localization> },
    ClearLocalizations { id: Uuid },
}

impl RemoteCommand {
    /// The wire name, echoed in the reply's `response` field.
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCommand::Connect { .. } => "connect",
            RemoteCommand::Open { .. } => "open",
            RemoteCommand::Show { .. } => "show",
            RemoteCommand::Play { .. } => "play",
            RemoteCommand::Pause { .. } => "pause",
            RemoteCommand::Seek { .. } => "seek",
            RemoteCommand::FrameAdvance { .. } => "frameAdvance",
            RemoteCommand::AddLocalizations { .. } => "addLocalizations",
            RemoteCommand::RemoveLocalizations { .. } => "removeLocalizations",
            RemoteCommand::UpdateLocalizations { .. } => "updateLocalizations",
            RemoteCommand::ClearLocalizations { .. } => "clearLocalizations",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    command: Option<String>,
    id: Option<String>,
    url: Option<String>,
    port: Option<u16>,
    elapsed_time_millis: Option<i64>,
    localizations: Option<Vec<serde_json::Value>>,
}

/// A decode failure, carrying the command name to echo (when one was present)
/// and a human-readable reason.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub response: String,
    pub reason: String,
}

impl Envelope {
    fn player_id(&self) -> Result<Uuid, String> {
        let raw = self.id.as_deref().ok_or_else(|| "missing required field 'id'".to_string())?;
        Uuid::parse_str(raw).map_err(|_| format!("'{raw}' is not a valid UUID"))
    }

    fn typed_localizations(&self) -> Result<Vec<Localization>, String> {
        let raw = self.localizations.as_ref().ok_or_else(|| "missing required field 'localizations'".to_string())?;
        raw.iter()
            .map(|value| {
                let localization: Localization = serde_json::from_value(value.clone()).map_err(|e| format!("malformed localization: {e}"))?;
                // Reject non-positive bounds at the edge
                localization.video_bounds().map_err(|e| e.to_string())?;
                Ok(localization)
            })
            .collect()
    }

    /// `removeLocalizations` accepts bare UUID strings or localization objects.
    fn localization_ids(&self) -> Result<Vec<Uuid>, String> {
        let raw = self.localizations.as_ref().ok_or_else(|| "missing required field 'localizations'".to_string())?;
        raw.iter()
            .map(|value| match value {
                serde_json::Value::String(raw) => Uuid::parse_str(raw).map_err(|_| format!("'{raw}' is not a valid UUID")),
                serde_json::Value::Object(fields) => fields
                    .get("uuid")
                    .and_then(|uuid| uuid.as_str())
                    .ok_or_else(|| "localization object is missing 'uuid'".to_string())
                    .and_then(|raw| Uuid::parse_str(raw).map_err(|_| format!("'{raw}' is not a valid UUID"))),
                other => Err(format!("expected a UUID or localization object, got {other}")),
            })
            .collect()
    }
}

/// Decode and validate one datagram into a command.
pub fn decode_command(datagram: &[u8]) -> Result<RemoteCommand, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(datagram).map_err(|e| DecodeError {
        response: "unknown".to_string(),
        reason: format!("malformed command document: {e}"),
    })?;

    let Some(command) = envelope.command.clone() else {
        return Err(DecodeError {
            response: "unknown".to_string(),
            reason: "missing required field 'command'".to_string(),
        });
    };

    let fail = |reason: String| DecodeError { response: command.clone(), reason };

    let decoded = match command.as_str() {
        "connect" => RemoteCommand::Connect { port: envelope.port },
        "open" => {
            let id = match envelope.id.as_deref() {
                Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| fail(format!("'{raw}' is not a valid UUID")))?),
                None => None,
            };
            let url = envelope.url.clone().ok_or_else(|| fail("missing required field 'url'".to_string()))?;
            RemoteCommand::Open { id, url }
        }
        "show" => RemoteCommand::Show { id: envelope.player_id().map_err(fail)? },
        "play" => RemoteCommand::Play { id: envelope.player_id().map_err(fail)? },
        "pause" => RemoteCommand::Pause { id: envelope.player_id().map_err(fail)? },
        "seek" => {
            let id = envelope.player_id().map_err(fail)?;
            let elapsed = envelope.elapsed_time_millis.ok_or_else(|| fail("missing required field 'elapsedTimeMillis'".to_string()))?;
            RemoteCommand::Seek {
                id,
                elapsed_time_ms: elapsed.max(0) as u64,
            }
        }
        "frameAdvance" => RemoteCommand::FrameAdvance { id: envelope.player_id().map_err(fail)? },
        "addLocalizations" => RemoteCommand::AddLocalizations {
            id: envelope.player_id().map_err(fail)?,
            localizations: envelope.typed_localizations().map_err(fail)?,
        },
        "removeLocalizations" => RemoteCommand::RemoveLocalizations {
            id: envelope.player_id().map_err(fail)?,
            localizations: envelope.localization_ids().map_err(fail)?,
        },
        "updateLocalizations" => RemoteCommand::UpdateLocalizations {
            id: envelope.player_id().map_err(fail)?,
            localizations: envelope.typed_localizations().map_err(fail)?,
        },
        "clearLocalizations" => RemoteCommand::ClearLocalizations { id: envelope.player_id().map_err(fail)? },
        other => return Err(fail(format!("unknown command '{other}'"))),
    };

    Ok(decoded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplyStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "not found")]
    NotFound,
}

/// Reply envelope sent back to the datagram's source address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub response: String,
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Reply {
    pub fn ok(response: &str) -> Self {
        Self {
            response: response.to_string(),
            status: ReplyStatus::Ok,
            id: None,
            reason: None,
        }
    }

    pub fn ok_with_id(response: &str, id: Uuid) -> Self {
        Self { id: Some(id), ..Self::ok(response) }
    }

    pub fn failed(response: &str, reason: String) -> Self {
        Self {
            response: response.to_string(),
            status: ReplyStatus::Failed,
            id: None,
            reason: Some(reason),
        }
    }

    pub fn not_found(response: &str, reason: String) -> Self {
        Self {
            response: response.to_string(),
            status: ReplyStatus::NotFound,
            id: None,
            reason: Some(reason),
        }
    }
}

/// A shell-level effect requested by a remote command, beyond registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiAction {
    PlayerOpened(Uuid),
    FocusPlayer(Uuid),
}

/// Execute a validated command against the player registry.
///
/// Runs on the UI thread. Not-found and validation outcomes become reply
/// envelopes; nothing here surfaces as a UI error.
pub fn execute_command(registry: &mut PlayerRegistry, command: &RemoteCommand) -> (Reply, Option<UiAction>) {
    let response = command.name();

    let result = match command {
        RemoteCommand::Connect { port } => {
            debug!("remote client connected (port={:?})", port);
            return (Reply::ok(response), None);
        }
        RemoteCommand::Open { id, url } => {
            let id = registry.open_with_id(*id);
            let player = registry.get_mut(id).expect("player just opened");
            return match player.open(url) {
                Ok(()) => (Reply::ok_with_id(response, id), Some(UiAction::PlayerOpened(id))),
                Err(e) => (Reply::failed(response, e.to_string()), None),
            };
        }
        RemoteCommand::Show { id } => registry.get(*id).map(|_| Some(UiAction::FocusPlayer(*id))),
        RemoteCommand::Play { id } => registry.get_mut(*id).map(|player| {
            player.play();
            None
        }),
        RemoteCommand::Pause { id } => registry.get_mut(*id).map(|player| {
            player.pause();
            None
        }),
        RemoteCommand::Seek { id, elapsed_time_ms } => registry.get_mut(*id).map(|player| {
            player.seek(*elapsed_time_ms);
            None
        }),
        RemoteCommand::FrameAdvance { id } => registry.get_mut(*id).map(|player| {
            player.frame_advance();
            None
        }),
        RemoteCommand::AddLocalizations { id, localizations } => registry.get_mut(*id).and_then(|player| {
            for localization in localizations {
                player.add_annotation(localization.to_annotation()?);
            }
            Ok(None)
        }),
        RemoteCommand::RemoveLocalizations { id, localizations } => registry.get_mut(*id).map(|player| {
            for uuid in localizations {
                player.remove_annotation(*uuid);
            }
            None
        }),
        RemoteCommand::UpdateLocalizations { id, localizations } => registry.get_mut(*id).and_then(|player| {
            let mut missing = Vec::new();
            for localization in localizations {
                match player.update_annotation(localization.uuid, localization.video_bounds()?, localization.concept.as_deref()) {
                    Ok(()) => {}
                    Err(BoxfishError::AnnotationNotFound(uuid)) => missing.push(uuid),
                    Err(e) => return Err(e),
                }
            }
            if missing.is_empty() {
                Ok(None)
            } else {
                Err(BoxfishError::AnnotationNotFound(missing[0]))
            }
        }),
        RemoteCommand::ClearLocalizations { id } => registry.get_mut(*id).map(|player| {
            player.clear_annotations();
            None
        }),
    };

    match result {
        Ok(action) => (Reply::ok(response), action),
        Err(e @ (BoxfishError::PlayerNotFound(_) | BoxfishError::AnnotationNotFound(_))) => (Reply::not_found(response, e.to_string()), None),
        Err(e) => (Reply::failed(response, e.to_string()), None),
    }
}

/// A command received off the wire, tagged with its source for the reply.
#[derive(Debug)]
pub struct InboundCommand {
    pub source: SocketAddr,
    pub command: RemoteCommand,
}

/// Cloneable handle for queuing replies onto the responder worker.
#[derive(Clone)]
pub struct ReplySender {
    tx: Sender<(SocketAddr, Reply)>,
}

impl ReplySender {
    pub fn send(&self, source: SocketAddr, reply: Reply) {
        let _ = self.tx.send((source, reply));
    }
}

/// The UDP remote control endpoint.
///
/// A receiver worker decodes datagrams and posts validated commands onto the
/// UI-thread dispatch queue; a responder worker owns a cloned socket and sends
/// reply envelopes. Decode failures are replied to directly by the receiver and
/// never reach the UI. The single receiver thread plus the FIFO queue give
/// arrival-order dispatch.
pub struct RemoteEndpoint {
    port: u16,
    shutdown: Arc<AtomicBool>,
    socket: UdpSocket,
    reply_tx: Option<Sender<(SocketAddr, Reply)>>,
    receiver: Option<JoinHandle<()>>,
    responder: Option<JoinHandle<()>>,
}

impl RemoteEndpoint {
    /// Bind the endpoint and start its workers. `wake` is invoked after a
    /// command is queued so the UI loop drains it promptly.
    pub fn bind(port: u16, command_tx: Sender<InboundCommand>, wake: impl Fn() + Send + 'static) -> Result<Self, BoxfishError> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        let port = socket.local_addr()?.port();
        info!("listening for remote commands on UDP port {}", port);

        let shutdown = Arc::new(AtomicBool::new(false));
        let (reply_tx, reply_rx) = mpsc::channel();

        let receiver = {
            let socket = socket.try_clone()?;
            let shutdown = Arc::clone(&shutdown);
            let reply_tx = reply_tx.clone();
            thread::spawn(move || receive_loop(socket, shutdown, command_tx, reply_tx, wake))
        };

        let responder = {
            let socket = socket.try_clone()?;
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || respond_loop(socket, shutdown, reply_rx))
        };

        Ok(Self {
            port,
            shutdown,
            socket,
            reply_tx: Some(reply_tx),
            receiver: Some(receiver),
            responder: Some(responder),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn reply_sender(&self) -> Option<ReplySender> {
        self.reply_tx.as_ref().map(|tx| ReplySender { tx: tx.clone() })
    }

    /// Stop both workers and unblock the receive loop. Idempotent.
    pub fn close(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing remote endpoint on port {}", self.port);

        // A wake datagram unblocks the receiver's recv; the responder notices
        // the flag on its next poll even if reply senders are still held
        let _ = self.socket.send_to(b"", ("127.0.0.1", self.port));
        self.reply_tx.take();

        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.responder.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RemoteEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(socket: UdpSocket, shutdown: Arc<AtomicBool>, command_tx: Sender<InboundCommand>, reply_tx: Sender<(SocketAddr, Reply)>, wake: impl Fn()) {
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let (len, source) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                error!("error receiving datagram: {}", e);
                continue;
            }
        };
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match decode_command(&buffer[..len]) {
            Ok(command) => {
                debug!("received {} from {}", command.name(), source);
                if command_tx.send(InboundCommand { source, command }).is_err() {
                    break;
                }
                wake();
            }
            Err(e) => {
                warn!("malformed datagram from {}: {}", source, e.reason);
                let _ = reply_tx.send((source, Reply::failed(&e.response, e.reason)));
            }
        }
    }
}

fn respond_loop(socket: UdpSocket, shutdown: Arc<AtomicBool>, reply_rx: Receiver<(SocketAddr, Reply)>) {
    loop {
        // Polling the flag means `close()` can join this worker even while
        // reply sender clones are still held elsewhere.
        let (source, reply) = match reply_rx.recv_timeout(RESPONDER_POLL) {
            Ok(queued) => queued,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        match serde_json::to_vec(&reply) {
            Ok(encoded) => {
                if let Err(e) = socket.send_to(&encoded, source) {
                    error!("error sending reply to {}: {}", source, e);
                }
            }
            Err(e) => error!("error encoding reply: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::SimulatedEngine;

    fn registry() -> PlayerRegistry {
        PlayerRegistry::new(SimulatedEngine::factory())
    }

    fn localization_json(uuid: Uuid) -> serde_json::Value {
        serde_json::json!({
            "uuid": uuid.to_string(),
            "x": 100, "y": 50, "width": 200, "height": 80,
            "elapsedTime": 1_500,
            "concept": "fish",
        })
    }

    #[test]
    fn decode_valid_commands() {
        let id = Uuid::new_v4();

        let command = decode_command(br#"{"command":"connect","port":8888}"#).unwrap();
        assert_eq!(command, RemoteCommand::Connect { port: Some(8888) });

        let raw = format!(r#"{{"command":"seek","id":"{id}","elapsedTimeMillis":2500}}"#);
        let command = decode_command(raw.as_bytes()).unwrap();
        assert_eq!(command, RemoteCommand::Seek { id, elapsed_time_ms: 2_500 });

        let raw = serde_json::json!({
            "command": "addLocalizations",
            "id": id.to_string(),
            "localizations": [localization_json(Uuid::new_v4())],
        });
        let command = decode_command(raw.to_string().as_bytes()).unwrap();
        match command {
            RemoteCommand::AddLocalizations { localizations, .. } => {
                assert_eq!(localizations.len(), 1);
                assert_eq!(localizations[0].concept.as_deref(), Some("fish"));
                assert_eq!(localizations[0].elapsed_time, 1_500);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_malformed_documents() {
        // Not JSON at all
        let err = decode_command(b"not json").unwrap_err();
        assert_eq!(err.response, "unknown");

        // Missing command field
        let err = decode_command(br#"{"id":"whatever"}"#).unwrap_err();
        assert_eq!(err.response, "unknown");
        assert!(err.reason.contains("command"));

        // Unknown command
        let err = decode_command(br#"{"command":"transmogrify"}"#).unwrap_err();
        assert_eq!(err.response, "transmogrify");

        // Bad UUID
        let err = decode_command(br#"{"command":"play","id":"not-a-uuid"}"#).unwrap_err();
        assert_eq!(err.response, "play");
        assert!(err.reason.contains("UUID"));

        // Non-positive bounds
        let raw = serde_json::json!({
            "command": "addLocalizations",
            "id": Uuid::new_v4().to_string(),
            "localizations": [{"uuid": Uuid::new_v4().to_string(), "x": 0, "y": 0, "width": 0, "height": 10}],
        });
        let err = decode_command(raw.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.response, "addLocalizations");
        assert!(err.reason.contains("positive"));
    }

    #[test]
    fn remove_localizations_accepts_bare_uuids_and_objects() {
        let id = Uuid::new_v4();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let raw = serde_json::json!({
            "command": "removeLocalizations",
            "id": id.to_string(),
            "localizations": [first.to_string(), {"uuid": second.to_string(), "x": 1, "y": 1, "width": 1, "height": 1}],
        });
        let command = decode_command(raw.to_string().as_bytes()).unwrap();
        assert_eq!(
            command,
            RemoteCommand::RemoveLocalizations {
                id,
                localizations: vec![first, second]
            }
        );
    }

    #[test]
    fn reply_envelope_serialization() {
        let reply = Reply::ok("play");
        assert_eq!(serde_json::to_value(&reply).unwrap(), serde_json::json!({"response": "play", "status": "ok"}));

        let reply = Reply::not_found("seek", "no such player".to_string());
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"response": "seek", "status": "not found", "reason": "no such player"})
        );
    }

    #[test]
    fn open_creates_a_player_and_returns_its_id() {
        let mut registry = registry();
        let (reply, action) = execute_command(
            &mut registry,
            &RemoteCommand::Open {
                id: None,
                url: "file:///dive.mov".to_string(),
            },
        );

        assert_eq!(reply.status, ReplyStatus::Ok);
        let id = reply.id.expect("open reply carries the player id");
        assert!(registry.contains(id));
        assert_eq!(action, Some(UiAction::PlayerOpened(id)));
    }

    #[test]
    fn commands_for_unknown_players_reply_not_found() {
        let mut registry = registry();
        let id = Uuid::new_v4();

        for command in [
            RemoteCommand::Show { id },
            RemoteCommand::Play { id },
            RemoteCommand::Pause { id },
            RemoteCommand::Seek { id, elapsed_time_ms: 0 },
            RemoteCommand::FrameAdvance { id },
            RemoteCommand::ClearLocalizations { id },
        ] {
            let (reply, action) = execute_command(&mut registry, &command);
            assert_eq!(reply.status, ReplyStatus::NotFound, "command {:?}", command.name());
            assert!(action.is_none());
        }
    }

    #[test]
    fn add_localizations_populates_the_player() {
        let mut registry = registry();
        let player_id = registry.open();

        let localization = Localization {
            uuid: Uuid::new_v4(),
            x: 100,
            y: 50,
            width: 200,
            height: 80,
            elapsed_time: 0,
            concept: Some("fish".to_string()),
        };
        let (reply, _) = execute_command(
            &mut registry,
            &RemoteCommand::AddLocalizations {
                id: player_id,
                localizations: vec![localization.clone()],
            },
        );
        assert_eq!(reply.status, ReplyStatus::Ok);

        let player = registry.get(player_id).unwrap();
        assert_eq!(player.annotation_count(), 1);
        let annotation = player.annotation(localization.uuid).unwrap();
        assert_eq!(annotation.bounds(), VideoBounds { x: 100, y: 50, width: 200, height: 80 });
        assert_eq!(annotation.caption(), Some("fish"));
        assert!(player.overlay().visual(localization.uuid).unwrap().caption_visible());
    }

    #[test]
    fn update_and_remove_localizations() {
        let mut registry = registry();
        let player_id = registry.open();
        let uuid = Uuid::new_v4();
        let mut localization = Localization {
            uuid,
            x: 10,
            y: 10,
            width: 50,
            height: 50,
            elapsed_time: 0,
            concept: None,
        };

        execute_command(
            &mut registry,
            &RemoteCommand::AddLocalizations {
                id: player_id,
                localizations: vec![localization.clone()],
            },
        );

        localization.x = 40;
        localization.concept = Some("jelly".to_string());
        let (reply, _) = execute_command(
            &mut registry,
            &RemoteCommand::UpdateLocalizations {
                id: player_id,
                localizations: vec![localization.clone()],
            },
        );
        assert_eq!(reply.status, ReplyStatus::Ok);
        let annotation = registry.get(player_id).unwrap().annotation(uuid).unwrap().clone();
        assert_eq!(annotation.bounds().x, 40);
        assert_eq!(annotation.caption(), Some("jelly"));

        // Updating an unknown annotation is not found
        localization.uuid = Uuid::new_v4();
        let (reply, _) = execute_command(
            &mut registry,
            &RemoteCommand::UpdateLocalizations {
                id: player_id,
                localizations: vec![localization],
            },
        );
        assert_eq!(reply.status, ReplyStatus::NotFound);

        let (reply, _) = execute_command(
            &mut registry,
            &RemoteCommand::RemoveLocalizations {
                id: player_id,
                localizations: vec![uuid],
            },
        );
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(registry.get(player_id).unwrap().annotation_count(), 0);
    }

    #[test]
    fn clear_localizations_empties_the_player() {
        let mut registry = registry();
        let player_id = registry.open();
        for _ in 0..3 {
            execute_command(
                &mut registry,
                &RemoteCommand::AddLocalizations {
                    id: player_id,
                    localizations: vec![Localization {
                        uuid: Uuid::new_v4(),
                        x: 1,
                        y: 1,
                        width: 5,
                        height: 5,
                        elapsed_time: 0,
                        concept: None,
                    }],
                },
            );
        }
        assert_eq!(registry.get(player_id).unwrap().annotation_count(), 3);

        let (reply, _) = execute_command(&mut registry, &RemoteCommand::ClearLocalizations { id: player_id });
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(registry.get(player_id).unwrap().annotation_count(), 0);
    }

    #[test]
    fn endpoint_dispatches_in_arrival_order_and_replies_to_malformed_datagrams() {
        let (command_tx, command_rx) = mpsc::channel();
        let mut endpoint = RemoteEndpoint::bind(0, command_tx, || {}).expect("bind on an ephemeral port");
        let port = endpoint.port();

        let client = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let id = Uuid::new_v4();
        for elapsed in [100i64, 200, 300] {
            let raw = format!(r#"{{"command":"seek","id":"{id}","elapsedTimeMillis":{elapsed}}}"#);
            client.send_to(raw.as_bytes(), ("127.0.0.1", port)).unwrap();
        }

        // Same source, same player: dispatch order equals arrival order
        for expected in [100u64, 200, 300] {
            let inbound = command_rx.recv_timeout(Duration::from_secs(2)).expect("command dispatched");
            assert_eq!(
                inbound.command,
                RemoteCommand::Seek {
                    id,
                    elapsed_time_ms: expected
                }
            );
        }

        // Malformed datagram: a failed reply comes back, nothing is dispatched
        client.send_to(br#"{"id":"123"}"#, ("127.0.0.1", port)).unwrap();
        let mut buffer = [0u8; 1024];
        let (len, _) = client.recv_from(&mut buffer).expect("reply received");
        let reply: serde_json::Value = serde_json::from_slice(&buffer[..len]).unwrap();
        assert_eq!(reply["status"], "failed");
        assert!(command_rx.try_recv().is_err());

        endpoint.close();
    }

    #[test]
    fn endpoint_close_is_idempotent_and_unblocks_the_receiver() {
        let (command_tx, _command_rx) = mpsc::channel();
        let mut endpoint = RemoteEndpoint::bind(0, command_tx, || {}).unwrap();
        endpoint.close();
        endpoint.close();
    }

    #[test]
    fn rejects_localizations_with_out_of_range_coordinates() {
        let mut localization = Localization {
            uuid: Uuid::new_v4(),
            x: 0,
            y: 0,
            width: i64::from(u32::MAX) + 1,
            height: 10,
            elapsed_time: 0,
            concept: None,
        };
        assert!(localization.video_bounds().is_err());

        localization.width = 10;
        localization.x = i64::from(i32::MAX) + 1;
        assert!(localization.video_bounds().is_err());

        localization.x = i64::from(i32::MIN) - 1;
        assert!(localization.video_bounds().is_err());

        // The decode path replies failed rather than truncating the width to zero
        let raw = serde_json::json!({
            "command": "addLocalizations",
            "id": Uuid::new_v4().to_string(),
            "localizations": [{"uuid": Uuid::new_v4().to_string(), "x": 0, "y": 0, "width": 4_294_967_296i64, "height": 10}],
        });
        let err = decode_command(raw.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.response, "addLocalizations");
        assert!(err.reason.contains("range"));
    }

    #[test]
    fn close_completes_while_reply_senders_are_held() {
        let (command_tx, _command_rx) = mpsc::channel();
        let mut endpoint = RemoteEndpoint::bind(0, command_tx, || {}).unwrap();
        let held = endpoint.reply_sender().expect("sender available before close");

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            endpoint.close();
            let _ = done_tx.send(());
        });

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("close joins both workers while a reply sender is alive");
        drop(held);
    }

    #[test]
    fn closing_the_last_player_permits_full_teardown() {
        let mut registry = registry();
        let id = registry.open();

        let (command_tx, _command_rx) = mpsc::channel();
        let mut endpoint = RemoteEndpoint::bind(0, command_tx, || {}).unwrap();
        let reply_sender = endpoint.reply_sender().unwrap();

        // Closing the last player signals application shutdown
        assert!(registry.close(id).unwrap());

        // Teardown in application order: reply path, endpoint workers, engines
        drop(reply_sender);
        endpoint.close();
        registry.release_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn control_port_prefers_the_environment_override() {
        // Note: mutates process environment; keep this the only test doing so
        unsafe {
            std::env::set_var(CONTROL_PORT_ENV, "7777");
        }
        assert_eq!(control_port(5005), 7777);
        unsafe {
            std::env::set_var(CONTROL_PORT_ENV, "not-a-port");
        }
        assert_eq!(control_port(5005), 5005);
        unsafe {
            std::env::remove_var(CONTROL_PORT_ENV);
        }
        assert_eq!(control_port(5005), 5005);
    }
}
