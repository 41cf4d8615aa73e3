//! # WebSocket Audio Streaming Handler
//!
//! Hosts one frame accumulator per connection and streams the encoded PCM
//! frames back to the connected client, which forwards them to the realtime
//! voice interview service.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: `GET /ws/audio?processor=<name>&frame_size=<n>` (both optional)
//! 2. **Greeting**: server sends a `session_status` message with the session id and frame size
//! 3. **Audio**: client sends binary messages of little-endian `f32` samples, any length
//! 4. **Frames**: server sends a binary message of little-endian `i16` PCM per completed frame
//! 5. **Control**: JSON text messages (`ping`, `end_session`)
//!
//! Fragmented messages are reassembled before handling, up to
//! [`MAX_MESSAGE_BYTES`] per message.
//!
//! ## Teardown:
//! Samples still buffered when the connection closes are discarded.

use crate::audio::accumulator::{ChannelSink, FrameAccumulator};
use crate::audio::pcm::{samples_from_le_bytes, EncodedFrame};
use crate::audio::registry;
use crate::config::MAX_CHANNEL_CAPACITY;
use crate::error::AppError;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Connections silent for longer than this are closed.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest reassembled fragmented message.
pub const MAX_MESSAGE_BYTES: usize = 1 << 20;

/// JSON messages exchanged over the text channel.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebSocketMessage {
    /// Session status updates from server
    #[serde(rename = "session_status")]
    SessionStatus {
        session_id: String,
        status: String,
        frame_size: usize,
        message: Option<String>,
    },

    /// Error messages from server
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        session_id: Option<String>,
    },

    /// End the session from client
    #[serde(rename = "end_session")]
    EndSession,

    /// Heartbeat/ping message
    #[serde(rename = "ping")]
    Ping {
        /// Timestamp for latency measurement
        timestamp: u64,
    },

    /// Heartbeat/pong response
    #[serde(rename = "pong")]
    Pong {
        /// Original timestamp from ping
        timestamp: u64,
    },
}

/// Optional connection parameters.
#[derive(Debug, Deserialize)]
pub struct AudioSessionParams {
    pub processor: Option<String>,
    pub frame_size: Option<usize>,
}

/// WebSocket actor for one audio capture session.
///
/// ## Actor Model:
/// actix delivers messages to an actor one at a time, which gives the
/// accumulator the sequential, non-reentrant calls it requires. Completed
/// frames go through a bounded channel that is registered as a second stream
/// on the same actor and written to the socket from there.
pub struct AudioWebSocket {
    session_id: String,

    accumulator: FrameAccumulator<ChannelSink>,

    /// Receiving half of the frame channel, moved into the actor context on start
    frames: Option<mpsc::Receiver<EncodedFrame>>,

    app_state: web::Data<AppState>,

    last_heartbeat: Instant,

    chunks_received: u64,

    /// Fragmented message in progress: (is_binary, payload so far)
    fragments: Option<(bool, Vec<u8>)>,
}

impl AudioWebSocket {
    /// Create the actor and its accumulator.
    ///
    /// ## Errors:
    /// - **BadRequest**: unknown processor name
    /// - **ValidationError**: frame size zero or above `MAX_FRAME_SIZE`
    pub fn new(
        app_state: web::Data<AppState>,
        processor: &str,
        frame_size: usize,
        channel_capacity: usize,
    ) -> Result<Self, AppError> {
        let (sender, receiver) = mpsc::channel(channel_capacity.clamp(1, MAX_CHANNEL_CAPACITY));
        let accumulator = registry::instantiate(processor, frame_size, ChannelSink::new(sender))?;

        Ok(Self {
            session_id: Uuid::new_v4().to_string(),
            accumulator,
            frames: Some(receiver),
            app_state,
            last_heartbeat: Instant::now(),
            chunks_received: 0,
            fragments: None,
        })
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: &WebSocketMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(session_id = %self.session_id, error = %err, "Failed to serialize WebSocket message"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!(session_id = %self.session_id, code, message, "WebSocket error");
        self.send_message(
            ctx,
            &WebSocketMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
                session_id: Some(self.session_id.clone()),
            },
        );
    }

    fn send_status(&self, ctx: &mut ws::WebsocketContext<Self>, status: &str, message: Option<String>) {
        self.send_message(
            ctx,
            &WebSocketMessage::SessionStatus {
                session_id: self.session_id.clone(),
                status: status.to_string(),
                frame_size: self.accumulator.frame_size(),
                message,
            },
        );
    }

    /// Decode one binary chunk and feed it to the accumulator.
    fn handle_audio_chunk(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        match samples_from_le_bytes(data) {
            Ok(samples) => {
                self.chunks_received += 1;
                self.accumulator.process_chunk(Some(samples.as_slice()));
            }
            Err(err) => self.send_error(ctx, "invalid_audio", &err),
        }
    }

    fn handle_text_message(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<WebSocketMessage>(text) {
            Ok(WebSocketMessage::Ping { timestamp }) => {
                self.send_message(ctx, &WebSocketMessage::Pong { timestamp });
            }
            Ok(WebSocketMessage::Pong { .. }) => {}
            Ok(WebSocketMessage::EndSession) => {
                self.send_status(ctx, "ended", None);
                ctx.close(Some(ws::CloseCode::Normal.into()));
                ctx.stop();
            }
            Ok(_) => {
                self.send_error(ctx, "unexpected_message", "Message type is not accepted from clients");
            }
            Err(err) => {
                self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err));
            }
        }
    }

    /// Collect continuation frames and handle the message once the last one arrives.
    fn handle_fragment(&mut self, item: actix_http::ws::Item, ctx: &mut ws::WebsocketContext<Self>) {
        let (data, last) = match item {
            actix_http::ws::Item::FirstText(data) => {
                self.fragments = Some((false, Vec::new()));
                (data, false)
            }
            actix_http::ws::Item::FirstBinary(data) => {
                self.fragments = Some((true, Vec::new()));
                (data, false)
            }
            actix_http::ws::Item::Continue(data) => (data, false),
            actix_http::ws::Item::Last(data) => (data, true),
        };

        let Some((_, payload)) = self.fragments.as_mut() else {
            self.send_error(ctx, "unexpected_continuation", "Continuation frame without a first fragment");
            return;
        };

        if payload.len() + data.len() > MAX_MESSAGE_BYTES {
            self.fragments = None;
            self.send_error(
                ctx,
                "message_too_large",
                &format!("Fragmented message exceeds {} bytes", MAX_MESSAGE_BYTES),
            );
            return;
        }
        payload.extend_from_slice(&data);

        if !last {
            return;
        }

        if let Some((is_binary, payload)) = self.fragments.take() {
            if is_binary {
                self.handle_audio_chunk(&payload, ctx);
            } else {
                match std::str::from_utf8(&payload) {
                    Ok(text) => self.handle_text_message(text, ctx),
                    Err(_) => self.send_error(ctx, "invalid_json", "Text message is not valid UTF-8"),
                }
            }
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for AudioWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if let Some(frames) = self.frames.take() {
            ctx.add_stream(ReceiverStream::new(frames));
        }
        self.start_heartbeat(ctx);

        info!(
            session_id = %self.session_id,
            frame_size = self.accumulator.frame_size(),
            "Audio session started"
        );
        self.send_status(ctx, "started", None);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let frames_emitted = self.accumulator.frames_emitted();
        let frames_dropped = self.accumulator.sink().dropped();
        self.app_state.close_session(frames_emitted, frames_dropped);

        if self.accumulator.buffered() > 0 {
            debug!(
                session_id = %self.session_id,
                discarded_samples = self.accumulator.buffered(),
                "Discarding partially filled frame at teardown"
            );
        }

        info!(
            session_id = %self.session_id,
            chunks_received = self.chunks_received,
            frames_emitted,
            frames_dropped,
            "Audio session stopped"
        );
    }
}

/// Incoming WebSocket messages.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AudioWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_audio_chunk(&data, ctx);
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text_message(&text, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, reason = ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(item)) => {
                self.last_heartbeat = Instant::now();
                self.handle_fragment(item, ctx);
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Encoded frames coming out of the accumulator's channel.
impl StreamHandler<EncodedFrame> for AudioWebSocket {
    fn handle(&mut self, frame: EncodedFrame, ctx: &mut Self::Context) {
        ctx.binary(frame.to_le_bytes());
    }

    /// The sender lives in this actor's accumulator, so the stream only ends
    /// while the actor is already stopping.
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Validates the connection parameters, reserves a session slot and upgrades
/// the request. Invalid parameters and a full server are rejected before the
/// upgrade with the usual JSON error body.
pub async fn audio_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let params = web::Query::<AudioSessionParams>::from_query(req.query_string())
        .map_err(|e| AppError::BadRequest(format!("Invalid query parameters: {}", e)))?
        .into_inner();

    let config = app_state.get_config();
    let processor = params.processor.unwrap_or(config.audio.processor);
    let frame_size = params.frame_size.unwrap_or(config.audio.frame_size);

    debug!(
        peer = ?req.connection_info().peer_addr(),
        processor = %processor,
        frame_size,
        "New WebSocket connection request"
    );

    let websocket = AudioWebSocket::new(
        app_state.clone(),
        &processor,
        frame_size,
        config.audio.channel_capacity,
    )?;

    if !app_state.try_open_session() {
        return Err(AppError::ServiceUnavailable(format!(
            "Maximum of {} concurrent audio sessions reached",
            config.performance.max_concurrent_sessions
        ))
        .into());
    }

    ws::start(websocket, &req, stream).map_err(|err| {
        app_state.close_session(0, 0);
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::registry::PCM_FRAME_ACCUMULATOR;
    use crate::handlers;
    use crate::state::test_support::default_state;
    use actix_web::error::PayloadError;
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;
    use actix_web::web::Bytes;
    use actix_web::App;
    use futures_util::stream::{self, StreamExt};

    const OP_CONTINUATION: u8 = 0x0;
    const OP_TEXT: u8 = 0x1;
    const OP_BINARY: u8 = 0x2;
    const OP_CLOSE: u8 = 0x8;

    /// Masked client frame with an all-zero key, so the payload is sent as is.
    fn client_frame(fin: bool, opcode: u8, payload: &[u8]) -> Bytes {
        assert!(payload.len() < 126);
        let first = if fin { 0x80 | opcode } else { opcode };
        let mut frame = vec![first, 0x80 | payload.len() as u8, 0, 0, 0, 0];
        frame.extend_from_slice(payload);
        Bytes::from(frame)
    }

    fn float_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Split complete server frames off the front of `buffer`.
    fn take_server_frames(buffer: &mut Vec<u8>) -> Vec<(u8, Vec<u8>)> {
        let mut frames = Vec::new();
        while buffer.len() >= 2 {
            let opcode = buffer[0] & 0x0F;
            let (len, header) = match buffer[1] & 0x7F {
                126 if buffer.len() >= 4 => (u16::from_be_bytes([buffer[2], buffer[3]]) as usize, 4),
                126 => break,
                len => (len as usize, 2),
            };
            if buffer.len() < header + len {
                break;
            }
            frames.push((opcode, buffer[header..header + len].to_vec()));
            buffer.drain(..header + len);
        }
        frames
    }

    /// Run an actor with `frame_size = 4` over `input` and collect up to
    /// `wanted` server frames. With `keep_open` the client never hangs up.
    async fn run_session(
        state: AppState,
        input: Vec<Bytes>,
        keep_open: bool,
        wanted: usize,
    ) -> Vec<(u8, Vec<u8>)> {
        let actor = AudioWebSocket::new(web::Data::new(state), PCM_FRAME_ACCUMULATOR, 4, 8).unwrap();

        let input = stream::iter(input.into_iter().map(Ok::<Bytes, PayloadError>));
        let input = if keep_open {
            input.chain(stream::pending()).boxed_local()
        } else {
            input.boxed_local()
        };

        let mut output = Box::pin(ws::WebsocketContext::create(actor, input));
        let mut buffer = Vec::new();
        let mut frames = Vec::new();
        while frames.len() < wanted {
            match tokio::time::timeout(Duration::from_secs(2), output.next()).await {
                Ok(Some(Ok(bytes))) => {
                    buffer.extend_from_slice(&bytes);
                    frames.extend(take_server_frames(&mut buffer));
                }
                _ => break,
            }
        }
        frames
    }

    fn text_messages(frames: &[(u8, Vec<u8>)]) -> Vec<serde_json::Value> {
        frames
            .iter()
            .filter(|(opcode, _)| *opcode == OP_TEXT)
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect()
    }

    #[test]
    fn test_websocket_message_serialization() {
        let status = WebSocketMessage::SessionStatus {
            session_id: "abc".to_string(),
            status: "started".to_string(),
            frame_size: 4096,
            message: None,
        };

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["type"], "session_status");
        assert_eq!(value["frame_size"], 4096);
    }

    #[test]
    fn test_client_messages_parse() {
        let ping: WebSocketMessage = serde_json::from_str(r#"{"type":"ping","timestamp":42}"#).unwrap();
        assert!(matches!(ping, WebSocketMessage::Ping { timestamp: 42 }));

        let end: WebSocketMessage = serde_json::from_str(r#"{"type":"end_session"}"#).unwrap();
        assert!(matches!(end, WebSocketMessage::EndSession));
    }

    #[actix_web::test]
    async fn test_audio_chunks_become_pcm_frames() {
        let second_chunk = float_bytes(&[1.0, -1.0, 0.2]);
        let frames = run_session(
            default_state(),
            vec![
                client_frame(true, OP_BINARY, &float_bytes(&[0.5, -0.5])),
                // Second chunk split across two fragments
                client_frame(false, OP_BINARY, &second_chunk[..4]),
                client_frame(true, OP_CONTINUATION, &second_chunk[4..]),
                client_frame(true, OP_BINARY, &[1, 2, 3]),
                client_frame(true, OP_TEXT, br#"{"type":"ping","timestamp":7}"#),
            ],
            true,
            4,
        )
        .await;

        let texts = text_messages(&frames);
        assert_eq!(texts[0]["type"], "session_status");
        assert_eq!(texts[0]["status"], "started");
        assert_eq!(texts[0]["frame_size"], 4);
        assert!(texts
            .iter()
            .any(|m| m["type"] == "error" && m["code"] == "invalid_audio"));
        assert!(texts.iter().any(|m| m["type"] == "pong" && m["timestamp"] == 7));

        let expected: Vec<u8> = [16384i16, -16384, 32767, -32767]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let binary: Vec<&Vec<u8>> = frames
            .iter()
            .filter(|(opcode, _)| *opcode == OP_BINARY)
            .map(|(_, payload)| payload)
            .collect();
        assert_eq!(binary, vec![&expected]);
    }

    #[actix_web::test]
    async fn test_end_session_closes_and_releases_slot() {
        let state = default_state();
        assert!(state.try_open_session());

        let frames = run_session(
            state.clone(),
            vec![
                client_frame(true, OP_BINARY, &float_bytes(&[0.1])),
                client_frame(true, OP_TEXT, br#"{"type":"end_session"}"#),
            ],
            false,
            usize::MAX,
        )
        .await;

        assert!(text_messages(&frames).iter().any(|m| m["status"] == "ended"));
        assert_eq!(frames.last().map(|(opcode, _)| *opcode), Some(OP_CLOSE));
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    async fn upgrade_status(uri: &str) -> (StatusCode, AppState) {
        let state = default_state();
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(handlers::configure),
        )
        .await;

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri(uri).to_request()).await;
        (resp.status(), state)
    }

    #[actix_web::test]
    async fn test_unknown_processor_is_rejected_before_upgrade() {
        let (status, state) = upgrade_status("/ws/audio?processor=reverb").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[actix_web::test]
    async fn test_invalid_frame_sizes_are_rejected_before_upgrade() {
        for uri in [
            "/ws/audio?frame_size=0",
            "/ws/audio?frame_size=65537",
            "/ws/audio?frame_size=18446744073709551615",
        ] {
            let (status, _) = upgrade_status(uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn test_non_upgrade_request_releases_session_slot() {
        let (status, state) = upgrade_status("/ws/audio").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }
}
