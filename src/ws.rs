// WebSocket ingress: per-connection accept, join, and read loop.
//
// Grounded on spec §4.6 and the URL shape in
// `original_source/app/api/ws_endpoints.py` (`/ws/{room_id}/{username}`,
// no separate auth/join_room handshake -- presence in the URL is enough).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::VoiceRoomError;
use crate::participant::{HumanParticipant, Participant};
use crate::protocol::{self, Envelope};
use crate::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((room_id, username)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, username))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, room_id: String, username: String) {
    let participant_id = format!("p-{}", Uuid::new_v4().simple());
    let (sink, mut stream) = socket.split();

    let participant = Arc::new(Participant::Human(HumanParticipant::new(
        participant_id.clone(),
        username.clone(),
        sink,
    )));

    state
        .room_manager
        .clone()
        .join(&room_id, participant)
        .await;
    info!(room_id, participant_id, username, "participant joined");

    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                let err = VoiceRoomError::TransportClosed { participant_id: participant_id.clone() };
                debug!(room_id, participant_id, cause = %e, "{err}");
                break;
            }
            None => break,
        };

        match message {
            Message::Binary(bytes) => match protocol::decode(&bytes) {
                Ok(Envelope::AudioStream(payload)) => {
                    let frame = protocol::AudioFrame {
                        payload: payload.audio_data.into_vec(),
                        timestamp_ms: payload.timestamp,
                        duration_ms: protocol::DEFAULT_FRAME_DURATION_MS,
                    };
                    state
                        .room_manager
                        .broadcast_audio(&room_id, &participant_id, frame)
                        .await;
                }
                Ok(Envelope::LeaveRoom(_)) => {
                    debug!(room_id, participant_id, "received leave_room, closing");
                    break;
                }
                Ok(other) => {
                    debug!(room_id, participant_id, tag = other.tag(), "ignoring control envelope");
                }
                Err(crate::error::DecodeError::TooLarge) => {
                    warn!(room_id, participant_id, "oversized payload, closing connection");
                    break;
                }
                Err(e) => {
                    warn!(room_id, participant_id, error = %e, "dropping undecodable frame");
                }
            },
            Message::Text(_) => {
                // Reserved for future use; ignored per spec.
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.room_manager.leave(&room_id, &participant_id).await;
    info!(room_id, participant_id, "participant left");
}
