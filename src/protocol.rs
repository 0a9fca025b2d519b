// Wire protocol: a self-describing msgpack envelope carrying either
// control payloads (auth, room membership, system notices) or audio.
//
// Grounded on `original_source/app/core/protocol.py`, which wraps every
// message as `{type, payload}` and packs it with `msgpack`. We keep that
// shape but give each `type` a concrete Rust payload struct instead of a
// loosely-typed dict, and use `rmpv` to inspect the top-level `type` tag
// before committing to a payload shape -- this is what lets an unknown
// discriminator be logged and dropped instead of failing the whole
// decode.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::DecodeError;

/// Maximum encoded envelope size. Larger frames close the connection.
pub const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

/// Default audio parameters (spec §3).
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_FRAME_DURATION_MS: u16 = 20;
pub const DEFAULT_FRAME_BYTES: usize = 320 * 2; // 320 samples * 16-bit PCM

/// One atomic audio payload. The codec treats `payload` as opaque bytes;
/// it is never reinterpreted as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub payload: Vec<u8>,
    pub timestamp_ms: u64,
    pub duration_ms: u16,
}

impl AudioFrame {
    pub fn new(payload: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            payload,
            timestamp_ms,
            duration_ms: DEFAULT_FRAME_DURATION_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthPayload {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRoomPayload {
    pub room_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaveRoomPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomInfoPayload {
    pub room_id: String,
    pub participant_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemPayload {
    pub message: String,
}

/// `audio_data` round-trips as msgpack `Bin`, never `Str`, because it is
/// wrapped in `ByteBuf` instead of a plain `String`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioStreamPayload {
    pub participant_id: String,
    pub audio_data: ByteBuf,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiRequestPayload {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiResponsePayload {
    #[serde(default)]
    pub text: Option<String>,
}

/// The typed, decoded form of every wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Auth(AuthPayload),
    JoinRoom(JoinRoomPayload),
    LeaveRoom(LeaveRoomPayload),
    RoomInfo(RoomInfoPayload),
    Error(ErrorPayload),
    System(SystemPayload),
    AudioStream(AudioStreamPayload),
    AiRequest(AiRequestPayload),
    AiResponse(AiResponsePayload),
}

impl Envelope {
    /// The wire discriminator for this envelope, e.g. `"audio_stream"`.
    pub fn tag(&self) -> &'static str {
        match self {
            Envelope::Auth(_) => "auth",
            Envelope::JoinRoom(_) => "join_room",
            Envelope::LeaveRoom(_) => "leave_room",
            Envelope::RoomInfo(_) => "room_info",
            Envelope::Error(_) => "error",
            Envelope::System(_) => "system",
            Envelope::AudioStream(_) => "audio_stream",
            Envelope::AiRequest(_) => "ai_request",
            Envelope::AiResponse(_) => "ai_response",
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Envelope::System(SystemPayload {
            message: message.into(),
        })
    }

    pub fn audio_stream(participant_id: impl Into<String>, frame: &AudioFrame) -> Self {
        Envelope::AudioStream(AudioStreamPayload {
            participant_id: participant_id.into(),
            audio_data: ByteBuf::from(frame.payload.clone()),
            timestamp: frame.timestamp_ms,
        })
    }

    /// Extracts the carried `AudioFrame` if this is an `audio_stream`
    /// envelope, `None` for any other variant.
    pub fn as_audio_frame(&self) -> Option<AudioFrame> {
        match self {
            Envelope::AudioStream(p) => Some(AudioFrame {
                payload: p.audio_data.to_vec(),
                timestamp_ms: p.timestamp,
                duration_ms: DEFAULT_FRAME_DURATION_MS,
            }),
            _ => None,
        }
    }
}

/// Encode an envelope to its wire representation: `{type, payload}`
/// packed as msgpack.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let payload_value = match envelope {
        Envelope::Auth(p) => rmpv::ext::to_value(p),
        Envelope::JoinRoom(p) => rmpv::ext::to_value(p),
        Envelope::LeaveRoom(p) => rmpv::ext::to_value(p),
        Envelope::RoomInfo(p) => rmpv::ext::to_value(p),
        Envelope::Error(p) => rmpv::ext::to_value(p),
        Envelope::System(p) => rmpv::ext::to_value(p),
        Envelope::AudioStream(p) => rmpv::ext::to_value(p),
        Envelope::AiRequest(p) => rmpv::ext::to_value(p),
        Envelope::AiResponse(p) => rmpv::ext::to_value(p),
    }
    .expect("payload structs always serialize");

    let wire = rmpv::Value::Map(vec![
        (
            rmpv::Value::String("type".into()),
            rmpv::Value::String(envelope.tag().into()),
        ),
        (rmpv::Value::String("payload".into()), payload_value),
    ]);

    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &wire).expect("msgpack encoding is infallible for Value");
    buf
}

/// Decode a wire frame into an `Envelope`.
///
/// An unknown `type` discriminator is reported as
/// `DecodeError::UnknownType` -- callers log and drop the frame but keep
/// the connection open, per spec §4.1. Anything that isn't a well-formed
/// `{type, payload}` map is `DecodeError::Malformed`. Oversized input is
/// `DecodeError::TooLarge`, which callers treat as connection-fatal.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    if bytes.len() > MAX_ENVELOPE_BYTES {
        return Err(DecodeError::TooLarge);
    }

    let value = rmpv::decode::read_value(&mut &bytes[..])
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let map = value
        .as_map()
        .ok_or_else(|| DecodeError::Malformed("top-level value is not a map".into()))?;

    let type_tag = map
        .iter()
        .find(|(k, _)| k.as_str() == Some("type"))
        .and_then(|(_, v)| v.as_str())
        .ok_or_else(|| DecodeError::Malformed("missing `type` field".into()))?
        .to_string();

    let payload = map
        .iter()
        .find(|(k, _)| k.as_str() == Some("payload"))
        .map(|(_, v)| v.clone())
        .unwrap_or(rmpv::Value::Map(vec![]));

    let from_payload = |v: rmpv::Value| -> Result<_, DecodeError> {
        rmpv::ext::from_value(v).map_err(|e| DecodeError::Malformed(e.to_string()))
    };

    match type_tag.as_str() {
        "auth" => Ok(Envelope::Auth(from_payload(payload)?)),
        "join_room" => Ok(Envelope::JoinRoom(from_payload(payload)?)),
        "leave_room" => Ok(Envelope::LeaveRoom(from_payload(payload)?)),
        "room_info" => Ok(Envelope::RoomInfo(from_payload(payload)?)),
        "error" => Ok(Envelope::Error(from_payload(payload)?)),
        "system" => Ok(Envelope::System(from_payload(payload)?)),
        "audio_stream" => Ok(Envelope::AudioStream(from_payload(payload)?)),
        "ai_request" => Ok(Envelope::AiRequest(from_payload(payload)?)),
        "ai_response" => Ok(Envelope::AiResponse(from_payload(payload)?)),
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}
