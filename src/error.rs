use thiserror::Error;

/// Every error kind the room fabric can produce.
///
/// Mirrors §7 of the design: per-frame and per-participant errors never
/// escape the call that produced them (the fan-out loop logs and
/// continues); only `ConfigError` aborts the process.
#[derive(Debug, Error)]
pub enum VoiceRoomError {
    #[error("transport closed for participant {participant_id}")]
    TransportClosed { participant_id: String },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("delivery to {participant_id} failed: {reason}")]
    DeliveryFailure {
        participant_id: String,
        reason: String,
    },

    #[error("agent queue full for {participant_id}, frame dropped")]
    QueueFull { participant_id: String },

    #[error("pipeline stage fatal for agent {agent_id}: {reason}")]
    PipelineFatal { agent_id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Codec-level failures. Kept separate from `VoiceRoomError` so the
/// ingress read loop can match on it without unwrapping a broader enum.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload exceeds maximum size")]
    TooLarge,

    #[error("unknown envelope type: {0}")]
    UnknownType(String),

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_display() {
        let e = DecodeError::UnknownType("bogus".into());
        assert_eq!(e.to_string(), "unknown envelope type: bogus");
    }

    #[test]
    fn voice_room_error_wraps_decode_error() {
        let e: VoiceRoomError = DecodeError::TooLarge.into();
        assert!(matches!(e, VoiceRoomError::Decode(DecodeError::TooLarge)));
    }
}
