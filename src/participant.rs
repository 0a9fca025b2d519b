// Polymorphic participant: a real socket-backed human, or a queue-backed
// virtual agent. Both share the `ParticipantHandle` capability set so the
// room fan-out loop never has to know which one it's talking to.
//
// Grounded on `original_source/app/models/room.py`'s `Participant` /
// `WebSocketParticipant` / `VirtualParticipant` split, translated from
// Python ABC inheritance into a Rust trait object, per spec §9's
// "avoid open inheritance" redesign flag.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

pub type ParticipantId = String;

/// Why a delivery attempt did not result in the frame reaching the peer.
///
/// The two variants are handled differently upstream: `QueueFull` is a
/// normal, expected condition for an overloaded agent and only bumps a
/// drop counter; `Failed` counts toward the three-strikes eviction rule
/// in `RoomManager` (spec §4.3).
#[derive(Debug, Clone)]
pub enum DeliveryError {
    QueueFull,
    Failed(String),
}

/// The capability set every participant exposes to the room fan-out.
#[async_trait]
pub trait ParticipantHandle: Send + Sync {
    fn id(&self) -> &ParticipantId;
    fn display_name(&self) -> &str;
    async fn deliver_audio(&self, bytes: Bytes) -> Result<(), DeliveryError>;
    async fn deliver_control(&self, bytes: Bytes) -> Result<(), DeliveryError>;

    /// Best-effort teardown, called when this participant is replaced by
    /// a duplicate join or evicted. Default is a no-op (agents have
    /// nothing to close besides their queue, which drops naturally).
    async fn close(&self) {}
}

/// A human connected over a WebSocket. Delivery writes binary frames to
/// the socket; a closed/broken socket surfaces as `DeliveryError::Failed`.
pub struct HumanParticipant {
    id: ParticipantId,
    display_name: String,
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl HumanParticipant {
    pub fn new(
        id: ParticipantId,
        display_name: String,
        sink: SplitSink<WebSocket, Message>,
    ) -> Self {
        Self {
            id,
            display_name,
            sink: Mutex::new(sink),
        }
    }

    async fn send(&self, bytes: Bytes) -> Result<(), DeliveryError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(bytes.to_vec()))
            .await
            .map_err(|e| DeliveryError::Failed(e.to_string()))
    }
}

#[async_trait]
impl ParticipantHandle for HumanParticipant {
    fn id(&self) -> &ParticipantId {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn deliver_audio(&self, bytes: Bytes) -> Result<(), DeliveryError> {
        self.send(bytes).await
    }

    async fn deliver_control(&self, bytes: Bytes) -> Result<(), DeliveryError> {
        self.send(bytes).await
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
    }
}

/// The in-room handle of an embedded agent. Audio delivery enqueues the
/// already-encoded envelope onto a bounded channel for the agent's
/// source task to decode; control envelopes are not consumed by agents
/// and are dropped silently, mirroring `VirtualParticipant.send_json`
/// in the original Python model.
pub struct AgentParticipant {
    id: ParticipantId,
    display_name: String,
    queue_tx: mpsc::Sender<Bytes>,
}

impl AgentParticipant {
    pub fn new(id: ParticipantId, display_name: String, queue_tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            display_name,
            queue_tx,
        }
    }
}

#[async_trait]
impl ParticipantHandle for AgentParticipant {
    fn id(&self) -> &ParticipantId {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn deliver_audio(&self, bytes: Bytes) -> Result<(), DeliveryError> {
        match self.queue_tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DeliveryError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(DeliveryError::Failed("agent queue closed".into()))
            }
        }
    }

    async fn deliver_control(&self, _bytes: Bytes) -> Result<(), DeliveryError> {
        debug!(agent_id = %self.id, "control envelope ignored by agent participant");
        Ok(())
    }
}

/// A room member: either a human or an embedded agent, behind the shared
/// capability trait.
pub enum Participant {
    Human(HumanParticipant),
    Agent(AgentParticipant),
}

impl Participant {
    pub fn handle(&self) -> &dyn ParticipantHandle {
        match self {
            Participant::Human(h) => h,
            Participant::Agent(a) => a,
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Participant::Agent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn agent_delivery_enqueues_bytes() {
        let (tx, mut rx) = mpsc::channel(4);
        let agent = AgentParticipant::new("agent-1".into(), "AI-echo".into(), tx);
        agent
            .deliver_audio(Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn agent_queue_full_is_reported_not_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let agent = AgentParticipant::new("agent-1".into(), "AI-echo".into(), tx);
        agent.deliver_audio(Bytes::from_static(b"a")).await.unwrap();
        let err = agent.deliver_audio(Bytes::from_static(b"b")).await;
        assert!(matches!(err, Err(DeliveryError::QueueFull)));
    }

    #[tokio::test]
    async fn agent_control_delivery_is_a_no_op() {
        let (tx, mut rx) = mpsc::channel(4);
        let agent = AgentParticipant::new("agent-1".into(), "AI-echo".into(), tx);
        agent
            .deliver_control(Bytes::from_static(b"ignored"))
            .await
            .unwrap();
        drop(agent);
        assert!(rx.try_recv().is_err());
    }
}
