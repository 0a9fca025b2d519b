// The agent loop: bridges room fan-out (bytes in a bounded queue) and the
// pipeline abstraction (streams of typed values).
//
// Grounded on the teacher's publisher task shape in `sfu.rs` (a spawned
// task owning a `CancellationToken`, looping on `tokio::select!` until
// cancelled or the source closes) and on spec §4.5's two-cooperative-task
// description. The two "tasks" are realized here as two ends of one
// `futures::Stream` pipeline driven by a single Tokio task: the source
// half is a generator pulling off the input queue, the pipeline chains
// lazily on top of it, and the sink half is the loop below that drives
// the whole chain and publishes each emitted frame. No frame is held
// across an await that could starve the room lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::VoiceRoomError;
use crate::pipeline::{AgentPipeline, BoxStream};
use crate::protocol::{self, AudioFrame, Envelope};
use crate::room_manager::RoomManager;

/// A pipeline stage must yield within this long after it starts consuming
/// input, or the agent is torn down (spec §5).
const PIPELINE_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the source stream: decode already-encoded envelopes off the
/// agent's input queue, discard anything that isn't `audio_stream`, and
/// end when the queue is closed or the agent is cancelled. Every frame
/// handed into the pipeline flips `input_pending`, so the caller can tell
/// a stage actually has something to process apart from it being idle.
fn source_stream(
    mut queue_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    input_pending: Arc<AtomicBool>,
) -> BoxStream<AudioFrame> {
    Box::pin(stream! {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => None,
                item = queue_rx.recv() => item,
            };
            let Some(bytes) = item else { break };
            match protocol::decode(&bytes) {
                Ok(envelope) => {
                    if let Some(frame) = envelope.as_audio_frame() {
                        input_pending.store(true, Ordering::SeqCst);
                        yield frame;
                    }
                }
                Err(e) => debug!(error = %e, "agent: discarding undecodable queue item"),
            }
        }
    })
}

/// Spawn the agent's background task: consumes room audio via
/// `queue_rx`, runs it through `pipeline`, and publishes the pipeline's
/// output back into the room as the agent's own audio. Always calls
/// `RoomManager::leave` on exit, regardless of how the loop ended.
pub fn spawn_agent(
    manager: Arc<RoomManager>,
    room_id: String,
    agent_id: String,
    pipeline: AgentPipeline,
    queue_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let input_pending = Arc::new(AtomicBool::new(false));
        let audio_in = source_stream(queue_rx, cancel.clone(), input_pending.clone());
        let mut output = pipeline.process(audio_in);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(room_id = %room_id, agent_id = %agent_id, "agent: cancelled");
                    break;
                }
                next = tokio::time::timeout(PIPELINE_STAGE_TIMEOUT, output.next()) => next,
            };

            let frame = match next {
                Ok(Some(frame)) => {
                    input_pending.store(false, Ordering::SeqCst);
                    frame
                }
                Ok(None) => {
                    debug!(room_id = %room_id, agent_id = %agent_id, "agent: pipeline ended");
                    break;
                }
                Err(_) => {
                    // The stage went quiet for 30s. That's only a fault if it
                    // had input waiting to be processed -- a room with no
                    // audio at all is normal and must not tear the agent down.
                    if !input_pending.swap(false, Ordering::SeqCst) {
                        continue;
                    }
                    let err = VoiceRoomError::PipelineFatal {
                        agent_id: agent_id.clone(),
                        reason: "stage did not yield within the timeout".into(),
                    };
                    warn!(room_id = %room_id, agent_id = %agent_id, error = %err, "tearing down agent");
                    break;
                }
            };

            manager.broadcast_audio(&room_id, &agent_id, frame).await;
        }

        manager.leave(&room_id, &agent_id).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::providers::mock::{MockLlm, MockStt, MockTts};
    use futures::stream;

    #[tokio::test]
    async fn source_stream_discards_non_audio_envelopes() {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let input_pending = Arc::new(AtomicBool::new(false));
        let mut src = source_stream(rx, cancel, input_pending.clone());

        let control = protocol::encode(&Envelope::system("hi"));
        let audio = protocol::encode(&Envelope::audio_stream("p1", &AudioFrame::new(vec![9], 1)));
        tx.send(Bytes::from(control)).await.unwrap();
        tx.send(Bytes::from(audio)).await.unwrap();
        drop(tx);

        let frame = src.next().await.unwrap();
        assert_eq!(frame.payload, vec![9]);
        assert!(input_pending.load(Ordering::SeqCst));
        assert!(src.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_agent_survives_repeated_stage_timeouts_with_no_input() {
        let manager = Arc::new(RoomManager::new(Arc::new(crate::recording::NullRecorder)));
        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = spawn_agent(
            manager,
            "room-idle".into(),
            "agent-test".into(),
            AgentPipeline::Echo,
            rx,
            cancel.clone(),
        );

        // A silent room crossing the watchdog window, repeatedly, must not
        // tear the agent down -- only a stage with pending input may fault.
        tokio::time::advance(PIPELINE_STAGE_TIMEOUT * 3).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn echo_pipeline_passes_frames_through_unchanged() {
        let frames = vec![AudioFrame::new(vec![1], 0), AudioFrame::new(vec![2], 20)];
        let input: BoxStream<AudioFrame> = Box::pin(stream::iter(frames.clone()));
        let out: Vec<AudioFrame> = AgentPipeline::Echo.process(input).collect().await;
        assert_eq!(out, frames);
    }

    #[tokio::test]
    async fn conversational_pipeline_composes_stt_llm_tts() {
        let pipeline = AgentPipeline::Conversational {
            stt: Arc::new(MockStt),
            llm: Arc::new(MockLlm),
            tts: Arc::new(MockTts),
        };
        let frames: Vec<AudioFrame> = (0..20)
            .map(|i| AudioFrame::new(vec![0u8; 1000], i * 20))
            .collect();
        let input: BoxStream<AudioFrame> = Box::pin(stream::iter(frames));
        let out: Vec<AudioFrame> = pipeline.process(input).collect().await;
        assert!(!out.is_empty());
    }
}
