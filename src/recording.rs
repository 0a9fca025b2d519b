// Best-effort, idempotent-per-stream recorder.
//
// Grounded on the teacher's `RecordingHandle`/`RecordingConfig` (active
// sessions keyed by id, files opened lazily under a base dir, async writes
// via `tokio::fs::File` + `AsyncWriteExt`), simplified from the teacher's
// headered `.lrr` RTP-dump format to the headerless raw 16-bit LE PCM
// layout spec §6 calls for: `{base_dir}/{room_id}_{participant_id}.pcm`.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// External collaborator the core hands raw audio to. The core holds no
/// locks while calling it and never blocks the fan-out path on it.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn log_audio(&self, room_id: &str, sender_id: &str, raw_bytes: &[u8]);
    async fn close_session(&self, room_id: &str, sender_id: &str);
}

/// Appends raw PCM to one file per `(room_id, sender_id)` pair, opening the
/// file lazily on first write. Every operation is best-effort: failures are
/// logged and otherwise swallowed, since a broken recorder must never take
/// down the room fabric.
pub struct PcmFileRecorder {
    base_dir: PathBuf,
    sessions: Mutex<HashMap<String, File>>,
}

fn session_key(room_id: &str, sender_id: &str) -> String {
    format!("{room_id}_{sender_id}")
}

impl PcmFileRecorder {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn open(&self, key: &str) -> std::io::Result<File> {
        if let Err(e) = tokio::fs::create_dir_all(&self.base_dir).await {
            warn!(error = %e, dir = %self.base_dir.display(), "recorder: failed to create base dir");
        }
        let path = self.base_dir.join(format!("{key}.pcm"));
        OpenOptions::new().create(true).append(true).open(path).await
    }
}

#[async_trait]
impl Recorder for PcmFileRecorder {
    async fn log_audio(&self, room_id: &str, sender_id: &str, raw_bytes: &[u8]) {
        let key = session_key(room_id, sender_id);
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(&key) {
            match self.open(&key).await {
                Ok(file) => {
                    sessions.insert(key.clone(), file);
                }
                Err(e) => {
                    warn!(error = %e, room_id, sender_id, "recorder: failed to open recording file");
                    return;
                }
            }
        }
        if let Some(file) = sessions.get_mut(&key) {
            if let Err(e) = file.write_all(raw_bytes).await {
                warn!(error = %e, room_id, sender_id, "recorder: write failed");
            }
        }
    }

    async fn close_session(&self, room_id: &str, sender_id: &str) {
        let key = session_key(room_id, sender_id);
        let mut sessions = self.sessions.lock().await;
        if let Some(mut file) = sessions.remove(&key) {
            let _ = file.flush().await;
        }
    }
}

/// A recorder that discards everything, used when recording is disabled.
pub struct NullRecorder;

#[async_trait]
impl Recorder for NullRecorder {
    async fn log_audio(&self, _room_id: &str, _sender_id: &str, _raw_bytes: &[u8]) {}
    async fn close_session(&self, _room_id: &str, _sender_id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_audio_creates_and_appends_to_file() {
        let dir = std::env::temp_dir().join(format!("voiceroom-rec-test-{}", uuid::Uuid::new_v4()));
        let recorder = PcmFileRecorder::new(&dir);
        recorder.log_audio("room1", "alice", &[1, 2, 3, 4]).await;
        recorder.log_audio("room1", "alice", &[5, 6]).await;
        recorder.close_session("room1", "alice").await;

        let contents = tokio::fs::read(dir.join("room1_alice.pcm")).await.unwrap();
        assert_eq!(contents, vec![1, 2, 3, 4, 5, 6]);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn close_session_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("voiceroom-rec-test-{}", uuid::Uuid::new_v4()));
        let recorder = PcmFileRecorder::new(&dir);
        recorder.close_session("room1", "nobody").await;
        recorder.close_session("room1", "nobody").await;
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn null_recorder_does_nothing() {
        let recorder = NullRecorder;
        recorder.log_audio("r", "s", &[1, 2, 3]).await;
        recorder.close_session("r", "s").await;
    }
}
