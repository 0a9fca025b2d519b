// Deterministic stand-ins for a real STT/LLM/TTS vendor chain.
//
// Grounded on `original_source/app/services/ai/providers/mock.py`:
// MockSTT fires once cumulative audio bytes cross a threshold, MockLLM
// echoes the heard text back word-by-word with a short per-word delay,
// MockTTS turns text into silent PCM frames. We keep the same trigger
// constants and adapt the per-chunk TTS behavior to the punctuation
// -buffering contract spec §4.4 requires of every `Tts` implementation.

use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use tracing::debug;

use crate::pipeline::{BoxStream, Llm, Stt, Tts};
use crate::protocol::{AudioFrame, DEFAULT_FRAME_BYTES};

/// Cumulative audio bytes that trigger a mock transcription, matching
/// the ~0.5s-at-16kHz-mono-16bit threshold in the original Python mock.
pub const MOCK_STT_TRIGGER_BYTES: usize = 16_000;

/// A transcription service that "hears" speech once enough audio has
/// accumulated, ignoring the actual samples.
pub struct MockStt;

impl Stt for MockStt {
    fn transcribe(&self, mut audio: BoxStream<AudioFrame>) -> BoxStream<String> {
        Box::pin(stream! {
            let mut byte_count = 0usize;
            while let Some(frame) = audio.next().await {
                byte_count += frame.payload.len();
                if byte_count >= MOCK_STT_TRIGGER_BYTES {
                    debug!("MockStt: threshold crossed, emitting transcript");
                    yield "Hello world".to_string();
                    byte_count = 0;
                }
            }
        })
    }
}

/// A language model that parrots back what it "heard", one word per
/// stream item, with a short pacing delay between words.
pub struct MockLlm;

impl Llm for MockLlm {
    fn chat_stream(&self, mut text: BoxStream<String>) -> BoxStream<String> {
        Box::pin(stream! {
            while let Some(heard) = text.next().await {
                debug!(heard = %heard, "MockLlm: responding");
                let response = format!("I heard you say {heard}. That is interesting.");
                for word in response.split_whitespace() {
                    yield format!("{word} ");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        })
    }
}

/// A text-to-speech stage that buffers until sentence-ending
/// punctuation (or end of input) and emits silent 20ms/320-byte PCM
/// frames standing in for synthesized speech.
pub struct MockTts;

const SENTENCE_END: [char; 4] = ['.', '!', '?', '\n'];

impl Tts for MockTts {
    fn synthesize(&self, mut text: BoxStream<String>) -> BoxStream<AudioFrame> {
        Box::pin(stream! {
            let mut buffer = String::new();
            let mut next_timestamp: u64 = 0;

            while let Some(chunk) = text.next().await {
                buffer.push_str(&chunk);
                if buffer.trim_end().ends_with(SENTENCE_END) {
                    debug!(sentence = %buffer.trim(), "MockTts: synthesizing");
                    for _ in 0..5 {
                        yield AudioFrame::new(vec![0u8; DEFAULT_FRAME_BYTES], next_timestamp);
                        next_timestamp += 20;
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    buffer.clear();
                }
            }

            if !buffer.trim().is_empty() {
                debug!(sentence = %buffer.trim(), "MockTts: synthesizing final fragment");
                for _ in 0..5 {
                    yield AudioFrame::new(vec![0u8; DEFAULT_FRAME_BYTES], next_timestamp);
                    next_timestamp += 20;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn stt_triggers_once_threshold_crossed() {
        let frames: Vec<AudioFrame> = (0..20)
            .map(|i| AudioFrame::new(vec![0u8; 1000], i * 20))
            .collect();
        let input: BoxStream<AudioFrame> = Box::pin(stream::iter(frames));
        let mut out = MockStt.transcribe(input);
        let first = out.next().await;
        assert_eq!(first, Some("Hello world".to_string()));
    }

    #[tokio::test]
    async fn stt_silent_on_insufficient_audio() {
        let frames: Vec<AudioFrame> = vec![AudioFrame::new(vec![0u8; 100], 0)];
        let input: BoxStream<AudioFrame> = Box::pin(stream::iter(frames));
        let mut out = MockStt.transcribe(input);
        assert_eq!(out.next().await, None);
    }

    #[tokio::test]
    async fn llm_echoes_heard_text() {
        let input: BoxStream<String> = Box::pin(stream::iter(vec!["hi".to_string()]));
        let out = MockLlm.chat_stream(input);
        let words: Vec<String> = out.collect().await;
        let joined: String = words.concat();
        assert!(joined.contains("I heard you say hi"));
    }

    #[tokio::test]
    async fn tts_emits_frames_per_sentence() {
        let input: BoxStream<String> =
            Box::pin(stream::iter(vec!["Hello.".to_string(), "Bye.".to_string()]));
        let out = MockTts.synthesize(input);
        let frames: Vec<AudioFrame> = out.collect().await;
        assert_eq!(frames.len(), 10);
        assert!(frames.iter().all(|f| f.payload.len() == DEFAULT_FRAME_BYTES));
    }

    #[tokio::test]
    async fn tts_flushes_trailing_fragment_without_punctuation() {
        let input: BoxStream<String> = Box::pin(stream::iter(vec!["no punctuation here".to_string()]));
        let out = MockTts.synthesize(input);
        let frames: Vec<AudioFrame> = out.collect().await;
        assert_eq!(frames.len(), 5);
    }
}
