// Pipeline stage contracts: lazy stream-of-T -> stream-of-U transforms.
//
// Grounded on `original_source/app/services/ai/interfaces.py`'s
// `STTService.transcribe` / `LLMService.chat_stream` / `TTSService.synthesize`,
// each an `async def ... -> AsyncGenerator`. The Rust analogue of an async
// generator consuming a stream and producing a stream is a plain (non
// -async) trait method that hands back a boxed `futures::Stream`; the
// actual async work happens while the returned stream is polled, built
// with `async_stream::stream!` the way the teacher's `futures`/
// `async-stream` dependencies are meant to be used.

pub mod providers;

use std::pin::Pin;

use futures::Stream;

use crate::protocol::AudioFrame;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Speech-to-text: consumes audio frames, yields transcribed text
/// segments. Need not be one-to-one with input frames.
pub trait Stt: Send + Sync {
    fn transcribe(&self, audio: BoxStream<AudioFrame>) -> BoxStream<String>;
}

/// Language model: consumes text, yields response tokens. The stage owns
/// its own conversation history/turn boundary.
pub trait Llm: Send + Sync {
    fn chat_stream(&self, text: BoxStream<String>) -> BoxStream<String>;
}

/// Text-to-speech: buffers text until sentence-ending punctuation (or
/// end of input), then yields fixed-size PCM frames.
pub trait Tts: Send + Sync {
    fn synthesize(&self, text: BoxStream<String>) -> BoxStream<AudioFrame>;
}

/// A composed conversational agent, or the identity (echo) pipeline.
///
/// `Echo` skips the STT/LLM/TTS triple entirely and returns its input
/// unchanged, per spec §4.4's "simpler echo agent" carve-out.
pub enum AgentPipeline {
    Echo,
    Conversational {
        stt: std::sync::Arc<dyn Stt>,
        llm: std::sync::Arc<dyn Llm>,
        tts: std::sync::Arc<dyn Tts>,
    },
}

impl AgentPipeline {
    pub fn process(&self, audio_in: BoxStream<AudioFrame>) -> BoxStream<AudioFrame> {
        match self {
            AgentPipeline::Echo => audio_in,
            AgentPipeline::Conversational { stt, llm, tts } => {
                let text = stt.transcribe(audio_in);
                let response = llm.chat_stream(text);
                tts.synthesize(response)
            }
        }
    }
}
