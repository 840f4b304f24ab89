//! Realtime audio pipeline for Odia voice conversations and live
//! transcription over the Gemini live API.
//!
//! Microphone frames are encoded as 16 kHz PCM16 and streamed to the live
//! session; audio coming back is decoded and played gaplessly, and
//! streamed transcripts are assembled into per-turn entries.

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ConversationalBackend, GeminiLiveBackend, LiveSessionClient, SessionEvent};
pub use config::{SessionConfig, SessionMode};
pub use error::LiveAudioError;
pub use session::{SessionState, SessionStatus, SessionUpdate, Speaker, TranscriptEntry, VoiceSession};
