pub mod backend;
pub mod builder;
pub mod handle;

mod connection;

pub use backend::{ConversationalBackend, GeminiLiveBackend, LiveConnection, SessionEvent};
pub use builder::LiveSessionBuilder;
pub use handle::{LiveSessionClient, SessionChannels, SessionReadiness};

/// Sample rate (16kHz) Gemini accepts for audio sent to the Gemini API.
pub const GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT: u32 = 16000;
/// Number of audio channels (mono) Gemini accepts for audio sent to the Gemini API.
pub const GEMINI_AUDIO_CHANNELS_ACCEPTED_INPUT: u16 = 1;
/// Sample rate (24kHz) of the PCM audio Gemini streams back.
pub const GEMINI_AUDIO_SAMPLE_RATE_HZ_OUTPUT: u32 = 24000;
/// Number of audio channels (mono) Gemini streams back.
pub const GEMINI_AUDIO_CHANNELS_OUTPUT: u16 = 1;

pub const GEMINI_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
