use crate::client::{GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT, GEMINI_AUDIO_SAMPLE_RATE_HZ_OUTPUT};
use crate::error::LiveAudioError;
use crate::types::{
    AudioTranscriptionConfig, BidiGenerateContentSetup, Content, GenerationConfig,
    PrebuiltVoiceConfig, ResponseModality, SpeechConfig, VoiceConfig,
};
use std::env;

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Samples per captured frame, matching a 4096-sample processing block.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

pub const CONVERSATION_INSTRUCTION: &str = "You are Satyashree (full name Satyashree Krushna Chandra Sahoo), \
an intelligent and empathetic assistant whose primary language is Odia (ଓଡ଼ିଆ). \
Respond only in Odia script using natural, spoken Odia phrasing. \
Be helpful and friendly, answer quickly, and give complete spoken answers without cutting them short.";

pub const TRANSCRIPTION_INSTRUCTION: &str = "You are a speech-to-text engine for Odia (ଓଡ଼ିଆ) only. \
Transcribe exactly what is spoken into Odia Unicode script. Never translate, never output Devanagari \
or romanized Odia, and keep spoken English words in English. \
If the speaker uses another language reply: \"ଦୟାକରି ଓଡ଼ିଆରେ କୁହନ୍ତୁ, ମୁଁ କେବଳ ଓଡ଼ିଆ ଅଡିଓକୁ ଟେକ୍ସଟ୍ କରେ।\" \
If the audio is unclear reply: \"ଶବ୍ଦ ସ୍ପଷ୍ଟ ନୁହେଁ, ଦୟାକରି ପୁଣିଥରେ କୁହନ୍ତୁ।\" \
Output only the transcription, with no labels, timestamps or explanations.";

pub const TRANSCRIPTION_VOICE: &str = "Puck";

/// What a live session is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Two-way voice conversation with spoken replies played back.
    Conversation,
    /// Live speech-to-text; replies are not played and only the input
    /// transcript is kept.
    Transcription,
}

impl SessionMode {
    pub fn plays_audio(&self) -> bool {
        matches!(self, SessionMode::Conversation)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api_key: String,
    pub model: String,
    pub mode: SessionMode,
    pub system_instruction: String,
    pub voice_name: Option<String>,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_samples: usize,
}

impl SessionConfig {
    pub fn conversation(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            mode: SessionMode::Conversation,
            system_instruction: CONVERSATION_INSTRUCTION.to_string(),
            voice_name: None,
            capture_sample_rate: GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT,
            playback_sample_rate: GEMINI_AUDIO_SAMPLE_RATE_HZ_OUTPUT,
            frame_samples: CAPTURE_FRAME_SAMPLES,
        }
    }

    pub fn transcription(api_key: impl Into<String>) -> Self {
        Self {
            mode: SessionMode::Transcription,
            system_instruction: TRANSCRIPTION_INSTRUCTION.to_string(),
            voice_name: Some(TRANSCRIPTION_VOICE.to_string()),
            ..Self::conversation(api_key)
        }
    }

    /// Reads `GEMINI_API_KEY` (falling back to `API_KEY`) and an optional
    /// `GEMINI_MODEL` override.
    pub fn from_env(mode: SessionMode) -> Result<Self, LiveAudioError> {
        let api_key = env::var("GEMINI_API_KEY")
            .or_else(|_| env::var("API_KEY"))
            .map_err(|_| LiveAudioError::Config("GEMINI_API_KEY not set".to_string()))?;
        let mut config = match mode {
            SessionMode::Conversation => Self::conversation(api_key),
            SessionMode::Transcription => Self::transcription(api_key),
        };
        if let Ok(model) = env::var("GEMINI_MODEL") {
            config.model = model;
        }
        Ok(config)
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn voice_name(mut self, voice: impl Into<String>) -> Self {
        self.voice_name = Some(voice.into());
        self
    }

    pub fn frame_samples(mut self, samples: usize) -> Self {
        self.frame_samples = samples;
        self
    }

    pub fn validate(&self) -> Result<(), LiveAudioError> {
        if self.api_key.trim().is_empty() {
            return Err(LiveAudioError::Config("API key is empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(LiveAudioError::Config("Model name is empty".to_string()));
        }
        if self.frame_samples == 0 {
            return Err(LiveAudioError::Config(
                "Capture frame size must be non-zero".to_string(),
            ));
        }
        if self.capture_sample_rate == 0 || self.playback_sample_rate == 0 {
            return Err(LiveAudioError::Config(
                "Sample rates must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the setup message sent as the first frame of the live session.
    pub fn to_setup(&self) -> BidiGenerateContentSetup {
        let speech_config = self.voice_name.as_ref().map(|voice| SpeechConfig {
            voice_config: Some(VoiceConfig {
                prebuilt_voice_config: Some(PrebuiltVoiceConfig {
                    voice_name: voice.clone(),
                }),
            }),
            language_code: None,
        });
        BidiGenerateContentSetup {
            model: self.model.clone(),
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec![ResponseModality::Audio]),
                speech_config,
                ..Default::default()
            }),
            system_instruction: Some(Content::from_text(self.system_instruction.clone())),
            input_audio_transcription: Some(AudioTranscriptionConfig {}),
            output_audio_transcription: match self.mode {
                SessionMode::Conversation => Some(AudioTranscriptionConfig {}),
                SessionMode::Transcription => None,
            },
        }
    }
}
