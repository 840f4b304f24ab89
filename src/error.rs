use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiveAudioError {
    #[error("Microphone permission denied: {0}")]
    Permission(String),
    #[error("No audio device found: {0}")]
    DeviceNotFound(String),
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Malformed audio data: {0}")]
    MalformedData(String),
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to send message to the live session")]
    SendFailure,
    #[error("Live session is not ready or already closed")]
    NotReady,
    #[error("Invalid session configuration: {0}")]
    Config(String),
    #[error("Audio resampling error: {0}")]
    AudioResampling(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveAudioError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LiveAudioError::WebSocket(Box::new(err))
    }
}

impl From<url::ParseError> for LiveAudioError {
    fn from(err: url::ParseError) -> Self {
        LiveAudioError::Config(format!("Invalid endpoint URL: {}", err))
    }
}

impl From<base64::DecodeError> for LiveAudioError {
    fn from(err: base64::DecodeError) -> Self {
        LiveAudioError::MalformedData(err.to_string())
    }
}

impl LiveAudioError {
    /// Errors local to a single downlink fragment; the pipeline drops the
    /// fragment and keeps playing.
    pub fn is_fragment_local(&self) -> bool {
        matches!(
            self,
            LiveAudioError::MalformedData(_) | LiveAudioError::UnsupportedFormat(_)
        )
    }
}
