//! Session states and the human-readable status shown to the user.

use crate::error::LiveAudioError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
    Error(String),
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Error(_) => "error",
        }
    }

    /// Whether `start` may begin a new session from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Error(_))
    }
}

/// The single status line reflecting what the pipeline is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Ready,
    RequestingPermission,
    Connecting,
    Connected,
    PermissionDenied,
    NoMicrophone,
    MicrophoneUnavailable,
    StartFailed(String),
    Error(String),
    SessionClosed,
    SessionEnded,
}

impl SessionStatus {
    /// Status for a failure to acquire the microphone.
    pub fn from_capture_error(err: &LiveAudioError) -> Self {
        match err {
            LiveAudioError::Permission(_) => SessionStatus::PermissionDenied,
            LiveAudioError::DeviceNotFound(_) => SessionStatus::NoMicrophone,
            _ => SessionStatus::MicrophoneUnavailable,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SessionStatus::PermissionDenied
                | SessionStatus::NoMicrophone
                | SessionStatus::MicrophoneUnavailable
                | SessionStatus::StartFailed(_)
                | SessionStatus::Error(_)
        )
    }

    /// The status as shown in the Odia user interface.
    pub fn odia(&self) -> String {
        match self {
            SessionStatus::Ready => "ଆରମ୍ଭ କରିବାକୁ ପ୍ରସ୍ତୁତ".to_string(),
            SessionStatus::RequestingPermission => "ମାଇକ୍ରୋଫୋନ୍ ଅନୁମତି ଅନୁରୋଧ କରୁଛି...".to_string(),
            SessionStatus::Connecting => "ସେସନ୍ ସଂଯୋଗ କରୁଛି...".to_string(),
            SessionStatus::Connected => "ସଂଯୁକ୍ତ। କଥା କୁହନ୍ତୁ...".to_string(),
            SessionStatus::PermissionDenied => "ମାଇକ୍ରୋଫୋନ୍ ଅନୁମତି ଆବଶ୍ୟକ।".to_string(),
            SessionStatus::NoMicrophone => "କୌଣସି ମାଇକ୍ରୋଫୋନ୍ ମିଳିଲା ନାହିଁ।".to_string(),
            SessionStatus::MicrophoneUnavailable => "ମାଇକ୍ରୋଫୋନ୍ ଆକ୍ସେସ୍ କରିବାରେ ବିଫଳ।".to_string(),
            SessionStatus::StartFailed(msg) => format!("ସେସନ୍ ଆରମ୍ଭ କରିବାରେ ବିଫଳ: {}", msg),
            SessionStatus::Error(msg) => format!("ତ୍ରୁଟି: {}", msg),
            SessionStatus::SessionClosed => "ସେସନ୍ ବନ୍ଦ ହେଲା".to_string(),
            SessionStatus::SessionEnded => "ସେସନ୍ ସମାପ୍ତ ହେଲା".to_string(),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Ready => write!(f, "Ready to start"),
            SessionStatus::RequestingPermission => write!(f, "Requesting microphone permission..."),
            SessionStatus::Connecting => write!(f, "Connecting session..."),
            SessionStatus::Connected => write!(f, "Connected. Start speaking..."),
            SessionStatus::PermissionDenied => write!(f, "Microphone permission is required."),
            SessionStatus::NoMicrophone => write!(f, "No microphone found."),
            SessionStatus::MicrophoneUnavailable => write!(f, "Failed to access the microphone."),
            SessionStatus::StartFailed(msg) => write!(f, "Failed to start session: {}", msg),
            SessionStatus::Error(msg) => write!(f, "Error: {}", msg),
            SessionStatus::SessionClosed => write!(f, "Session closed"),
            SessionStatus::SessionEnded => write!(f, "Session ended"),
        }
    }
}

/// Formats elapsed recording time as `mm:ss`.
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_time_is_zero_padded() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(65), "01:05");
        assert_eq!(format_elapsed(3600), "60:00");
    }

    #[test]
    fn capture_errors_map_to_statuses() {
        assert_eq!(
            SessionStatus::from_capture_error(&LiveAudioError::Permission("denied".into())),
            SessionStatus::PermissionDenied
        );
        assert_eq!(
            SessionStatus::from_capture_error(&LiveAudioError::DeviceNotFound("none".into())),
            SessionStatus::NoMicrophone
        );
        assert_eq!(
            SessionStatus::from_capture_error(&LiveAudioError::Device("busy".into())),
            SessionStatus::MicrophoneUnavailable
        );
    }

    #[test]
    fn error_status_renders_in_both_languages() {
        let status = SessionStatus::Error("socket reset".to_string());
        assert_eq!(status.to_string(), "Error: socket reset");
        assert_eq!(status.odia(), "ତ୍ରୁଟି: socket reset");
        assert!(status.is_error());
        assert!(!SessionStatus::Connected.is_error());
    }

    #[test]
    fn only_idle_and_error_can_start() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Error("x".into()).can_start());
        assert!(!SessionState::Starting.can_start());
        assert!(!SessionState::Active.can_start());
        assert!(!SessionState::Stopping.can_start());
    }
}
