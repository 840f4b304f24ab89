pub mod downlink;
pub mod handle;
pub mod lifecycle;
pub mod status;
pub mod transcript;

pub use downlink::{DownlinkReceiver, SessionUpdate};
pub use handle::SessionHandle;
pub use lifecycle::VoiceSession;
pub use status::{SessionState, SessionStatus, format_elapsed};
pub use transcript::{Speaker, TranscriptAccumulator, TranscriptEntry};
