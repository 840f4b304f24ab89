pub mod capture;
#[cfg(feature = "cpal-io")]
pub mod device;
pub mod pcm;
pub mod playback;
#[cfg(feature = "audio-resampling")]
pub mod resample;
pub mod uplink;

pub use capture::{
    AudioDevices, CaptureConfig, CaptureProcessor, CaptureResource, CaptureStream, FrameSink,
};
#[cfg(feature = "cpal-io")]
pub use device::{CpalDevices, CpalOutputSink};
pub use pcm::{AudioFrame, EncodedAudioChunk, PlaybackBuffer};
pub use playback::{PlaybackScheduler, PlaybackSink, ScheduledBuffer, VoiceId};
pub use uplink::UplinkSender;
