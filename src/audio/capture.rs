//! Fixed-size frame capture from a live input device.
//!
//! Device callbacks deliver blocks of arbitrary length at the device's own
//! rate and channel count. [`CaptureProcessor`] mixes them down to mono,
//! brings them to the uplink rate and cuts them into fixed frames, which a
//! [`FrameSink`] forwards only while the capture stage is connected.

use super::pcm::AudioFrame;
use super::playback::PlaybackSink;
#[cfg(feature = "audio-resampling")]
use super::resample::StreamResampler;
use crate::error::LiveAudioError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Frames buffered between the device callback and the uplink task.
const FRAME_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Rate the produced frames are delivered at.
    pub sample_rate: u32,
    pub frame_samples: usize,
}

/// Access to the machine's audio hardware.
pub trait AudioDevices: Send + Sync {
    type Output: PlaybackSink;

    /// Acquires the microphone and starts capturing. Frames only flow once
    /// the returned stream is connected.
    fn open_capture(&self, config: &CaptureConfig) -> Result<CaptureStream, LiveAudioError>;

    /// Opens an output context whose clock drives playback scheduling.
    fn open_output(&self, sample_rate: u32) -> Result<Self::Output, LiveAudioError>;
}

/// OS-side resources held by an open capture stream.
pub trait CaptureResource: Send {
    /// Stops the microphone stream and releases the device.
    fn stop_tracks(&mut self);

    /// Detaches the processing stage from the microphone.
    fn disconnect(&mut self) {}
}

/// Device-facing end of the frame channel.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<AudioFrame>,
    connected: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl FrameSink {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Never blocks: frames arriving while disconnected or while the uplink
    /// is behind are dropped.
    pub fn push(&self, frame: AudioFrame) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!("[Capture] Frame channel full, dropped {} frames so far.", dropped);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// An open microphone stream plus the frames it produces.
pub struct CaptureStream {
    frames: Option<mpsc::Receiver<AudioFrame>>,
    connected: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    resource: Option<Box<dyn CaptureResource>>,
}

impl CaptureStream {
    /// Creates the frame channel for a device backend. The backend keeps the
    /// sink and hands the resource guard back through [`CaptureStreamBuilder::attach`].
    pub fn channel() -> (FrameSink, CaptureStreamBuilder) {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));
        let sink = FrameSink {
            tx,
            connected: connected.clone(),
            dropped: dropped.clone(),
        };
        (
            sink,
            CaptureStreamBuilder {
                rx,
                connected,
                dropped,
            },
        )
    }

    /// Routes captured frames to the caller. Returns `None` if the stream
    /// was already connected or released.
    pub fn connect(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        let frames = self.frames.take()?;
        self.connected.store(true, Ordering::Release);
        info!("[Capture] Capture stage connected.");
        Some(frames)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.resource.is_none()
    }

    pub fn release_microphone(&mut self) {
        if let Some(resource) = self.resource.as_mut() {
            resource.stop_tracks();
            debug!("[Capture] Microphone stream stopped.");
        }
    }

    pub fn disconnect(&mut self) {
        self.connected.store(false, Ordering::Release);
        self.frames.take();
        if let Some(mut resource) = self.resource.take() {
            resource.disconnect();
            debug!("[Capture] Capture stage disconnected.");
        }
    }

    /// Releases the microphone, then detaches processing.
    pub fn release(&mut self) {
        self.release_microphone();
        self.disconnect();
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if self.resource.is_some() {
            warn!("[Capture] Capture stream dropped without release, releasing now.");
            self.release();
        }
    }
}

pub struct CaptureStreamBuilder {
    rx: mpsc::Receiver<AudioFrame>,
    connected: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl CaptureStreamBuilder {
    pub fn attach(self, resource: Box<dyn CaptureResource>) -> CaptureStream {
        CaptureStream {
            frames: Some(self.rx),
            connected: self.connected,
            dropped: self.dropped,
            resource: Some(resource),
        }
    }
}

/// Cuts a continuous mono sample stream into frames of exactly
/// `frame_samples` samples.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_samples: usize, sample_rate: u32) -> Self {
        Self {
            frame_samples,
            sample_rate,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, mono: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(mono);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let samples: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            frames.push(AudioFrame::new(samples, self.sample_rate));
        }
        frames
    }
}

pub fn mix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Everything between a device callback and the frame sink.
pub struct CaptureProcessor {
    device_channels: u16,
    #[cfg(feature = "audio-resampling")]
    resampler: Option<StreamResampler>,
    assembler: FrameAssembler,
}

impl CaptureProcessor {
    pub fn new(
        device_rate: u32,
        device_channels: u16,
        config: &CaptureConfig,
    ) -> Result<Self, LiveAudioError> {
        if device_channels == 0 {
            return Err(LiveAudioError::UnsupportedFormat(
                "Input device reports zero channels".to_string(),
            ));
        }
        info!(
            "[Capture] Device input {}Hz {}ch -> frames of {} samples at {}Hz mono.",
            device_rate, device_channels, config.frame_samples, config.sample_rate
        );

        #[cfg(feature = "audio-resampling")]
        let resampler = if device_rate != config.sample_rate {
            Some(StreamResampler::new(device_rate, config.sample_rate)?)
        } else {
            None
        };
        if cfg!(not(feature = "audio-resampling")) && device_rate != config.sample_rate {
            return Err(LiveAudioError::UnsupportedFormat(format!(
                "Input device runs at {}Hz but frames must be {}Hz. Automatic resampling not compiled.",
                device_rate, config.sample_rate
            )));
        }

        Ok(Self {
            device_channels,
            #[cfg(feature = "audio-resampling")]
            resampler,
            assembler: FrameAssembler::new(config.frame_samples, config.sample_rate),
        })
    }

    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<AudioFrame>, LiveAudioError> {
        let mono = mix_to_mono(interleaved, self.device_channels);
        #[cfg(feature = "audio-resampling")]
        let mono = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&mono)?,
            None => mono,
        };
        Ok(self.assembler.push(&mono))
    }
}
