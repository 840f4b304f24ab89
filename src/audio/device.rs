//! Microphone and speaker access through cpal.
//!
//! `cpal::Stream` is not `Send`, so every stream lives on its own thread and
//! is dropped there when a stop signal arrives over a crossbeam channel.
//! Opening and stopping a stream waits on that thread; on a multi-threaded
//! Tokio runtime the wait runs through `block_in_place`.

use super::capture::{AudioDevices, CaptureConfig, CaptureProcessor, CaptureResource, CaptureStream, FrameSink};
use super::pcm::PlaybackBuffer;
use super::playback::{PlaybackSink, VoiceId};
use super::resample::resample_block;
use crate::error::LiveAudioError;
use cpal::{
    FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig, SupportedStreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use crossbeam_channel::{Sender, bounded};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, warn};

/// The default host's input and output devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl CpalDevices {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDevices for CpalDevices {
    type Output = CpalOutputSink;

    fn open_capture(&self, config: &CaptureConfig) -> Result<CaptureStream, LiveAudioError> {
        let (sink, builder) = CaptureStream::channel();
        let config = *config;
        let thread = spawn_stream_thread("odia-capture", move || build_capture_stream(&config, sink))?;
        Ok(builder.attach(Box::new(CpalCapture {
            thread: Some(thread),
        })))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Self::Output, LiveAudioError> {
        let state = Arc::new(StdMutex::new(MixerState::default()));
        let (rate_tx, rate_rx) = bounded::<u32>(1);
        let mixer = Arc::clone(&state);
        let thread = spawn_stream_thread("odia-playback", move || {
            let (stream, device_rate) = build_output_stream(sample_rate, mixer)?;
            let _ = rate_tx.send(device_rate);
            Ok(stream)
        })?;
        let device_rate = wait_blocking(|| rate_rx.recv()).map_err(|_| {
            LiveAudioError::Internal("Playback thread exited before reporting its rate".to_string())
        })?;
        Ok(CpalOutputSink {
            state,
            device_rate,
            thread: Some(thread),
        })
    }
}

/// Runs a blocking wait without stalling other tasks on the same worker
/// when called from a multi-threaded runtime.
fn wait_blocking<R>(wait: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}

/// A thread that owns a playing stream until told to stop.
struct StreamThread {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    fn stop(self) {
        let _ = self.stop_tx.send(());
        let handle = self.handle;
        if wait_blocking(move || handle.join()).is_err() {
            error!("[Device] Audio stream thread panicked.");
        }
    }
}

fn spawn_stream_thread<F>(name: &str, build: F) -> Result<StreamThread, LiveAudioError>
where
    F: FnOnce() -> Result<cpal::Stream, LiveAudioError> + Send + 'static,
{
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let (ready_tx, ready_rx) = bounded::<Result<(), LiveAudioError>>(1);
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            // Returns on a stop signal or when the owner is dropped.
            let _ = stop_rx.recv();
            drop(stream);
            debug!("[Device] Audio stream dropped.");
        })
        .map_err(|e| LiveAudioError::Device(format!("Failed to spawn audio thread: {}", e)))?;

    match wait_blocking(|| ready_rx.recv()) {
        Ok(Ok(())) => Ok(StreamThread { stop_tx, handle }),
        Ok(Err(e)) => {
            let _ = wait_blocking(move || handle.join());
            Err(e)
        }
        Err(_) => Err(LiveAudioError::Internal(
            "Audio thread exited during setup".to_string(),
        )),
    }
}

struct CpalCapture {
    thread: Option<StreamThread>,
}

impl CaptureResource for CpalCapture {
    fn stop_tracks(&mut self) {
        if let Some(thread) = self.thread.take() {
            thread.stop();
            info!("[Capture] Microphone released.");
        }
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> LiveAudioError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            LiveAudioError::DeviceNotFound("Audio device is no longer available".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => {
            let description = err.description.to_lowercase();
            if description.contains("permission") || description.contains("denied") {
                LiveAudioError::Permission(err.description)
            } else {
                LiveAudioError::Device(err.description)
            }
        }
        other => LiveAudioError::Device(other.to_string()),
    }
}

fn is_supported_format(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16)
}

/// Picks the supported config closest to `target_sample_rate`, preferring
/// f32 samples and fewer channels on ties.
fn find_supported_config<I>(configs: I, target_sample_rate: u32) -> Option<SupportedStreamConfig>
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    let mut best: Option<(u64, SupportedStreamConfig)> = None;
    for config_range in configs {
        if !is_supported_format(config_range.sample_format()) {
            continue;
        }
        let min_rate = config_range.min_sample_rate().0;
        let max_rate = config_range.max_sample_rate().0;
        let rate = target_sample_rate.clamp(min_rate, max_rate);
        let rate_diff = rate.abs_diff(target_sample_rate) as u64;
        let format_penalty = if config_range.sample_format() == SampleFormat::F32 { 0 } else { 1 };
        let score = rate_diff * 1000 + config_range.channels() as u64 * 2 + format_penalty;
        if best.as_ref().is_none_or(|(best_score, _)| score < *best_score) {
            best = Some((score, config_range.with_sample_rate(SampleRate(rate))));
        }
    }
    best.map(|(_, config)| config)
}

fn build_capture_stream(config: &CaptureConfig, sink: FrameSink) -> Result<cpal::Stream, LiveAudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| LiveAudioError::DeviceNotFound("No input device".to_string()))?;
    info!(
        "[Capture] Using input: {}",
        device.name().unwrap_or_else(|_| "<unnamed>".to_string())
    );

    let configs = device.supported_input_configs().map_err(|e| match e {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
            LiveAudioError::DeviceNotFound("Input device is no longer available".to_string())
        }
        other => LiveAudioError::Device(other.to_string()),
    })?;
    let supported_config = find_supported_config(configs, config.sample_rate).ok_or_else(|| {
        LiveAudioError::Device("Input device offers no f32 or i16 config".to_string())
    })?;
    let sample_format = supported_config.sample_format();
    let stream_config: StreamConfig = supported_config.into();
    info!(
        "[Capture] Selected input: {} Hz, {} ch, {:?}",
        stream_config.sample_rate.0, stream_config.channels, sample_format
    );

    let processor = CaptureProcessor::new(stream_config.sample_rate.0, stream_config.channels, config)?;
    let stream = match sample_format {
        SampleFormat::I16 => build_input::<i16>(&device, &stream_config, processor, sink)?,
        _ => build_input::<f32>(&device, &stream_config, processor, sink)?,
    };
    stream
        .play()
        .map_err(|e| LiveAudioError::Device(format!("Failed to start input stream: {}", e)))?;
    Ok(stream)
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut processor: CaptureProcessor,
    sink: FrameSink,
) -> Result<cpal::Stream, LiveAudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if data.is_empty() || !sink.is_connected() {
                    return;
                }
                scratch.clear();
                scratch.extend(data.iter().map(|s| f32::from_sample_(*s)));
                match processor.process(&scratch) {
                    Ok(frames) => {
                        for frame in frames {
                            sink.push(frame);
                        }
                    }
                    Err(e) => warn!("[Capture] Dropping input block: {}", e),
                }
            },
            |err| error!("[Capture] CPAL Error: {}", err),
            None,
        )
        .map_err(map_build_error)
}

struct Voice {
    id: VoiceId,
    samples: Vec<f32>,
    start_frame: u64,
    on_ended: Option<Box<dyn FnOnce() + Send>>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Default)]
struct MixerState {
    frames_played: u64,
    voices: Vec<Voice>,
    closed: bool,
}

impl MixerState {
    /// Mixes active voices into one output block and returns the callbacks
    /// of voices that finished.
    fn render<T>(&mut self, data: &mut [T], channels: usize) -> Vec<Box<dyn FnOnce() + Send>>
    where
        T: SizedSample + FromSample<f32>,
    {
        let block_start = self.frames_played;
        for (i, frame) in data.chunks_mut(channels.max(1)).enumerate() {
            let t = block_start + i as u64;
            let mut mixed = 0.0f32;
            for voice in &self.voices {
                if t >= voice.start_frame && t < voice.end_frame() {
                    mixed += voice.samples[(t - voice.start_frame) as usize];
                }
            }
            let sample = T::from_sample_(mixed.clamp(-1.0, 1.0));
            for out in frame.iter_mut() {
                *out = sample;
            }
        }
        self.frames_played += (data.len() / channels.max(1)) as u64;

        let now = self.frames_played;
        let mut ended = Vec::new();
        self.voices.retain_mut(|voice| {
            if voice.end_frame() <= now {
                if let Some(on_ended) = voice.on_ended.take() {
                    ended.push(on_ended);
                }
                false
            } else {
                true
            }
        });
        ended
    }
}

fn lock_mixer(state: &StdMutex<MixerState>) -> MutexGuard<'_, MixerState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn build_output_stream(
    preferred_rate: u32,
    state: Arc<StdMutex<MixerState>>,
) -> Result<(cpal::Stream, u32), LiveAudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| LiveAudioError::DeviceNotFound("No output device".to_string()))?;
    info!(
        "[Playback] Using output: {}",
        device.name().unwrap_or_else(|_| "<unnamed>".to_string())
    );

    let configs = device
        .supported_output_configs()
        .map_err(|e| LiveAudioError::Device(e.to_string()))?;
    let supported_config = find_supported_config(configs, preferred_rate).ok_or_else(|| {
        LiveAudioError::Device("Output device offers no f32 or i16 config".to_string())
    })?;
    let sample_format = supported_config.sample_format();
    let stream_config: StreamConfig = supported_config.into();
    let device_rate = stream_config.sample_rate.0;
    info!(
        "[Playback] Selected output: {} Hz, {} ch, {:?}",
        device_rate, stream_config.channels, sample_format
    );

    let stream = match sample_format {
        SampleFormat::I16 => build_output::<i16>(&device, &stream_config, state)?,
        _ => build_output::<f32>(&device, &stream_config, state)?,
    };
    stream
        .play()
        .map_err(|e| LiveAudioError::Device(format!("Failed to start output stream: {}", e)))?;
    Ok((stream, device_rate))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    state: Arc<StdMutex<MixerState>>,
) -> Result<cpal::Stream, LiveAudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let ended = lock_mixer(&state).render(data, channels);
                for on_ended in ended {
                    on_ended();
                }
            },
            |err| error!("[Playback] CPAL Error: {}", err),
            None,
        )
        .map_err(map_build_error)
}

/// Speaker output whose clock counts frames actually handed to the device.
pub struct CpalOutputSink {
    state: Arc<StdMutex<MixerState>>,
    device_rate: u32,
    thread: Option<StreamThread>,
}

impl CpalOutputSink {
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl PlaybackSink for CpalOutputSink {
    fn current_time(&self) -> f64 {
        lock_mixer(&self.state).frames_played as f64 / self.device_rate as f64
    }

    fn start_at(
        &mut self,
        voice: VoiceId,
        buffer: PlaybackBuffer,
        start_time: f64,
        on_ended: Box<dyn FnOnce() + Send>,
    ) -> Result<(), LiveAudioError> {
        let samples = resample_block(&buffer.to_mono(), buffer.sample_rate, self.device_rate)?;
        let mut state = lock_mixer(&self.state);
        if state.closed {
            return Err(LiveAudioError::Device("Output context is closed".to_string()));
        }
        let start_frame = ((start_time * self.device_rate as f64).round() as u64).max(state.frames_played);
        state.voices.push(Voice {
            id: voice,
            samples,
            start_frame,
            on_ended: Some(on_ended),
        });
        Ok(())
    }

    fn stop(&mut self, voice: VoiceId) {
        lock_mixer(&self.state).voices.retain(|v| v.id != voice);
    }

    fn close(&mut self) {
        lock_mixer(&self.state).closed = true;
        if let Some(thread) = self.thread.take() {
            thread.stop();
            info!("[Playback] Output context closed.");
        }
    }
}

impl Drop for CpalOutputSink {
    fn drop(&mut self) {
        self.close();
    }
}
