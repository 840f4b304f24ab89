use crate::error::LiveAudioError;
use audioadapter::direct::SequentialSliceOfVecs;
use rubato::{Fft, FixedSync, Indexing, Resampler};
use tracing::{debug, info, warn};

const RESAMPLER_CHUNK_FRAMES: usize = 1024;
const RESAMPLER_SUB_CHUNKS: usize = 2;
/// Mono in, mono out.
const RESAMPLER_CHANNELS: usize = 1;

/// Streaming mono resampler built on `rubato::Fft`.
///
/// Input is buffered until a full resampler chunk is available, so output
/// lags input by up to one chunk plus the resampler's own delay. Call
/// [`StreamResampler::flush`] at the end of a stream to drain both.
pub struct StreamResampler {
    resampler: Fft<f32>,
    input_rate: u32,
    output_rate: u32,
    internal_mono_buffer: Vec<f32>,
    // Pre-allocated buffer for the resampler's mono output.
    resampler_output_buffer_alloc: Vec<Vec<f32>>,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("input_rate", &self.input_rate)
            .field("output_rate", &self.output_rate)
            .field("buffered", &self.internal_mono_buffer.len())
            .finish()
    }
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, LiveAudioError> {
        info!(
            "[Resampler] Initializing {}Hz -> {}Hz mono.",
            input_rate, output_rate
        );
        let resampler = Fft::<f32>::new(
            input_rate as usize,
            output_rate as usize,
            RESAMPLER_CHUNK_FRAMES,
            RESAMPLER_SUB_CHUNKS,
            RESAMPLER_CHANNELS,
            FixedSync::Input,
        )
        .map_err(|e| {
            LiveAudioError::AudioResampling(format!("Failed to create Fft resampler: {}", e))
        })?;

        let max_output_frames = resampler.output_frames_max();
        Ok(Self {
            resampler,
            input_rate,
            output_rate,
            internal_mono_buffer: Vec::with_capacity(RESAMPLER_CHUNK_FRAMES * 2),
            resampler_output_buffer_alloc: vec![vec![0.0f32; max_output_frames.max(1)]; RESAMPLER_CHANNELS],
        })
    }

    /// Frames of delay the resampler adds at the start of its output.
    pub fn output_delay(&self) -> usize {
        self.resampler.output_delay()
    }

    pub fn process(&mut self, mono: &[f32]) -> Result<Vec<f32>, LiveAudioError> {
        self.internal_mono_buffer.extend_from_slice(mono);
        let mut output = Vec::new();
        loop {
            let required_input_frames = self.resampler.input_frames_next();
            if self.internal_mono_buffer.len() < required_input_frames || required_input_frames == 0 {
                break;
            }
            let chunk: Vec<f32> = self
                .internal_mono_buffer
                .drain(..required_input_frames)
                .collect();
            self.run_chunk(chunk, None, &mut output)?;
        }
        Ok(output)
    }

    /// Drains buffered input and the resampler's internal delay. Ends the
    /// stream; feed a new resampler afterwards.
    pub fn flush(&mut self) -> Result<Vec<f32>, LiveAudioError> {
        let mut output = Vec::new();

        if !self.internal_mono_buffer.is_empty() {
            let partial_len = self.internal_mono_buffer.len();
            let chunk: Vec<f32> = self.internal_mono_buffer.drain(..).collect();
            self.run_chunk(chunk, Some(partial_len), &mut output)?;
        }

        let delay = self.resampler.output_delay();
        let mut remaining_delay = delay.saturating_sub(output.len());
        let max_iterations = 5;
        for _ in 0..max_iterations {
            if remaining_delay == 0 {
                break;
            }
            let produced = self.run_chunk(Vec::new(), Some(0), &mut output)?;
            if produced == 0 {
                debug!("[Resampler] Flush produced 0 frames, considering it drained.");
                break;
            }
            remaining_delay = remaining_delay.saturating_sub(produced);
        }
        if remaining_delay > 0 {
            warn!(
                "[Resampler] Flush may not have drained all delay frames ({} left).",
                remaining_delay
            );
        }
        Ok(output)
    }

    fn run_chunk(
        &mut self,
        chunk: Vec<f32>,
        partial_len: Option<usize>,
        output: &mut Vec<f32>,
    ) -> Result<usize, LiveAudioError> {
        let input_frames = chunk.len();
        let input_for_adapter = vec![chunk];
        let input_adapter =
            SequentialSliceOfVecs::new(&input_for_adapter, RESAMPLER_CHANNELS, input_frames)
                .map_err(|e| {
                    LiveAudioError::AudioResampling(format!("Input adapter error: {}", e))
                })?;

        let output_frames_next = self.resampler.output_frames_next().max(1);
        self.resampler_output_buffer_alloc[0].resize(output_frames_next, 0.0);
        let mut output_adapter = SequentialSliceOfVecs::new_mut(
            &mut self.resampler_output_buffer_alloc,
            RESAMPLER_CHANNELS,
            output_frames_next,
        )
        .map_err(|e| LiveAudioError::AudioResampling(format!("Output adapter error: {}", e)))?;

        let indexing = partial_len.map(|partial_len| Indexing {
            input_offset: 0,
            output_offset: 0,
            partial_len: Some(partial_len),
            active_channels_mask: None,
        });

        let (_frames_read, frames_written) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, indexing.as_ref())
            .map_err(|e| LiveAudioError::AudioResampling(e.to_string()))?;

        output.extend_from_slice(&self.resampler_output_buffer_alloc[0][..frames_written]);
        Ok(frames_written)
    }
}

/// Resamples one self-contained block, compensating for the resampler delay
/// so the result lines up with the input and has exactly the expected length.
pub fn resample_block(
    samples: &[f32],
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<f32>, LiveAudioError> {
    if input_rate == output_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let expected_len =
        ((samples.len() as u64 * output_rate as u64 + input_rate as u64 / 2) / input_rate as u64) as usize;

    let mut resampler = StreamResampler::new(input_rate, output_rate)?;
    let delay = resampler.output_delay();
    let mut resampled = resampler.process(samples)?;
    resampled.extend(resampler.flush()?);

    let mut aligned: Vec<f32> = resampled.into_iter().skip(delay).collect();
    aligned.resize(expected_len, 0.0);
    Ok(aligned)
}
