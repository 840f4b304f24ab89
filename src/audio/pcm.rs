//! Conversion between f32 sample blocks and base64 little-endian PCM16.

use crate::client::GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT;
use crate::error::LiveAudioError;
use crate::types::Blob;
use base64::Engine as _;

/// Scale between normalized f32 samples and signed 16-bit PCM.
const PCM16_SCALE: f32 = 32768.0;

/// One fixed-size block of captured mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// Base64 PCM16 payload ready for the uplink, tagged with its MIME descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudioChunk {
    pub data: String,
    pub mime_type: String,
}

impl EncodedAudioChunk {
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            data: encode_frame(&frame.samples),
            mime_type: pcm_mime_type(frame.sample_rate),
        }
    }

    pub fn into_blob(self) -> Blob {
        Blob {
            mime_type: self.mime_type,
            data: self.data,
        }
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

pub fn uplink_mime_type() -> String {
    pcm_mime_type(GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT)
}

/// Decoded audio ready to be scheduled. Samples are stored per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl PlaybackBuffer {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Averages all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frames())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Multiplies by 32768 and truncates toward zero, saturating at the i16 range.
/// A full-scale `1.0` becomes `32767` rather than wrapping to `-32768` the way
/// a browser `Int16Array` store does.
pub fn sample_to_i16(sample: f32) -> i16 {
    (sample * PCM16_SCALE) as i16
}

pub fn i16_to_sample(value: i16) -> f32 {
    value as f32 / PCM16_SCALE
}

pub fn samples_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut byte_data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        byte_data.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    byte_data
}

pub fn encode_frame(samples: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(samples_to_pcm16_bytes(samples))
}

pub fn decode_fragment(data: &str) -> Result<Vec<u8>, LiveAudioError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}

/// Interprets interleaved little-endian PCM16 bytes as a playable buffer.
pub fn decode_audio_buffer(
    bytes: &[u8],
    target_sample_rate: u32,
    channel_count: u16,
) -> Result<PlaybackBuffer, LiveAudioError> {
    if channel_count == 0 || target_sample_rate == 0 {
        return Err(LiveAudioError::UnsupportedFormat(format!(
            "{}Hz {}ch is not a playable format",
            target_sample_rate, channel_count
        )));
    }
    let block_align = 2 * channel_count as usize;
    if bytes.len() % block_align != 0 {
        return Err(LiveAudioError::UnsupportedFormat(format!(
            "{} bytes is not a whole number of {}-channel PCM16 frames",
            bytes.len(),
            channel_count
        )));
    }

    let frame_count = bytes.len() / block_align;
    let mut channels = vec![Vec::with_capacity(frame_count); channel_count as usize];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        channels[i % channel_count as usize].push(i16_to_sample(value));
    }
    Ok(PlaybackBuffer {
        sample_rate: target_sample_rate,
        channels,
    })
}
