use super::transcript::{Speaker, TranscriptAccumulator, TranscriptEntry};
use crate::audio::pcm::{decode_audio_buffer, decode_fragment};
use crate::audio::playback::{PlaybackScheduler, PlaybackSink, ScheduledBuffer};
use crate::error::LiveAudioError;
use crate::types::ServerContent;
use tracing::{debug, info, trace, warn};

/// Transcript changes produced while handling server content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Running text of the speaker's current turn.
    PartialTranscript { speaker: Speaker, text: String },
    Entry(TranscriptEntry),
}

/// Turns server content into transcript updates and scheduled audio.
#[derive(Debug)]
pub struct DownlinkReceiver {
    transcript: TranscriptAccumulator,
    sample_rate: u32,
    channels: u16,
    dropped_fragments: u64,
    finalize_turns: bool,
}

impl DownlinkReceiver {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            transcript: TranscriptAccumulator::new(),
            sample_rate,
            channels,
            dropped_fragments: 0,
            finalize_turns: true,
        }
    }

    /// Keeps accumulating across `turnComplete` so the whole recording ends
    /// up in one entry at [`DownlinkReceiver::flush_input`].
    pub fn accumulate_across_turns(mut self) -> Self {
        self.finalize_turns = false;
        self
    }

    pub fn transcript(&self) -> &TranscriptAccumulator {
        &self.transcript
    }

    pub fn dropped_fragments(&self) -> u64 {
        self.dropped_fragments
    }

    /// Handles transcriptions first, then turn completion, then every audio
    /// part in order. Turn completion is ignored when accumulating across
    /// turns. Audio is ignored when `playback` is `None`.
    pub fn handle_server_content<S: PlaybackSink>(
        &mut self,
        content: &ServerContent,
        mut playback: Option<&mut PlaybackScheduler<S>>,
    ) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();

        if let Some(transcription) = &content.input_transcription {
            let text = self
                .transcript
                .on_partial_transcript(Speaker::User, &transcription.text);
            updates.push(SessionUpdate::PartialTranscript {
                speaker: Speaker::User,
                text: text.to_string(),
            });
        }
        if let Some(transcription) = &content.output_transcription {
            let text = self
                .transcript
                .on_partial_transcript(Speaker::Bot, &transcription.text);
            updates.push(SessionUpdate::PartialTranscript {
                speaker: Speaker::Bot,
                text: text.to_string(),
            });
        }
        if content.turn_complete && self.finalize_turns {
            let entries = self.transcript.on_turn_complete();
            debug!("[Downlink] Turn complete with {} entries.", entries.len());
            updates.extend(entries.into_iter().map(SessionUpdate::Entry));
        }
        if content.interrupted {
            info!("[Downlink] Model turn interrupted.");
        }

        for data in content.audio_fragments() {
            let Some(scheduler) = playback.as_deref_mut() else {
                trace!("[Downlink] No output context, ignoring audio fragment.");
                continue;
            };
            if let Err(e) = self.on_audio_fragment(data, scheduler) {
                self.dropped_fragments += 1;
                if e.is_fragment_local() {
                    warn!("[Downlink] Dropping audio fragment: {}", e);
                } else {
                    warn!("[Downlink] Failed to schedule audio fragment: {}", e);
                }
            }
        }
        updates
    }

    pub fn on_audio_fragment<S: PlaybackSink>(
        &mut self,
        data: &str,
        playback: &mut PlaybackScheduler<S>,
    ) -> Result<ScheduledBuffer, LiveAudioError> {
        let bytes = decode_fragment(data)?;
        let buffer = decode_audio_buffer(&bytes, self.sample_rate, self.channels)?;
        playback.schedule(buffer)
    }

    /// Finalizes whatever the user has said so far.
    pub fn flush_input(&mut self) -> Option<TranscriptEntry> {
        self.transcript.take_input()
    }

    pub fn discard_partial(&mut self) {
        if !self.transcript.is_empty() {
            debug!("[Downlink] Discarding partial transcript.");
        }
        self.transcript.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_frame;
    use crate::testing::ManualClockSink;
    use crate::types::{Blob, Content, Part, Transcription};

    fn audio_part(data: String) -> Part {
        Part {
            text: None,
            inline_data: Some(Blob {
                mime_type: "audio/pcm;rate=24000".to_string(),
                data,
            }),
        }
    }

    fn content_with_parts(parts: Vec<Part>) -> ServerContent {
        ServerContent {
            model_turn: Some(Content { parts, role: None }),
            ..Default::default()
        }
    }

    #[test]
    fn transcripts_then_turn_complete_in_one_message() {
        let mut downlink = DownlinkReceiver::new(24000, 1);
        let content = ServerContent {
            input_transcription: Some(Transcription {
                text: "ନମସ୍କାର".to_string(),
            }),
            turn_complete: true,
            ..Default::default()
        };
        let updates = downlink.handle_server_content::<ManualClockSink>(&content, None);
        assert_eq!(
            updates,
            vec![
                SessionUpdate::PartialTranscript {
                    speaker: Speaker::User,
                    text: "ନମସ୍କାର".to_string()
                },
                SessionUpdate::Entry(TranscriptEntry {
                    speaker: Speaker::User,
                    text: "ନମସ୍କାର".to_string()
                }),
            ]
        );
    }

    #[test]
    fn every_audio_part_is_scheduled_in_order() {
        let mut downlink = DownlinkReceiver::new(24000, 1);
        let mut playback = PlaybackScheduler::new(ManualClockSink::default());
        let content = content_with_parts(vec![
            audio_part(encode_frame(&vec![0.1; 24000])),
            Part {
                text: Some("ignored".to_string()),
                inline_data: None,
            },
            audio_part(encode_frame(&vec![0.1; 12000])),
        ]);
        downlink.handle_server_content(&content, Some(&mut playback));

        let started = &playback.sink().started;
        assert_eq!(started.len(), 2);
        assert_eq!(started[0].start_time, 0.0);
        assert!((started[1].start_time - 1.0).abs() < 1e-9);
        assert!((playback.next_start_time() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn malformed_fragment_is_dropped_and_later_audio_still_plays() {
        let mut downlink = DownlinkReceiver::new(24000, 1);
        let mut playback = PlaybackScheduler::new(ManualClockSink::default());
        let content = content_with_parts(vec![
            audio_part("%%% not base64".to_string()),
            audio_part(encode_frame(&[0.2; 480])),
        ]);
        downlink.handle_server_content(&content, Some(&mut playback));
        assert_eq!(downlink.dropped_fragments(), 1);
        assert_eq!(playback.sink().started.len(), 1);
    }

    #[test]
    fn audio_without_output_context_is_ignored() {
        let mut downlink = DownlinkReceiver::new(24000, 1);
        let content = content_with_parts(vec![audio_part(encode_frame(&[0.2; 480]))]);
        let updates = downlink.handle_server_content::<ManualClockSink>(&content, None);
        assert!(updates.is_empty());
        assert_eq!(downlink.dropped_fragments(), 0);
    }

    #[test]
    fn accumulating_receiver_ignores_turn_complete() {
        let mut downlink = DownlinkReceiver::new(24000, 1).accumulate_across_turns();
        let fragment = |text: &str| ServerContent {
            input_transcription: Some(Transcription {
                text: text.to_string(),
            }),
            ..Default::default()
        };
        downlink.handle_server_content::<ManualClockSink>(&fragment("ଆଜି "), None);
        let updates = downlink.handle_server_content::<ManualClockSink>(
            &ServerContent {
                turn_complete: true,
                ..Default::default()
            },
            None,
        );
        assert!(updates.is_empty());

        let updates = downlink.handle_server_content::<ManualClockSink>(&fragment("ପାଗ ଭଲ"), None);
        assert_eq!(
            updates,
            vec![SessionUpdate::PartialTranscript {
                speaker: Speaker::User,
                text: "ଆଜି ପାଗ ଭଲ".to_string()
            }]
        );
        assert_eq!(downlink.flush_input().unwrap().text, "ଆଜି ପାଗ ଭଲ");
    }

    #[test]
    fn flush_and_discard() {
        let mut downlink = DownlinkReceiver::new(24000, 1);
        let content = ServerContent {
            input_transcription: Some(Transcription {
                text: "ଭଲ ଅଛି".to_string(),
            }),
            ..Default::default()
        };
        downlink.handle_server_content::<ManualClockSink>(&content, None);
        assert_eq!(downlink.flush_input().unwrap().text, "ଭଲ ଅଛି");

        downlink.handle_server_content::<ManualClockSink>(&content, None);
        downlink.discard_partial();
        assert!(downlink.flush_input().is_none());
    }
}
