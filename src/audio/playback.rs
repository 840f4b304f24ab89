//! Gapless scheduling of decoded model audio on an output clock.

use super::pcm::PlaybackBuffer;
use crate::error::LiveAudioError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tracing::{debug, trace, warn};

pub type VoiceId = u64;

/// An output context with its own monotonically increasing clock.
pub trait PlaybackSink: Send {
    /// Current clock time in seconds.
    fn current_time(&self) -> f64;

    /// Starts `buffer` at `start_time` on the output clock. `on_ended` must be
    /// called once the buffer has played to its end, and must not be called
    /// if the voice is stopped first.
    fn start_at(
        &mut self,
        voice: VoiceId,
        buffer: PlaybackBuffer,
        start_time: f64,
        on_ended: Box<dyn FnOnce() + Send>,
    ) -> Result<(), LiveAudioError>;

    /// Stops a started voice. Stopping an unknown or finished voice is a no-op.
    fn stop(&mut self, voice: VoiceId);

    /// Closes the output context. Further calls are no-ops.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub voice: VoiceId,
    pub start_time: f64,
    pub duration: f64,
}

/// Plays buffers back to back in arrival order.
///
/// Each buffer starts at `max(next_start_time, now)`, so buffers that arrive
/// early queue up without gaps and buffers that arrive late start
/// immediately.
pub struct PlaybackScheduler<S: PlaybackSink> {
    sink: S,
    next_start_time: f64,
    next_voice: VoiceId,
    active: Arc<StdMutex<HashSet<VoiceId>>>,
}

impl<S: PlaybackSink> PlaybackScheduler<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_start_time: 0.0,
            next_voice: 0,
            active: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        lock_set(&self.active).len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<ScheduledBuffer, LiveAudioError> {
        let now = self.sink.current_time();
        let start_time = self.next_start_time.max(now);
        let duration = buffer.duration();

        let voice = self.next_voice;
        self.next_voice += 1;
        lock_set(&self.active).insert(voice);

        let active = Arc::clone(&self.active);
        let on_ended = Box::new(move || {
            lock_set(&active).remove(&voice);
        });
        if let Err(e) = self.sink.start_at(voice, buffer, start_time, on_ended) {
            lock_set(&self.active).remove(&voice);
            return Err(e);
        }

        self.next_start_time = start_time + duration;
        trace!(
            "[Playback] Voice {} at {:.3}s for {:.3}s (now {:.3}s).",
            voice, start_time, duration, now
        );
        Ok(ScheduledBuffer {
            voice,
            start_time,
            duration,
        })
    }

    /// Stops every buffer that has not finished and resets the timeline.
    pub fn stop_all(&mut self) {
        let voices: Vec<VoiceId> = lock_set(&self.active).drain().collect();
        if !voices.is_empty() {
            debug!("[Playback] Stopping {} active buffers.", voices.len());
        }
        for voice in voices {
            self.sink.stop(voice);
        }
        self.next_start_time = 0.0;
    }

    pub fn close_output(&mut self) {
        self.sink.close();
    }
}

fn lock_set(set: &StdMutex<HashSet<VoiceId>>) -> std::sync::MutexGuard<'_, HashSet<VoiceId>> {
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("[Playback] Active set lock poisoned, recovering.");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClockSink;

    fn silence(seconds: f64) -> PlaybackBuffer {
        PlaybackBuffer {
            sample_rate: 24000,
            channels: vec![vec![0.0; (seconds * 24000.0) as usize]],
        }
    }

    #[test]
    fn buffers_are_queued_back_to_back() {
        let mut scheduler = PlaybackScheduler::new(ManualClockSink::default());
        let first = scheduler.schedule(silence(1.0)).unwrap();
        let second = scheduler.schedule(silence(0.5)).unwrap();
        assert_eq!(first.start_time, 0.0);
        assert!((second.start_time - 1.0).abs() < 1e-9);
        assert!((scheduler.next_start_time() - 1.5).abs() < 1e-9);
        assert_eq!(scheduler.active_count(), 2);
    }

    #[test]
    fn scheduled_buffers_never_overlap() {
        let mut scheduler = PlaybackScheduler::new(ManualClockSink::default());
        let mut previous_end = 0.0;
        for (i, seconds) in [0.2, 0.05, 0.4, 0.1, 0.3].into_iter().enumerate() {
            scheduler.sink_mut().set_time(i as f64 * 0.15);
            let scheduled = scheduler.schedule(silence(seconds)).unwrap();
            assert!(scheduled.start_time >= previous_end - 1e-9);
            assert!(scheduled.start_time >= scheduler.sink().current_time());
            previous_end = scheduled.start_time + scheduled.duration;
        }
    }

    #[test]
    fn late_arrival_starts_at_current_time() {
        let mut scheduler = PlaybackScheduler::new(ManualClockSink::default());
        scheduler.schedule(silence(0.5)).unwrap();
        scheduler.sink_mut().set_time(2.0);
        let late = scheduler.schedule(silence(0.5)).unwrap();
        assert_eq!(late.start_time, 2.0);
        assert!((scheduler.next_start_time() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn finished_buffers_leave_the_active_set() {
        let mut scheduler = PlaybackScheduler::new(ManualClockSink::default());
        scheduler.schedule(silence(0.5)).unwrap();
        scheduler.schedule(silence(0.5)).unwrap();
        scheduler.sink_mut().advance_to(0.6);
        assert_eq!(scheduler.active_count(), 1);
        scheduler.sink_mut().advance_to(1.0);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn stop_all_silences_and_resets() {
        let mut scheduler = PlaybackScheduler::new(ManualClockSink::default());
        let a = scheduler.schedule(silence(0.5)).unwrap();
        let b = scheduler.schedule(silence(0.5)).unwrap();
        scheduler.stop_all();
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
        let mut stopped = scheduler.sink().stopped.clone();
        stopped.sort();
        assert_eq!(stopped, vec![a.voice, b.voice]);

        // Stopped voices never report completion.
        scheduler.sink_mut().advance_to(5.0);
        assert_eq!(scheduler.active_count(), 0);
    }
}
