use super::downlink::{DownlinkReceiver, SessionUpdate};
use super::handle::SessionHandle;
use super::status::{SessionState, SessionStatus};
use super::transcript::TranscriptEntry;
use crate::audio::capture::{AudioDevices, CaptureConfig};
use crate::audio::playback::PlaybackScheduler;
use crate::client::{ConversationalBackend, GEMINI_AUDIO_CHANNELS_OUTPUT, LiveConnection, SessionEvent};
use crate::config::{SessionConfig, SessionMode};
use crate::error::LiveAudioError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// A voice session driven by user start/stop actions and remote events.
///
/// All transitions happen on the task that owns the session: call
/// [`VoiceSession::start`] and [`VoiceSession::stop`] directly and feed
/// remote events through [`VoiceSession::process_next`] or
/// [`VoiceSession::run_until_idle`]. Pipeline failures never surface as
/// errors from these calls; they are reported through [`VoiceSession::status`].
pub struct VoiceSession<B: ConversationalBackend, D: AudioDevices> {
    backend: B,
    devices: D,
    config: SessionConfig,
    state: SessionState,
    status_tx: watch::Sender<SessionStatus>,
    elapsed_tx: Arc<watch::Sender<u64>>,
    handle: Option<SessionHandle<D::Output>>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    downlink: DownlinkReceiver,
    updates: Vec<SessionUpdate>,
    history: Vec<TranscriptEntry>,
}

impl<B: ConversationalBackend, D: AudioDevices> VoiceSession<B, D> {
    pub fn new(backend: B, devices: D, config: SessionConfig) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Ready);
        let (elapsed_tx, _) = watch::channel(0);
        let mut downlink = DownlinkReceiver::new(config.playback_sample_rate, GEMINI_AUDIO_CHANNELS_OUTPUT);
        if config.mode == SessionMode::Transcription {
            downlink = downlink.accumulate_across_turns();
        }
        Self {
            backend,
            devices,
            config,
            state: SessionState::Idle,
            status_tx,
            elapsed_tx: Arc::new(elapsed_tx),
            handle: None,
            events: None,
            downlink,
            updates: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn mode(&self) -> SessionMode {
        self.config.mode
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn current_status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    /// Whole seconds since the current transcription session started.
    pub fn elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed_tx.subscribe()
    }

    /// Finalized entries of every turn so far.
    pub fn history(&self) -> &[TranscriptEntry] {
        &self.history
    }

    /// Drains transcript updates produced since the last call. Undrained
    /// partials are coalesced so only the latest running text per speaker
    /// since the last entry is kept.
    pub fn take_updates(&mut self) -> Vec<SessionUpdate> {
        std::mem::take(&mut self.updates)
    }

    pub fn frames_sent(&self) -> u64 {
        self.handle.as_ref().map_or(0, |h| h.frames_sent())
    }

    fn set_status(&self, status: SessionStatus) {
        info!("[Session] Status: {}", status);
        self.status_tx.send_replace(status);
    }

    fn push_update(&mut self, update: SessionUpdate) {
        match &update {
            SessionUpdate::Entry(entry) => self.history.push(entry.clone()),
            SessionUpdate::PartialTranscript { speaker, .. } => {
                let since_entry = self
                    .updates
                    .iter()
                    .rposition(|u| matches!(u, SessionUpdate::Entry(_)))
                    .map_or(0, |i| i + 1);
                let stale = self.updates[since_entry..].iter().position(|u| {
                    matches!(u, SessionUpdate::PartialTranscript { speaker: s, .. } if s == speaker)
                });
                if let Some(offset) = stale {
                    self.updates.remove(since_entry + offset);
                }
            }
        }
        self.updates.push(update);
    }

    /// Begins a session: acquires the microphone, opens the output context
    /// and starts connecting. Does nothing unless the session is idle or
    /// failed. Only configuration errors are returned.
    pub fn start(&mut self) -> Result<(), LiveAudioError> {
        if !self.state.can_start() {
            debug!("[Session] Start ignored while {}.", self.state.as_str());
            return Ok(());
        }
        self.config.validate()?;

        self.state = SessionState::Starting;
        self.downlink.discard_partial();
        self.elapsed_tx.send_replace(0);
        self.set_status(SessionStatus::RequestingPermission);

        let capture_config = CaptureConfig {
            sample_rate: self.config.capture_sample_rate,
            frame_samples: self.config.frame_samples,
        };
        let capture = match self.devices.open_capture(&capture_config) {
            Ok(capture) => capture,
            Err(e) => {
                warn!("[Session] Microphone unavailable: {}", e);
                self.state = SessionState::Error(e.to_string());
                self.set_status(SessionStatus::from_capture_error(&e));
                return Ok(());
            }
        };

        let playback = if self.config.mode.plays_audio() {
            match self.devices.open_output(self.config.playback_sample_rate) {
                Ok(sink) => Some(PlaybackScheduler::new(sink)),
                Err(e) => {
                    SessionHandle::<D::Output>::new(capture, None).release();
                    self.fail_start(e);
                    return Ok(());
                }
            }
        } else {
            None
        };

        let mut handle = SessionHandle::new(capture, playback);
        if self.config.mode == SessionMode::Transcription {
            handle.start_timer(Arc::clone(&self.elapsed_tx));
        }

        self.set_status(SessionStatus::Connecting);
        match self.backend.connect(self.config.to_setup()) {
            Ok(LiveConnection { client, events }) => {
                handle.attach_client(client);
                self.events = Some(events);
                self.handle = Some(handle);
                Ok(())
            }
            Err(LiveAudioError::Config(msg)) => {
                handle.release();
                self.state = SessionState::Idle;
                self.set_status(SessionStatus::Ready);
                Err(LiveAudioError::Config(msg))
            }
            Err(e) => {
                handle.release();
                self.fail_start(e);
                Ok(())
            }
        }
    }

    fn fail_start(&mut self, err: LiveAudioError) {
        error!("[Session] Failed to start: {}", err);
        self.state = SessionState::Error(err.to_string());
        self.set_status(SessionStatus::StartFailed(err.to_string()));
    }

    /// Ends the session on user request. A no-op unless starting or active.
    pub fn stop(&mut self) {
        if !matches!(self.state, SessionState::Starting | SessionState::Active) {
            debug!("[Session] Stop ignored while {}.", self.state.as_str());
            return;
        }
        self.state = SessionState::Stopping;
        if self.config.mode == SessionMode::Transcription {
            if let Some(entry) = self.downlink.flush_input() {
                self.push_update(SessionUpdate::Entry(entry));
            }
        }
        self.teardown();
        self.state = SessionState::Idle;
        self.set_status(SessionStatus::SessionEnded);
    }

    fn teardown(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
        self.events = None;
        self.downlink.discard_partial();
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Open => {
                if self.state != SessionState::Starting {
                    debug!("[Session] Ignoring open while {}.", self.state.as_str());
                    return;
                }
                self.state = SessionState::Active;
                if let Some(handle) = self.handle.as_mut() {
                    handle.connect_capture();
                }
                self.set_status(SessionStatus::Connected);
            }
            SessionEvent::Message(message) => {
                let Some(content) = message.server_content else {
                    return;
                };
                let Some(handle) = self.handle.as_mut() else {
                    return;
                };
                let updates = self
                    .downlink
                    .handle_server_content(&content, handle.playback_mut());
                for update in updates {
                    self.push_update(update);
                }
            }
            SessionEvent::Error(msg) => {
                if !matches!(self.state, SessionState::Starting | SessionState::Active) {
                    return;
                }
                error!("[Session] Remote session error: {}", msg);
                self.teardown();
                self.state = SessionState::Error(msg.clone());
                self.set_status(SessionStatus::Error(msg));
            }
            SessionEvent::Closed(reason) => {
                if !matches!(self.state, SessionState::Starting | SessionState::Active) {
                    return;
                }
                info!("[Session] Remote session closed: {:?}", reason);
                self.teardown();
                self.state = SessionState::Idle;
                self.set_status(SessionStatus::SessionClosed);
            }
        }
    }

    /// Waits for the next remote event. `None` once no session is running.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let events = self.events.as_mut()?;
        Some(events.recv().await.unwrap_or(SessionEvent::Closed(None)))
    }

    /// Handles one remote event. Returns `false` if there was none to wait for.
    pub async fn process_next(&mut self) -> bool {
        match self.next_event().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    pub async fn run_until_idle(&mut self) {
        while matches!(self.state, SessionState::Starting | SessionState::Active) {
            if !self.process_next().await {
                break;
            }
        }
    }
}

impl<B: ConversationalBackend, D: AudioDevices> Drop for VoiceSession<B, D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
