//! In-memory devices and backend for exercising sessions without hardware
//! or network.

use crate::audio::capture::{AudioDevices, CaptureConfig, CaptureResource, CaptureStream, FrameSink};
use crate::audio::pcm::PlaybackBuffer;
use crate::audio::playback::{PlaybackSink, VoiceId};
use crate::client::{
    ConversationalBackend, LiveConnection, LiveSessionClient, SessionChannels, SessionEvent,
    SessionReadiness,
};
use crate::error::LiveAudioError;
use crate::types::{BidiGenerateContentSetup, ClientMessagePayload, ServerContent, ServerMessage};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
struct LogState {
    entries: Vec<&'static str>,
    shutdowns: Vec<oneshot::Receiver<()>>,
}

impl LogState {
    /// Records `close_session` for every shutdown signalled since the last
    /// poll, so it lands in order relative to other entries.
    fn poll_shutdowns(&mut self) {
        let LogState { entries, shutdowns } = self;
        shutdowns.retain_mut(|rx| match rx.try_recv() {
            Ok(()) => {
                entries.push("close_session");
                false
            }
            Err(oneshot::error::TryRecvError::Empty) => true,
            Err(oneshot::error::TryRecvError::Closed) => false,
        });
    }
}

/// Ordered record of resource acquisitions and releases.
#[derive(Clone, Default)]
pub(crate) struct ReleaseLog {
    inner: Arc<StdMutex<LogState>>,
}

impl ReleaseLog {
    pub(crate) fn record(&self, entry: &'static str) {
        let mut state = lock(&self.inner);
        state.poll_shutdowns();
        state.entries.push(entry);
    }

    fn watch_shutdown(&self, rx: oneshot::Receiver<()>) {
        lock(&self.inner).shutdowns.push(rx);
    }

    pub(crate) fn entries(&self) -> Vec<&'static str> {
        let mut state = lock(&self.inner);
        state.poll_shutdowns();
        state.entries.clone()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| **e == entry).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StartedBuffer {
    pub voice: VoiceId,
    pub start_time: f64,
    pub duration: f64,
}

struct PendingVoice {
    voice: VoiceId,
    end_time: f64,
    on_ended: Box<dyn FnOnce() + Send>,
}

/// Output context whose clock only moves when the test moves it.
#[derive(Default)]
pub(crate) struct ManualClockSink {
    time: f64,
    pub started: Vec<StartedBuffer>,
    pub stopped: Vec<VoiceId>,
    pub closed: bool,
    pending: Vec<PendingVoice>,
    log: Option<ReleaseLog>,
}

impl ManualClockSink {
    pub(crate) fn with_log(log: ReleaseLog) -> Self {
        Self {
            log: Some(log),
            ..Default::default()
        }
    }

    pub(crate) fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    /// Moves the clock and reports every buffer that finished by `time`.
    pub(crate) fn advance_to(&mut self, time: f64) {
        self.time = time;
        let (ended, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.end_time <= time);
        self.pending = pending;
        for voice in ended {
            (voice.on_ended)();
        }
    }

    fn record(&self, entry: &'static str) {
        if let Some(log) = &self.log {
            log.record(entry);
        }
    }
}

impl PlaybackSink for ManualClockSink {
    fn current_time(&self) -> f64 {
        self.time
    }

    fn start_at(
        &mut self,
        voice: VoiceId,
        buffer: PlaybackBuffer,
        start_time: f64,
        on_ended: Box<dyn FnOnce() + Send>,
    ) -> Result<(), LiveAudioError> {
        if self.closed {
            return Err(LiveAudioError::Device("Output context is closed".to_string()));
        }
        let duration = buffer.duration();
        self.started.push(StartedBuffer {
            voice,
            start_time,
            duration,
        });
        self.pending.push(PendingVoice {
            voice,
            end_time: start_time + duration,
            on_ended,
        });
        Ok(())
    }

    fn stop(&mut self, voice: VoiceId) {
        self.stopped.push(voice);
        self.pending.retain(|p| p.voice != voice);
        self.record("stop_voice");
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.record("close_output");
        }
    }
}

struct MockCapture {
    log: ReleaseLog,
}

impl CaptureResource for MockCapture {
    fn stop_tracks(&mut self) {
        self.log.record("stop_tracks");
    }

    fn disconnect(&mut self) {
        self.log.record("disconnect_capture");
    }
}

#[derive(Debug, Clone)]
pub(crate) enum CaptureFailure {
    Permission,
    NoDevice,
}

/// Devices backed by the release log. Frames are injected through
/// [`MockDevices::frame_sink`].
#[derive(Clone, Default)]
pub(crate) struct MockDevices {
    pub log: ReleaseLog,
    capture_failure: Option<CaptureFailure>,
    fail_output: bool,
    frame_sink: Arc<StdMutex<Option<FrameSink>>>,
}

impl MockDevices {
    pub(crate) fn new(log: ReleaseLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub(crate) fn failing_capture(mut self, failure: CaptureFailure) -> Self {
        self.capture_failure = Some(failure);
        self
    }

    pub(crate) fn failing_output(mut self) -> Self {
        self.fail_output = true;
        self
    }

    pub(crate) fn frame_sink(&self) -> Option<FrameSink> {
        lock(&self.frame_sink).clone()
    }
}

impl AudioDevices for MockDevices {
    type Output = ManualClockSink;

    fn open_capture(&self, _config: &CaptureConfig) -> Result<CaptureStream, LiveAudioError> {
        match &self.capture_failure {
            Some(CaptureFailure::Permission) => {
                return Err(LiveAudioError::Permission("denied by user".to_string()));
            }
            Some(CaptureFailure::NoDevice) => {
                return Err(LiveAudioError::DeviceNotFound("no input".to_string()));
            }
            None => {}
        }
        self.log.record("open_capture");
        let (sink, builder) = CaptureStream::channel();
        *lock(&self.frame_sink) = Some(sink);
        Ok(builder.attach(Box::new(MockCapture {
            log: self.log.clone(),
        })))
    }

    fn open_output(&self, _sample_rate: u32) -> Result<Self::Output, LiveAudioError> {
        if self.fail_output {
            return Err(LiveAudioError::Device("output busy".to_string()));
        }
        self.log.record("open_output");
        Ok(ManualClockSink::with_log(self.log.clone()))
    }
}

/// The remote end of one scripted connection.
pub(crate) struct ScriptedRemote {
    pub setup: BidiGenerateContentSetup,
    outgoing: mpsc::UnboundedReceiver<ClientMessagePayload>,
    readiness: tokio::sync::watch::Sender<SessionReadiness>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ScriptedRemote {
    pub(crate) fn open(&self) {
        self.readiness.send_replace(SessionReadiness::Open);
        let _ = self.events.send(SessionEvent::Open);
    }

    pub(crate) fn server_content(&self, content: ServerContent) {
        let _ = self.events.send(SessionEvent::Message(ServerMessage {
            server_content: Some(content),
            ..Default::default()
        }));
    }

    pub(crate) fn error(&self, message: &str) {
        self.readiness.send_replace(SessionReadiness::Closed);
        let _ = self.events.send(SessionEvent::Error(message.to_string()));
    }

    pub(crate) fn close(&self, reason: Option<&str>) {
        self.readiness.send_replace(SessionReadiness::Closed);
        let _ = self.events.send(SessionEvent::Closed(reason.map(str::to_string)));
    }

    pub(crate) async fn next_outgoing(&mut self) -> Option<ClientMessagePayload> {
        self.outgoing.recv().await
    }
}

/// Backend whose connections are driven by the test.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBackend {
    log: ReleaseLog,
    remotes: Arc<StdMutex<Vec<ScriptedRemote>>>,
}

impl ScriptedBackend {
    pub(crate) fn new(log: ReleaseLog) -> Self {
        Self {
            log,
            remotes: Arc::default(),
        }
    }

    /// Takes the most recent connection.
    pub(crate) fn take_remote(&self) -> Option<ScriptedRemote> {
        lock(&self.remotes).pop()
    }
}

impl ConversationalBackend for ScriptedBackend {
    fn connect(&self, setup: BidiGenerateContentSetup) -> Result<LiveConnection, LiveAudioError> {
        self.log.record("connect");
        let (client, channels) = LiveSessionClient::new_pair();
        let SessionChannels {
            outgoing,
            shutdown,
            readiness,
        } = channels;
        self.log.watch_shutdown(shutdown);
        let (events_tx, events) = mpsc::unbounded_channel();
        lock(&self.remotes).push(ScriptedRemote {
            setup,
            outgoing,
            readiness,
            events: events_tx,
        });
        Ok(LiveConnection { client, events })
    }
}
