use crate::audio::capture::CaptureStream;
use crate::audio::playback::{PlaybackScheduler, PlaybackSink};
use crate::audio::uplink::UplinkSender;
use crate::client::LiveSessionClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Every resource a running session holds.
///
/// Created when startup acquires its first resource and released exactly
/// once, in a fixed order, however the session ends.
pub struct SessionHandle<O: PlaybackSink> {
    timer: Option<JoinHandle<()>>,
    client: Option<LiveSessionClient>,
    capture: Option<CaptureStream>,
    uplink: Option<UplinkSender>,
    playback: Option<PlaybackScheduler<O>>,
    released: bool,
}

impl<O: PlaybackSink> SessionHandle<O> {
    pub fn new(capture: CaptureStream, playback: Option<PlaybackScheduler<O>>) -> Self {
        Self {
            timer: None,
            client: None,
            capture: Some(capture),
            uplink: None,
            playback,
            released: false,
        }
    }

    pub fn attach_client(&mut self, client: LiveSessionClient) {
        self.client = Some(client);
    }

    pub fn client(&self) -> Option<&LiveSessionClient> {
        self.client.as_ref()
    }

    /// Publishes elapsed whole seconds once per second until released.
    pub fn start_timer(&mut self, elapsed: Arc<watch::Sender<u64>>) {
        elapsed.send_replace(0);
        let task = tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                elapsed.send_modify(|seconds| *seconds += 1);
            }
        });
        self.timer = Some(task);
    }

    /// Routes captured frames into the live session. Returns `false` if
    /// there is nothing to connect or it is already connected.
    pub fn connect_capture(&mut self) -> bool {
        let (Some(capture), Some(client)) = (self.capture.as_mut(), self.client.as_ref()) else {
            return false;
        };
        match capture.connect() {
            Some(frames) => {
                self.uplink = Some(UplinkSender::spawn(frames, client.clone()));
                true
            }
            None => false,
        }
    }

    pub fn playback_mut(&mut self) -> Option<&mut PlaybackScheduler<O>> {
        self.playback.as_mut()
    }

    pub fn frames_sent(&self) -> u64 {
        self.uplink.as_ref().map_or(0, |u| u.frames_sent())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Releases everything: timers, remote session, microphone, capture
    /// stage, output context, in-flight playback. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        info!("[Session] Releasing session resources.");

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(client) = self.client.take() {
            client.close();
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.release_microphone();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.disconnect();
        }
        if let Some(uplink) = self.uplink.take() {
            uplink.stop();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.close_output();
            playback.stop_all();
        }
        debug!("[Session] Session resources released.");
    }
}

impl<O: PlaybackSink> Drop for SessionHandle<O> {
    fn drop(&mut self) {
        self.release();
    }
}
