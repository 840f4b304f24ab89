use super::pcm::{AudioFrame, EncodedAudioChunk};
use crate::client::LiveSessionClient;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Forwards captured frames to the live session, one at a time and in
/// capture order. Send failures are logged and the frame is discarded.
pub struct UplinkSender {
    task: JoinHandle<()>,
    sent: Arc<AtomicU64>,
}

impl UplinkSender {
    pub fn spawn(mut frames: mpsc::Receiver<AudioFrame>, client: LiveSessionClient) -> Self {
        let sent = Arc::new(AtomicU64::new(0));
        let sent_counter = Arc::clone(&sent);
        let task = tokio::spawn(async move {
            info!("[Uplink] Forwarding captured audio.");
            while let Some(frame) = frames.recv().await {
                let chunk = EncodedAudioChunk::from_frame(&frame);
                match client.send_realtime_input(chunk).await {
                    Ok(()) => {
                        sent_counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => debug!("[Uplink] Dropping frame: {}", e),
                }
            }
            info!("[Uplink] Frame source closed, uplink finished.");
        });
        Self { task, sent }
    }

    pub fn frames_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for UplinkSender {
    fn drop(&mut self) {
        self.task.abort();
    }
}
