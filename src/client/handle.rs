use crate::audio::pcm::EncodedAudioChunk;
use crate::error::LiveAudioError;
use crate::types::{BidiGenerateContentRealtimeInput, ClientMessagePayload};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

/// Connection state of the remote session as seen by senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionReadiness {
    Connecting,
    Open,
    Closed,
}

/// The transport-side ends of a [`LiveSessionClient`].
///
/// A backend drains `outgoing` once the session is open, flips `readiness`
/// as the connection progresses and treats a message on `shutdown` as a
/// request to close.
pub struct SessionChannels {
    pub outgoing: mpsc::UnboundedReceiver<ClientMessagePayload>,
    pub shutdown: oneshot::Receiver<()>,
    pub readiness: watch::Sender<SessionReadiness>,
}

/// Handle to a (possibly still connecting) live session.
///
/// Cloning is cheap; all clones talk to the same session.
#[derive(Clone)]
pub struct LiveSessionClient {
    pub(crate) shutdown_tx: Arc<StdMutex<Option<oneshot::Sender<()>>>>,
    pub(crate) outgoing_sender: mpsc::UnboundedSender<ClientMessagePayload>,
    pub(crate) readiness: watch::Receiver<SessionReadiness>,
}

impl LiveSessionClient {
    pub fn new_pair() -> (Self, SessionChannels) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (outgoing_sender, outgoing_rx) = mpsc::unbounded_channel();
        let (readiness_tx, readiness_rx) = watch::channel(SessionReadiness::Connecting);
        let client = Self {
            shutdown_tx: Arc::new(StdMutex::new(Some(shutdown_tx))),
            outgoing_sender,
            readiness: readiness_rx,
        };
        let channels = SessionChannels {
            outgoing: outgoing_rx,
            shutdown: shutdown_rx,
            readiness: readiness_tx,
        };
        (client, channels)
    }

    pub fn readiness(&self) -> SessionReadiness {
        *self.readiness.borrow()
    }

    /// Signals the connection task to close the session. Safe to call more
    /// than once; only the first call has an effect.
    pub fn close(&self) {
        let tx = match self.shutdown_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match tx {
            Some(tx) => {
                if tx.send(()).is_err() {
                    info!("[ClientHandle] Shutdown signal failed: connection task already gone.");
                } else {
                    info!("[ClientHandle] Shutdown signal sent to connection task.");
                }
            }
            None => debug!("[ClientHandle] Close requested but session already closed."),
        }
    }

    /// Resolves once the session has opened. Every send awaits this, so
    /// sends issued while connecting are delivered in order after the open.
    pub async fn wait_ready(&self) -> Result<(), LiveAudioError> {
        let mut readiness = self.readiness.clone();
        let state = *readiness
            .wait_for(|state| *state != SessionReadiness::Connecting)
            .await
            .map_err(|_| LiveAudioError::NotReady)?;
        match state {
            SessionReadiness::Open => Ok(()),
            _ => Err(LiveAudioError::NotReady),
        }
    }

    fn send_message(&self, payload: ClientMessagePayload) -> Result<(), LiveAudioError> {
        self.outgoing_sender.send(payload).map_err(|_| {
            debug!("[ClientHandle] Failed to queue message: connection task has exited.");
            LiveAudioError::SendFailure
        })
    }

    pub async fn send_realtime_input(&self, chunk: EncodedAudioChunk) -> Result<(), LiveAudioError> {
        self.wait_ready().await?;
        let realtime_input = BidiGenerateContentRealtimeInput {
            audio: Some(chunk.into_blob()),
        };
        self.send_message(ClientMessagePayload::RealtimeInput(realtime_input))
    }
}
