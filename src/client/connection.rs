use super::backend::SessionEvent;
use super::handle::{SessionChannels, SessionReadiness};
use crate::error::LiveAudioError;
use crate::types::{BidiGenerateContentSetup, ClientMessagePayload, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};
use url::Url;

fn install_crypto_provider() {
    // Fails only if a provider is already installed, which is fine.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub(crate) fn spawn_processing_task(
    url: Url,
    setup: BidiGenerateContentSetup,
    channels: SessionChannels,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    tokio::spawn(async move {
        let SessionChannels {
            outgoing,
            shutdown,
            readiness,
        } = channels;
        let outcome = run_connection(url, setup, outgoing, shutdown, &readiness, &events_tx).await;
        readiness.send_replace(SessionReadiness::Closed);
        let event = match outcome {
            Ok(reason) => {
                info!("[Connection] Session closed: {:?}", reason);
                SessionEvent::Closed(reason)
            }
            Err(e) => {
                error!("[Connection] Session failed: {}", e);
                SessionEvent::Error(e.to_string())
            }
        };
        let _ = events_tx.send(event);
    });
}

async fn run_connection(
    url: Url,
    setup: BidiGenerateContentSetup,
    mut outgoing: mpsc::UnboundedReceiver<ClientMessagePayload>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
    readiness: &tokio::sync::watch::Sender<SessionReadiness>,
    events_tx: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<Option<String>, LiveAudioError> {
    install_crypto_provider();
    info!("[Connection] Connecting to {}", url.host_str().unwrap_or("<unknown>"));

    let setup_json = serde_json::to_string(&ClientMessagePayload::Setup(setup))?;
    let handshake = async {
        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        let (mut ws_sink, ws_stream) = ws_stream.split();
        ws_sink.send(Message::Text(setup_json.into())).await?;
        Ok::<_, LiveAudioError>((ws_sink, ws_stream))
    };
    // Dropping the pending handshake drops its socket.
    let (mut ws_sink, mut ws_stream) = tokio::select! {
        biased;
        _ = &mut shutdown => {
            info!("[Connection] Shutdown requested before the session opened.");
            return Ok(Some("closed by client".to_string()));
        }
        connected = handshake => connected?,
    };
    debug!("[Connection] Setup sent, waiting for setupComplete.");

    let mut open = false;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("[Connection] Shutdown requested by client.");
                let _ = ws_sink.send(Message::Close(None)).await;
                return Ok(Some("closed by client".to_string()));
            }
            incoming = ws_stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("[Connection] Dropping non UTF-8 binary frame: {}", e);
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(frame.map(|f| f.reason.as_str().to_owned()));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(None),
                };
                let message: ServerMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("[Connection] Unparseable server message: {}", e);
                        continue;
                    }
                };
                if message.setup_complete.is_some() && !open {
                    open = true;
                    readiness.send_replace(SessionReadiness::Open);
                    info!("[Connection] Setup complete, session open.");
                    if events_tx.send(SessionEvent::Open).is_err() {
                        return Ok(Some("event receiver dropped".to_string()));
                    }
                    continue;
                }
                if let Some(go_away) = &message.go_away {
                    warn!("[Connection] Server going away, time left: {:?}", go_away.time_left);
                }
                if let Some(usage) = &message.usage_metadata {
                    trace!("[Connection] Usage metadata: {:?}", usage);
                }
                if events_tx.send(SessionEvent::Message(message)).is_err() {
                    return Ok(Some("event receiver dropped".to_string()));
                }
            }
            payload = outgoing.recv(), if open => {
                match payload {
                    Some(payload) => {
                        let json = serde_json::to_string(&payload)?;
                        ws_sink.send(Message::Text(json.into())).await?;
                    }
                    None => {
                        info!("[Connection] All client handles dropped, closing.");
                        let _ = ws_sink.send(Message::Close(None)).await;
                        return Ok(Some("client dropped".to_string()));
                    }
                }
            }
        }
    }
}
