use super::builder::LiveSessionBuilder;
use super::handle::LiveSessionClient;
use crate::error::LiveAudioError;
use crate::types::{BidiGenerateContentSetup, ServerMessage};
use tokio::sync::mpsc;

/// Everything the remote session reports back, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Open,
    Message(ServerMessage),
    Error(String),
    Closed(Option<String>),
}

pub struct LiveConnection {
    pub client: LiveSessionClient,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// The remote service a live session is opened against.
///
/// `connect` must not block: it starts the connection and hands back a
/// client whose sends wait for the session to open.
pub trait ConversationalBackend: Send + Sync {
    fn connect(&self, setup: BidiGenerateContentSetup) -> Result<LiveConnection, LiveAudioError>;
}

#[derive(Debug, Clone)]
pub struct GeminiLiveBackend {
    api_key: String,
    endpoint: Option<String>,
}

impl GeminiLiveBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl ConversationalBackend for GeminiLiveBackend {
    fn connect(&self, setup: BidiGenerateContentSetup) -> Result<LiveConnection, LiveAudioError> {
        let mut builder = LiveSessionBuilder::from_setup(self.api_key.clone(), setup);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint(endpoint.clone());
        }
        builder.connect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::handle::test_utils::setup_test;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::{Duration, timeout};

    fn setup() -> BidiGenerateContentSetup {
        BidiGenerateContentSetup {
            model: "models/x".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_error_event() {
        setup_test();
        let backend = GeminiLiveBackend::new("key").with_endpoint("ws://127.0.0.1:9/live");
        let mut connection = backend
            .connect(setup())
            .unwrap();
        let event = timeout(Duration::from_secs(5), connection.events.recv())
            .await
            .expect("connection attempt should finish");
        assert!(matches!(event, Some(SessionEvent::Error(_))));
        assert!(connection.client.wait_ready().await.is_err());
    }

    #[tokio::test]
    async fn close_during_handshake_drops_the_socket() {
        setup_test();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/live", listener.local_addr().unwrap());
        let backend = GeminiLiveBackend::new("key").with_endpoint(endpoint);
        let mut connection = backend.connect(setup()).unwrap();

        // Accept the TCP connection but never answer the upgrade request.
        let (mut socket, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        connection.client.close();

        let event = timeout(Duration::from_secs(2), connection.events.recv())
            .await
            .expect("close should end the pending handshake");
        assert_eq!(
            event,
            Some(SessionEvent::Closed(Some("closed by client".to_string())))
        );

        let mut buf = [0u8; 1024];
        let eof = timeout(Duration::from_secs(2), async {
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;
        assert!(eof.is_ok(), "socket stayed open after close");
    }
}
