// demos/voice_chat.rs
use odia_live_audio::audio::CpalDevices;
use odia_live_audio::{
    GeminiLiveBackend, SessionConfig, SessionMode, SessionState, SessionUpdate, Speaker,
    VoiceSession,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    dotenv::dotenv().ok();

    let config = SessionConfig::from_env(SessionMode::Conversation)?;
    let backend = GeminiLiveBackend::new(config.api_key.clone());
    let mut session = VoiceSession::new(backend, CpalDevices::new(), config);

    let mut status = session.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            println!("[{}] {}", current.odia(), current);
        }
    });

    session.start()?;
    info!("[Main] Voice chat started. Ctrl+C to exit.");

    loop {
        let next = tokio::select! {
            event = session.next_event() => Some(event),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(event) = next else {
            info!("[Main] Ctrl+C. Shutting down...");
            session.stop();
            break;
        };
        let Some(event) = event else {
            break;
        };
        session.handle_event(event);
        for update in session.take_updates() {
            match update {
                SessionUpdate::PartialTranscript {
                    speaker: Speaker::User,
                    text,
                } => info!("[Main] You (live): {}", text),
                SessionUpdate::PartialTranscript { .. } => {}
                SessionUpdate::Entry(entry) => println!("{}: {}", entry.speaker, entry.text),
            }
        }
        if !matches!(session.state(), SessionState::Starting | SessionState::Active) {
            break;
        }
    }

    info!("[Main] Final state: {:?}", session.state());
    Ok(())
}
