// demos/live_transcription.rs
use odia_live_audio::audio::CpalDevices;
use odia_live_audio::session::format_elapsed;
use odia_live_audio::{
    GeminiLiveBackend, SessionConfig, SessionMode, SessionState, SessionUpdate, VoiceSession,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    dotenv::dotenv().ok();

    let config = SessionConfig::from_env(SessionMode::Transcription)?;
    let backend = GeminiLiveBackend::new(config.api_key.clone());
    let mut session = VoiceSession::new(backend, CpalDevices::new(), config);

    let mut elapsed = session.elapsed();
    tokio::spawn(async move {
        while elapsed.changed().await.is_ok() {
            let seconds = *elapsed.borrow_and_update();
            info!("[Main] Recording {}", format_elapsed(seconds));
        }
    });

    session.start()?;
    println!("{}", session.current_status().odia());

    loop {
        let next = tokio::select! {
            event = session.next_event() => Some(event),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(event) = next else {
            session.stop();
            break;
        };
        let Some(event) = event else {
            break;
        };
        session.handle_event(event);
        for update in session.take_updates() {
            if let SessionUpdate::PartialTranscript { text, .. } = update {
                println!("... {}", text);
            }
        }
        if !matches!(session.state(), SessionState::Starting | SessionState::Active) {
            break;
        }
    }

    println!("{}", session.current_status().odia());
    for entry in session.history() {
        println!("{}", entry.text);
    }
    Ok(())
}
