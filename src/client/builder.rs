use super::backend::LiveConnection;
use super::handle::LiveSessionClient;
use super::GEMINI_LIVE_ENDPOINT;
use crate::error::LiveAudioError;
use crate::types::*;
use tokio::sync::mpsc;
use url::Url;

pub struct LiveSessionBuilder {
    pub(crate) api_key: String,
    pub(crate) endpoint: String,
    pub(crate) initial_setup: BidiGenerateContentSetup,
}

impl LiveSessionBuilder {
    pub fn new(api_key: String, model: String) -> Self {
        Self::from_setup(
            api_key,
            BidiGenerateContentSetup {
                model,
                ..Default::default()
            },
        )
    }

    pub fn from_setup(api_key: String, setup: BidiGenerateContentSetup) -> Self {
        Self {
            api_key,
            endpoint: GEMINI_LIVE_ENDPOINT.to_string(),
            initial_setup: setup,
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn generation_config(mut self, config: GenerationConfig) -> Self {
        self.initial_setup.generation_config = Some(config);
        self
    }

    pub fn system_instruction(mut self, instruction: Content) -> Self {
        self.initial_setup.system_instruction = Some(instruction);
        self
    }

    pub fn input_audio_transcription(mut self, config: AudioTranscriptionConfig) -> Self {
        self.initial_setup.input_audio_transcription = Some(config);
        self
    }

    pub fn output_audio_transcription(mut self, config: AudioTranscriptionConfig) -> Self {
        self.initial_setup.output_audio_transcription = Some(config);
        self
    }

    /// Full socket URL with the API key attached as the `key` query parameter.
    pub fn socket_url(&self) -> Result<Url, LiveAudioError> {
        Ok(Url::parse_with_params(
            &self.endpoint,
            &[("key", self.api_key.as_str())],
        )?)
    }

    /// Starts connecting in the background and returns immediately.
    ///
    /// The returned client queues sends until the server acknowledges the
    /// setup; the event receiver yields `Open` at that point. Must be called
    /// from within a Tokio runtime.
    pub fn connect(self) -> Result<LiveConnection, LiveAudioError> {
        if self.api_key.trim().is_empty() {
            return Err(LiveAudioError::Config("API key is empty".to_string()));
        }
        let url = self.socket_url()?;
        let (client, channels) = LiveSessionClient::new_pair();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        super::connection::spawn_processing_task(url, self.initial_setup, channels, events_tx);

        Ok(LiveConnection {
            client,
            events: events_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_carries_api_key() {
        let builder = LiveSessionBuilder::new("secret key".to_string(), "models/x".to_string());
        let url = builder.socket_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("generativelanguage.googleapis.com"));
        let key = url
            .query_pairs()
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned());
        assert_eq!(key.as_deref(), Some("secret key"));
    }

    #[test]
    fn builder_methods_fill_setup() {
        let builder = LiveSessionBuilder::new("k".to_string(), "models/x".to_string())
            .system_instruction(Content::from_text("be brief"))
            .generation_config(GenerationConfig {
                response_modalities: Some(vec![ResponseModality::Audio]),
                ..Default::default()
            })
            .input_audio_transcription(AudioTranscriptionConfig {})
            .output_audio_transcription(AudioTranscriptionConfig {});
        let setup = &builder.initial_setup;
        assert_eq!(setup.model, "models/x");
        assert!(setup.system_instruction.is_some());
        assert!(setup.input_audio_transcription.is_some());
        assert!(setup.output_audio_transcription.is_some());
    }

    #[test]
    fn connect_rejects_empty_key() {
        let result = LiveSessionBuilder::new(String::new(), "models/x".to_string()).connect();
        assert!(matches!(result, Err(LiveAudioError::Config(_))));
    }
}
