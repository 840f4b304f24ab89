use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    User,
    Bot,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Bot => write!(f, "bot"),
        }
    }
}

/// One finalized line of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Collects streamed transcription fragments for the current turn.
///
/// Fragments are concatenated as they arrive. Whitespace is only trimmed when
/// the turn is finalized, so partial text may carry the leading and trailing
/// spaces the service sends.
#[derive(Debug, Default, Clone)]
pub struct TranscriptAccumulator {
    input: String,
    output: String,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment and returns the running text for that speaker.
    pub fn on_partial_transcript(&mut self, speaker: Speaker, fragment: &str) -> &str {
        let buffer = match speaker {
            Speaker::User => &mut self.input,
            Speaker::Bot => &mut self.output,
        };
        buffer.push_str(fragment);
        buffer
    }

    pub fn partial(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::User => &self.input,
            Speaker::Bot => &self.output,
        }
    }

    /// Finalizes the turn: user entry first, then bot. Empty sides produce no
    /// entry. Both buffers are cleared.
    pub fn on_turn_complete(&mut self) -> Vec<TranscriptEntry> {
        let input = std::mem::take(&mut self.input);
        let output = std::mem::take(&mut self.output);
        [(Speaker::User, input), (Speaker::Bot, output)]
            .into_iter()
            .filter_map(|(speaker, text)| {
                let text = text.trim();
                (!text.is_empty()).then(|| TranscriptEntry {
                    speaker,
                    text: text.to_string(),
                })
            })
            .collect()
    }

    /// Finalizes only the user side, leaving bot text untouched.
    pub fn take_input(&mut self) -> Option<TranscriptEntry> {
        let input = std::mem::take(&mut self.input);
        let text = input.trim();
        (!text.is_empty()).then(|| TranscriptEntry {
            speaker: Speaker::User,
            text: text.to_string(),
        })
    }

    pub fn discard(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }
}
