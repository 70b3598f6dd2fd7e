//! Google Translate text-to-speech with playback through an external player.

use crate::error::SynthesisError;
use crate::model::LanguageCode;
use crate::speech::Synthesizer;
use async_trait::async_trait;
use std::io::Write;
use tracing::debug;

const GOOGLE_TTS_URL: &str = "https://translate.google.com/translate_tts";
/// The endpoint rejects longer inputs.
const MAX_CHUNK_CHARS: usize = 200;

/// Fetches MP3 speech for each chunk of text and plays it with `player`
/// (for example `mpg123` or `afplay`).
pub struct GoogleTtsSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    player: String,
}

impl GoogleTtsSynthesizer {
    pub fn new(player: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: GOOGLE_TTS_URL.to_string(),
            player: player.into(),
        }
    }

    async fn fetch(&self, chunk: &str, language: &LanguageCode) -> Result<Vec<u8>, SynthesisError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", language.as_str()),
                ("q", chunk),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SynthesisError::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn play(&self, audio: &[u8]) -> Result<(), SynthesisError> {
        let mut file = tempfile::Builder::new().suffix(".mp3").tempfile()?;
        file.write_all(audio)?;
        file.flush()?;
        // The temp file is removed when `file` drops, after the player exits.
        let status = tokio::process::Command::new(&self.player)
            .arg(file.path())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(SynthesisError::Playback(status));
        }
        Ok(())
    }
}

/// Splits `text` into pieces of at most `limit` characters, on whitespace
/// where possible.
fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        let current_len = current.chars().count();
        if current_len > 0 && current_len + 1 + word_len > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if word_len > limit {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl Synthesizer for GoogleTtsSynthesizer {
    async fn synthesize_and_play(&self, text: &str, language: &LanguageCode) -> Result<(), SynthesisError> {
        for chunk in chunk_text(text, MAX_CHUNK_CHARS) {
            let audio = self.fetch(&chunk, language).await?;
            debug!(bytes = audio.len(), %language, "Playing synthesized speech.");
            self.play(&audio).await?;
        }
        Ok(())
    }
}
