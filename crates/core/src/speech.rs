//! Speech Capture and Playback
//!
//! The relays see speech only through these two traits. Capture is always
//! bounded by [`CaptureLimits`], so a call to [`Transcriber::listen`] can never
//! block indefinitely.

use crate::error::{RecognitionError, SynthesisError};
use crate::model::LanguageCode;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Bounds on one capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    /// How long to wait for speech to begin.
    pub timeout: Duration,
    /// Longest phrase accepted once speech has begun.
    pub phrase_limit: Duration,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            phrase_limit: Duration::from_secs(5),
        }
    }
}

impl CaptureLimits {
    /// Upper bound on a single `listen` call.
    pub fn window(&self) -> Duration {
        self.timeout + self.phrase_limit
    }
}

/// Captures one utterance and turns it into text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn listen(&self, language: &LanguageCode, limits: CaptureLimits) -> Result<String, RecognitionError>;
}

/// Speaks text aloud.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize_and_play(&self, text: &str, language: &LanguageCode) -> Result<(), SynthesisError>;
}

/// Reads typed utterances from standard input instead of a microphone.
///
/// Typing the first character counts as speech beginning, which must happen
/// within the capture timeout. The line must then be finished within the
/// phrase limit; an unfinished line is kept and completed by the next call.
pub struct ConsoleTranscriber<R = BufReader<Stdin>> {
    lines: Mutex<Lines<R>>,
}

impl Default for ConsoleTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleTranscriber {
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> ConsoleTranscriber<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Transcriber for ConsoleTranscriber<R> {
    async fn listen(&self, _language: &LanguageCode, limits: CaptureLimits) -> Result<String, RecognitionError> {
        let mut lines = self.lines.lock().await;

        match tokio::time::timeout(limits.timeout, lines.get_mut().fill_buf()).await {
            Err(_) => return Err(RecognitionError::NoSpeech),
            Ok(Err(e)) => return Err(RecognitionError::ServiceUnavailable(e.to_string())),
            Ok(Ok(buf)) if buf.is_empty() => {
                // Input closed: behave like a silent microphone.
                tokio::time::sleep(limits.timeout).await;
                return Err(RecognitionError::NoSpeech);
            }
            Ok(Ok(_)) => {}
        }

        // `next_line` is cancel safe, so a partial line survives the phrase limit.
        match tokio::time::timeout(limits.phrase_limit, lines.next_line()).await {
            Err(_) => Err(RecognitionError::Unintelligible),
            Ok(Ok(Some(line))) if line.trim().is_empty() => Err(RecognitionError::NoSpeech),
            Ok(Ok(Some(line))) => Ok(line.trim().to_string()),
            Ok(Ok(None)) => Err(RecognitionError::NoSpeech),
            Ok(Err(e)) => Err(RecognitionError::ServiceUnavailable(e.to_string())),
        }
    }
}

/// Prints what would be spoken.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSynthesizer;

#[async_trait]
impl Synthesizer for ConsoleSynthesizer {
    async fn synthesize_and_play(&self, text: &str, language: &LanguageCode) -> Result<(), SynthesisError> {
        println!("[{language}] {text}");
        Ok(())
    }
}
