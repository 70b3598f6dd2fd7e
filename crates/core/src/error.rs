//! Error types shared across the session protocol and its collaborators.

/// A participant id that cannot be used as a store key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidId {
    #[error("participant id must not be empty")]
    Empty,
    #[error("participant id '{id}' contains forbidden character {found:?}")]
    ForbiddenChar { id: String, found: char },
}

/// Failure of a single remote store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned HTTP {status} for '{path}': {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },
    #[error("malformed data at '{path}': {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
}

/// Failure of the translation collaborator.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("translation service returned HTTP {0}")]
    Status(u16),
    #[error("unexpected translation response: {0}")]
    Malformed(String),
}

/// Transient outcomes of one bounded capture-and-recognize attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognitionError {
    #[error("no speech detected")]
    NoSpeech,
    #[error("speech could not be understood")]
    Unintelligible,
    #[error("recognizer unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Failure of the synthesis collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("speech synthesis request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("speech synthesis returned HTTP {0}")]
    Status(u16),
    #[error("audio file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audio player exited with {0}")]
    Playback(std::process::ExitStatus),
}

/// Reasons a handshake can end without an established session.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("cannot open a connection to yourself ({0})")]
    SelfConnection(String),
    #[error("could not publish the connection request: {0}")]
    Store(#[from] StoreError),
    #[error("no answer from {0} before the handshake timeout")]
    TimedOut(String),
    #[error("handshake cancelled")]
    Cancelled,
}
