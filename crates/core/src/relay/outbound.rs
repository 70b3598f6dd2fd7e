//! Outbound relay: capture, translate, append.

use crate::backoff::{PollPolicy, Poller};
use crate::error::RecognitionError;
use crate::model::{ChannelKey, Message, ParticipantId, Session, now_timestamp};
use crate::speech::{CaptureLimits, Transcriber};
use crate::store::SessionStore;
use crate::termination::{ShutdownReason, TerminationCoordinator};
use crate::translate::{Translator, translate_between};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const TERMINATION_KEYWORD: &str = "terminate";
/// Attempts to find a free slot when the one we aimed for is already taken.
const MAX_APPEND_ATTEMPTS: usize = 3;

/// True when `transcript` is the bare keyword or the keyword followed by the
/// speaker's own id, ignoring case and surrounding whitespace.
pub fn is_termination_phrase(transcript: &str, speaker: &ParticipantId) -> bool {
    let spoken = transcript.trim().to_lowercase();
    let personal = format!("{TERMINATION_KEYWORD} {}", speaker.as_str().to_lowercase());
    spoken == TERMINATION_KEYWORD || spoken == personal
}

/// Turns the local participant's speech into messages on the outbound channel.
pub struct OutboundRelay {
    session: Arc<Session>,
    store: SessionStore,
    transcriber: Arc<dyn Transcriber>,
    translator: Arc<dyn Translator>,
    coordinator: Arc<TerminationCoordinator>,
    limits: CaptureLimits,
    next_seq: u64,
    /// `next_seq` may lag the channel and must be re-read before the next append.
    stale_seq: bool,
}

impl OutboundRelay {
    pub fn new(
        session: Arc<Session>,
        store: SessionStore,
        transcriber: Arc<dyn Transcriber>,
        translator: Arc<dyn Translator>,
        coordinator: Arc<TerminationCoordinator>,
        limits: CaptureLimits,
    ) -> Self {
        Self {
            session,
            store,
            transcriber,
            translator,
            coordinator,
            limits,
            next_seq: 1,
            stale_seq: true,
        }
    }

    /// Runs until the session is cancelled or terminated.
    #[instrument(name = "outbound", skip_all, fields(peer = %self.session.peer_id))]
    pub async fn run(mut self) {
        let cancel = self.session.cancellation.clone();
        // Paces retries only while the recognizer itself is down.
        let mut recognizer = Poller::new(
            PollPolicy::new(Duration::from_millis(250)).with_max_backoff(Duration::from_secs(10)),
        );

        while !cancel.is_cancelled() {
            match self.store.connection(&self.session.connection_key).await {
                Ok(Some(record)) if record.terminate => {
                    self.coordinator.begin_shutdown(ShutdownReason::PeerTerminated).await;
                    break;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Could not read connection record."),
            }

            info!(language = %self.session.source_language, "Listening...");
            let capture = self.transcriber.listen(&self.session.source_language, self.limits);
            let heard = tokio::select! {
                _ = cancel.cancelled() => break,
                heard = tokio::time::timeout(self.limits.window(), capture) => {
                    heard.unwrap_or(Err(RecognitionError::NoSpeech))
                }
            };

            let transcript = match heard {
                Ok(transcript) => {
                    recognizer.record_success();
                    transcript
                }
                Err(RecognitionError::ServiceUnavailable(reason)) => {
                    warn!(%reason, "Recognizer unavailable.");
                    recognizer.record_failure();
                    if !recognizer.wait(&cancel).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    debug!(error = %e, "Nothing recognized.");
                    continue;
                }
            };

            if self.handle_transcript(&transcript).await.is_break() {
                break;
            }
        }
        debug!("Outbound relay stopped.");
    }

    /// Processes one recognized utterance.
    pub async fn handle_transcript(&mut self, transcript: &str) -> ControlFlow<()> {
        info!(%transcript, "Recognized.");
        if is_termination_phrase(transcript, &self.session.self_id) {
            info!("Termination command detected. Ending call...");
            if let Err(e) = self.store.request_termination(&self.session.connection_key).await {
                warn!(error = %e, "Could not flag the connection for termination.");
            }
            self.coordinator.begin_shutdown(ShutdownReason::KeywordSpoken).await;
            return ControlFlow::Break(());
        }

        let translated = match translate_between(
            self.translator.as_ref(),
            transcript,
            &self.session.source_language,
            &self.session.target_language,
        )
        .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Translation failed; utterance not sent.");
                return ControlFlow::Continue(());
            }
        };

        if self.session.cancellation.is_cancelled() {
            return ControlFlow::Break(());
        }

        let message = Message {
            seq: self.next_seq,
            sender: self.session.self_id.clone(),
            original_text: transcript.to_string(),
            translated_text: translated,
            translated_language: Some(self.session.target_language.clone()),
            timestamp: now_timestamp(),
        };
        self.publish(message).await;
        ControlFlow::Continue(())
    }

    /// Writes `message` into the next free slot of the outbound channel.
    ///
    /// A failed write may still have landed, so the position is re-read before
    /// the following append instead of reusing the slot.
    async fn publish(&mut self, mut message: Message) {
        let channel = self.session.outbound_channel();
        for _ in 0..MAX_APPEND_ATTEMPTS {
            if self.stale_seq {
                self.resync(&channel).await;
            }
            message.seq = self.next_seq;
            match self.store.append(&channel, &message).await {
                Ok(true) => {
                    self.next_seq += 1;
                    info!(seq = message.seq, text = %message.translated_text, "Sent.");
                    return;
                }
                Ok(false) => {
                    debug!(seq = message.seq, "Sequence slot already taken.");
                    self.next_seq += 1;
                    self.stale_seq = true;
                }
                Err(e) => {
                    warn!(seq = message.seq, error = %e, "Failed to send message.");
                    self.stale_seq = true;
                    return;
                }
            }
        }
        warn!("No free sequence slot found; message not sent.");
    }

    async fn resync(&mut self, channel: &ChannelKey) {
        match self.store.last_seq(channel).await {
            Ok(last) => {
                self.next_seq = self.next_seq.max(last + 1);
                self.stale_seq = false;
            }
            Err(e) => warn!(error = %e, "Could not read outbound channel position."),
        }
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{ConnectionKey, LanguageCode};
    use crate::relay::InboundRelay;
    use crate::speech::{MockSynthesizer, MockTranscriber};
    use crate::store::{MemoryStore, RemoteStore, StorePath};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::termination::TerminationState;
    use crate::translate::MockTranslator;
    use tokio_util::sync::CancellationToken;

    fn id(raw: &str) -> ParticipantId {
        ParticipantId::parse(raw).unwrap()
    }

    struct Fixture {
        session: Arc<Session>,
        store: SessionStore,
        coordinator: Arc<TerminationCoordinator>,
    }

    async fn fixture(peer_language: &str) -> Fixture {
        let session = Session {
            self_id: id("A"),
            peer_id: id("B"),
            connection_key: ConnectionKey::new(id("A"), id("B")),
            source_language: LanguageCode::new("en"),
            target_language: LanguageCode::new(peer_language),
            cancellation: CancellationToken::new(),
        };
        let store = SessionStore::new(Arc::new(MemoryStore::new()));
        store.open_connection(&session.connection_key).await.unwrap();
        store.accept(&session.connection_key).await.unwrap();
        let coordinator = Arc::new(TerminationCoordinator::new(session.clone(), store.clone()));
        Fixture {
            session: Arc::new(session),
            store,
            coordinator,
        }
    }

    fn relay(f: &Fixture, transcriber: MockTranscriber, translator: MockTranslator) -> OutboundRelay {
        OutboundRelay::new(
            f.session.clone(),
            f.store.clone(),
            Arc::new(transcriber),
            Arc::new(translator),
            f.coordinator.clone(),
            CaptureLimits::default(),
        )
    }

    #[test]
    fn test_termination_phrase_matching() {
        let a = id("Alice");
        assert!(is_termination_phrase("terminate", &a));
        assert!(is_termination_phrase("  TERMINATE ", &a));
        assert!(is_termination_phrase("Terminate alice", &a));
        assert!(!is_termination_phrase("terminate bob", &a));
        assert!(!is_termination_phrase("please terminate", &a));
    }

    #[tokio::test]
    async fn test_utterance_is_translated_then_appended() {
        let f = fixture("es").await;
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .times(1)
            .returning(|_, _| Ok("hola".to_string()));
        let mut relay = relay(&f, MockTranscriber::new(), translator);

        assert!(relay.handle_transcript("hello").await.is_continue());

        let sent = f.store.messages_from(&ChannelKey::new(id("A"), id("B")), 0).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].original_text, "hello");
        assert_eq!(sent[0].translated_text, "hola");
        assert_eq!(sent[0].translated_language, Some(LanguageCode::new("es")));
        assert_eq!(sent[0].sender, id("A"));
        assert_eq!(sent[0].seq, 1);
        assert_eq!(relay.next_seq(), 2);
    }

    #[tokio::test]
    async fn test_same_language_peer_skips_translation() {
        let f = fixture("en").await;
        let mut translator = MockTranslator::new();
        translator.expect_translate().never();
        let mut relay = relay(&f, MockTranscriber::new(), translator);

        relay.handle_transcript("hello").await;

        let sent = f.store.messages_from(&f.session.outbound_channel(), 0).await.unwrap();
        assert_eq!(sent[0].translated_text, "hello");
    }

    #[tokio::test]
    async fn test_translation_failure_drops_utterance() {
        let f = fixture("es").await;
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .returning(|_, _| Err(crate::error::TranslateError::Status(503)));
        let mut relay = relay(&f, MockTranscriber::new(), translator);

        assert!(relay.handle_transcript("hello").await.is_continue());
        assert!(f.store.messages_from(&f.session.outbound_channel(), 0).await.unwrap().is_empty());
        assert_eq!(relay.next_seq(), 1);
    }

    #[tokio::test]
    async fn test_keyword_flags_record_and_shuts_down() {
        let f = fixture("es").await;
        let mut translator = MockTranslator::new();
        translator.expect_translate().never();
        let mut relay = relay(&f, MockTranscriber::new(), translator);

        assert!(relay.handle_transcript("Terminate").await.is_break());
        assert!(f.session.cancellation.is_cancelled());
        assert_eq!(f.coordinator.state(), TerminationState::Terminating);
        // Teardown removed the record after it was flagged.
        assert_eq!(f.store.connection(&f.session.connection_key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_exits_when_peer_flagged_terminate() {
        let f = fixture("es").await;
        assert!(f.store.request_termination(&f.session.connection_key).await.unwrap());
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_listen().never();
        let relay = relay(&f, transcriber, MockTranslator::new());

        relay.run().await;
        assert!(f.session.cancellation.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_skips_transient_failures_and_resumes_numbering() {
        let f = fixture("es").await;
        let earlier = Message {
            seq: 4,
            sender: id("A"),
            original_text: "before".into(),
            translated_text: "antes".into(),
            translated_language: None,
            timestamp: 1.0,
        };
        f.store.append(&f.session.outbound_channel(), &earlier).await.unwrap();

        let cancel = f.session.cancellation.clone();
        let mut calls = 0;
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_listen().returning(move |_, _| {
            calls += 1;
            match calls {
                1 => Err(RecognitionError::NoSpeech),
                2 => Err(RecognitionError::Unintelligible),
                3 => Ok("hello".to_string()),
                _ => {
                    cancel.cancel();
                    Err(RecognitionError::NoSpeech)
                }
            }
        });
        let mut translator = MockTranslator::new();
        translator.expect_translate().returning(|_, _| Ok("hola".to_string()));
        let relay = relay(&f, transcriber, translator);

        relay.run().await;

        let sent = f.store.messages_from(&f.session.outbound_channel(), 0).await.unwrap();
        let seqs: Vec<u64> = sent.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, [4, 5]);
        assert_eq!(sent[1].translated_text, "hola");
        assert_eq!(f.coordinator.state(), TerminationState::Active);
    }

    /// Applies the first chat write but reports it as failed.
    struct LostAck {
        inner: MemoryStore,
        acked_once: AtomicBool,
    }

    #[async_trait]
    impl RemoteStore for LostAck {
        async fn get(&self, p: &StorePath) -> Result<Option<Value>, StoreError> {
            self.inner.get(p).await
        }
        async fn set(&self, p: &StorePath, v: Value) -> Result<(), StoreError> {
            self.inner.set(p, v).await
        }
        async fn update(&self, p: &StorePath, f: Map<String, Value>) -> Result<(), StoreError> {
            self.inner.update(p, f).await
        }
        async fn compare_and_set(&self, p: &StorePath, e: Option<&Value>, n: Value) -> Result<bool, StoreError> {
            let written = self.inner.compare_and_set(p, e, n).await?;
            if p.to_string().starts_with("chats/") && !self.acked_once.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            Ok(written)
        }
        async fn query_ordered(&self, p: &StorePath, k: &str) -> Result<Vec<(String, Value)>, StoreError> {
            self.inner.query_ordered(p, k).await
        }
        async fn delete(&self, p: &StorePath) -> Result<(), StoreError> {
            self.inner.delete(p).await
        }
    }

    #[tokio::test]
    async fn test_lost_acknowledgement_does_not_reuse_sequence() {
        let store = SessionStore::new(Arc::new(LostAck {
            inner: MemoryStore::new(),
            acked_once: AtomicBool::new(false),
        }));
        let key = ConnectionKey::new(id("A"), id("B"));
        store.open_connection(&key).await.unwrap();
        store.accept(&key).await.unwrap();

        let speaker = Session {
            self_id: id("A"),
            peer_id: id("B"),
            connection_key: key.clone(),
            source_language: LanguageCode::new("en"),
            target_language: LanguageCode::new("en"),
            cancellation: CancellationToken::new(),
        };
        let listener = Session {
            self_id: id("B"),
            peer_id: id("A"),
            connection_key: key,
            source_language: LanguageCode::new("en"),
            target_language: LanguageCode::new("en"),
            cancellation: CancellationToken::new(),
        };

        let mut translator = MockTranslator::new();
        translator.expect_translate().never();
        let translator = Arc::new(translator);
        let mut outbound = OutboundRelay::new(
            Arc::new(speaker.clone()),
            store.clone(),
            Arc::new(MockTranscriber::new()),
            translator.clone(),
            Arc::new(TerminationCoordinator::new(speaker, store.clone())),
            CaptureLimits::default(),
        );

        let played = Arc::new(Mutex::new(Vec::new()));
        let mut synthesizer = MockSynthesizer::new();
        let sink = played.clone();
        synthesizer.expect_synthesize_and_play().returning(move |text, _| {
            sink.lock().unwrap().push(text.to_string());
            Ok(())
        });
        let mut inbound = InboundRelay::new(
            Arc::new(listener.clone()),
            store.clone(),
            translator,
            Arc::new(synthesizer),
            Arc::new(TerminationCoordinator::new(listener, store.clone())),
            PollPolicy::new(Duration::from_millis(100)),
        );

        outbound.handle_transcript("first").await;
        inbound.poll_once().await.unwrap();
        outbound.handle_transcript("second").await;
        inbound.poll_once().await.unwrap();

        assert_eq!(*played.lock().unwrap(), ["first", "second"]);
        assert_eq!(outbound.next_seq(), 3);
    }
}
