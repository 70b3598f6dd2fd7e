//! Inbound relay: poll, order, translate, play.

use crate::backoff::{PollPolicy, Poller};
use crate::error::StoreError;
use crate::model::{LanguageCode, Message, Session};
use crate::speech::Synthesizer;
use crate::store::SessionStore;
use crate::termination::{ShutdownReason, TerminationCoordinator};
use crate::translate::{Translator, translate_between};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Position of the last delivered message in the inbound channel.
///
/// Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    last_seq: u64,
}

impl Cursor {
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Whether `message` lies strictly beyond the cursor.
    pub fn is_new(&self, message: &Message) -> bool {
        message.seq > self.last_seq
    }

    fn advance(&mut self, seq: u64) {
        self.last_seq = self.last_seq.max(seq);
    }
}

/// Plays the peer's messages, in channel order, each exactly once.
pub struct InboundRelay {
    session: Arc<Session>,
    store: SessionStore,
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn Synthesizer>,
    coordinator: Arc<TerminationCoordinator>,
    poll: PollPolicy,
    cursor: Cursor,
}

impl InboundRelay {
    pub fn new(
        session: Arc<Session>,
        store: SessionStore,
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn Synthesizer>,
        coordinator: Arc<TerminationCoordinator>,
        poll: PollPolicy,
    ) -> Self {
        Self {
            session,
            store,
            translator,
            synthesizer,
            coordinator,
            poll,
            cursor: Cursor::default(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Polls until the session is cancelled or terminated.
    #[instrument(name = "inbound", skip_all, fields(peer = %self.session.peer_id))]
    pub async fn run(mut self) {
        let cancel = self.session.cancellation.clone();
        let mut poller = Poller::new(self.poll);
        while !cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(ControlFlow::Break(())) => break,
                Ok(ControlFlow::Continue(())) => poller.record_success(),
                Err(e) => {
                    warn!(error = %e, failures = poller.failures() + 1, "Error fetching messages.");
                    poller.record_failure();
                }
            }
            if !poller.wait(&cancel).await {
                break;
            }
        }
        debug!("Inbound relay stopped.");
    }

    /// One poll cycle: check the connection, then deliver everything new.
    pub async fn poll_once(&mut self) -> Result<ControlFlow<()>, StoreError> {
        match self.store.connection(&self.session.connection_key).await? {
            None => {
                self.coordinator.begin_shutdown(ShutdownReason::ConnectionLost).await;
                return Ok(ControlFlow::Break(()));
            }
            Some(record) if record.terminate => {
                self.coordinator.begin_shutdown(ShutdownReason::PeerTerminated).await;
                return Ok(ControlFlow::Break(()));
            }
            Some(_) => {}
        }

        let batch = self
            .store
            .messages_from(&self.session.inbound_channel(), self.cursor.last_seq())
            .await?;
        for message in batch {
            if self.session.cancellation.is_cancelled() {
                return Ok(ControlFlow::Break(()));
            }
            if !self.cursor.is_new(&message) || message.sender == self.session.self_id {
                continue;
            }
            self.deliver(&message).await;
            self.cursor.advance(message.seq);
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn deliver(&self, message: &Message) {
        let own = &self.session.source_language;
        info!(seq = message.seq, from = %message.sender, text = %message.translated_text, "Received.");

        // Already in our language unless the sender says otherwise.
        let written_in: &LanguageCode = message.translated_language.as_ref().unwrap_or(own);
        let text = match translate_between(self.translator.as_ref(), &message.translated_text, written_in, own).await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Translation failed; playing the message as received.");
                message.translated_text.clone()
            }
        };

        if self.session.cancellation.is_cancelled() {
            return;
        }
        if let Err(e) = self.synthesizer.synthesize_and_play(&text, own).await {
            warn!(error = %e, "Playback failed.");
        }
    }
}
