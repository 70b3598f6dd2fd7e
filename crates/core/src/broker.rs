//! Connection Handshake
//!
//! Two mutually exclusive ways into a call:
//!
//! - [`ConnectionBroker::initiate`] publishes a request and waits for it to be
//!   accepted.
//! - [`ConnectionBroker::await_incoming`] watches for requests addressed to us
//!   and claims the first one with an atomic compare-and-set, so two listeners
//!   racing for the same request cannot both win.

use crate::backoff::{PollPolicy, Poller};
use crate::error::BrokerError;
use crate::language::LanguagePreferenceResolver;
use crate::model::{ChannelKey, ConnectionKey, ParticipantId, Session};
use crate::store::SessionStore;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs the initiate/accept handshake and builds the resulting [`Session`].
#[derive(Clone)]
pub struct ConnectionBroker {
    store: SessionStore,
    languages: LanguagePreferenceResolver,
    poll: PollPolicy,
    handshake_timeout: Option<Duration>,
}

impl ConnectionBroker {
    pub fn new(store: SessionStore, languages: LanguagePreferenceResolver, poll: PollPolicy) -> Self {
        Self {
            store,
            languages,
            poll,
            handshake_timeout: None,
        }
    }

    /// Gives up on an unanswered request after `timeout`. Without one,
    /// `initiate` waits until accepted or cancelled.
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Asks `target_id` for a call and waits until they accept.
    pub async fn initiate(
        &self,
        self_id: ParticipantId,
        target_id: ParticipantId,
        cancel: CancellationToken,
    ) -> Result<Session, BrokerError> {
        if self_id == target_id {
            return Err(BrokerError::SelfConnection(self_id.to_string()));
        }
        let key = ConnectionKey::new(self_id.clone(), target_id.clone());

        // Leftovers from an earlier, partially torn-down call would replay as new messages.
        for channel in [
            ChannelKey::new(self_id.clone(), target_id.clone()),
            ChannelKey::new(target_id.clone(), self_id.clone()),
        ] {
            if let Err(e) = self.store.clear_channel(&channel).await {
                warn!(%channel, error = %e, "Could not clear stale channel.");
            }
        }

        self.store.open_connection(&key).await?;
        info!(target = %target_id, "Connection request sent. Waiting for acceptance...");

        let deadline = self.handshake_timeout.map(|t| Instant::now() + t);
        let mut poller = Poller::new(self.poll);
        loop {
            match self.store.connection(&key).await {
                Ok(Some(record)) if record.accepted => break,
                Ok(_) => poller.record_success(),
                Err(e) => {
                    warn!(connection = %key, error = %e, "Polling for acceptance failed.");
                    poller.record_failure();
                }
            }

            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            if expired || !poller.wait(&cancel).await {
                self.withdraw(&key).await;
                return Err(if expired {
                    BrokerError::TimedOut(target_id.to_string())
                } else {
                    BrokerError::Cancelled
                });
            }
        }

        info!(peer = %target_id, "Connection established.");
        Ok(self.establish(self_id, target_id, key, cancel).await)
    }

    /// Waits for a request addressed to `self_id` and accepts it.
    ///
    /// Requests that are already accepted are ignored, so accepting is
    /// idempotent: a second listener never re-accepts a claimed request.
    pub async fn await_incoming(
        &self,
        self_id: ParticipantId,
        cancel: CancellationToken,
    ) -> Result<Session, BrokerError> {
        info!("Waiting for connection requests...");
        let mut poller = Poller::new(self.poll);
        loop {
            match self.store.pending_for(&self_id).await {
                Ok(pending) => {
                    poller.record_success();
                    for key in pending {
                        match self.store.accept(&key).await {
                            Ok(true) => {
                                let peer_id = key.initiator.clone();
                                info!(peer = %peer_id, "Connection established.");
                                return Ok(self.establish(self_id, peer_id, key, cancel).await);
                            }
                            Ok(false) => debug!(connection = %key, "Request was claimed elsewhere."),
                            Err(e) => warn!(connection = %key, error = %e, "Accepting request failed."),
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Scanning for connection requests failed.");
                    poller.record_failure();
                }
            }

            if !poller.wait(&cancel).await {
                return Err(BrokerError::Cancelled);
            }
        }
    }

    async fn establish(
        &self,
        self_id: ParticipantId,
        peer_id: ParticipantId,
        connection_key: ConnectionKey,
        cancellation: CancellationToken,
    ) -> Session {
        let source_language = self.languages.resolve(&self_id).await;
        let target_language = self.languages.resolve(&peer_id).await;
        info!(%source_language, %target_language, "Languages resolved.");
        Session {
            self_id,
            peer_id,
            connection_key,
            source_language,
            target_language,
            cancellation,
        }
    }

    async fn withdraw(&self, key: &ConnectionKey) {
        if let Err(e) = self.store.remove_connection(key).await {
            warn!(connection = %key, error = %e, "Could not withdraw connection request.");
        }
    }
}
