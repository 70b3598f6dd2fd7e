//! Session Teardown
//!
//! `ACTIVE -> TERMINATING -> TERMINATED`, with no way back. Whoever moves the
//! session out of `ACTIVE` first cancels the shared token and removes both
//! channels and the connection record; every later caller is a no-op.

use crate::model::Session;
use crate::store::SessionStore;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const ACTIVE: u8 = 0;
const TERMINATING: u8 = 1;
const TERMINATED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationState {
    Active,
    Terminating,
    Terminated,
}

impl TerminationState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            ACTIVE => Self::Active,
            TERMINATING => Self::Terminating,
            _ => Self::Terminated,
        }
    }
}

/// What drove the session out of `ACTIVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The local participant spoke the termination phrase.
    KeywordSpoken,
    /// `terminate` was observed on the connection record.
    PeerTerminated,
    /// The connection record disappeared.
    ConnectionLost,
    /// Ctrl-C or another external signal.
    Interrupted,
    /// A relay task failed or exited on its own.
    RelayFailed,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::KeywordSpoken => "termination phrase spoken",
            Self::PeerTerminated => "call ended by peer",
            Self::ConnectionLost => "connection record removed",
            Self::Interrupted => "interrupted",
            Self::RelayFailed => "relay task failed",
        };
        f.write_str(text)
    }
}

/// Outcome of the teardown deletes. Failures are reported, never retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub outbound_deleted: bool,
    pub inbound_deleted: bool,
    pub connection_deleted: bool,
}

impl TeardownReport {
    pub fn is_complete(&self) -> bool {
        self.outbound_deleted && self.inbound_deleted && self.connection_deleted
    }
}

/// Owns the session's cancellation signal and its one-shot teardown.
pub struct TerminationCoordinator {
    state: AtomicU8,
    session: Session,
    store: SessionStore,
}

impl TerminationCoordinator {
    pub fn new(session: Session, store: SessionStore) -> Self {
        Self {
            state: AtomicU8::new(ACTIVE),
            session,
            store,
        }
    }

    pub fn state(&self) -> TerminationState {
        TerminationState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.session.cancellation.clone()
    }

    /// Moves `ACTIVE -> TERMINATING` and tears the session down.
    ///
    /// Returns the teardown report to the single caller that won the
    /// transition, `None` to everyone else.
    pub async fn begin_shutdown(&self, reason: ShutdownReason) -> Option<TeardownReport> {
        if self
            .state
            .compare_exchange(ACTIVE, TERMINATING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        info!(%reason, peer = %self.session.peer_id, "Call terminating. Cleaning up session data...");
        self.session.cancellation.cancel();

        let outbound = self.session.outbound_channel();
        let inbound = self.session.inbound_channel();
        let key = &self.session.connection_key;

        let mut report = TeardownReport::default();
        match self.store.clear_channel(&outbound).await {
            Ok(()) => report.outbound_deleted = true,
            Err(e) => warn!(channel = %outbound, error = %e, "Failed to delete outbound channel."),
        }
        match self.store.clear_channel(&inbound).await {
            Ok(()) => report.inbound_deleted = true,
            Err(e) => warn!(channel = %inbound, error = %e, "Failed to delete inbound channel."),
        }
        match self.store.remove_connection(key).await {
            Ok(()) => report.connection_deleted = true,
            Err(e) => warn!(connection = %key, error = %e, "Failed to delete connection record."),
        }

        if report.is_complete() {
            info!("Chat history and active connection deleted.");
        } else {
            warn!(?report, "Teardown incomplete; orphaned session data may remain.");
        }
        Some(report)
    }

    /// Marks the session `TERMINATED`. Only valid once shutdown has begun.
    pub fn finish(&self) -> TerminationState {
        let _ = self
            .state
            .compare_exchange(TERMINATING, TERMINATED, Ordering::AcqRel, Ordering::Acquire);
        self.state()
    }
}
