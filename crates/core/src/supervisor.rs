//! Call Supervision
//!
//! Runs both relays side by side for the lifetime of a call. Relays handle
//! their own per-cycle errors, so a relay task only ends early by panicking or
//! by returning while the call is still active. Either case, like an external
//! interrupt, becomes a shutdown request on the [`TerminationCoordinator`],
//! which cancels the other relay. The supervisor then waits for both tasks
//! and marks the session terminated.

use crate::relay::{InboundRelay, OutboundRelay};
use crate::termination::{ShutdownReason, TerminationCoordinator, TerminationState};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub struct Supervisor {
    coordinator: Arc<TerminationCoordinator>,
}

impl Supervisor {
    pub fn new(coordinator: Arc<TerminationCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Drives the call to completion and returns the final state.
    pub async fn run<I>(self, outbound: OutboundRelay, inbound: InboundRelay, interrupt: I) -> TerminationState
    where
        I: Future<Output = ()> + Send,
    {
        let mut tasks = JoinSet::new();
        tasks.spawn(outbound.run());
        tasks.spawn(inbound.run());

        tokio::pin!(interrupt);
        let mut interrupted = false;
        while !tasks.is_empty() {
            tokio::select! {
                _ = &mut interrupt, if !interrupted => {
                    interrupted = true;
                    info!("Interrupt received.");
                    self.coordinator.begin_shutdown(ShutdownReason::Interrupted).await;
                }
                Some(joined) = tasks.join_next() => {
                    match joined {
                        Ok(()) if self.coordinator.state() == TerminationState::Active => {
                            warn!("Relay exited while the call was still active.");
                        }
                        Ok(()) => {}
                        Err(e) if e.is_panic() => error!("Relay panicked."),
                        Err(e) => error!(error = %e, "Relay task aborted."),
                    }
                    // No-op once shutdown has begun.
                    self.coordinator.begin_shutdown(ShutdownReason::RelayFailed).await;
                }
            }
        }

        let state = self.coordinator.finish();
        info!("Call ended.");
        state
    }
}
