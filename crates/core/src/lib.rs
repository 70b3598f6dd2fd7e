//! Two-party, real-time speech translation over a shared key-value store.
//!
//! A participant either initiates a call or waits for one
//! ([`broker::ConnectionBroker`]). Once paired, two relays run until either
//! side ends the call: [`relay::OutboundRelay`] turns local speech into
//! translated messages, and [`relay::InboundRelay`] plays the peer's messages
//! in order. [`termination::TerminationCoordinator`] tears the session down
//! exactly once.

pub mod backoff;
pub mod broker;
pub mod error;
pub mod language;
pub mod model;
pub mod relay;
pub mod speech;
pub mod store;
pub mod supervisor;
pub mod termination;
pub mod translate;
pub mod tts;
