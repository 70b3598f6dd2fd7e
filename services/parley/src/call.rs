use crate::config::{Config, StoreBackend, SynthesisMode};
use crate::prompt::{Role, Startup};
use anyhow::Context;
use parley_core::backoff::PollPolicy;
use parley_core::broker::ConnectionBroker;
use parley_core::error::BrokerError;
use parley_core::language::LanguagePreferenceResolver;
use parley_core::relay::{InboundRelay, OutboundRelay};
use parley_core::speech::{ConsoleSynthesizer, ConsoleTranscriber, Synthesizer};
use parley_core::store::{FirebaseStore, MemoryStore, RemoteStore, SessionStore};
use parley_core::supervisor::Supervisor;
use parley_core::termination::TerminationCoordinator;
use parley_core::translate::GoogleTranslator;
use parley_core::tts::GoogleTtsSynthesizer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn remote_store(config: &Config) -> anyhow::Result<Arc<dyn RemoteStore>> {
    Ok(match config.store_backend {
        StoreBackend::Firebase => {
            let url = config
                .firebase_database_url
                .clone()
                .context("FIREBASE_DATABASE_URL is required for the firebase backend")?;
            info!(%url, "Using Firebase store.");
            Arc::new(FirebaseStore::new(url, config.firebase_auth_token.clone()))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; no other participant can reach this process.");
            Arc::new(MemoryStore::new())
        }
    })
}

fn synthesizer(config: &Config) -> Arc<dyn Synthesizer> {
    match config.synthesis {
        SynthesisMode::Console => Arc::new(ConsoleSynthesizer),
        SynthesisMode::GoogleTts => Arc::new(GoogleTtsSynthesizer::new(config.audio_player.clone())),
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler.");
        std::future::pending::<()>().await;
    }
}

/// Connects as described by `startup`, runs the call until either side ends
/// it, and returns once all session data has been cleaned up.
pub async fn run_call(config: &Config, startup: Startup) -> anyhow::Result<()> {
    let store = SessionStore::new(remote_store(config)?);
    if let Some(language) = &startup.language {
        match store.set_language(&startup.user, language).await {
            Ok(()) => info!(%language, "Language preference saved."),
            Err(e) => warn!(error = %e, "Could not save language preference."),
        }
    }
    let languages = LanguagePreferenceResolver::new(store.clone(), config.default_language.clone());
    let broker = ConnectionBroker::new(store.clone(), languages, PollPolicy::new(config.handshake_poll))
        .with_handshake_timeout(config.handshake_timeout);

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            interrupted().await;
            cancel.cancel();
        }
    });
    let handshake = match startup.role {
        Role::Initiate { target } => broker.initiate(startup.user, target, cancel).await,
        Role::Wait => broker.await_incoming(startup.user, cancel).await,
    };
    watcher.abort();
    let session = match handshake {
        Ok(session) => session,
        Err(BrokerError::Cancelled) => {
            info!("Interrupted before a call was established.");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to establish a connection"),
    };

    let coordinator = Arc::new(TerminationCoordinator::new(session.clone(), store.clone()));
    let session = Arc::new(session);
    let translator = Arc::new(GoogleTranslator::new());
    let outbound = OutboundRelay::new(
        session.clone(),
        store.clone(),
        Arc::new(ConsoleTranscriber::new()),
        translator.clone(),
        coordinator.clone(),
        config.capture,
    );
    let inbound = InboundRelay::new(
        session,
        store,
        translator,
        synthesizer(config),
        coordinator.clone(),
        PollPolicy::new(config.inbound_poll),
    );

    let state = Supervisor::new(coordinator).run(outbound, inbound, interrupted()).await;
    info!(?state, "Session closed.");
    Ok(())
}
