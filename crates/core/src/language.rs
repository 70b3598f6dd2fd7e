//! Participant language preferences.

use crate::model::{LanguageCode, ParticipantId};
use crate::store::SessionStore;
use tracing::warn;

/// Looks up a participant's preferred language, falling back to a default.
#[derive(Clone)]
pub struct LanguagePreferenceResolver {
    store: SessionStore,
    default: LanguageCode,
}

impl LanguagePreferenceResolver {
    pub fn new(store: SessionStore, default: LanguageCode) -> Self {
        Self { store, default }
    }

    /// Never fails: a missing preference or a failed lookup yields the default.
    pub async fn resolve(&self, id: &ParticipantId) -> LanguageCode {
        match self.store.language(id).await {
            Ok(Some(language)) => language,
            Ok(None) => {
                warn!(participant = %id, default = %self.default, "Language not found for participant; using default.");
                self.default.clone()
            }
            Err(e) => {
                warn!(participant = %id, default = %self.default, error = %e, "Language lookup failed; using default.");
                self.default.clone()
            }
        }
    }
}
