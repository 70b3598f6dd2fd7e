//! Typed access to the persisted layout:
//!
//! ```text
//! users/{id}/language
//! activeConnections/{initiator}/{target} = {accepted, terminate}
//! chats/{from}/{to}/{seq} = {seq, sender, originalText, translatedText, translatedLanguage, timestamp}
//! ```

use super::{RemoteStore, StorePath};
use crate::error::StoreError;
use crate::model::{ChannelKey, ConnectionKey, ConnectionRecord, LanguageCode, Message, ParticipantId};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

const USERS: &str = "users";
const CONNECTIONS: &str = "activeConnections";
const CHATS: &str = "chats";

/// The session protocol's view of the remote store.
#[derive(Clone)]
pub struct SessionStore {
    remote: Arc<dyn RemoteStore>,
}

impl SessionStore {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    fn language_path(id: &ParticipantId) -> StorePath {
        StorePath::root().child(USERS).child(id).child("language")
    }

    fn connection_path(key: &ConnectionKey) -> StorePath {
        StorePath::root()
            .child(CONNECTIONS)
            .child(&key.initiator)
            .child(&key.target)
    }

    fn channel_path(channel: &ChannelKey) -> StorePath {
        StorePath::root().child(CHATS).child(&channel.from).child(&channel.to)
    }

    /// Zero-padded so that key order matches sequence order.
    fn entry_key(seq: u64) -> String {
        format!("{seq:020}")
    }

    /// The participant's stored language preference, if any.
    pub async fn language(&self, id: &ParticipantId) -> Result<Option<LanguageCode>, StoreError> {
        let value = self.remote.get(&Self::language_path(id)).await?;
        Ok(value
            .as_ref()
            .and_then(Value::as_str)
            .filter(|code| !code.trim().is_empty())
            .map(LanguageCode::new))
    }

    /// Stores a participant's language preference, leaving any other profile
    /// fields alone.
    pub async fn set_language(&self, id: &ParticipantId, language: &LanguageCode) -> Result<(), StoreError> {
        let mut fields = Map::new();
        fields.insert("language".to_string(), json!(language.as_str()));
        self.remote
            .update(&StorePath::root().child(USERS).child(id), fields)
            .await
    }

    /// Writes a fresh, unaccepted record for `key`, replacing any previous one.
    pub async fn open_connection(&self, key: &ConnectionKey) -> Result<(), StoreError> {
        let record = ConnectionRecord::default();
        let value = serde_json::to_value(record).map_err(|source| StoreError::Decode {
            path: Self::connection_path(key).to_string(),
            source,
        })?;
        self.remote.set(&Self::connection_path(key), value).await
    }

    pub async fn connection(&self, key: &ConnectionKey) -> Result<Option<ConnectionRecord>, StoreError> {
        let path = Self::connection_path(key);
        match self.remote.get(&path).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    path: path.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Unaccepted connection requests addressed to `target`, in key order.
    pub async fn pending_for(&self, target: &ParticipantId) -> Result<Vec<ConnectionKey>, StoreError> {
        let Some(Value::Object(initiators)) =
            self.remote.get(&StorePath::root().child(CONNECTIONS)).await?
        else {
            return Ok(Vec::new());
        };

        let mut pending = Vec::new();
        for (initiator, requests) in initiators {
            let Some(record) = requests.get(target.as_str()) else {
                continue;
            };
            let Ok(initiator) = ParticipantId::parse(&initiator) else {
                debug!(%initiator, "Skipping connection record with an unusable initiator id.");
                continue;
            };
            match serde_json::from_value::<ConnectionRecord>(record.clone()) {
                Ok(record) if !record.accepted && !record.terminate && initiator != *target => {
                    pending.push(ConnectionKey::new(initiator, target.clone()));
                }
                Ok(_) => {}
                Err(e) => debug!(%initiator, error = %e, "Skipping malformed connection record."),
            }
        }
        Ok(pending)
    }

    /// Atomically flips `accepted` from false to true. `false` means someone
    /// else accepted first, or the request is gone.
    pub async fn accept(&self, key: &ConnectionKey) -> Result<bool, StoreError> {
        let path = Self::connection_path(key).child("accepted");
        self.remote
            .compare_and_set(&path, Some(&json!(false)), json!(true))
            .await
    }

    /// Atomically flips `terminate` from false to true. Never recreates a
    /// record that has already been deleted.
    pub async fn request_termination(&self, key: &ConnectionKey) -> Result<bool, StoreError> {
        let path = Self::connection_path(key).child("terminate");
        self.remote
            .compare_and_set(&path, Some(&json!(false)), json!(true))
            .await
    }

    pub async fn remove_connection(&self, key: &ConnectionKey) -> Result<(), StoreError> {
        self.remote.delete(&Self::connection_path(key)).await
    }

    /// Appends `message` to `channel` under its sequence number.
    ///
    /// Entries are immutable: returns `false`, writing nothing, when the slot
    /// for `message.seq` is already taken.
    pub async fn append(&self, channel: &ChannelKey, message: &Message) -> Result<bool, StoreError> {
        let path = Self::channel_path(channel).child(Self::entry_key(message.seq));
        let value = serde_json::to_value(message).map_err(|source| StoreError::Decode {
            path: path.to_string(),
            source,
        })?;
        self.remote.compare_and_set(&path, None, value).await
    }

    /// Messages with `seq >= from_seq`, ascending. Malformed entries are skipped.
    pub async fn messages_from(&self, channel: &ChannelKey, from_seq: u64) -> Result<Vec<Message>, StoreError> {
        let path = Self::channel_path(channel);
        let rows = self
            .remote
            .query_ordered(&path, &Self::entry_key(from_seq))
            .await?;
        let mut messages: Vec<Message> = rows
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value::<Message>(value) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(channel = %channel, entry = %key, error = %e, "Skipping malformed message.");
                    None
                }
            })
            .collect();
        messages.sort_by_key(|m| m.seq);
        Ok(messages)
    }

    /// Highest sequence number already written to `channel`, or 0.
    pub async fn last_seq(&self, channel: &ChannelKey) -> Result<u64, StoreError> {
        let messages = self.messages_from(channel, 0).await?;
        Ok(messages.last().map_or(0, |m| m.seq))
    }

    pub async fn clear_channel(&self, channel: &ChannelKey) -> Result<(), StoreError> {
        self.remote.delete(&Self::channel_path(channel)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn id(raw: &str) -> ParticipantId {
        ParticipantId::parse(raw).unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, SessionStore) {
        let memory = Arc::new(MemoryStore::new());
        (memory.clone(), SessionStore::new(memory))
    }

    fn message(seq: u64, sender: &str, text: &str) -> Message {
        Message {
            seq,
            sender: id(sender),
            original_text: text.into(),
            translated_text: text.into(),
            translated_language: None,
            timestamp: 100.0,
        }
    }

    #[tokio::test]
    async fn test_layout_paths() {
        let (memory, store) = setup();
        let key = ConnectionKey::new(id("A"), id("B"));
        store.open_connection(&key).await.unwrap();
        store.set_language(&id("A"), &LanguageCode::new("en")).await.unwrap();
        store
            .append(&ChannelKey::new(id("A"), id("B")), &message(7, "A", "hi"))
            .await
            .unwrap();

        let tree = memory.snapshot();
        assert_eq!(
            tree["activeConnections"]["A"]["B"],
            json!({"accepted": false, "terminate": false})
        );
        assert_eq!(tree["users"]["A"]["language"], "en");
        assert_eq!(tree["chats"]["A"]["B"]["00000000000000000007"]["originalText"], "hi");
    }

    #[tokio::test]
    async fn test_language_missing_or_blank_is_none() {
        let (memory, store) = setup();
        assert_eq!(store.language(&id("A")).await.unwrap(), None);

        memory
            .set(&StorePath::root().child("users").child("A").child("language"), json!(" "))
            .await
            .unwrap();
        assert_eq!(store.language(&id("A")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pending_for_only_lists_unaccepted_requests_to_target() {
        let (_memory, store) = setup();
        store.open_connection(&ConnectionKey::new(id("A"), id("B"))).await.unwrap();
        store.open_connection(&ConnectionKey::new(id("C"), id("B"))).await.unwrap();
        store.open_connection(&ConnectionKey::new(id("B"), id("D"))).await.unwrap();
        store.open_connection(&ConnectionKey::new(id("E"), id("BB"))).await.unwrap();
        assert!(store.accept(&ConnectionKey::new(id("C"), id("B"))).await.unwrap());

        let pending = store.pending_for(&id("B")).await.unwrap();
        assert_eq!(pending, vec![ConnectionKey::new(id("A"), id("B"))]);
    }

    #[tokio::test]
    async fn test_accept_is_set_once() {
        let (_memory, store) = setup();
        let key = ConnectionKey::new(id("A"), id("B"));
        store.open_connection(&key).await.unwrap();

        assert!(store.accept(&key).await.unwrap());
        assert!(!store.accept(&key).await.unwrap());
        assert_eq!(
            store.connection(&key).await.unwrap(),
            Some(ConnectionRecord { accepted: true, terminate: false })
        );
    }

    #[tokio::test]
    async fn test_request_termination_after_delete_leaves_nothing_behind() {
        let (memory, store) = setup();
        let key = ConnectionKey::new(id("A"), id("B"));
        store.open_connection(&key).await.unwrap();
        store.remove_connection(&key).await.unwrap();

        assert!(!store.request_termination(&key).await.unwrap());
        assert_eq!(memory.snapshot(), json!({}));
    }

    #[tokio::test]
    async fn test_messages_from_and_last_seq() {
        let (memory, store) = setup();
        let channel = ChannelKey::new(id("A"), id("B"));
        for seq in [3, 1, 2] {
            store.append(&channel, &message(seq, "A", "x")).await.unwrap();
        }
        memory
            .set(
                &StorePath::root().child("chats").child("A").child("B").child("junk"),
                json!({"seq": 5, "text": "not a message"}),
            )
            .await
            .unwrap();

        let seqs: Vec<u64> = store
            .messages_from(&channel, 2)
            .await
            .unwrap()
            .iter()
            .map(|m| m.seq)
            .collect();
        assert_eq!(seqs, [2, 3]);
        assert_eq!(store.last_seq(&channel).await.unwrap(), 3);
        assert_eq!(store.last_seq(&channel.reversed()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_never_overwrites() {
        let (_memory, store) = setup();
        let channel = ChannelKey::new(id("A"), id("B"));
        assert!(store.append(&channel, &message(1, "A", "first")).await.unwrap());
        assert!(!store.append(&channel, &message(1, "A", "second")).await.unwrap());

        let stored = store.messages_from(&channel, 0).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].original_text, "first");
    }

    #[tokio::test]
    async fn test_set_language_keeps_other_profile_fields() {
        let (memory, store) = setup();
        memory
            .set(&StorePath::root().child("users").child("A"), json!({"name": "Ada"}))
            .await
            .unwrap();
        store.set_language(&id("A"), &LanguageCode::new("es")).await.unwrap();

        assert_eq!(memory.snapshot()["users"]["A"], json!({"name": "Ada", "language": "es"}));
    }
}
