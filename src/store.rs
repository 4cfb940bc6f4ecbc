use crate::context::{ConversationContext, ConversationTurn};
use crate::error::StoreError;
use crate::persona::UserProfile;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Personality sliders per user. The reply pipeline only reads; writes come
/// from the profile endpoint.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Unknown users get the default profile.
    async fn get(&self, user_id: &str) -> Result<UserProfile, StoreError>;

    /// Insert or replace.
    async fn save(&self, user_id: &str, profile: &UserProfile) -> Result<(), StoreError>;
}

/// Owner of per-user conversation history.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// At most `MAX_TURNS` turns, oldest first.
    async fn get(&self, user_id: &str) -> Result<ConversationContext, StoreError>;

    async fn append(&self, user_id: &str, turn: ConversationTurn) -> Result<(), StoreError>;
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryStore {
    profiles: RwLock<HashMap<String, UserProfile>>,
    history: RwLock<HashMap<String, ConversationContext>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn get(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        Ok(self
            .profiles
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, user_id: &str, profile: &UserProfile) -> Result<(), StoreError> {
        self.profiles
            .write()
            .await
            .insert(user_id.to_string(), profile.clone());
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get(&self, user_id: &str) -> Result<ConversationContext, StoreError> {
        Ok(self
            .history
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, user_id: &str, turn: ConversationTurn) -> Result<(), StoreError> {
        self.history
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .push(turn);
        Ok(())
    }
}
