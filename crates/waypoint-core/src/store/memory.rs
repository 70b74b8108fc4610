//! In-memory conversation store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{
    Conversation, ConversationRecord, ConversationSettings, ConversationStore, Message,
    MessageRole, SettingsPatch,
};
use crate::error::{Error, Result};

/// Conversation store held entirely in process memory
#[derive(Default)]
pub struct MemoryConversationStore {
    records: RwLock<HashMap<String, ConversationRecord>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a conversation with an empty transcript
    pub fn insert_conversation(&self, conversation: Conversation) {
        let mut records = self.records.write();
        records.insert(
            conversation.id.clone(),
            ConversationRecord {
                conversation,
                messages: Vec::new(),
            },
        );
    }

    /// Create a conversation from settings alone
    pub fn create(&self, id: impl Into<String>, settings: ConversationSettings) {
        self.insert_conversation(Conversation::new(id, settings));
    }

    /// Append a message to a conversation's transcript
    pub fn append_message(&self, conversation_id: &str, message: Message) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(conversation_id)
            .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))?;
        record.messages.push(message);
        record.conversation.updated_at = Utc::now();
        Ok(())
    }

    /// Current settings of a conversation
    pub fn settings(&self, conversation_id: &str) -> Option<ConversationSettings> {
        self.records
            .read()
            .get(conversation_id)
            .map(|r| r.conversation.settings.clone())
    }

    /// Delete a conversation and its transcript
    pub fn remove(&self, conversation_id: &str) -> bool {
        self.records.write().remove(conversation_id).is_some()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .records
            .read()
            .get(conversation_id)
            .map(|r| r.conversation.clone()))
    }

    async fn update_conversation_settings(
        &self,
        conversation_id: &str,
        patch: SettingsPatch,
    ) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(conversation_id)
            .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))?;
        patch.apply(&mut record.conversation.settings);
        record.conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn get_last_assistant_message(&self, conversation_id: &str) -> Result<Option<Message>> {
        Ok(self.records.read().get(conversation_id).and_then(|r| {
            r.messages
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::Assistant)
                .cloned()
        }))
    }
}
