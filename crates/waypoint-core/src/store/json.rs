//! JSON file conversation store
//!
//! Saves conversations to: ~/.local/share/waypoint/conversations/{id}.json

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    safe_path_component, Conversation, ConversationStore, Message, MessageRole, SettingsPatch,
};
use crate::error::{Error, Result};

/// On-disk form of a conversation: settings plus transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(flatten)]
    pub conversation: Conversation,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ConversationRecord {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            messages: Vec::new(),
        }
    }
}

/// Conversation store backed by one JSON file per conversation
pub struct JsonConversationStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles on files
    write_lock: Mutex<()>,
}

impl JsonConversationStore {
    /// Store in the default data directory
    pub fn new() -> Self {
        Self::with_dir(Self::default_dir())
    }

    /// Store in a custom directory
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the default conversations directory
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".waypoint"))
            .join("waypoint")
            .join("conversations")
    }

    /// Get the conversations directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", safe_path_component(conversation_id)))
    }

    /// Load a conversation record, `None` if no file exists
    pub async fn load(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
        let path = self.path_for(conversation_id);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: ConversationRecord = serde_json::from_str(&json)?;
        Ok(Some(record))
    }

    /// Save a conversation record, replacing any existing file
    pub async fn save(&self, record: &ConversationRecord) -> Result<PathBuf> {
        let _guard = self.write_lock.lock().await;
        self.write_record(record).await
    }

    async fn write_record(&self, record: &ConversationRecord) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&record.conversation.id);
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&path, json).await?;
        debug!("Saved conversation {} to {:?}", record.conversation.id, path);
        Ok(path)
    }

    /// Append a message to a stored conversation
    pub async fn append_message(&self, conversation_id: &str, message: Message) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .load(conversation_id)
            .await?
            .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))?;
        record.messages.push(message);
        record.conversation.updated_at = Utc::now();
        self.write_record(&record).await?;
        Ok(())
    }

    /// Delete a stored conversation; returns whether a file was removed
    pub async fn delete(&self, conversation_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(conversation_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List stored conversations, most recently updated first
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut conversations = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(json) => match serde_json::from_str::<ConversationRecord>(&json) {
                    Ok(record) => conversations.push(record.conversation),
                    Err(e) => warn!("Failed to parse conversation {:?}: {}", path, e),
                },
                Err(e) => warn!("Failed to read conversation {:?}: {}", path, e),
            }
        }

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }
}

impl Default for JsonConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for JsonConversationStore {
    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.load(conversation_id).await?.map(|r| r.conversation))
    }

    async fn update_conversation_settings(
        &self,
        conversation_id: &str,
        patch: SettingsPatch,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .load(conversation_id)
            .await?
            .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))?;
        patch.apply(&mut record.conversation.settings);
        record.conversation.updated_at = Utc::now();
        self.write_record(&record).await?;
        Ok(())
    }

    async fn get_last_assistant_message(&self, conversation_id: &str) -> Result<Option<Message>> {
        Ok(self.load(conversation_id).await?.and_then(|record| {
            record
                .messages
                .into_iter()
                .rev()
                .find(|m| m.role == MessageRole::Assistant)
        }))
    }
}
