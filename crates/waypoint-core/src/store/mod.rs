//! Conversation persistence boundary
//!
//! The session core never owns durable state. Conversation settings and the
//! transcript live behind [`ConversationStore`]; the orchestrator only reads
//! them (and writes back a computed default workspace path or a migrated chat
//! mode, best-effort).
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryConversationStore`]: in-process, for embedding and tests
//! - [`JsonConversationStore`]: one JSON file per conversation on disk

mod json;
mod memory;

pub use json::{ConversationRecord, JsonConversationStore};
pub use memory::MemoryConversationStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Block type of tool actions in an assistant message
pub const BLOCK_TYPE_ACTION: &str = "action";
/// Block type of plain text content
pub const BLOCK_TYPE_CONTENT: &str = "content";
/// Action type of a question tool call awaiting an answer
pub const ACTION_QUESTION_REQUEST: &str = "question_request";
/// Action type of a tool call awaiting permission
pub const ACTION_TOOL_CALL_PERMISSION: &str = "tool_call_permission";
/// Block status while a human reply is outstanding
pub const STATUS_PENDING: &str = "pending";
/// Block status once resolved
pub const STATUS_SUCCESS: &str = "success";

/// Map a conversation id onto a single safe path component
///
/// Ids come from the UI layer and may contain separators or dots.
pub(crate) fn safe_path_component(id: &str) -> String {
    let cleaned: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Durable per-conversation settings, as persisted by the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationSettings {
    /// Raw persisted chat mode; may hold the legacy value `"chat"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Model id; in ACP mode this names the external agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_workspace_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_tools: Option<Vec<String>>,
    /// ACP agent/model id -> working directory
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub acp_workdir_map: HashMap<String, String>,
}

/// Partial update of [`ConversationSettings`]
///
/// `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub chat_mode: Option<String>,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
    pub agent_workspace_path: Option<String>,
    pub enabled_tools: Option<Vec<String>>,
    pub acp_workdir_map: Option<HashMap<String, String>>,
}

impl SettingsPatch {
    /// Patch that only sets the agent workspace path
    pub fn workspace_path(path: impl Into<String>) -> Self {
        Self {
            agent_workspace_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Patch that only sets the chat mode
    pub fn chat_mode(mode: impl Into<String>) -> Self {
        Self {
            chat_mode: Some(mode.into()),
            ..Default::default()
        }
    }

    /// Apply this patch onto existing settings
    pub fn apply(&self, settings: &mut ConversationSettings) {
        if let Some(mode) = &self.chat_mode {
            settings.chat_mode = Some(mode.clone());
        }
        if let Some(provider) = &self.provider_id {
            settings.provider_id = Some(provider.clone());
        }
        if let Some(model) = &self.model_id {
            settings.model_id = Some(model.clone());
        }
        if let Some(path) = &self.agent_workspace_path {
            settings.agent_workspace_path = Some(path.clone());
        }
        if let Some(tools) = &self.enabled_tools {
            settings.enabled_tools = Some(tools.clone());
        }
        if let Some(map) = &self.acp_workdir_map {
            settings.acp_workdir_map = map.clone();
        }
    }
}

/// Conversation metadata and settings (no transcript)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub settings: ConversationSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, settings: ConversationSettings) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: None,
            settings,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Author of a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Tool call referenced by an action block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One content block of a transcript message
///
/// Field names follow the persisted transcript format (`type`, `action_type`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Map<String, Value>>,
}

impl MessageBlock {
    /// Plain text block
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            block_type: BLOCK_TYPE_CONTENT.to_string(),
            action_type: None,
            status: Some(STATUS_SUCCESS.to_string()),
            tool_call: None,
            content: Some(content.into()),
            extra: None,
        }
    }

    /// Action block for a tool call
    pub fn action(
        action_type: impl Into<String>,
        tool_call_id: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            block_type: BLOCK_TYPE_ACTION.to_string(),
            action_type: Some(action_type.into()),
            status: Some(status.into()),
            tool_call: Some(ToolCallRef {
                id: Some(tool_call_id.into()),
                name: None,
            }),
            content: None,
            extra: None,
        }
    }

    /// Question request block for a question tool call
    pub fn question_request(tool_call_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self::action(ACTION_QUESTION_REQUEST, tool_call_id, status)
    }

    /// Attach an `extra` entry
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    /// Tool call id, if this block references one
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call.as_ref().and_then(|tc| tc.id.as_deref())
    }
}

/// A persisted transcript message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub blocks: Vec<MessageBlock>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: MessageRole, blocks: Vec<MessageBlock>) -> Self {
        Self {
            id: id.into(),
            role,
            blocks,
            created_at: Utc::now(),
        }
    }

    /// Assistant message with the given blocks
    pub fn assistant(id: impl Into<String>, blocks: Vec<MessageBlock>) -> Self {
        Self::new(id, MessageRole::Assistant, blocks)
    }

    /// User message with a single text block
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, MessageRole::User, vec![MessageBlock::text(text)])
    }
}

/// Transcript and settings persistence consumed by the session core
///
/// Implementations own the storage format. The orchestrator treats every call
/// as fallible and degrades when one fails.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch a conversation's settings; `Ok(None)` when it does not exist
    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Merge a settings patch into a stored conversation
    async fn update_conversation_settings(
        &self,
        conversation_id: &str,
        patch: SettingsPatch,
    ) -> Result<()>;

    /// Most recent assistant message of the transcript
    async fn get_last_assistant_message(&self, conversation_id: &str) -> Result<Option<Message>>;
}
