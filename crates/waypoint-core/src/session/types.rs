//! Session types for the orchestration core
//!
//! These types describe the per-conversation execution state the session
//! manager tracks: the resolved runtime context, the loop status, and the
//! pending permission/question markers that pause the agent loop.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Unique identifier for a session (equal to the conversation's agent id)
pub type SessionId = String;

/// Persisted chat mode value that predates agent mode
pub const LEGACY_CHAT_MODE: &str = "chat";

/// How a conversation's loop is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ChatMode {
    /// Local tool-using agent loop
    #[default]
    #[serde(rename = "agent")]
    Agent,
    /// Loop delegated to an external ACP agent process
    #[serde(rename = "acp agent")]
    AcpAgent,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Agent => "agent",
            ChatMode::AcpAgent => "acp agent",
        }
    }

    /// Parse a persisted value, migrating legacy `"chat"` to [`ChatMode::Agent`]
    ///
    /// Unknown or empty values yield `None` so the caller can fall back.
    pub fn from_persisted(raw: &str) -> Option<Self> {
        match raw.trim() {
            "agent" | LEGACY_CHAT_MODE => Some(ChatMode::Agent),
            "acp agent" => Some(ChatMode::AcpAgent),
            _ => None,
        }
    }

    /// Whether a persisted value needs the one-way chat -> agent migration
    pub fn is_legacy(raw: &str) -> bool {
        raw.trim() == LEGACY_CHAT_MODE
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_persisted(s).ok_or_else(|| {
            format!("Unknown chat mode: {}. Valid values: agent, acp agent", s)
        })
    }
}

/// Execution status of a session's agent loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Generating,
    Paused,
    WaitingPermission,
    WaitingQuestion,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Paused => "paused",
            Self::WaitingPermission => "waiting_permission",
            Self::WaitingQuestion => "waiting_question",
            Self::Error => "error",
        }
    }

    /// Loop not running but resumable
    pub fn is_suspended(&self) -> bool {
        matches!(
            self,
            Self::Paused | Self::WaitingPermission | Self::WaitingQuestion | Self::Error
        )
    }

    /// Whether `next` follows the loop's state diagram
    ///
    /// idle -> generating -> {paused, waiting_*, error, idle}, and any
    /// suspended state back to generating. Every state may return to idle.
    pub fn can_transition_to(&self, next: &SessionStatus) -> bool {
        if self == next || *next == SessionStatus::Idle {
            return true;
        }

        match self {
            Self::Idle => matches!(next, Self::Generating | Self::WaitingQuestion),
            Self::Generating => next.is_suspended(),
            Self::Paused | Self::WaitingPermission | Self::WaitingQuestion | Self::Error => {
                matches!(next, Self::Generating)
            }
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of access a tool call asks permission for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionType {
    Read,
    Write,
    All,
    Command,
}

/// A tool call awaiting human approval
///
/// Unique by `(message_id, tool_call_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPermission {
    pub message_id: String,
    pub tool_call_id: String,
    pub permission_type: PermissionType,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PendingPermission {
    pub fn new(
        message_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        permission_type: PermissionType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            tool_call_id: tool_call_id.into(),
            permission_type,
            payload,
        }
    }

    pub fn matches(&self, message_id: &str, tool_call_id: &str) -> bool {
        self.message_id == message_id && self.tool_call_id == tool_call_id
    }
}

/// Marker of an in-flight permission resume; its presence is the lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResumeLock {
    pub message_id: String,
    pub started_at: DateTime<Utc>,
}

/// An outstanding question tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuestion {
    pub message_id: String,
    pub tool_call_id: String,
}

impl PendingQuestion {
    pub fn new(message_id: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            tool_call_id: tool_call_id.into(),
        }
    }
}

/// Runtime context derived from durable settings
///
/// Regenerated whole on every `get_session`; never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContextResolved {
    pub chat_mode: ChatMode,
    pub provider_id: String,
    pub model_id: String,
    pub supports_vision: bool,
    pub supports_function_call: bool,
    /// Set only in agent mode
    pub agent_workspace_path: Option<String>,
    /// Workdir of the bound ACP agent; set only in ACP mode
    pub acp_workdir: Option<String>,
    pub enabled_tools: Vec<String>,
    #[serde(default)]
    pub acp_workdir_map: HashMap<String, String>,
}

impl SessionContextResolved {
    /// Safe context used when resolution fails
    pub fn fallback(chat_mode: Option<ChatMode>) -> Self {
        Self {
            chat_mode: chat_mode.unwrap_or_default(),
            provider_id: String::new(),
            model_id: String::new(),
            supports_vision: false,
            supports_function_call: false,
            agent_workspace_path: None,
            acp_workdir: None,
            enabled_tools: Vec::new(),
            acp_workdir_map: HashMap::new(),
        }
    }

    /// Working directory of the loop, whichever mode is active
    pub fn workspace_path(&self) -> Option<&str> {
        match self.chat_mode {
            ChatMode::Agent => self.agent_workspace_path.as_deref(),
            ChatMode::AcpAgent => self.acp_workdir.as_deref(),
        }
    }
}

/// Mutable loop state of a session
///
/// `pending_question` and the permission queue are caches: the transcript
/// holds the durable record and the question marker is rebuilt from it after
/// a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRuntime {
    pub loop_id: Option<String>,
    pub current_message_id: Option<String>,
    pub tool_call_count: u32,
    pub user_stop_requested: bool,
    /// FIFO queue, no duplicate `(message_id, tool_call_id)`
    pub(crate) pending_permissions: Vec<PendingPermission>,
    pub(crate) permission_resume_lock: Option<PermissionResumeLock>,
    pub pending_question: Option<PendingQuestion>,
    pub(crate) pending_question_initialized: bool,
}

impl SessionRuntime {
    /// Head of the permission queue
    pub fn pending_permission(&self) -> Option<&PendingPermission> {
        self.pending_permissions.first()
    }

    pub fn pending_permissions(&self) -> &[PendingPermission] {
        &self.pending_permissions
    }

    pub fn permission_resume_lock(&self) -> Option<&PermissionResumeLock> {
        self.permission_resume_lock.as_ref()
    }

    pub fn pending_question_initialized(&self) -> bool {
        self.pending_question_initialized
    }
}

/// Per-session state container, one per agent id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: SessionId,
    pub agent_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved: SessionContextResolved,
    pub runtime: SessionRuntime,
}

impl SessionContext {
    pub fn new(agent_id: impl Into<String>, resolved: SessionContextResolved) -> Self {
        let agent_id = agent_id.into();
        let now = Utc::now();
        Self {
            session_id: agent_id.clone(),
            agent_id,
            status: SessionStatus::Idle,
            created_at: now,
            updated_at: now,
            resolved,
            runtime: SessionRuntime::default(),
        }
    }

    /// Bump `updated_at`, never moving it backwards
    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// Options for [`SessionManager::start_loop`](super::SessionManager::start_loop)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartLoopOptions {
    /// Keep still-outstanding approvals of a multi-tool batch
    pub preserve_pending_permissions: bool,
    /// The caller already holds the resume lock for this message
    pub skip_lock_acquisition: bool,
}

impl StartLoopOptions {
    /// Options for resuming one tool of a permission batch whose lock the
    /// caller holds
    pub fn resume_batch() -> Self {
        Self {
            preserve_pending_permissions: true,
            skip_lock_acquisition: true,
        }
    }

    pub fn preserve_pending_permissions(mut self, preserve: bool) -> Self {
        self.preserve_pending_permissions = preserve;
        self
    }

    pub fn skip_lock_acquisition(mut self, skip: bool) -> Self {
        self.skip_lock_acquisition = skip;
        self
    }
}

/// Partial update of [`SessionRuntime`] scalar fields
///
/// The permission queue and resume lock are not patchable here; they change
/// only through the dedicated manager operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeUpdate {
    pub loop_id: Option<String>,
    pub current_message_id: Option<String>,
    pub tool_call_count: Option<u32>,
    pub user_stop_requested: Option<bool>,
    /// `Some(None)` clears the marker
    pub pending_question: Option<Option<PendingQuestion>>,
}

impl RuntimeUpdate {
    pub(crate) fn apply(self, runtime: &mut SessionRuntime) {
        if let Some(loop_id) = self.loop_id {
            runtime.loop_id = Some(loop_id);
        }
        if let Some(message_id) = self.current_message_id {
            runtime.current_message_id = Some(message_id);
        }
        if let Some(count) = self.tool_call_count {
            runtime.tool_call_count = count;
        }
        if let Some(stop) = self.user_stop_requested {
            runtime.user_stop_requested = stop;
        }
        if let Some(question) = self.pending_question {
            runtime.pending_question = question;
        }
    }
}

/// Notifications emitted by the session manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A session entered the registry
    Created,
    /// Status changed
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// A permission request joined the queue
    PermissionQueued {
        message_id: String,
        tool_call_id: String,
    },
    /// A permission request left the queue
    PermissionResolved {
        message_id: String,
        tool_call_id: String,
    },
    /// A pending question was rebuilt from the transcript
    QuestionRestored {
        message_id: String,
        tool_call_id: String,
    },
    /// The session left the registry
    Removed,
}

/// Sender half of the session event channel
pub type SessionEventSender = mpsc::UnboundedSender<(SessionId, SessionEvent)>;

/// Receiver half of the session event channel
pub type SessionEventReceiver = mpsc::UnboundedReceiver<(SessionId, SessionEvent)>;
