//! Waypoint Core - Agent session orchestration
//!
//! This crate tracks the execution state of autonomous agent loops, one
//! session per conversation:
//! - Resolution of durable conversation settings into a runtime context
//! - Default workspace allocation for agent-mode sessions
//! - Loop lifecycle and status state machine
//! - Pending tool-permission queue with an idempotent resume lock
//! - Recovery of "waiting for the user" state from the persisted transcript
//!
//! Model invocation, tool execution, and UI rendering live elsewhere; they
//! drive this crate through [`SessionManager`].

pub mod config;
pub mod error;
pub mod session;
pub mod store;

pub use config::{Config, ConfigManager, ModelCapabilities, SettingsProvider, INPUT_CHAT_MODE};
pub use error::{Error, Result};

// Session exports
pub use session::{
    resolve_session_context, ChatMode, PendingPermission, PendingQuestion, PermissionResumeLock,
    PermissionType, RuntimeUpdate, SessionContext, SessionContextResolved, SessionEvent,
    SessionManager, SessionStatus, StartLoopOptions, WorkspacePathResolver,
};

// Store exports
pub use store::{
    Conversation, ConversationSettings, ConversationStore, JsonConversationStore,
    MemoryConversationStore, Message, MessageBlock, MessageRole, SettingsPatch,
};
