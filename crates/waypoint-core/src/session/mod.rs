//! Session module - agent loop orchestration core
//!
//! Tracks, per conversation, the live execution state of the agent loop and
//! decides when that loop may run, pause, and resume. Key components:
//!
//! - `resolve_session_context`: durable settings -> runtime context (pure)
//! - `WorkspacePathResolver`: default working directory for agent mode
//! - `SessionManager`: session registry and lifecycle API, with the
//!   permission queue/resume lock and question recovery built in
//!
//! # State machine
//!
//! ```text
//!            start_loop
//!   idle ───────────────▶ generating ──▶ paused | waiting_permission
//!                              ▲          | waiting_question | error
//!                              └─────────────────┘
//!                                  start_loop (resume)
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use waypoint_core::config::Config;
//! use waypoint_core::session::{SessionManager, StartLoopOptions};
//! use waypoint_core::store::JsonConversationStore;
//!
//! let (manager, mut events) = SessionManager::new(
//!     Arc::new(JsonConversationStore::new()),
//!     Arc::new(Config::default()),
//! );
//!
//! // Fresh loop for a new user message; this takes the resume lock of msg-1
//! if manager.start_loop("conv-1", "msg-1", StartLoopOptions::default()).await {
//!     // ... the loop pauses on a permission batch and hands the lock back
//!     manager.release_permission_resume_lock("conv-1");
//! }
//!
//! // Later, the user approved one tool of the paused batch:
//! if manager.acquire_permission_resume_lock("conv-1", "msg-1") {
//!     manager.remove_pending_permission("conv-1", "msg-1", "tool-1");
//!     manager.start_loop("conv-1", "msg-1", StartLoopOptions::resume_batch()).await;
//!     // ... once every tool of the batch is handled:
//!     manager.release_permission_resume_lock("conv-1");
//! }
//! ```

mod manager;
mod permission;
mod question;
mod resolver;
mod types;
mod workspace;

pub use manager::SessionManager;
pub use question::find_pending_question;
pub use resolver::resolve_session_context;
pub use types::{
    ChatMode, PendingPermission, PendingQuestion, PermissionResumeLock, PermissionType,
    RuntimeUpdate, SessionContext, SessionContextResolved, SessionEvent, SessionEventReceiver,
    SessionEventSender, SessionId, SessionRuntime, SessionStatus, StartLoopOptions,
    LEGACY_CHAT_MODE,
};
pub use workspace::{WorkspacePathResolver, DEFAULT_WORKSPACE_ROOT_NAME};
