//! Session Manager for agent loop orchestration
//!
//! Owns the registry of live sessions (one per agent id) and is the only path
//! through which their state changes. Each entry sits behind its own mutex, so
//! every operation below is atomic per session; the async steps (settings and
//! transcript reads) run outside any lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::question::find_pending_question;
use super::resolver::resolve_session_context;
use super::types::{
    ChatMode, PendingPermission, PendingQuestion, PermissionResumeLock, RuntimeUpdate,
    SessionContext, SessionContextResolved, SessionEvent, SessionEventReceiver,
    SessionEventSender, SessionId, SessionStatus, StartLoopOptions,
};
use super::workspace::WorkspacePathResolver;
use crate::config::{SettingsProvider, INPUT_CHAT_MODE};
use crate::store::{ConversationSettings, ConversationStore, SettingsPatch};

type SessionHandle = Arc<Mutex<SessionContext>>;

/// Registry and lifecycle API of agent sessions
pub struct SessionManager {
    /// Map of agent id to session state
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    /// Conversation settings and transcript
    store: Arc<dyn ConversationStore>,
    /// Fallback chat mode and model capabilities
    settings: Arc<dyn SettingsProvider>,
    workspace: WorkspacePathResolver,
    event_tx: SessionEventSender,
}

impl SessionManager {
    /// Create a session manager over the given collaborators
    ///
    /// Returns the manager and a receiver of session events. The default
    /// workspace root comes from the `workspace_root` setting when present.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        settings: Arc<dyn SettingsProvider>,
    ) -> (Self, SessionEventReceiver) {
        let workspace = match settings.get_setting("workspace_root") {
            Some(root) if !root.trim().is_empty() => {
                WorkspacePathResolver::with_root(store.clone(), root.trim())
            }
            _ => WorkspacePathResolver::new(store.clone()),
        };
        Self::with_workspace_resolver(store, settings, workspace)
    }

    /// Create a session manager with a custom workspace resolver
    pub fn with_workspace_resolver(
        store: Arc<dyn ConversationStore>,
        settings: Arc<dyn SettingsProvider>,
        workspace: WorkspacePathResolver,
    ) -> (Self, SessionEventReceiver) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let manager = Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            settings,
            workspace,
            event_tx,
        };

        (manager, event_rx)
    }

    fn emit(&self, agent_id: &str, event: SessionEvent) {
        // Nobody listening is fine
        let _ = self.event_tx.send((agent_id.to_string(), event));
    }

    fn handle(&self, agent_id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(agent_id).cloned()
    }

    /// Run `f` on an existing session, bumping `updated_at`
    fn with_session<R>(
        &self,
        agent_id: &str,
        f: impl FnOnce(&mut SessionContext) -> R,
    ) -> Option<R> {
        let Some(handle) = self.handle(agent_id) else {
            debug!("No session for {}", agent_id);
            return None;
        };
        let mut session = handle.lock();
        let result = f(&mut session);
        session.touch();
        Some(result)
    }

    // ========================================================================
    // Resolution and lifecycle
    // ========================================================================

    /// Resolve a conversation's durable settings into a runtime context
    ///
    /// Never fails: when the store is unavailable, a fallback context with
    /// the configured (or agent) mode and no workspace is returned. An
    /// unknown conversation resolves to defaults without allocating a
    /// workspace.
    pub async fn resolve_session(&self, agent_id: &str) -> SessionContextResolved {
        let fallback_mode = self
            .settings
            .get_setting(INPUT_CHAT_MODE)
            .as_deref()
            .and_then(ChatMode::from_persisted);

        let conversation = match self.store.get_conversation(agent_id).await {
            Ok(conversation) => conversation,
            Err(e) => {
                error!("Failed to resolve session {}: {}", agent_id, e);
                return SessionContextResolved::fallback(fallback_mode);
            }
        };
        let Some(settings) = conversation.map(|c| c.settings) else {
            // Nothing to persist a default workspace into
            debug!("No stored conversation for {}, resolving defaults", agent_id);
            return resolve_session_context(&ConversationSettings::default(), fallback_mode, None);
        };

        if settings.chat_mode.as_deref().is_some_and(ChatMode::is_legacy) {
            info!("Migrating legacy chat mode to agent for {}", agent_id);
            if let Err(e) = self
                .store
                .update_conversation_settings(agent_id, SettingsPatch::chat_mode(ChatMode::Agent.as_str()))
                .await
            {
                warn!("Failed to persist chat mode migration for {}: {}", agent_id, e);
            }
        }

        let model_config = match settings.model_id.as_deref() {
            Some(model_id) if !model_id.is_empty() => self
                .settings
                .model_default_config(model_id, settings.provider_id.as_deref().unwrap_or_default()),
            _ => None,
        };

        let mut resolved = resolve_session_context(&settings, fallback_mode, model_config);
        if resolved.chat_mode == ChatMode::Agent {
            let path = self
                .workspace
                .resolve_agent_workspace_path(agent_id, settings.agent_workspace_path.as_deref())
                .await;
            resolved.agent_workspace_path = Some(path);
        }

        resolved
    }

    /// Get or create the session of an agent
    ///
    /// Always re-resolves the context so settings edits apply on the next
    /// access. The first access of a session also rebuilds a pending question
    /// from the transcript. Returns a snapshot.
    pub async fn get_session(&self, agent_id: &str) -> SessionContext {
        let handle = self.get_or_create(agent_id).await;
        self.hydrate_once(agent_id, &handle).await;
        let snapshot = handle.lock().clone();
        snapshot
    }

    async fn get_or_create(&self, agent_id: &str) -> SessionHandle {
        let resolved = self.resolve_session(agent_id).await;

        let (handle, created) = {
            let mut sessions = self.sessions.write();
            match sessions.get(agent_id) {
                Some(handle) => (handle.clone(), false),
                None => {
                    let handle = Arc::new(Mutex::new(SessionContext::new(agent_id, resolved.clone())));
                    sessions.insert(agent_id.to_string(), handle.clone());
                    (handle, true)
                }
            }
        };

        if created {
            info!("Created session: {}", agent_id);
            self.emit(agent_id, SessionEvent::Created);
        } else {
            let mut session = handle.lock();
            session.resolved = resolved;
            session.touch();
        }

        handle
    }

    /// Rebuild the pending question of a session from its transcript
    ///
    /// Runs at most once per in-memory session; later calls return the
    /// current marker without scanning.
    pub async fn hydrate_pending_question(&self, agent_id: &str) -> Option<PendingQuestion> {
        let handle = self.handle(agent_id)?;
        self.hydrate_once(agent_id, &handle).await;
        let question = handle.lock().runtime.pending_question.clone();
        question
    }

    async fn hydrate_once(&self, agent_id: &str, handle: &SessionHandle) {
        {
            let mut session = handle.lock();
            if session.runtime.pending_question_initialized {
                return;
            }
            session.runtime.pending_question_initialized = true;
        }

        let message = match self.store.get_last_assistant_message(agent_id).await {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to hydrate pending question for {}: {}", agent_id, e);
                return;
            }
        };

        let Some(question) = find_pending_question(&message) else {
            return;
        };

        let previous = {
            let mut session = handle.lock();
            // A loop started meanwhile owns the state now
            if session.status != SessionStatus::Idle || session.runtime.pending_question.is_some() {
                debug!("Skipping question hydration for {}: session moved on", agent_id);
                return;
            }
            session.runtime.pending_question = Some(question.clone());
            let previous = session.status;
            session.status = SessionStatus::WaitingQuestion;
            session.touch();
            previous
        };

        info!(
            "Restored pending question {} (message {}) for {}",
            question.tool_call_id, question.message_id, agent_id
        );
        self.emit(
            agent_id,
            SessionEvent::QuestionRestored {
                message_id: question.message_id,
                tool_call_id: question.tool_call_id,
            },
        );
        self.emit(
            agent_id,
            SessionEvent::StatusChanged {
                from: previous,
                to: SessionStatus::WaitingQuestion,
            },
        );
    }

    /// Enter (or resume) the agent loop for a message
    ///
    /// Takes the resume lock of `message_id` first, unless the caller already
    /// holds it (`skip_lock_acquisition`). When the lock cannot be taken the
    /// call returns false without touching any state. Otherwise the session
    /// becomes `generating` with a fresh loop id, reset counters, no pending
    /// question, and (unless preserved) an empty permission queue. The lock
    /// stays held until [`Self::release_permission_resume_lock`].
    pub async fn start_loop(
        &self,
        agent_id: &str,
        message_id: &str,
        options: StartLoopOptions,
    ) -> bool {
        let handle = self.get_or_create(agent_id).await;
        self.hydrate_once(agent_id, &handle).await;

        let previous = {
            let mut session = handle.lock();

            // Lock acquisition and state reset share this critical section
            if !options.skip_lock_acquisition
                && !session.runtime.try_acquire_resume_lock(message_id)
            {
                info!(
                    "Resume of message {} already in progress for {}, skipping",
                    message_id, agent_id
                );
                return false;
            }

            let previous = session.status;
            session.status = SessionStatus::Generating;

            let runtime = &mut session.runtime;
            runtime.loop_id = Some(uuid::Uuid::new_v4().to_string());
            runtime.current_message_id = Some(message_id.to_string());
            runtime.tool_call_count = 0;
            runtime.user_stop_requested = false;
            runtime.pending_question = None;
            if !options.preserve_pending_permissions {
                runtime.clear_permissions();
            }

            session.touch();
            previous
        };

        debug!(
            "Started loop for {} on message {} (preserve_permissions={})",
            agent_id, message_id, options.preserve_pending_permissions
        );
        if previous != SessionStatus::Generating {
            self.emit(
                agent_id,
                SessionEvent::StatusChanged {
                    from: previous,
                    to: SessionStatus::Generating,
                },
            );
        }
        true
    }

    /// Remove a session, scrubbing its pending state first
    pub fn remove_session(&self, agent_id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.write();
            if let Some(handle) = sessions.get(agent_id) {
                let mut session = handle.lock();
                session.runtime.scrub();
                session.status = SessionStatus::Idle;
                session.touch();
            }
            sessions.remove(agent_id).is_some()
        };

        if removed {
            info!("Removed session: {}", agent_id);
            self.emit(agent_id, SessionEvent::Removed);
        }
        removed
    }

    /// Remove every session
    pub fn stop_all(&self) {
        for agent_id in self.list_sessions() {
            self.remove_session(&agent_id);
        }
    }

    /// Snapshot of a registered session without re-resolving it
    pub fn peek_session(&self, agent_id: &str) -> Option<SessionContext> {
        self.handle(agent_id).map(|handle| handle.lock().clone())
    }

    /// Check if a session exists
    pub fn has_session(&self, agent_id: &str) -> bool {
        self.sessions.read().contains_key(agent_id)
    }

    /// List registered session ids
    pub fn list_sessions(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Get the number of registered sessions
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    // ========================================================================
    // Status and runtime
    // ========================================================================

    pub fn set_status(&self, agent_id: &str, status: SessionStatus) {
        let previous = self.with_session(agent_id, |session| {
            let previous = session.status;
            session.status = status;
            previous
        });

        if let Some(previous) = previous {
            if previous == status {
                return;
            }
            if !previous.can_transition_to(&status) {
                warn!(
                    "Unexpected status transition for {}: {} -> {}",
                    agent_id, previous, status
                );
            }
            debug!("Session {} status: {} -> {}", agent_id, previous, status);
            self.emit(
                agent_id,
                SessionEvent::StatusChanged {
                    from: previous,
                    to: status,
                },
            );
        }
    }

    pub fn get_status(&self, agent_id: &str) -> Option<SessionStatus> {
        self.handle(agent_id).map(|handle| handle.lock().status)
    }

    /// Patch scalar runtime fields
    pub fn update_runtime(&self, agent_id: &str, update: RuntimeUpdate) {
        self.with_session(agent_id, |session| update.apply(&mut session.runtime));
    }

    /// Count one more tool call; returns the new count
    pub fn increment_tool_call_count(&self, agent_id: &str) -> Option<u32> {
        self.with_session(agent_id, |session| {
            session.runtime.tool_call_count += 1;
            session.runtime.tool_call_count
        })
    }

    /// Ask the loop to stop at its next checkpoint
    ///
    /// Cooperative: the loop polls [`Self::is_stop_requested`] between tool calls.
    pub fn request_stop(&self, agent_id: &str) {
        if self
            .with_session(agent_id, |session| session.runtime.user_stop_requested = true)
            .is_some()
        {
            info!("Stop requested for {}", agent_id);
        }
    }

    pub fn is_stop_requested(&self, agent_id: &str) -> bool {
        self.handle(agent_id)
            .is_some_and(|handle| handle.lock().runtime.user_stop_requested)
    }

    // ========================================================================
    // Question coordination
    // ========================================================================

    /// Mark the loop as waiting on a question tool call
    pub fn set_pending_question(&self, agent_id: &str, message_id: &str, tool_call_id: &str) {
        let previous = self.with_session(agent_id, |session| {
            session.runtime.pending_question = Some(PendingQuestion::new(message_id, tool_call_id));
            let previous = session.status;
            session.status = SessionStatus::WaitingQuestion;
            previous
        });

        if let Some(previous) = previous {
            if previous != SessionStatus::WaitingQuestion {
                self.emit(
                    agent_id,
                    SessionEvent::StatusChanged {
                        from: previous,
                        to: SessionStatus::WaitingQuestion,
                    },
                );
            }
        }
    }

    /// Drop the pending question marker (status is left to the caller)
    pub fn clear_pending_question(&self, agent_id: &str) {
        self.with_session(agent_id, |session| session.runtime.pending_question = None);
    }

    pub fn get_pending_question(&self, agent_id: &str) -> Option<PendingQuestion> {
        self.handle(agent_id)
            .and_then(|handle| handle.lock().runtime.pending_question.clone())
    }

    // ========================================================================
    // Permission coordination
    // ========================================================================

    /// Queue a permission request (upsert by message and tool call id)
    pub fn add_pending_permission(&self, agent_id: &str, permission: PendingPermission) {
        let message_id = permission.message_id.clone();
        let tool_call_id = permission.tool_call_id.clone();

        match self.with_session(agent_id, |session| session.runtime.upsert_permission(permission)) {
            Some(true) => {
                debug!(
                    "Queued permission {} (message {}) for {}",
                    tool_call_id, message_id, agent_id
                );
                self.emit(
                    agent_id,
                    SessionEvent::PermissionQueued {
                        message_id,
                        tool_call_id,
                    },
                );
            }
            Some(false) => debug!("Updated permission {} for {}", tool_call_id, agent_id),
            None => warn!(
                "Dropping permission {} for unknown session {}",
                tool_call_id, agent_id
            ),
        }
    }

    /// Remove a permission request from the queue
    pub fn remove_pending_permission(&self, agent_id: &str, message_id: &str, tool_call_id: &str) {
        let removed = self.with_session(agent_id, |session| {
            session.runtime.remove_permission(message_id, tool_call_id)
        });

        if removed == Some(true) {
            self.emit(
                agent_id,
                SessionEvent::PermissionResolved {
                    message_id: message_id.to_string(),
                    tool_call_id: tool_call_id.to_string(),
                },
            );
        }
    }

    /// Pending permissions in arrival order
    pub fn get_pending_permissions(&self, agent_id: &str) -> Vec<PendingPermission> {
        self.handle(agent_id)
            .map(|handle| handle.lock().runtime.pending_permissions().to_vec())
            .unwrap_or_default()
    }

    /// Head of the permission queue
    pub fn get_pending_permission(&self, agent_id: &str) -> Option<PendingPermission> {
        self.handle(agent_id)
            .and_then(|handle| handle.lock().runtime.pending_permission().cloned())
    }

    /// Any pending permission, optionally only for one message
    pub fn has_pending_permissions(&self, agent_id: &str, message_id: Option<&str>) -> bool {
        self.handle(agent_id)
            .is_some_and(|handle| handle.lock().runtime.has_pending_permissions(message_id))
    }

    /// Take the resume lock of a message
    ///
    /// False means a resume of this message is already in progress: skip,
    /// do not retry. Also false for unknown sessions.
    pub fn acquire_permission_resume_lock(&self, agent_id: &str, message_id: &str) -> bool {
        match self.with_session(agent_id, |session| {
            session.runtime.try_acquire_resume_lock(message_id)
        }) {
            Some(true) => {
                debug!("Acquired resume lock for {} on message {}", agent_id, message_id);
                true
            }
            Some(false) => {
                debug!(
                    "Resume lock for {} on message {} already held",
                    agent_id, message_id
                );
                false
            }
            None => {
                warn!("Cannot lock unknown session {}", agent_id);
                false
            }
        }
    }

    /// Release the resume lock once a whole batch has been handled
    pub fn release_permission_resume_lock(&self, agent_id: &str) {
        if let Some(Some(lock)) =
            self.with_session(agent_id, |session| session.runtime.release_resume_lock())
        {
            debug!(
                "Released resume lock for {} on message {}",
                agent_id, lock.message_id
            );
        }
    }

    pub fn get_permission_resume_lock(&self, agent_id: &str) -> Option<PermissionResumeLock> {
        self.handle(agent_id)
            .and_then(|handle| handle.lock().runtime.permission_resume_lock().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::types::PermissionType;
    use crate::store::{ConversationSettings, MemoryConversationStore};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        store: Arc<MemoryConversationStore>,
        manager: SessionManager,
        events: SessionEventReceiver,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryConversationStore::new());
        store.create("s1", ConversationSettings::default());
        let workspace = WorkspacePathResolver::with_root(store.clone(), temp.path().join("ws"));
        let (manager, events) = SessionManager::with_workspace_resolver(
            store.clone(),
            Arc::new(Config::default()),
            workspace,
        );
        Fixture {
            _temp: temp,
            store,
            manager,
            events,
        }
    }

    fn permission(message_id: &str, tool_call_id: &str) -> PendingPermission {
        PendingPermission::new(message_id, tool_call_id, PermissionType::Write, json!({"path": "a.txt"}))
    }

    #[tokio::test]
    async fn test_manager_creation() {
        let f = fixture();
        assert_eq!(f.manager.session_count(), 0);
        assert!(f.manager.list_sessions().is_empty());
        assert!(!f.manager.has_session("s1"));
    }

    #[tokio::test]
    async fn test_get_session_creates_once() {
        let f = fixture();
        let first = f.manager.get_session("s1").await;
        let second = f.manager.get_session("s1").await;

        assert_eq!(f.manager.session_count(), 1);
        assert_eq!(first.session_id, "s1");
        assert_eq!(first.agent_id, "s1");
        assert_eq!(first.status, SessionStatus::Idle);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(first.resolved, second.resolved);
    }

    #[tokio::test]
    async fn test_created_event_emitted_once() {
        let mut f = fixture();
        f.manager.get_session("s1").await;
        f.manager.get_session("s1").await;

        let (id, event) = f.events.try_recv().unwrap();
        assert_eq!(id, "s1");
        assert_eq!(event, SessionEvent::Created);
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_status_accessors() {
        let mut f = fixture();
        f.manager.get_session("s1").await;
        let _ = f.events.try_recv();

        f.manager.set_status("s1", SessionStatus::Generating);
        assert_eq!(f.manager.get_status("s1"), Some(SessionStatus::Generating));
        assert_eq!(
            f.events.try_recv().unwrap().1,
            SessionEvent::StatusChanged {
                from: SessionStatus::Idle,
                to: SessionStatus::Generating
            }
        );

        // Same status is not an event
        f.manager.set_status("s1", SessionStatus::Generating);
        assert!(f.events.try_recv().is_err());

        assert_eq!(f.manager.get_status("missing"), None);
    }

    #[tokio::test]
    async fn test_increment_and_update_runtime() {
        let f = fixture();
        f.manager.get_session("s1").await;

        assert_eq!(f.manager.increment_tool_call_count("s1"), Some(1));
        assert_eq!(f.manager.increment_tool_call_count("s1"), Some(2));
        assert_eq!(f.manager.increment_tool_call_count("missing"), None);

        f.manager.update_runtime(
            "s1",
            RuntimeUpdate {
                current_message_id: Some("m9".to_string()),
                ..Default::default()
            },
        );
        let session = f.manager.peek_session("s1").unwrap();
        assert_eq!(session.runtime.current_message_id.as_deref(), Some("m9"));
        assert_eq!(session.runtime.tool_call_count, 2);
    }

    #[tokio::test]
    async fn test_start_loop_resets_runtime() {
        let f = fixture();
        f.manager.get_session("s1").await;
        f.manager.increment_tool_call_count("s1");
        f.manager.request_stop("s1");
        f.manager.set_pending_question("s1", "m0", "q0");
        f.manager.add_pending_permission("s1", permission("m0", "t0"));

        assert!(f.manager.start_loop("s1", "m1", StartLoopOptions::default()).await);

        let session = f.manager.peek_session("s1").unwrap();
        assert_eq!(session.status, SessionStatus::Generating);
        assert_eq!(session.runtime.current_message_id.as_deref(), Some("m1"));
        assert!(session.runtime.loop_id.is_some());
        assert_eq!(session.runtime.tool_call_count, 0);
        assert!(!session.runtime.user_stop_requested);
        assert!(session.runtime.pending_question.is_none());
        assert!(session.runtime.pending_permissions().is_empty());
    }

    #[tokio::test]
    async fn test_start_loop_new_loop_id_each_time() {
        let f = fixture();
        f.manager.start_loop("s1", "m1", StartLoopOptions::default()).await;
        let first = f.manager.peek_session("s1").unwrap().runtime.loop_id;
        f.manager.start_loop("s1", "m2", StartLoopOptions::default()).await;
        let second = f.manager.peek_session("s1").unwrap().runtime.loop_id;
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_start_loop_rejected_while_resume_in_flight() {
        let f = fixture();
        f.manager.get_session("s1").await;
        f.manager.add_pending_permission("s1", permission("m1", "t1"));
        f.manager.set_status("s1", SessionStatus::WaitingPermission);
        assert!(f.manager.acquire_permission_resume_lock("s1", "m1"));

        assert!(!f.manager.start_loop("s1", "m1", StartLoopOptions::default()).await);

        // No side effects
        let session = f.manager.peek_session("s1").unwrap();
        assert_eq!(session.status, SessionStatus::WaitingPermission);
        assert_eq!(session.runtime.pending_permissions().len(), 1);

        // The holder resumes with the lock it already has
        assert!(f.manager.start_loop("s1", "m1", StartLoopOptions::resume_batch()).await);
        assert_eq!(f.manager.get_pending_permissions("s1").len(), 1);
        assert!(f.manager.get_permission_resume_lock("s1").is_some());

        f.manager.release_permission_resume_lock("s1");
        assert!(f.manager.get_permission_resume_lock("s1").is_none());
    }

    #[tokio::test]
    async fn test_start_loop_takes_resume_lock() {
        let f = fixture();
        assert!(f.manager.start_loop("s1", "m1", StartLoopOptions::default()).await);
        assert_eq!(
            f.manager.get_permission_resume_lock("s1").unwrap().message_id,
            "m1"
        );
        assert!(!f.manager.acquire_permission_resume_lock("s1", "m1"));
    }

    #[tokio::test]
    async fn test_second_start_loop_same_message_rejected() {
        let f = fixture();
        f.manager.get_session("s1").await;
        f.manager.add_pending_permission("s1", permission("m1", "t1"));

        let preserve = StartLoopOptions::default().preserve_pending_permissions(true);
        assert!(f.manager.start_loop("s1", "m1", preserve).await);
        let loop_id = f.manager.peek_session("s1").unwrap().runtime.loop_id;

        assert!(!f.manager.start_loop("s1", "m1", StartLoopOptions::default()).await);

        let session = f.manager.peek_session("s1").unwrap();
        assert_eq!(session.runtime.pending_permissions().len(), 1);
        assert_eq!(session.runtime.loop_id, loop_id);
    }

    #[tokio::test]
    async fn test_start_loop_replaces_other_message_lock() {
        let f = fixture();
        f.manager.get_session("s1").await;
        assert!(f.manager.acquire_permission_resume_lock("s1", "m1"));

        assert!(f.manager.start_loop("s1", "m2", StartLoopOptions::default()).await);
        assert_eq!(
            f.manager.get_permission_resume_lock("s1").unwrap().message_id,
            "m2"
        );
    }

    #[tokio::test]
    async fn test_lock_on_unknown_session() {
        let f = fixture();
        assert!(!f.manager.acquire_permission_resume_lock("nobody", "m1"));
    }

    #[tokio::test]
    async fn test_permission_events() {
        let mut f = fixture();
        f.manager.get_session("s1").await;
        let _ = f.events.try_recv();

        f.manager.add_pending_permission("s1", permission("m1", "t1"));
        f.manager.add_pending_permission("s1", permission("m1", "t1"));
        f.manager.remove_pending_permission("s1", "m1", "t1");
        f.manager.remove_pending_permission("s1", "m1", "t1");

        let events: Vec<SessionEvent> = std::iter::from_fn(|| f.events.try_recv().ok())
            .map(|(_, e)| e)
            .collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::PermissionQueued {
                    message_id: "m1".to_string(),
                    tool_call_id: "t1".to_string()
                },
                SessionEvent::PermissionResolved {
                    message_id: "m1".to_string(),
                    tool_call_id: "t1".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_session_scrubs() {
        let f = fixture();
        f.manager.get_session("s1").await;
        f.manager.add_pending_permission("s1", permission("m1", "t1"));
        f.manager.acquire_permission_resume_lock("s1", "m1");
        f.manager.set_pending_question("s1", "m1", "q1");

        let stale = f.manager.handle("s1").unwrap();
        assert!(f.manager.remove_session("s1"));
        assert!(!f.manager.remove_session("s1"));

        // A holder of the old entry sees nothing pending
        let old = stale.lock();
        assert!(old.runtime.pending_permissions().is_empty());
        assert!(old.runtime.permission_resume_lock().is_none());
        assert!(old.runtime.pending_question.is_none());
        assert_eq!(old.status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_stop_all() {
        let f = fixture();
        f.store.create("s2", ConversationSettings::default());
        f.manager.get_session("s1").await;
        f.manager.get_session("s2").await;
        assert_eq!(f.manager.session_count(), 2);

        f.manager.stop_all();
        assert_eq!(f.manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_request_flag() {
        let f = fixture();
        f.manager.get_session("s1").await;
        assert!(!f.manager.is_stop_requested("s1"));
        f.manager.request_stop("s1");
        assert!(f.manager.is_stop_requested("s1"));
        assert!(!f.manager.is_stop_requested("missing"));
    }
}
