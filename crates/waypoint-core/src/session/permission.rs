//! Permission coordination: pending-permission queue and resume lock
//!
//! A paused loop may wait on several tool approvals at once (a multi-tool
//! batch). Approvals are queued FIFO and keyed by `(message_id, tool_call_id)`.
//!
//! Resuming re-enters the loop once a human has answered. Two resume attempts
//! for the same message must never both run, so the resume path first takes
//! the per-message lock and only then touches pending state. The lock spans a
//! whole batch: whoever acquired it releases it after the last tool of the
//! batch was handled.

use chrono::Utc;

use super::types::{PendingPermission, PermissionResumeLock, SessionRuntime};

impl SessionRuntime {
    /// Insert or replace a pending permission; returns true when it was new
    ///
    /// A replaced entry keeps its queue position.
    pub(crate) fn upsert_permission(&mut self, permission: PendingPermission) -> bool {
        match self
            .pending_permissions
            .iter_mut()
            .find(|p| p.matches(&permission.message_id, &permission.tool_call_id))
        {
            Some(existing) => {
                *existing = permission;
                false
            }
            None => {
                self.pending_permissions.push(permission);
                true
            }
        }
    }

    /// Drop a pending permission; returns true when one was removed
    pub(crate) fn remove_permission(&mut self, message_id: &str, tool_call_id: &str) -> bool {
        let before = self.pending_permissions.len();
        self.pending_permissions
            .retain(|p| !p.matches(message_id, tool_call_id));
        self.pending_permissions.len() != before
    }

    /// Any pending permission, optionally only those of one message
    pub fn has_pending_permissions(&self, message_id: Option<&str>) -> bool {
        match message_id {
            Some(id) => self.pending_permissions.iter().any(|p| p.message_id == id),
            None => !self.pending_permissions.is_empty(),
        }
    }

    /// Take the resume lock for `message_id`
    ///
    /// Fails only when a lock for this same message is held. A lock left by
    /// a different message is replaced: locks guard one message's resume,
    /// they are not exclusive across unrelated messages.
    pub(crate) fn try_acquire_resume_lock(&mut self, message_id: &str) -> bool {
        if self
            .permission_resume_lock
            .as_ref()
            .is_some_and(|lock| lock.message_id == message_id)
        {
            return false;
        }
        self.permission_resume_lock = Some(PermissionResumeLock {
            message_id: message_id.to_string(),
            started_at: Utc::now(),
        });
        true
    }

    /// Release the resume lock; returns the released lock
    pub(crate) fn release_resume_lock(&mut self) -> Option<PermissionResumeLock> {
        self.permission_resume_lock.take()
    }

    pub(crate) fn clear_permissions(&mut self) {
        self.pending_permissions.clear();
    }

    /// Zero every pending marker and the lock
    pub(crate) fn scrub(&mut self) {
        self.pending_permissions.clear();
        self.permission_resume_lock = None;
        self.pending_question = None;
        self.pending_question_initialized = false;
    }
}
