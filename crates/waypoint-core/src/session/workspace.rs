//! Default working directories for agent-mode sessions
//!
//! A conversation without an explicit workspace gets `<root>/<conversation id>`,
//! where the root lives under the OS temp directory unless configured. The
//! computed path is written back to the conversation settings so later
//! resolutions reuse it.
//!
//! Filesystem failures degrade instead of failing: the per-conversation
//! directory falls back to the shared root, and the root to the bare OS temp
//! directory. A missing workspace must never keep the loop from starting.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::resolver::non_blank;
use crate::store::{safe_path_component, ConversationStore, SettingsPatch};

/// Directory name of the default workspace root under the OS temp dir
pub const DEFAULT_WORKSPACE_ROOT_NAME: &str = "waypoint-workspaces";

/// Derives and persists default agent workspace paths
pub struct WorkspacePathResolver {
    store: Arc<dyn ConversationStore>,
    root: PathBuf,
    /// Set once the root has been created
    root_ready: OnceCell<PathBuf>,
}

impl WorkspacePathResolver {
    /// Resolver rooted at `<os temp>/waypoint-workspaces`
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self::with_root(store, std::env::temp_dir().join(DEFAULT_WORKSPACE_ROOT_NAME))
    }

    /// Resolver rooted at a custom directory
    pub fn with_root(store: Arc<dyn ConversationStore>, root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            root: root.into(),
            root_ready: OnceCell::new(),
        }
    }

    /// Configured root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root once; failures are retried on the next call
    async fn ensure_root(&self) -> Option<PathBuf> {
        let result = self
            .root_ready
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(&self.root).await?;
                Ok::<_, std::io::Error>(self.root.clone())
            })
            .await;

        match result {
            Ok(root) => Some(root.clone()),
            Err(e) => {
                warn!("Failed to create workspace root {:?}: {}", self.root, e);
                None
            }
        }
    }

    /// Workspace path for an agent-mode conversation
    ///
    /// A non-blank `current_path` wins unchanged. Otherwise the default is
    /// computed, created, and persisted best-effort. Never fails.
    pub async fn resolve_agent_workspace_path(
        &self,
        conversation_id: &str,
        current_path: Option<&str>,
    ) -> String {
        if let Some(path) = non_blank(current_path) {
            return path;
        }

        let Some(root) = self.ensure_root().await else {
            let fallback = std::env::temp_dir();
            warn!(
                "Using OS temp dir {:?} as workspace for {}",
                fallback, conversation_id
            );
            return fallback.to_string_lossy().into_owned();
        };

        let candidate = root.join(safe_path_component(conversation_id));
        if let Err(e) = tokio::fs::create_dir_all(&candidate).await {
            warn!(
                "Failed to create workspace {:?} for {}: {}; using shared root",
                candidate, conversation_id, e
            );
            return root.to_string_lossy().into_owned();
        }

        let path = candidate.to_string_lossy().into_owned();
        debug!("Default workspace for {}: {}", conversation_id, path);

        // Cache only; the directory is derivable again if this fails
        if let Err(e) = self
            .store
            .update_conversation_settings(conversation_id, SettingsPatch::workspace_path(&path))
            .await
        {
            warn!(
                "Failed to persist workspace path for {}: {}",
                conversation_id, e
            );
        }

        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConversationSettings, MemoryConversationStore};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<MemoryConversationStore>, WorkspacePathResolver) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryConversationStore::new());
        let resolver = WorkspacePathResolver::with_root(store.clone(), temp.path().join("ws"));
        (temp, store, resolver)
    }

    #[tokio::test]
    async fn test_explicit_path_wins() {
        let (_temp, _store, resolver) = setup();
        let path = resolver
            .resolve_agent_workspace_path("c1", Some("  /my/project  "))
            .await;
        assert_eq!(path, "/my/project");
        // Nothing created for an explicit path
        assert!(!resolver.root().exists());
    }

    #[tokio::test]
    async fn test_default_created_and_persisted() {
        let (_temp, store, resolver) = setup();
        store.create("c1", ConversationSettings::default());

        let path = resolver.resolve_agent_workspace_path("c1", None).await;

        assert!(Path::new(&path).is_dir());
        assert_eq!(Path::new(&path), resolver.root().join("c1"));
        assert_eq!(
            store.settings("c1").unwrap().agent_workspace_path.as_deref(),
            Some(path.as_str())
        );
    }

    #[tokio::test]
    async fn test_default_is_stable() {
        let (_temp, store, resolver) = setup();
        store.create("c1", ConversationSettings::default());

        let first = resolver.resolve_agent_workspace_path("c1", Some("")).await;
        let persisted = store.settings("c1").unwrap().agent_workspace_path;
        let second = resolver
            .resolve_agent_workspace_path("c1", persisted.as_deref())
            .await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_persist_failure_is_not_fatal() {
        let (_temp, _store, resolver) = setup();
        // Conversation does not exist, so the settings update fails
        let path = resolver.resolve_agent_workspace_path("ghost", None).await;
        assert!(Path::new(&path).is_dir());
    }

    #[tokio::test]
    async fn test_subdir_failure_falls_back_to_root() {
        let (_temp, store, resolver) = setup();
        std::fs::create_dir_all(resolver.root()).unwrap();
        // A file where the conversation directory should go
        std::fs::write(resolver.root().join("c1"), "blocker").unwrap();
        store.create("c1", ConversationSettings::default());

        let path = resolver.resolve_agent_workspace_path("c1", None).await;

        assert_eq!(Path::new(&path), resolver.root());
        assert!(store.settings("c1").unwrap().agent_workspace_path.is_none());
    }

    #[tokio::test]
    async fn test_root_failure_falls_back_to_os_temp() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let store = Arc::new(MemoryConversationStore::new());
        let resolver = WorkspacePathResolver::with_root(store, blocker.join("ws"));

        let path = resolver.resolve_agent_workspace_path("c1", None).await;

        assert_eq!(Path::new(&path), std::env::temp_dir());
    }

    #[tokio::test]
    async fn test_conversation_id_is_sanitized() {
        let (_temp, _store, resolver) = setup();
        let path = resolver.resolve_agent_workspace_path("../escape", None).await;
        assert!(Path::new(&path).starts_with(resolver.root()));
    }
}
