//! Resolution of durable conversation settings into a runtime context

use crate::config::ModelCapabilities;
use crate::store::ConversationSettings;

use super::types::{ChatMode, SessionContextResolved};

/// Turn persisted settings plus fallback configuration into a resolved context
///
/// Pure: performs no I/O. The agent workspace path is passed through as
/// persisted; filling in a default is the workspace resolver's job.
///
/// - A persisted legacy `"chat"` mode resolves to [`ChatMode::Agent`].
/// - Unknown or missing modes use `fallback_chat_mode`, then agent.
/// - `agent_workspace_path` is populated only in agent mode.
/// - In ACP mode the workdir is looked up by model id in `acp_workdir_map`.
/// - Unknown models get `false` capability flags.
pub fn resolve_session_context(
    settings: &ConversationSettings,
    fallback_chat_mode: Option<ChatMode>,
    model_config: Option<ModelCapabilities>,
) -> SessionContextResolved {
    let chat_mode = settings
        .chat_mode
        .as_deref()
        .and_then(ChatMode::from_persisted)
        .or(fallback_chat_mode)
        .unwrap_or_default();

    let model_id = settings.model_id.clone().unwrap_or_default();
    let capabilities = model_config.unwrap_or_default();

    let agent_workspace_path = match chat_mode {
        ChatMode::Agent => non_blank(settings.agent_workspace_path.as_deref()),
        ChatMode::AcpAgent => None,
    };

    let acp_workdir = match chat_mode {
        ChatMode::AcpAgent => non_blank(settings.acp_workdir_map.get(&model_id).map(|s| s.as_str())),
        ChatMode::Agent => None,
    };

    SessionContextResolved {
        chat_mode,
        provider_id: settings.provider_id.clone().unwrap_or_default(),
        model_id,
        supports_vision: capabilities.vision,
        supports_function_call: capabilities.function_call,
        agent_workspace_path,
        acp_workdir,
        enabled_tools: settings.enabled_tools.clone().unwrap_or_default(),
        acp_workdir_map: settings.acp_workdir_map.clone(),
    }
}

/// Trimmed-empty strings count as unset
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(chat_mode: Option<&str>) -> ConversationSettings {
        ConversationSettings {
            chat_mode: chat_mode.map(str::to_string),
            provider_id: Some("openai".to_string()),
            model_id: Some("gpt-4o".to_string()),
            agent_workspace_path: Some("/work/project".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_legacy_chat_mode_becomes_agent() {
        let resolved = resolve_session_context(&settings(Some("chat")), None, None);
        assert_eq!(resolved.chat_mode, ChatMode::Agent);

        // Even an ACP fallback does not override an explicit (migrated) value
        let resolved =
            resolve_session_context(&settings(Some("chat")), Some(ChatMode::AcpAgent), None);
        assert_eq!(resolved.chat_mode, ChatMode::Agent);
    }

    #[test]
    fn test_fallback_mode_used_when_unset() {
        let resolved = resolve_session_context(&settings(None), Some(ChatMode::AcpAgent), None);
        assert_eq!(resolved.chat_mode, ChatMode::AcpAgent);

        let resolved = resolve_session_context(&settings(Some("garbage")), None, None);
        assert_eq!(resolved.chat_mode, ChatMode::Agent);
    }

    #[test]
    fn test_workspace_only_in_agent_mode() {
        let resolved = resolve_session_context(&settings(Some("agent")), None, None);
        assert_eq!(resolved.agent_workspace_path.as_deref(), Some("/work/project"));

        let resolved = resolve_session_context(&settings(Some("acp agent")), None, None);
        assert!(resolved.agent_workspace_path.is_none());
    }

    #[test]
    fn test_blank_workspace_is_unset() {
        let mut s = settings(Some("agent"));
        s.agent_workspace_path = Some("   ".to_string());
        let resolved = resolve_session_context(&s, None, None);
        assert!(resolved.agent_workspace_path.is_none());
    }

    #[test]
    fn test_acp_workdir_by_model() {
        let mut map = HashMap::new();
        map.insert("claude-code".to_string(), "/repos/a".to_string());
        map.insert("gemini-cli".to_string(), "/repos/b".to_string());
        let s = ConversationSettings {
            chat_mode: Some("acp agent".to_string()),
            model_id: Some("gemini-cli".to_string()),
            acp_workdir_map: map,
            ..Default::default()
        };

        let resolved = resolve_session_context(&s, None, None);
        assert_eq!(resolved.acp_workdir.as_deref(), Some("/repos/b"));
        assert_eq!(resolved.workspace_path(), Some("/repos/b"));
        assert_eq!(resolved.acp_workdir_map.len(), 2);
    }

    #[test]
    fn test_acp_workdir_missing_for_model() {
        let s = ConversationSettings {
            chat_mode: Some("acp agent".to_string()),
            model_id: Some("unbound".to_string()),
            ..Default::default()
        };
        assert!(resolve_session_context(&s, None, None).acp_workdir.is_none());
    }

    #[test]
    fn test_capabilities_fail_closed() {
        let resolved = resolve_session_context(&settings(None), None, None);
        assert!(!resolved.supports_vision);
        assert!(!resolved.supports_function_call);

        let resolved = resolve_session_context(
            &settings(None),
            None,
            Some(ModelCapabilities::new(true, true)),
        );
        assert!(resolved.supports_vision);
        assert!(resolved.supports_function_call);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let s = settings(Some("agent"));
        assert_eq!(
            resolve_session_context(&s, None, None),
            resolve_session_context(&s, None, None)
        );
    }
}
