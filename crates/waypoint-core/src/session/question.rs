//! Question pause/resume recovery
//!
//! A question tool call ends the assistant turn and waits for the user. The
//! in-memory marker of that wait does not survive a restart, so it is rebuilt
//! from the transcript: the persisted assistant message is the source of
//! truth, the runtime marker only a cache of it.

use serde_json::Value;

use super::types::PendingQuestion;
use crate::store::{Message, MessageBlock, ACTION_QUESTION_REQUEST, BLOCK_TYPE_ACTION, STATUS_PENDING};

/// Whether a block is a question still awaiting the user
fn is_pending_question(block: &MessageBlock) -> bool {
    block.block_type == BLOCK_TYPE_ACTION
        && block.action_type.as_deref() == Some(ACTION_QUESTION_REQUEST)
        && block.status.as_deref() == Some(STATUS_PENDING)
        && block
            .extra
            .as_ref()
            .and_then(|extra| extra.get("needsUserAction"))
            != Some(&Value::Bool(false))
}

/// Most recent pending question of an assistant message
///
/// Blocks are scanned newest first. A matching block without a tool call id
/// cannot be answered and yields `None`.
pub fn find_pending_question(message: &Message) -> Option<PendingQuestion> {
    let block = message.blocks.iter().rev().find(|b| is_pending_question(b))?;
    let tool_call_id = block.tool_call_id()?;
    Some(PendingQuestion::new(message.id.clone(), tool_call_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ACTION_TOOL_CALL_PERMISSION, STATUS_SUCCESS};
    use serde_json::json;

    #[test]
    fn test_latest_pending_wins() {
        let message = Message::assistant(
            "a1",
            vec![
                MessageBlock::question_request("q-old", STATUS_SUCCESS),
                MessageBlock::text("thinking"),
                MessageBlock::question_request("q-new", STATUS_PENDING),
            ],
        );

        let question = find_pending_question(&message).unwrap();
        assert_eq!(question, PendingQuestion::new("a1", "q-new"));
    }

    #[test]
    fn test_answered_questions_ignored() {
        let message = Message::assistant(
            "a1",
            vec![MessageBlock::question_request("q1", STATUS_SUCCESS)],
        );
        assert!(find_pending_question(&message).is_none());
    }

    #[test]
    fn test_needs_user_action_false_ignored() {
        let message = Message::assistant(
            "a1",
            vec![
                MessageBlock::question_request("q1", STATUS_PENDING),
                MessageBlock::question_request("q2", STATUS_PENDING)
                    .with_extra("needsUserAction", json!(false)),
            ],
        );

        // q2 is skipped, q1 still matches
        assert_eq!(find_pending_question(&message).unwrap().tool_call_id, "q1");
    }

    #[test]
    fn test_needs_user_action_true_or_absent_matches() {
        let message = Message::assistant(
            "a1",
            vec![MessageBlock::question_request("q1", STATUS_PENDING)
                .with_extra("needsUserAction", json!(true))],
        );
        assert!(find_pending_question(&message).is_some());
    }

    #[test]
    fn test_other_pending_actions_ignored() {
        let message = Message::assistant(
            "a1",
            vec![MessageBlock::action(ACTION_TOOL_CALL_PERMISSION, "t1", STATUS_PENDING)],
        );
        assert!(find_pending_question(&message).is_none());
    }

    #[test]
    fn test_missing_tool_call_id() {
        let mut block = MessageBlock::question_request("q1", STATUS_PENDING);
        block.tool_call = None;
        let message = Message::assistant("a1", vec![block]);
        assert!(find_pending_question(&message).is_none());
    }
}
