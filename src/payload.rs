//! Conversation normalization for the native protocol.
//!
//! The backend rejects histories that do not alternate strictly between
//! `user` and `assistant` turns. Inbound histories frequently violate that,
//! so the sequence is rewritten before dispatch.

use serde_json::{json, Value};
use tracing::debug;

fn role_of(message: &Value) -> &str {
    message.get("role").and_then(Value::as_str).unwrap_or("")
}

fn synthetic_user_turn() -> Value {
    json!({"role": "user", "content": "start"})
}

/// Rewrite a message sequence into the shape the backend accepts.
///
/// Empty input stays empty. A synthetic `user` turn opens the sequence when
/// the first message is neither `user` nor `system`, consecutive messages
/// sharing a role collapse into the first of the run, and a synthetic
/// `user` turn closes the sequence when it would otherwise end on another
/// role. Dropped messages are logged, not retained.
pub fn normalize_messages(messages: Vec<Value>) -> Vec<Value> {
    if messages.is_empty() {
        return messages;
    }

    let mut normalized: Vec<Value> = Vec::with_capacity(messages.len() + 2);

    let first_role = role_of(&messages[0]);
    if first_role != "user" && first_role != "system" {
        normalized.push(synthetic_user_turn());
    }

    let mut last_role: Option<String> = None;
    for message in messages {
        let role = role_of(&message).to_string();
        if last_role.as_deref() == Some(role.as_str()) {
            debug!(role = %role, "Dropping consecutive same-role message");
        } else {
            last_role = Some(role);
            normalized.push(message);
        }
    }

    if normalized.last().map(role_of) != Some("user") {
        normalized.push(synthetic_user_turn());
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> Value {
        json!({"role": role, "content": content})
    }

    #[test]
    fn test_empty_stays_empty() {
        assert_eq!(normalize_messages(Vec::new()), Vec::<Value>::new());
    }

    #[test]
    fn test_single_user_message_passes_through() {
        let input = vec![msg("user", "hi")];
        assert_eq!(normalize_messages(input.clone()), input);
    }

    #[test]
    fn test_system_opening_is_allowed() {
        let input = vec![msg("system", "rules"), msg("user", "hi")];
        assert_eq!(normalize_messages(input.clone()), input);
    }

    #[test]
    fn test_all_assistant_input_is_bracketed() {
        let out = normalize_messages(vec![msg("assistant", "a"), msg("assistant", "b")]);
        assert_eq!(
            out,
            vec![synthetic_user_turn(), msg("assistant", "a"), synthetic_user_turn()]
        );
    }

    #[test]
    fn test_consecutive_same_role_keeps_first() {
        let out = normalize_messages(vec![
            msg("user", "hi"),
            msg("user", "there"),
            msg("assistant", "yo"),
        ]);
        assert_eq!(
            out,
            vec![msg("user", "hi"), msg("assistant", "yo"), synthetic_user_turn()]
        );
    }

    #[test]
    fn test_trailing_assistant_gets_user_close() {
        let out = normalize_messages(vec![msg("user", "hi"), msg("assistant", "yo")]);
        assert_eq!(
            out,
            vec![msg("user", "hi"), msg("assistant", "yo"), synthetic_user_turn()]
        );
    }

    #[test]
    fn test_lone_system_message_gets_user_close() {
        let out = normalize_messages(vec![msg("system", "rules")]);
        assert_eq!(out, vec![msg("system", "rules"), synthetic_user_turn()]);
    }

    #[test]
    fn test_unknown_leading_role_gets_user_open() {
        let out = normalize_messages(vec![msg("tool", "result"), msg("user", "ok")]);
        assert_eq!(
            out,
            vec![synthetic_user_turn(), msg("tool", "result"), msg("user", "ok")]
        );
    }

    #[test]
    fn test_alternating_history_is_untouched() {
        let input = vec![
            msg("user", "one"),
            msg("assistant", "two"),
            msg("user", "three"),
        ];
        assert_eq!(normalize_messages(input.clone()), input);
    }
}
