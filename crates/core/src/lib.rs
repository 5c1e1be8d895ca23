//! Shared records for the LakeOps agent framework: task results, events and
//! the opaque payload type that flows between tools, agents and subscribers.

pub mod event;
pub mod task;

pub use event::{Event, EventType};
pub use task::{TaskResult, TaskStatus, next_task_id};

use serde_json::Value;

/// Structured payload carried by task results and events.
pub type Payload = serde_json::Map<String, Value>;

/// Normalise a handler's return value into a [`Payload`].
///
/// Objects pass through unchanged; every other value is wrapped as
/// `{"result": value}` so `TaskResult::data` is always a mapping.
pub fn wrap_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Payload::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_pass_through_unchanged() {
        let value = json!({"ok": true, "rows": 3});
        let payload = wrap_payload(value.clone());
        assert_eq!(Value::Object(payload), value);
    }

    #[test]
    fn scalars_are_wrapped_under_result() {
        assert_eq!(Value::Object(wrap_payload(json!(42))), json!({"result": 42}));
        assert_eq!(Value::Object(wrap_payload(json!("done"))), json!({"result": "done"}));
        assert_eq!(Value::Object(wrap_payload(Value::Null)), json!({"result": null}));
    }

    #[test]
    fn arrays_are_wrapped_under_result() {
        let payload = wrap_payload(json!([1, 2, 3]));
        assert_eq!(payload.get("result"), Some(&json!([1, 2, 3])));
        assert_eq!(payload.len(), 1);
    }

    #[test]
    fn wrapping_an_already_wrapped_payload_is_stable() {
        let once = wrap_payload(json!(7));
        let twice = wrap_payload(Value::Object(once.clone()));
        assert_eq!(once, twice);
    }
}
