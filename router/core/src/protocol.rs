//! Wire Protocol
//!
//! Messages exchanged between the daemon and its callers. Each variant is a
//! JSON object tagged by `type`:
//!
//! ```text
//! caller -> daemon                     daemon -> caller
//! {"type":"route", prompt, ...}        {"type":"selection", worker_id, ...}
//! {"type":"feedback", worker_id, ...}  {"type":"feedback_ack", status, message}
//! {"type":"rankings", task_type?}      {"type":"rankings", task_type?, ranked_workers}
//! {"type":"ping"}                      {"type":"pong"}
//!                                      {"type":"error", kind, message}
//! ```

use serde::{Deserialize, Serialize};

use crate::routing::{
    FeedbackAck, FeedbackRequest, RankedWorker, RoutingRequest, SelectionResult, TaskType,
};

/// Request from a caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Pick a worker for a prompt
    Route(RoutingRequest),

    /// Rate a previous response
    Feedback(FeedbackRequest),

    /// Current ranking, optionally for one task type
    Rankings {
        /// Rank by this task's success rate instead of the overall one
        #[serde(default)]
        task_type: Option<TaskType>,
    },

    /// Liveness check
    Ping,
}

/// Category of an error response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request was well-formed but its content was rejected
    Validation,
    /// Request could not be decoded
    Protocol,
    /// The router is shutting down
    Unavailable,
}

/// Response to a caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Answer to [`ClientMessage::Route`]
    Selection(SelectionResult),

    /// Answer to [`ClientMessage::Feedback`]
    FeedbackAck(FeedbackAck),

    /// Answer to [`ClientMessage::Rankings`]
    Rankings {
        /// Task the ranking was computed for
        task_type: Option<TaskType>,
        /// Best first
        ranked_workers: Vec<RankedWorker>,
    },

    /// Answer to [`ClientMessage::Ping`]
    Pong,

    /// The request was not served
    Error {
        /// Failure class
        kind: ErrorKind,
        /// Human-readable detail
        message: String,
    },
}

impl ServerMessage {
    /// Build an error response
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_route_message_from_json() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "route",
            "prompt": "Write a function",
            "user_preference": "worker-a",
            "lock_preference": true,
            "conversation_history": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        let ClientMessage::Route(request) = msg else {
            panic!("expected route message");
        };
        assert_eq!(request.prompt, "Write a function");
        assert_eq!(request.user_preference.as_deref(), Some("worker-a"));
        assert!(request.lock_preference);
        assert_eq!(request.conversation_history.unwrap().len(), 1);
    }

    #[test]
    fn test_feedback_and_rankings_from_json() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "feedback",
            "worker_id": "worker-a",
            "prompt": "p",
            "response": "r",
            "rating": 5,
            "task_type": "code"
        }))
        .unwrap();
        assert!(matches!(msg, ClientMessage::Feedback(ref f) if f.rating == 5));

        let msg: ClientMessage = serde_json::from_value(json!({"type": "rankings"})).unwrap();
        assert_eq!(msg, ClientMessage::Rankings { task_type: None });

        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "rankings", "task_type": "tool_use"})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Rankings {
                task_type: Some(TaskType::ToolUse)
            }
        );
    }

    #[test]
    fn test_server_messages_to_json() {
        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong, json!({"type": "pong"}));

        let err = serde_json::to_value(ServerMessage::error(ErrorKind::Validation, "bad rating")).unwrap();
        assert_eq!(
            err,
            json!({"type": "error", "kind": "validation", "message": "bad rating"})
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<ClientMessage, _> = serde_json::from_value(json!({"type": "reboot"}));
        assert!(result.is_err());
    }
}
