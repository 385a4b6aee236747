//! Conversation message types for Stride.
//!
//! Messages are scoped by user and conversation and are immutable after
//! persistence except for the late-bound `MessageType` classification tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Role of a persisted conversation message.
///
/// `Function` marks the output of a dispatched function fed back into
/// the conversation, distinct from the LLM wire roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Function,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Function => write!(f, "function"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "function" => Ok(Role::Function),
            other => Err(format!("invalid role: '{other}'")),
        }
    }
}

/// Late-bound classification of a user message.
///
/// `Command` marks short action requests ("log 2 eggs"); `Conversation`
/// is everything else. This is the only field that may change after a
/// message is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Command,
    Conversation,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Command => write!(f, "command"),
            MessageType::Conversation => write!(f, "conversation"),
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "command" => Ok(MessageType::Command),
            "conversation" => Ok(MessageType::Conversation),
            other => Err(format!("invalid message type: '{other}'")),
        }
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Conversation
    }
}

/// A function call requested by the model, recorded on the assistant
/// message that asked for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRecord {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A single persisted message within a conversation.
///
/// `conversation_id` is immutable after creation. Assistant messages
/// carry token usage and cost metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub content: String,
    /// Function call requested by this message (assistant messages only).
    pub function_call: Option<FunctionCallRecord>,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    /// Tokens consumed by this message (assistant messages only).
    pub token_count: Option<u32>,
    /// Approximate cost of producing this message in USD (assistant only).
    pub estimated_cost: Option<f64>,
}

/// Derived aggregate over a conversation's messages. Computed on demand,
/// never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub total_messages: u64,
    pub user_messages: u64,
    pub assistant_messages: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub first_message_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::User, Role::Assistant, Role::Function] {
            let s = role.to_string();
            let parsed: Role = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_message_type_roundtrip() {
        for mt in [MessageType::Command, MessageType::Conversation] {
            let s = mt.to_string();
            let parsed: MessageType = s.parse().unwrap();
            assert_eq!(mt, parsed);
        }
    }

    #[test]
    fn test_message_type_default() {
        assert_eq!(MessageType::default(), MessageType::Conversation);
    }

    #[test]
    fn test_message_serialize() {
        let msg = Message {
            id: Uuid::now_v7(),
            conversation_id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            role: Role::Assistant,
            content: "Nice work on today's session.".to_string(),
            function_call: Some(FunctionCallRecord {
                name: "query_workouts".to_string(),
                arguments: serde_json::json!({"days": 7}),
            }),
            message_type: MessageType::Conversation,
            created_at: Utc::now(),
            token_count: Some(120),
            estimated_cost: Some(0.002),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
        assert!(json.contains("query_workouts"));
    }

    #[test]
    fn test_stats_default_is_empty() {
        let stats = ConversationStats::default();
        assert_eq!(stats.total_messages, 0);
        assert!(stats.first_message_at.is_none());
        assert!(stats.last_message_at.is_none());
    }
}
