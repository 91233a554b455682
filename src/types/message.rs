//! Conversation messages sent to every backend.

use serde::{Deserialize, Serialize};

/// A single conversation turn. Order within a conversation is significant and is
/// preserved verbatim into the vendor payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: text.into(),
            name: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: text.into(),
            name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: text.into(),
            name: None,
        }
    }

    pub fn function(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Function,
            content: text.into(),
            name: Some(name.into()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }

    /// Character count used by complexity estimation.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Function,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Function => "function",
        }
    }
}

/// Total characters across a conversation.
pub fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let m = Message::function("lookup", "{}");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "function");
        assert_eq!(v["name"], "lookup");

        let plain = serde_json::to_value(Message::user("hi")).unwrap();
        assert!(plain.get("name").is_none());
    }

    #[test]
    fn test_total_chars_counts_unicode_scalars() {
        let msgs = vec![Message::system("ab"), Message::user("市场分析")];
        assert_eq!(total_chars(&msgs), 6);
    }
}
