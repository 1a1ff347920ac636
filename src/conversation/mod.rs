pub mod accumulator;
pub mod finalize;

pub use accumulator::apply_chunk;
pub use finalize::{finalize, finalize_simple};

use crate::events::{de_id, de_opt_id};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One agent's answer within a turn. Usage and sources are passed through
/// untouched; their shape belongs to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub agent_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Value>,
}

impl Version {
    pub fn new(agent_slug: &str, text: &str) -> Self {
        Self {
            agent_slug: agent_slug.to_string(),
            agent_name: None,
            text: text.to_string(),
            usage: None,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(
        default,
        deserialize_with = "de_opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Identity of the agent whose answer the primary `text` mirrors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<Version>,
}

impl Message {
    pub fn user(text: &str) -> Self {
        Self {
            id: None,
            role: Role::User,
            text: text.to_string(),
            attachments: Vec::new(),
            agent_slug: None,
            agent_name: None,
            versions: Vec::new(),
        }
    }

    /// Empty assistant message appended optimistically when the user sends.
    pub fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user("")
        }
    }

    /// First chunk of a turn that had no placeholder.
    pub fn streamed(agent_slug: &str, chunk: &str) -> Self {
        Self {
            role: Role::Assistant,
            text: chunk.to_string(),
            agent_slug: Some(agent_slug.to_string()),
            versions: vec![Version::new(agent_slug, chunk)],
            ..Self::user("")
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// An optimistic placeholder nobody has streamed into yet.
    pub fn is_unclaimed_placeholder(&self) -> bool {
        self.is_assistant()
            && self.id.is_none()
            && self.agent_slug.is_none()
            && self.text.is_empty()
            && self.versions.is_empty()
    }

    pub fn version(&self, agent_slug: &str) -> Option<&Version> {
        self.versions.iter().find(|v| v.agent_slug == agent_slug)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Conversation {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: String::new(),
            messages: Vec::new(),
            tags: BTreeSet::new(),
        }
    }
}
