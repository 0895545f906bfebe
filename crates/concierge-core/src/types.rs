use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// The closed set of intents a message can be routed to.
///
/// `Default` is the catch-all used when no other label applies or when
/// both classifier tiers fail to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Faq,
    ProductInquiry,
    SmallTalk,
    Default,
}

impl IntentLabel {
    /// Every label, in lexicographic order of its wire name.
    pub const ALL: [IntentLabel; 4] = [
        IntentLabel::Default,
        IntentLabel::Faq,
        IntentLabel::ProductInquiry,
        IntentLabel::SmallTalk,
    ];

    /// Wire name of the label (`faq`, `product_inquiry`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::Faq => "faq",
            IntentLabel::ProductInquiry => "product_inquiry",
            IntentLabel::SmallTalk => "small_talk",
            IntentLabel::Default => "default",
        }
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IntentLabel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "faq" => Ok(IntentLabel::Faq),
            "product_inquiry" => Ok(IntentLabel::ProductInquiry),
            "small_talk" => Ok(IntentLabel::SmallTalk),
            "default" => Ok(IntentLabel::Default),
            _ => Err(format!("Unknown intent label: {}", s)),
        }
    }
}

/// Which classifier tier committed to a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Fast,
    Fallback,
}

impl fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationSource::Fast => write!(f, "fast"),
            ClassificationSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Outcome of a classification attempt.
///
/// `Ambiguous` is only produced by the fast tier and is resolved by the
/// fallback tier before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationResult {
    Confident {
        label: IntentLabel,
        source: ClassificationSource,
    },
    Ambiguous,
}

impl ClassificationResult {
    pub fn fast(label: IntentLabel) -> Self {
        ClassificationResult::Confident {
            label,
            source: ClassificationSource::Fast,
        }
    }

    pub fn fallback(label: IntentLabel) -> Self {
        ClassificationResult::Confident {
            label,
            source: ClassificationSource::Fallback,
        }
    }

    /// The committed label, if any.
    pub fn label(&self) -> Option<IntentLabel> {
        match self {
            ClassificationResult::Confident { label, .. } => Some(*label),
            ClassificationResult::Ambiguous => None,
        }
    }
}

// =============================================================================
// Conversation types
// =============================================================================

/// One message in a conversation. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Position within the conversation, assigned by the store (0-based).
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// A turn that has not been stored yet. The store assigns its sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTurn {
    pub role: Role,
    pub content: String,
}

impl NewTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Materialize into a stored turn at the given position.
    pub fn into_turn(self, sequence: u64, created_at: DateTime<Utc>) -> Turn {
        Turn {
            role: self.role,
            content: self.content,
            sequence,
            created_at,
        }
    }
}

/// Per-call routing context, built once per inbound message.
#[derive(Debug, Clone)]
pub struct RoutedRequest {
    pub conversation_id: String,
    pub raw_text: String,
    pub history: Vec<Turn>,
}

impl RoutedRequest {
    pub fn new(conversation_id: impl Into<String>, raw_text: impl Into<String>, history: Vec<Turn>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            raw_text: raw_text.into(),
            history,
        }
    }
}

/// Render turns as `role: content` lines, oldest first.
///
/// Used when prompting language models with prior context.
pub fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}
