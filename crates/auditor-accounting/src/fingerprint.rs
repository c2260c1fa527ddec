//! Prompt fingerprints for waste detection.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Characters kept in a stored prompt preview
pub const PREVIEW_CHARS: usize = 200;

/// Hex characters shown for a fingerprint on the dashboard
pub const DISPLAY_HASH_CHARS: usize = 16;

/// Hash, preview, and size of one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptFingerprint {
    /// SHA-256 hex of `"{model}:{content}"`
    pub hash: String,
    /// First [`PREVIEW_CHARS`] characters of the content
    pub preview: String,
    /// Content length in characters
    pub chars: u32,
}

impl PromptFingerprint {
    /// Fingerprint the `messages` array of a chat request
    #[must_use]
    pub fn from_messages(model: &str, messages: &Value) -> Self {
        Self::from_content(model, &message_content(messages))
    }

    /// Fingerprint already-extracted prompt text
    #[must_use]
    pub fn from_content(model: &str, content: &str) -> Self {
        let chars = content.chars().count();
        Self {
            hash: fingerprint(model, content),
            preview: content.chars().take(PREVIEW_CHARS).collect(),
            chars: u32::try_from(chars).unwrap_or(u32::MAX),
        }
    }

    /// Rough token estimate used for pre-flight limit checks
    #[must_use]
    pub fn estimated_tokens(&self) -> u64 {
        estimate_tokens(self.chars as usize)
    }
}

/// SHA-256 hex digest of `"{model}:{content}"`
#[must_use]
pub fn fingerprint(model: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b":");
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Roughly four characters per token
#[must_use]
pub fn estimate_tokens(chars: usize) -> u64 {
    (chars / 4) as u64
}

/// Truncated fingerprint for display
#[must_use]
pub fn display_hash(hash: &str) -> String {
    let prefix: String = hash.chars().take(DISPLAY_HASH_CHARS).collect();
    format!("{prefix}...")
}

/// Join the textual content of chat messages with single spaces.
///
/// String contents are taken as-is; structured contents contribute the
/// `text` of each text part. Anything else is skipped.
#[must_use]
pub fn message_content(messages: &Value) -> String {
    let Some(messages) = messages.as_array() else {
        return String::new();
    };

    messages
        .iter()
        .filter_map(|message| message.get("content"))
        .filter_map(content_text)
        .collect::<Vec<_>>()
        .join(" ")
}

fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join(" "))
            }
        }
        _ => None,
    }
}
