//! Message model: the immutable `(body, sender, subject)` triple every scorer consumes.
//!
//! Construction never fails. Undecodable bodies and non-text payloads are normalized to empty
//! text and the problem is kept as a `MalformedInput` note so callers can still see it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Where the message came from. SMS has no sender/subject semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

/// Input problems that were normalized away instead of failing the request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MalformedInput {
    #[error("body is not valid UTF-8 (valid up to byte {valid_up_to} of {len})")]
    InvalidUtf8 { valid_up_to: usize, len: usize },
    #[error("{field} was not a text value")]
    NonText { field: String },
}

/// Immutable message handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub body: String,
    pub sender: String,
    pub subject: Option<String>,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<MalformedInput>,
}

impl Message {
    pub fn email(
        body: impl Into<String>,
        sender: impl Into<String>,
        subject: Option<impl Into<String>>,
    ) -> Self {
        Self {
            body: body.into(),
            sender: sender.into(),
            subject: subject.map(Into::into),
            channel: Channel::Email,
            notes: Vec::new(),
        }
    }

    pub fn sms(text: impl Into<String>) -> Self {
        Self {
            body: text.into(),
            sender: String::new(),
            subject: None,
            channel: Channel::Sms,
            notes: Vec::new(),
        }
    }

    /// Build an email from a raw body payload. Invalid UTF-8 yields an empty body plus a note.
    pub fn email_from_bytes(body: &[u8], sender: &str, subject: Option<&str>) -> Self {
        let mut msg = Self::email(String::new(), sender, subject);
        match std::str::from_utf8(body) {
            Ok(s) => msg.body = s.to_string(),
            Err(e) => {
                let note = MalformedInput::InvalidUtf8 {
                    valid_up_to: e.valid_up_to(),
                    len: body.len(),
                };
                warn!(error = %note, "malformed body normalized to empty text");
                msg.notes.push(note);
            }
        }
        msg
    }

    /// Subject with absent normalized to `""`.
    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    /// Record a normalization problem (builder style).
    pub fn with_note(mut self, note: MalformedInput) -> Self {
        self.notes.push(note);
        self
    }

    /// Text used by the lexical scorers: subject and body joined.
    pub fn scoring_text(&self) -> String {
        match self.subject() {
            "" => self.body.clone(),
            s => format!("{s}\n{}", self.body),
        }
    }
}

/// Coerce a loosely typed JSON field into text. Non-string payloads become `""` and a note.
pub fn text_or_empty(
    field: &str,
    value: Option<&serde_json::Value>,
    notes: &mut Vec<MalformedInput>,
) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(_) => {
            notes.push(MalformedInput::NonText {
                field: field.to_string(),
            });
            String::new()
        }
    }
}
