use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::NotASession;

pub const SESSION_FIELDS: &[&str] = &["model", "size", "history", "usage"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub history: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Session {
    /// Size tag when the session recorded a non-empty one.
    pub fn declared_size(&self) -> Option<&str> {
        self.size.as_deref().filter(|size| !size.is_empty())
    }

    /// A "turn" is a user message plus the model reply; a trailing unanswered
    /// message still counts.
    pub fn turn_count(&self) -> usize {
        self.history.len().div_ceil(2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// Visible text parts joined by newlines. Thoughts and binary parts are
    /// left out.
    pub fn visible_text(&self) -> String {
        self.parts
            .iter()
            .filter(|part| part.inline_data.is_none() && !part.thought)
            .filter_map(|part| part.text.as_deref())
            .filter(|text| !text.is_empty())
            .collect::<Vec<&str>>()
            .join("\n")
    }
}

/// One message part in the backend's wire shape. Fields this tool does not
/// interpret are kept in `extra` so a rewritten session loses nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub thought: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn image(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            inline_data: Some(Blob {
                mime_type: mime_type.into(),
                data: BASE64.encode(bytes),
            }),
            ..Self::default()
        }
    }

    pub fn is_signed(&self) -> bool {
        self.thought_signature
            .as_deref()
            .is_some_and(|signature| !signature.is_empty())
    }

    pub fn has_image_data(&self) -> bool {
        self.inline_data
            .as_ref()
            .is_some_and(|blob| !blob.data.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    /// Base64 payload, as the backend sends it.
    #[serde(default)]
    pub data: String,
}

impl Blob {
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.data.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub candidate_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Counters come from user-editable files, so sums saturate.
    pub fn combine(self, other: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            candidate_tokens: self.candidate_tokens.saturating_add(other.candidate_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Unknown top-level fields are ignored.
    Lenient,
    /// Unknown top-level fields reject the document.
    Strict,
}

#[derive(Debug)]
pub enum DecodeError {
    Syntax(serde_json::Error),
    NotASession(NotASession),
    Shape(serde_json::Error),
}

/// Decodes a session document in two passes: first as untyped JSON so a
/// missing `history` or a stray field can be told apart from a syntax error,
/// then into the typed schema.
pub fn decode_session(raw: &[u8], strictness: Strictness) -> Result<Session, DecodeError> {
    let document: Value = serde_json::from_slice(raw).map_err(DecodeError::Syntax)?;
    let Value::Object(fields) = document else {
        return Err(DecodeError::NotASession(NotASession::NotAnObject));
    };

    if strictness == Strictness::Strict {
        if let Some(unknown) = fields
            .keys()
            .find(|key| !SESSION_FIELDS.contains(&key.as_str()))
        {
            return Err(DecodeError::NotASession(NotASession::UnknownField(
                unknown.clone(),
            )));
        }
    }

    if fields.get("history").map_or(true, Value::is_null) {
        return Err(DecodeError::NotASession(NotASession::MissingHistory));
    }

    serde_json::from_value(Value::Object(fields)).map_err(DecodeError::Shape)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn usage_combine_saturates() {
        let stored = Usage {
            prompt_tokens: u64::MAX,
            candidate_tokens: 5,
            total_tokens: u64::MAX - 1,
        };
        let call = Usage {
            prompt_tokens: 1,
            candidate_tokens: 7,
            total_tokens: 8,
        };
        assert_eq!(
            stored.combine(call),
            Usage {
                prompt_tokens: u64::MAX,
                candidate_tokens: 12,
                total_tokens: u64::MAX,
            }
        );
    }

    #[test]
    fn decode_reads_backend_wire_shape() -> anyhow::Result<()> {
        let raw = json!({
            "model": "flash-3.1",
            "size": "2K",
            "history": [
                {"role": "user", "parts": [{"text": "a cat"}]},
                {"role": "model", "parts": [
                    {"text": "thinking", "thought": true},
                    {"inlineData": {"mimeType": "image/png", "data": "aW1n"}, "thoughtSignature": "c2ln"}
                ]}
            ],
            "usage": {"prompt_tokens": 10, "candidate_tokens": 20, "total_tokens": 30}
        })
        .to_string();

        let session = match decode_session(raw.as_bytes(), Strictness::Strict) {
            Ok(session) => session,
            Err(err) => anyhow::bail!("decode failed: {err:?}"),
        };
        assert_eq!(session.model, "flash-3.1");
        assert_eq!(session.declared_size(), Some("2K"));
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[1].role, Role::Model);
        assert!(session.history[1].parts[0].thought);
        assert!(session.history[1].parts[1].is_signed());
        assert_eq!(
            session.history[1].parts[1]
                .inline_data
                .as_ref()
                .map(Blob::decode)
                .transpose()?,
            Some(b"img".to_vec())
        );
        assert_eq!(session.usage.map(|usage| usage.total_tokens), Some(30));
        Ok(())
    }

    #[test]
    fn decode_classifies_failures() {
        assert!(matches!(
            decode_session(b"{not json", Strictness::Lenient),
            Err(DecodeError::Syntax(_))
        ));
        assert!(matches!(
            decode_session(br#"{"model":"flash"}"#, Strictness::Lenient),
            Err(DecodeError::NotASession(NotASession::MissingHistory))
        ));
        assert!(matches!(
            decode_session(br#"{"model":"flash","history":null}"#, Strictness::Lenient),
            Err(DecodeError::NotASession(NotASession::MissingHistory))
        ));
        assert!(matches!(
            decode_session(b"[1,2]", Strictness::Lenient),
            Err(DecodeError::NotASession(NotASession::NotAnObject))
        ));
        assert!(matches!(
            decode_session(br#"{"history":"nope"}"#, Strictness::Lenient),
            Err(DecodeError::Shape(_))
        ));
    }

    #[test]
    fn strict_decode_rejects_unknown_top_level_field() {
        let raw = br#"{"model":"flash","history":[],"extra":true}"#;
        assert!(matches!(
            decode_session(raw, Strictness::Strict),
            Err(DecodeError::NotASession(NotASession::UnknownField(field))) if field == "extra"
        ));
        assert!(decode_session(raw, Strictness::Lenient).is_ok());
    }

    #[test]
    fn unknown_part_fields_survive_a_rewrite() -> anyhow::Result<()> {
        let raw = br#"{"model":"","history":[{"role":"model","parts":[{"text":"hi","videoMetadata":{"fps":2}}]}]}"#;
        let session = match decode_session(raw, Strictness::Lenient) {
            Ok(session) => session,
            Err(err) => anyhow::bail!("decode failed: {err:?}"),
        };
        let written = serde_json::to_value(&session)?;
        assert_eq!(
            written["history"][0]["parts"][0],
            json!({"text": "hi", "videoMetadata": {"fps": 2}})
        );
        assert!(written.get("size").is_none());
        assert!(written.get("usage").is_none());
        Ok(())
    }

    #[test]
    fn turn_count_rounds_up_pairs() {
        let mut session = Session {
            model: String::new(),
            size: None,
            history: Vec::new(),
            usage: None,
        };
        let counts = [0usize, 1, 1, 2, 2];
        for expected in counts {
            assert_eq!(session.turn_count(), expected);
            session.history.push(Turn::new(Role::User, Vec::new()));
        }
    }

    #[test]
    fn visible_text_skips_thoughts_and_images() {
        let turn = Turn::new(
            Role::Model,
            vec![
                Part {
                    text: Some("plan".to_string()),
                    thought: true,
                    ..Part::default()
                },
                Part::text("Here is"),
                Part::image("image/png", b"png"),
                Part::text(""),
                Part::text("your cat"),
            ],
        );
        assert_eq!(turn.visible_text(), "Here is\nyour cat");
    }
}
