use super::{Event, SignatureVerifier};
use serde_json::{Map, Value};
use std::fmt;

/// Validation errors for incoming events
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Malformed event shape (missing or wrongly typed field)
    Schema(&'static str),
    /// `id` does not match the recomputed canonical hash
    HashMismatch,
    /// Signature did not verify against `id` and `pubkey`
    Signature(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Schema(reason) => write!(f, "invalid: {}", reason),
            ValidationError::HashMismatch => write!(f, "invalid: event id does not match hash"),
            ValidationError::Signature(reason) => write!(f, "invalid: bad signature ({})", reason),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates a raw event object and converts it into an [`Event`].
///
/// Checks run in order and stop at the first failure:
/// - the value is a JSON object
/// - `pubkey`, `sig`, `id`, `content` are strings
/// - `kind`, `created_at` are integers
/// - `tags` is an array of arrays of strings
/// - `id` equals the recomputed canonical hash
/// - the signature verifies, when a verifier is supplied
///
/// Passing `None` for `verifier` disables signature checking.
pub fn validate(
    value: &Value,
    verifier: Option<&dyn SignatureVerifier>,
) -> Result<Event, ValidationError> {
    let obj = value
        .as_object()
        .ok_or(ValidationError::Schema("not an object"))?;

    let pubkey = string_field(obj, "pubkey", "pubkey must be a string")?;
    let sig = string_field(obj, "sig", "sig must be a string")?;
    let id = string_field(obj, "id", "id must be a string")?;
    let content = string_field(obj, "content", "content must be a string")?;

    let kind = obj
        .get("kind")
        .and_then(Value::as_u64)
        .ok_or(ValidationError::Schema("kind must be a non-negative integer"))?;
    let created_at = obj
        .get("created_at")
        .and_then(Value::as_i64)
        .ok_or(ValidationError::Schema("created_at must be an integer"))?;

    let tags = parse_tags(obj.get("tags"))?;

    let event = Event {
        id,
        pubkey,
        created_at,
        kind,
        tags,
        content,
        sig,
    };

    if event.compute_id() != event.id {
        return Err(ValidationError::HashMismatch);
    }

    if let Some(verifier) = verifier {
        match verifier.verify(&event.id, &event.pubkey, &event.sig) {
            Ok(true) => {}
            Ok(false) => return Err(ValidationError::Signature("verification failed".into())),
            Err(e) => return Err(ValidationError::Signature(e)),
        }
    }

    Ok(event)
}

fn string_field(
    obj: &Map<String, Value>,
    key: &str,
    reason: &'static str,
) -> Result<String, ValidationError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ValidationError::Schema(reason))
}

fn parse_tags(value: Option<&Value>) -> Result<Vec<Vec<String>>, ValidationError> {
    let outer = value
        .and_then(Value::as_array)
        .ok_or(ValidationError::Schema("tags must be an array"))?;

    outer
        .iter()
        .map(|tag| {
            tag.as_array()
                .ok_or(ValidationError::Schema("each tag must be an array"))?
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or(ValidationError::Schema("tag items must be strings"))
                })
                .collect()
        })
        .collect()
}
