use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod signature;
mod validation;
#[cfg(test)]
mod tests;

pub use signature::{SchnorrVerifier, SignatureVerifier};
pub use validation::{validate, ValidationError};

/// Event represents an immutable signed record accepted by the relay.
///
/// The identifier is derived from the content: it is the hex SHA-256 of the
/// compact JSON array `[0, pubkey, created_at, kind, tags, content]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Hex-encoded SHA-256 of the canonical serialization
    pub id: String,

    /// Hex-encoded x-only public key of the author
    pub pubkey: String,

    /// Unix seconds (author time)
    pub created_at: i64,

    /// Event kind
    pub kind: u64,

    /// Ordered tag lists, e.g. `[["t", "rust"], ["p", "<pubkey>"]]`
    pub tags: Vec<Vec<String>>,

    /// Arbitrary content string
    pub content: String,

    /// Hex-encoded Schnorr signature over `id`
    pub sig: String,
}

impl Event {
    /// Recompute the canonical id from this event's fields.
    pub fn compute_id(&self) -> String {
        compute_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// First value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }
}

/// Canonical event id: `hex(sha256([0, pubkey, created_at, kind, tags, content]))`.
///
/// serde_json writes the tuple without whitespace and keeps tag order, which is
/// exactly the compact form the id commits to.
pub fn compute_event_id(
    pubkey: &str,
    created_at: i64,
    kind: u64,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    // Serializing strings, integers and string vectors cannot fail
    let serialized = serde_json::to_string(&(0, pubkey, created_at, kind, tags, content))
        .unwrap_or_default();
    hex::encode(Sha256::digest(serialized.as_bytes()))
}
