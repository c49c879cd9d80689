use crate::config::InfoConfig;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// NIP-11 media type
pub const NOSTR_JSON: &str = "application/nostr+json";

/// NIP-11 relay information document
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RelayInformation {
    pub name: String,
    pub description: String,
    /// Administrative contact pubkey (hex)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    pub supported_nips: Vec<u32>,
    pub software: String,
    pub version: String,
}

impl From<&InfoConfig> for RelayInformation {
    fn from(info: &InfoConfig) -> Self {
        Self {
            name: info.name.clone(),
            description: info.description.clone(),
            pubkey: info.pubkey.clone(),
            contact: info.contact.clone(),
            supported_nips: info.supported_nips.clone(),
            software: info.software.clone(),
            version: info.version.clone(),
        }
    }
}

impl Default for RelayInformation {
    fn default() -> Self {
        Self::from(&InfoConfig::default())
    }
}

impl RelayInformation {
    /// Render the document, echoing the NIP-11 media type if the client asked for it
    pub fn respond(&self, headers: &HeaderMap) -> Response {
        let content_type = if accepts(headers, NOSTR_JSON) {
            NOSTR_JSON
        } else {
            "application/json"
        };

        match serde_json::to_string(self) {
            Ok(body) => (
                [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode relay information");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// True if the `Accept` header mentions `media_type`
pub fn accepts(headers: &HeaderMap, media_type: &str) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains(media_type))
}
