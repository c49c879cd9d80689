use crate::event::Event;
use crate::filter::Filter;
use serde_json::{json, Value};
use std::fmt;

/// Frame decoding failures. These are logged and never answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    NotJson(String),
    NotArray,
    UnknownType(String),
    /// REQ without a subscription id or without any filter object
    MalformedRequest,
    /// CLOSE without a subscription id
    MalformedClose,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::NotJson(e) => write!(f, "frame is not valid JSON: {}", e),
            ProtocolError::NotArray => write!(f, "frame must be an array starting with a type string"),
            ProtocolError::UnknownType(t) => write!(f, "unknown frame type '{}'", t),
            ProtocolError::MalformedRequest => {
                write!(f, "REQ needs a subscription id and at least one filter object")
            }
            ProtocolError::MalformedClose => write!(f, "CLOSE needs a subscription id"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Client → Relay frames
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["EVENT", event]`; the event is validated by the engine
    Event(Value),
    /// `["REQ", subId, filter...]`
    Req { sub_id: String, filters: Vec<Filter> },
    /// `["CLOSE", subId]`
    Close(String),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::NotJson(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Array(mut items) = value else {
            return Err(ProtocolError::NotArray);
        };
        let kind = match items.first() {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(ProtocolError::NotArray),
        };

        match kind.as_str() {
            "EVENT" => {
                // A missing event becomes null and fails validation with a reply
                let event = if items.len() > 1 {
                    items.swap_remove(1)
                } else {
                    Value::Null
                };
                Ok(ClientMessage::Event(event))
            }
            "REQ" => {
                let sub_id = non_empty_str(items.get(1)).ok_or(ProtocolError::MalformedRequest)?;
                let filters: Vec<Filter> = items
                    .iter()
                    .skip(2)
                    .filter_map(Filter::from_value)
                    .collect();
                if filters.is_empty() {
                    return Err(ProtocolError::MalformedRequest);
                }
                Ok(ClientMessage::Req { sub_id, filters })
            }
            "CLOSE" => {
                let sub_id = non_empty_str(items.get(1)).ok_or(ProtocolError::MalformedClose)?;
                Ok(ClientMessage::Close(sub_id))
            }
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Relay → Client frames
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["OK", id-or-null, accepted, reason]`
    Ok {
        event_id: Option<String>,
        accepted: bool,
        message: String,
    },
    /// `["EVENT", subId, event]`
    Event { sub_id: String, event: Event },
    /// `["EOSE", subId]`
    Eose { sub_id: String },
}

impl RelayMessage {
    pub fn accepted(event_id: &str) -> Self {
        RelayMessage::Ok {
            event_id: Some(event_id.to_string()),
            accepted: true,
            message: String::new(),
        }
    }

    pub fn rejected(event_id: Option<String>, reason: impl Into<String>) -> Self {
        RelayMessage::Ok {
            event_id,
            accepted: false,
            message: reason.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            RelayMessage::Event { sub_id, event } => json!(["EVENT", sub_id, event]),
            RelayMessage::Eose { sub_id } => json!(["EOSE", sub_id]),
        }
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_frame() {
        let msg = ClientMessage::parse(r#"["EVENT", {"id": "x"}]"#).unwrap();
        assert_eq!(msg, ClientMessage::Event(json!({"id": "x"})));
    }

    #[test]
    fn test_event_frame_without_payload_carries_null() {
        let msg = ClientMessage::parse(r#"["EVENT"]"#).unwrap();
        assert_eq!(msg, ClientMessage::Event(Value::Null));
    }

    #[test]
    fn test_parse_req_keeps_only_filter_objects() {
        let msg =
            ClientMessage::parse(r##"["REQ", "s1", {"kinds": [1]}, 5, null, {"#t": ["x"]}]"##)
                .unwrap();
        match msg {
            ClientMessage::Req { sub_id, filters } => {
                assert_eq!(sub_id, "s1");
                assert_eq!(filters.len(), 2);
                assert!(filters[1].tag_criteria.contains_key("t"));
            }
            other => panic!("Expected Req, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_req_is_rejected() {
        for frame in [
            r#"["REQ"]"#,
            r#"["REQ", "s1"]"#,
            r#"["REQ", "", {}]"#,
            r#"["REQ", null, {}]"#,
            r#"["REQ", 7, {}]"#,
            r#"["REQ", "s1", "kinds"]"#,
        ] {
            assert_eq!(
                ClientMessage::parse(frame).unwrap_err(),
                ProtocolError::MalformedRequest,
                "frame {}",
                frame
            );
        }
    }

    #[test]
    fn test_parse_close() {
        assert_eq!(
            ClientMessage::parse(r#"["CLOSE", "s1"]"#).unwrap(),
            ClientMessage::Close("s1".into())
        );
        assert_eq!(
            ClientMessage::parse(r#"["CLOSE"]"#).unwrap_err(),
            ProtocolError::MalformedClose
        );
    }

    #[test]
    fn test_non_protocol_frames() {
        assert!(matches!(
            ClientMessage::parse("not json").unwrap_err(),
            ProtocolError::NotJson(_)
        ));
        assert_eq!(
            ClientMessage::parse(r#"{"type": "REQ"}"#).unwrap_err(),
            ProtocolError::NotArray
        );
        assert_eq!(ClientMessage::parse("[1, 2]").unwrap_err(), ProtocolError::NotArray);
        assert_eq!(
            ClientMessage::parse(r#"["AUTH", "x"]"#).unwrap_err(),
            ProtocolError::UnknownType("AUTH".into())
        );
    }

    #[test]
    fn test_relay_messages_encode_as_arrays() {
        assert_eq!(
            RelayMessage::accepted("abc").to_json(),
            r#"["OK","abc",true,""]"#
        );
        assert_eq!(
            RelayMessage::rejected(None, "invalid: not an object").to_json(),
            r#"["OK",null,false,"invalid: not an object"]"#
        );
        assert_eq!(
            RelayMessage::Eose { sub_id: "s1".into() }.to_json(),
            r#"["EOSE","s1"]"#
        );
    }
}
