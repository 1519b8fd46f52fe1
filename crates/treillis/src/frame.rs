//! Request and response frames, their error payloads, and the control plane.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// A data frame exchanged between peers.
///
/// The two shapes share a `uid` correlating requests with responses; a frame
/// is classified by the presence of the `listener` field, which the untagged
/// representation preserves on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// Calls `listener` on the peer's provider with positional `parameters`.
    Request {
        uid: u64,
        listener: String,
        parameters: Vec<Value>,
    },
    /// Settles the request carrying the same `uid`.
    Response {
        uid: u64,
        success: bool,
        value: Value,
    },
}

impl Frame {
    /// The correlation id shared by both shapes.
    pub fn uid(&self) -> u64 {
        match self {
            Frame::Request { uid, .. } | Frame::Response { uid, .. } => *uid,
        }
    }
}

/// Control-plane literals multiplexed onto the same channel as data frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Accept,
    Reject,
    Close,
}

impl Control {
    pub const fn as_str(self) -> &'static str {
        match self {
            Control::Accept => "ACCEPT",
            Control::Reject => "REJECT",
            Control::Close => "CLOSE",
        }
    }

    /// Recognize a control literal; anything else is presumed data.
    pub fn recognize(text: &str) -> Option<Control> {
        match text {
            "ACCEPT" => Some(Control::Accept),
            "REJECT" => Some(Control::Reject),
            "CLOSE" => Some(Control::Close),
            _ => None,
        }
    }
}

/// A decoded text message from a channel carrying both planes.
#[derive(Debug, Clone)]
pub enum TextMessage {
    Control(Control),
    Data(Frame),
}

/// Decode a text message: known control literals first, structured data after.
pub fn parse_text(text: &str) -> Result<TextMessage, serde_json::Error> {
    if let Some(control) = Control::recognize(text) {
        return Ok(TextMessage::Control(control));
    }
    serde_json::from_str(text).map(TextMessage::Data)
}

/// Plain-data description of a failure reported to the peer.
///
/// `name` and `message` are dedicated fields so structured serialization
/// cannot drop them; any other enumerable fields the origin attached travel
/// alongside them in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    #[serde(flatten, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, Value>,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError {
            name: name.into(),
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }

    /// Attach an extra enumerable field.
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Interpret the failure payload of a response frame.
    ///
    /// Payloads without the error shape degrade to a generic name with the
    /// payload rendered into the message.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_else(|_| {
            let message = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            RemoteError::new("Error", message)
        })
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Conversion of positional arguments into wire parameter values.
///
/// Implemented for tuples of up to eight serializable values, and for
/// `Vec<Value>` as the pass-through form.
pub trait IntoParameters {
    fn into_parameters(self) -> Result<Vec<Value>, RpcError>;
}

impl IntoParameters for Vec<Value> {
    fn into_parameters(self) -> Result<Vec<Value>, RpcError> {
        Ok(self)
    }
}

impl IntoParameters for () {
    fn into_parameters(self) -> Result<Vec<Value>, RpcError> {
        Ok(Vec::new())
    }
}

macro_rules! tuple_parameters {
    ($($field:ident),+) => {
        impl<$($field: Serialize),+> IntoParameters for ($($field,)+) {
            #[allow(non_snake_case)]
            fn into_parameters(self) -> Result<Vec<Value>, RpcError> {
                let ($($field,)+) = self;
                let mut parameters = Vec::new();
                $(
                    parameters.push(
                        serde_json::to_value($field)
                            .map_err(|error| RpcError::Codec(error.to_string()))?,
                    );
                )+
                Ok(parameters)
            }
        }
    };
}

tuple_parameters!(P0);
tuple_parameters!(P0, P1);
tuple_parameters!(P0, P1, P2);
tuple_parameters!(P0, P1, P2, P3);
tuple_parameters!(P0, P1, P2, P3, P4);
tuple_parameters!(P0, P1, P2, P3, P4, P5);
tuple_parameters!(P0, P1, P2, P3, P4, P5, P6);
tuple_parameters!(P0, P1, P2, P3, P4, P5, P6, P7);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_by_listener_presence() {
        let request: Frame =
            serde_json::from_str(r#"{"uid":7,"listener":"a.b","parameters":[1,"x"]}"#).unwrap();
        assert_eq!(
            request,
            Frame::Request {
                uid: 7,
                listener: "a.b".to_owned(),
                parameters: vec![json!(1), json!("x")],
            }
        );

        let response: Frame =
            serde_json::from_str(r#"{"uid":7,"success":true,"value":5}"#).unwrap();
        assert_eq!(
            response,
            Frame::Response {
                uid: 7,
                success: true,
                value: json!(5),
            }
        );
    }

    #[test]
    fn frame_survives_the_wire() {
        let frame = Frame::Request {
            uid: 42,
            listener: "echo".to_owned(),
            parameters: vec![json!("hi")],
        };
        let text = serde_json::to_string(&frame).unwrap();
        let decoded: Frame = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn control_literals_take_precedence_over_data() {
        assert!(matches!(
            parse_text("CLOSE").unwrap(),
            TextMessage::Control(Control::Close)
        ));
        assert!(matches!(
            parse_text(r#"{"uid":1,"success":false,"value":null}"#).unwrap(),
            TextMessage::Data(Frame::Response { uid: 1, .. })
        ));
        assert!(parse_text("garbage").is_err());
    }

    #[test]
    fn error_fields_survive_round_trip() {
        let error = RemoteError::new("RangeError", "boom").detail("code", 42);
        let value = error.clone().into_value();
        assert_eq!(value["name"], json!("RangeError"));
        assert_eq!(value["message"], json!("boom"));
        assert_eq!(value["code"], json!(42));
        assert_eq!(RemoteError::from_value(value), error);
    }

    #[test]
    fn shapeless_failure_payload_degrades_gracefully() {
        let error = RemoteError::from_value(json!("just a string"));
        assert_eq!(error.name, "Error");
        assert_eq!(error.message, "just a string");
    }

    #[test]
    fn tuples_become_positional_parameters() {
        let parameters = (2, "three", true).into_parameters().unwrap();
        assert_eq!(parameters, vec![json!(2), json!("three"), json!(true)]);
        assert!(().into_parameters().unwrap().is_empty());
    }
}
