//! Frame classification and the two-stage message codec.
//!
//! Stage one decodes the generic JSON-RPC envelope and classifies it by the
//! presence of `id` and `method`. Stage two dispatches on the method to
//! decode the concrete message variant. Unknown request methods surface as
//! method-not-found; unknown notification methods are dropped without reply.

use serde_json::Value;
use tracing::debug;

use crate::error::ProtocolError;
use crate::protocol::types::*;

/// Outcome of decoding one frame.
#[derive(Debug)]
pub enum Decoded {
    Message(ClientMessage),
    /// The frame was understood well enough to know it needs no reply.
    Dropped(&'static str),
}

/// A decode failure, with the request id when the envelope yielded one so
/// the dispatcher can address the error response.
#[derive(Debug)]
pub struct DecodeError {
    pub id: Option<RequestId>,
    pub error: ProtocolError,
}

impl DecodeError {
    fn new(id: Option<RequestId>, error: ProtocolError) -> Self {
        Self { id, error }
    }
}

/// Classifies a parsed JSON object by `id`/`method` presence.
pub fn classify(value: &Value) -> Option<MessageCategory> {
    let object = value.as_object()?;
    match (object.contains_key("id"), object.contains_key("method")) {
        (true, true) => Some(MessageCategory::Request),
        (true, false) => Some(MessageCategory::Response),
        (false, true) => Some(MessageCategory::Notification),
        (false, false) => None,
    }
}

/// Decodes one inbound frame into a typed message.
pub fn decode_frame(frame: &str) -> Result<Decoded, DecodeError> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|_| DecodeError::new(None, ProtocolError::ParseError))?;

    let Some(category) = classify(&value) else {
        return Err(DecodeError::new(None, ProtocolError::ParseError));
    };

    match category {
        MessageCategory::Request => decode_request(value),
        MessageCategory::Notification => Ok(decode_notification(&value)),
        MessageCategory::Response => Ok(Decoded::Message(ClientMessage::Response(value))),
    }
}

fn decode_request(value: Value) -> Result<Decoded, DecodeError> {
    let id = match serde_json::from_value::<RequestId>(value["id"].clone()) {
        Ok(id) if id.is_valid() => id,
        _ => {
            return Err(DecodeError::new(
                None,
                ProtocolError::InvalidRequest("request id must be an integer or a non-empty string".into()),
            ));
        }
    };

    let Some(method) = value["method"].as_str() else {
        return Err(DecodeError::new(
            Some(id),
            ProtocolError::ParseError,
        ));
    };

    let params = value.get("params").cloned().unwrap_or(Value::Null);
    let progress_token = params
        .get("_meta")
        .and_then(|meta| meta.get("progressToken"))
        .and_then(|token| serde_json::from_value::<ProgressToken>(token.clone()).ok());

    let request = match method {
        METHOD_INITIALIZE => {
            let params: InitializeParams = decode_params(params, &id)?;
            ClientRequest::Initialize(params)
        }
        METHOD_PING => ClientRequest::Ping,
        METHOD_TOOLS_LIST => {
            let params = if params.is_null() {
                ListToolsParams::default()
            } else {
                decode_params(params, &id)?
            };
            ClientRequest::ListTools(params)
        }
        METHOD_TOOLS_CALL => {
            let params: CallToolParams = decode_params(params, &id)?;
            ClientRequest::CallTool(params)
        }
        unknown => {
            return Err(DecodeError::new(
                Some(id),
                ProtocolError::MethodNotFound(unknown.to_string()),
            ));
        }
    };

    Ok(Decoded::Message(ClientMessage::Request(IncomingRequest {
        id,
        progress_token,
        request,
    })))
}

fn decode_params<T: serde::de::DeserializeOwned>(
    params: Value,
    id: &RequestId,
) -> Result<T, DecodeError> {
    serde_json::from_value(params).map_err(|e| {
        DecodeError::new(
            Some(id.clone()),
            ProtocolError::InvalidRequest(e.to_string().into()),
        )
    })
}

fn decode_notification(value: &Value) -> Decoded {
    // Notifications never get a reply: anything malformed is dropped.
    let Some(method) = value["method"].as_str() else {
        return Decoded::Dropped("notification method is not a string");
    };

    match method {
        METHOD_NOTIFICATION_INITIALIZED => {
            Decoded::Message(ClientMessage::Notification(ClientNotification::Initialized))
        }
        METHOD_NOTIFICATION_CANCELLED => {
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            match serde_json::from_value::<CancelledParams>(params) {
                Ok(params) => Decoded::Message(ClientMessage::Notification(
                    ClientNotification::Cancelled(params),
                )),
                Err(e) => {
                    debug!("Dropping malformed cancelled notification: {e}");
                    Decoded::Dropped("malformed cancelled notification")
                }
            }
        }
        _ => Decoded::Dropped("unknown notification method"),
    }
}

/// Serialises an outbound message to one wire frame. Every frame carries
/// `jsonrpc: "2.0"`.
pub fn encode(message: &ServerMessage) -> Result<String, serde_json::Error> {
    let value = match message {
        ServerMessage::Response { id, result } => serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "result": result,
        }),
        ServerMessage::Error { id, error } => serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "error": error,
        }),
        ServerMessage::Notification { method, params } => serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
            "params": params,
        }),
    };
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification() {
        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
        assert_eq!(classify(&request), Some(MessageCategory::Request));

        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        assert_eq!(classify(&response), Some(MessageCategory::Response));

        let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert_eq!(classify(&notification), Some(MessageCategory::Notification));

        assert_eq!(classify(&json!({"jsonrpc": "2.0"})), None);
        assert_eq!(classify(&json!([1, 2])), None);
    }

    #[test]
    fn test_decode_initialize() {
        let frame = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#;
        let decoded = decode_frame(frame).unwrap();
        let Decoded::Message(ClientMessage::Request(req)) = decoded else {
            panic!("expected request");
        };
        assert_eq!(req.id, RequestId::Number(1));
        let ClientRequest::Initialize(params) = req.request else {
            panic!("expected initialize");
        };
        assert_eq!(params.client_info.name, "t");
    }

    #[test]
    fn test_decode_initialize_missing_client_info() {
        let frame = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05"}}"#;
        let err = decode_frame(frame).unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(1)));
        assert_eq!(err.error.code(), -32600);
    }

    #[test]
    fn test_decode_unknown_request_method() {
        let frame = r#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#;
        let err = decode_frame(frame).unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(5)));
        assert!(matches!(err.error, ProtocolError::MethodNotFound(_)));
    }

    #[test]
    fn test_decode_unknown_notification_dropped() {
        let frame = r#"{"jsonrpc":"2.0","method":"notifications/roots/list_changed"}"#;
        assert!(matches!(
            decode_frame(frame).unwrap(),
            Decoded::Dropped(_)
        ));
    }

    #[test]
    fn test_decode_parse_error() {
        let err = decode_frame("{not json").unwrap_err();
        assert!(err.id.is_none());
        assert!(matches!(err.error, ProtocolError::ParseError));
    }

    #[test]
    fn test_decode_rejects_empty_string_id() {
        let frame = r#"{"jsonrpc":"2.0","id":"","method":"ping"}"#;
        let err = decode_frame(frame).unwrap_err();
        assert!(err.id.is_none());
        assert_eq!(err.error.code(), -32600);
    }

    #[test]
    fn test_decode_progress_token() {
        let frame = r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"echo","arguments":{},"_meta":{"progressToken":"tok-1"}}}"#;
        let Decoded::Message(ClientMessage::Request(req)) = decode_frame(frame).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(
            req.progress_token,
            Some(ProgressToken::String("tok-1".into()))
        );
    }

    #[test]
    fn test_decode_tools_list_without_params() {
        let frame = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
        let Decoded::Message(ClientMessage::Request(req)) = decode_frame(frame).unwrap() else {
            panic!("expected request");
        };
        let ClientRequest::ListTools(params) = req.request else {
            panic!("expected tools/list");
        };
        assert!(params.cursor.is_none());
    }

    #[test]
    fn test_decode_response_passthrough() {
        let frame = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        assert!(matches!(
            decode_frame(frame).unwrap(),
            Decoded::Message(ClientMessage::Response(_))
        ));
    }

    #[test]
    fn test_encode_error_shape() {
        let message = ServerMessage::error(
            RequestId::Number(9),
            &ProtocolError::InvalidRequest("wrong state".into()),
        );
        let frame = encode(&message).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc":"2.0","id":9,"error":{"code":-32600,"message":"invalid request"}})
        );
    }

    #[test]
    fn test_encode_decode_stability() {
        let message = ServerMessage::Response {
            id: RequestId::String("a".into()),
            result: json!({"tools": []}),
        };
        let first = encode(&message).unwrap();
        let reparsed: Value = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&reparsed).unwrap();
        let a: Value = serde_json::from_str(&first).unwrap();
        let b: Value = serde_json::from_str(&second).unwrap();
        assert_eq!(a, b);
    }
}
