// parley-protocol: framed JSON-RPC message types and serialization.
//
// Every frame on the wire is a 5-byte header followed by a JSON payload:
//
// ```text
// ┌───────────────┬────────────────────┬────────────────────────┐
// │ Type (1 byte) │ Length (4 bytes)   │ JSON payload (N bytes) │
// │ 0 / 1 / 2     │ Big-endian u32     │ UTF-8 encoded          │
// └───────────────┴────────────────────┴────────────────────────┘
// ```
//
// The payload is always a JSON object.  Requests carry `id`, `method`,
// `params`; responses carry `id` plus `result` or `error`; pushes carry
// `id = 0` and an event body under `push`.  All of them carry an advisory
// `timestamp` (seconds since the Unix epoch) filled at build time.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Frame layout
// ---------------------------------------------------------------------------

/// Size of the message-type field, in bytes.
pub const TYPE_FIELD_SIZE: usize = 1;
/// Size of the payload-length field, in bytes.
pub const LENGTH_FIELD_SIZE: usize = 4;
/// Total header size: type byte + big-endian length.
pub const HEADER_SIZE: usize = TYPE_FIELD_SIZE + LENGTH_FIELD_SIZE;

/// Maximum payload size (1 MiB) enforced on the server read path.
pub const MAX_PAYLOAD: usize = 1024 * 1024;

/// Discriminator for the three message shapes, encoded as the header's
/// first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client → server: `id`, `method`, `params`.
    Request = 0,
    /// Server → client: `id` plus `result` or `error`.
    Response = 1,
    /// Server → client, unsolicited: `id = 0`, event body under `push`.
    Push = 2,
}

impl TryFrom<u8> for MessageType {
    type Error = FrameError;

    fn try_from(byte: u8) -> Result<Self, FrameError> {
        match byte {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::Push),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// Errors in the fixed-size frame header.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unknown message type byte: {0:#04x}")]
    UnknownType(u8),
    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Errors turning a payload into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema violation: {0}")]
    SchemaViolation(&'static str),
}

/// Build the 5-byte header for a payload of `len` bytes.
pub fn encode_header(kind: MessageType, len: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = kind as u8;
    header[TYPE_FIELD_SIZE..].copy_from_slice(&len.to_be_bytes());
    header
}

/// Split a header into its message type and payload length.
///
/// The length is not range-checked here; oversize policy belongs to the
/// reader, which knows its own limit.
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<(MessageType, u32), FrameError> {
    let kind = MessageType::try_from(header[0])?;
    let len = u32::from_be_bytes(
        header[TYPE_FIELD_SIZE..]
            .try_into()
            .expect("header slice is exactly LENGTH_FIELD_SIZE bytes"),
    );
    Ok((kind, len))
}

// ---------------------------------------------------------------------------
// Error codes (client-visible)
// ---------------------------------------------------------------------------

/// JSON-RPC error codes carried in response `error` objects.
pub mod error_codes {
    /// Wrong message type at dispatch, or missing `method`.
    pub const INVALID_REQUEST: i32 = -32600;
    /// No handler registered under the requested method name.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// A handler failed for any reason other than a JSON-shape error.
    pub const SERVER_ERROR: i32 = -32000;
    /// A handler rejected the shape of `params`.
    pub const JSON_SHAPE: i32 = -32001;
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A typed envelope around a JSON body.
///
/// The body is kept as a raw [`Value`]: handlers and the router work on
/// dynamic JSON, matching the wire format exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageType,
    pub body: Value,
}

impl Message {
    /// Build a Request.  The caller chooses `id`; ids start at 1, 0 is
    /// reserved for pushes.
    pub fn request(id: u32, method: &str, params: Value) -> Self {
        Message {
            kind: MessageType::Request,
            body: json!({
                "id": id,
                "method": method,
                "params": params,
                "timestamp": unix_timestamp(),
            }),
        }
    }

    /// Build a success Response for the request `id`.
    pub fn response(id: u32, result: Value) -> Self {
        Message {
            kind: MessageType::Response,
            body: json!({
                "id": id,
                "result": result,
                "timestamp": unix_timestamp(),
            }),
        }
    }

    /// Build an error Response for the request `id`.
    pub fn error(id: u32, code: i32, message: &str) -> Self {
        Message {
            kind: MessageType::Response,
            body: json!({
                "id": id,
                "error": { "code": code, "message": message },
                "timestamp": unix_timestamp(),
            }),
        }
    }

    /// Build a Push carrying `body` under the `push` key.  Pushes always
    /// use `id = 0`.
    pub fn push(body: Value) -> Self {
        Message {
            kind: MessageType::Push,
            body: json!({
                "id": 0,
                "push": body,
                "timestamp": unix_timestamp(),
            }),
        }
    }

    /// Encode to wire bytes: header plus pretty-printed JSON payload.
    ///
    /// Four-space indentation is a convention of this protocol, not a
    /// requirement — peers must accept any valid JSON.
    pub fn encode(&self) -> Vec<u8> {
        let body = to_pretty_bytes(&self.body);
        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(&encode_header(
            self.kind,
            u32::try_from(body.len()).expect("payload length fits in u32"),
        ));
        out.extend_from_slice(&body);
        out
    }

    /// Decode a payload whose type is already known from the header.
    ///
    /// The payload must parse as a JSON object carrying a numeric `id`.
    /// Presence of `method` is deliberately not checked here: an id-bearing
    /// request without a method is answered by the router with `-32600`
    /// rather than tearing the connection down.
    pub fn decode(kind: MessageType, payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::SchemaViolation("empty payload"));
        }
        let body: Value = serde_json::from_slice(payload)?;
        if !body.is_object() {
            return Err(DecodeError::SchemaViolation("payload is not a JSON object"));
        }
        if !body.get("id").is_some_and(Value::is_u64) {
            return Err(DecodeError::SchemaViolation("missing or non-numeric id"));
        }
        Ok(Message { kind, body })
    }

    /// The message id; 0 for pushes (and for malformed bodies, by the
    /// decode contract the id is always present on decoded messages).
    pub fn id(&self) -> u32 {
        self.body
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
            .unwrap_or(0)
    }

    /// The method name of a request, if present and non-empty.
    pub fn method(&self) -> Option<&str> {
        self.body
            .get("method")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
    }

    /// The request params, defaulting to an empty object.
    pub fn params(&self) -> Value {
        self.body
            .get("params")
            .cloned()
            .unwrap_or_else(|| json!({}))
    }

    /// The response result, defaulting to an empty object.
    pub fn result(&self) -> Value {
        self.body
            .get("result")
            .cloned()
            .unwrap_or_else(|| json!({}))
    }

    /// The response error object, if this is an error response.
    pub fn error_body(&self) -> Option<&Value> {
        self.body.get("error")
    }

    /// The push event body, defaulting to an empty object.
    pub fn push_body(&self) -> Value {
        self.body.get("push").cloned().unwrap_or_else(|| json!({}))
    }

    pub fn timestamp(&self) -> u64 {
        self.body
            .get("timestamp")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

/// Seconds since the Unix epoch.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn to_pretty_bytes(value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .expect("serializing a Value into a Vec cannot fail");
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_all_types() {
        for (kind, byte) in [
            (MessageType::Request, 0u8),
            (MessageType::Response, 1u8),
            (MessageType::Push, 2u8),
        ] {
            let header = encode_header(kind, 0xDEAD_BEEF);
            assert_eq!(header[0], byte);
            let (decoded, len) = decode_header(&header).unwrap();
            assert_eq!(decoded, kind);
            assert_eq!(len, 0xDEAD_BEEF);
        }
    }

    #[test]
    fn header_length_is_big_endian() {
        let header = encode_header(MessageType::Request, 258);
        assert_eq!(&header[1..], &[0, 0, 1, 2]);
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        let mut header = encode_header(MessageType::Push, 4);
        header[0] = 7;
        assert!(matches!(
            decode_header(&header),
            Err(FrameError::UnknownType(7))
        ));
    }

    #[test]
    fn encode_decode_round_trip() {
        let msg = Message::request(42, "ping", json!({"k": "v"}));
        let bytes = msg.encode();

        let header: [u8; HEADER_SIZE] = bytes[..HEADER_SIZE].try_into().unwrap();
        let (kind, len) = decode_header(&header).unwrap();
        assert_eq!(kind, MessageType::Request);
        assert_eq!(len as usize, bytes.len() - HEADER_SIZE);

        let decoded = Message::decode(kind, &bytes[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded.body, msg.body);
    }

    #[test]
    fn length_prefix_matches_body_bytes() {
        for msg in [
            Message::response(1, json!({})),
            Message::push(json!({"event": "user_joined", "uid": 3, "name": "alice"})),
            Message::error(9, error_codes::SERVER_ERROR, "boom"),
        ] {
            let bytes = msg.encode();
            let header: [u8; HEADER_SIZE] = bytes[..HEADER_SIZE].try_into().unwrap();
            let (_, len) = decode_header(&header).unwrap();
            assert_eq!(len as usize, bytes.len() - HEADER_SIZE);
        }
    }

    #[test]
    fn request_builder_shape() {
        let msg = Message::request(7, "login", json!({"name": "alice"}));
        assert_eq!(msg.kind, MessageType::Request);
        assert_eq!(msg.id(), 7);
        assert_eq!(msg.method(), Some("login"));
        assert_eq!(msg.params(), json!({"name": "alice"}));
        assert!(msg.timestamp() > 0);
    }

    #[test]
    fn error_builder_nests_code_and_message() {
        let msg = Message::error(3, error_codes::METHOD_NOT_FOUND, "Method not found: nope");
        let err = msg.error_body().unwrap();
        assert_eq!(err["code"], error_codes::METHOD_NOT_FOUND);
        assert_eq!(err["message"], "Method not found: nope");
        assert!(msg.body.get("result").is_none());
    }

    #[test]
    fn push_always_uses_id_zero() {
        let msg = Message::push(json!({"event": "user_left", "uid": 12}));
        assert_eq!(msg.id(), 0);
        assert_eq!(msg.push_body()["event"], "user_left");
    }

    #[test]
    fn empty_payload_is_schema_violation() {
        assert!(matches!(
            Message::decode(MessageType::Request, b""),
            Err(DecodeError::SchemaViolation(_))
        ));
    }

    #[test]
    fn non_object_payload_is_schema_violation() {
        assert!(matches!(
            Message::decode(MessageType::Request, b"[1, 2, 3]"),
            Err(DecodeError::SchemaViolation(_))
        ));
    }

    #[test]
    fn missing_id_is_schema_violation() {
        assert!(matches!(
            Message::decode(MessageType::Request, br#"{"method": "ping"}"#),
            Err(DecodeError::SchemaViolation(_))
        ));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        assert!(matches!(
            Message::decode(MessageType::Push, b"{not json"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn decode_accepts_compact_json() {
        // Encoding is pretty-printed; decoding must accept any valid JSON.
        let decoded = Message::decode(MessageType::Response, br#"{"id":5,"result":{"msg":"pong"}}"#)
            .unwrap();
        assert_eq!(decoded.id(), 5);
        assert_eq!(decoded.result(), json!({"msg": "pong"}));
    }

    #[test]
    fn result_and_push_default_to_empty_objects() {
        let msg = Message::decode(MessageType::Response, br#"{"id": 1}"#).unwrap();
        assert_eq!(msg.result(), json!({}));
        let msg = Message::decode(MessageType::Push, br#"{"id": 0}"#).unwrap();
        assert_eq!(msg.push_body(), json!({}));
    }
}
