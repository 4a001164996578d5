//! Codec for framed message serialization
//!
//! Encodes [`Frame`] values to the bytes that travel as binary WebSocket
//! messages and decodes inbound bytes back into frames. This module is the
//! only place the envelope's byte representation is chosen; everything above
//! it works with typed frames.
//!
//! Malformed inbound bytes decode to a `DecodeFailure`; the session layer
//! logs and drops such frames rather than failing the connection.

use crate::error::{Error, Result};
use crate::types::{Frame, RequestId, SessionId};

/// Encode a frame to its wire bytes
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    serde_json::to_vec(frame).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode wire bytes into a frame
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    serde_json::from_slice(bytes).map_err(|e| Error::DecodeFailure(e.to_string()))
}

/// Encode a request in one step
///
/// Convenience for callers that hold the pieces rather than a built frame.
pub fn encode_request(
    op: &str,
    body: serde_json::Value,
    request_id: RequestId,
    session_id: Option<SessionId>,
) -> Result<Vec<u8>> {
    encode(&Frame::request(session_id, request_id, op, body))
}

/// Decode a typed value out of a frame body
///
/// Returns `None` when the body does not match `T`; callers decide whether
/// that is a logged drop (notifications) or a rejected future (replies).
pub fn body_as<T: serde::de::DeserializeOwned>(body: &serde_json::Value) -> Option<T> {
    serde_json::from_value(body.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ops, FrameKind, ReplyStatus, SessionCreateReplyBody, SubscriptionId};
    use serde_json::json;

    #[test]
    fn test_encode_decode_request() {
        let bytes = encode_request(
            "ping",
            json!({"echo": "hi"}),
            RequestId::from(3),
            Some(SessionId::from("S1")),
        )
        .unwrap();

        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.session_id, Some(SessionId::from("S1")));
        match frame.kind {
            FrameKind::Request(req) => {
                assert_eq!(req.op, "ping");
                assert_eq!(req.request_id, RequestId::from(3));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_reply() {
        let frame = Frame::reply(
            Some(SessionId::from("S1")),
            RequestId::from(9),
            ops::SESSION_CREATE,
            ReplyStatus::success(),
            json!({"session_id": "S1"}),
        );
        let bytes = encode(&frame).unwrap();
        let decoded = decode(&bytes).unwrap();

        match decoded.kind {
            FrameKind::Reply(reply) => {
                assert!(reply.status.is_success());
                let body: SessionCreateReplyBody = body_as(&reply.body).unwrap();
                assert_eq!(body.session_id, SessionId::from("S1"));
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_notification() {
        let frame = Frame::notification(
            Some(SessionId::from("S1")),
            SubscriptionId::from("sub-7"),
            "flow.update",
            json!({"value": 42}),
        );
        let bytes = encode(&frame).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert!(decoded.is_notification());
    }

    #[test]
    fn test_decode_garbage_is_decode_failure() {
        let result = decode(b"\x00\x01not a frame");
        match result {
            Err(Error::DecodeFailure(_)) => {}
            other => panic!("expected DecodeFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_wrong_shape_is_decode_failure() {
        let bytes = serde_json::to_vec(&json!({"kind": "reply"})).unwrap();
        assert!(matches!(decode(&bytes), Err(Error::DecodeFailure(_))));
    }

    #[test]
    fn test_body_as_mismatch_is_none() {
        let body = json!({"unexpected": true});
        let parsed: Option<SessionCreateReplyBody> = body_as(&body);
        assert!(parsed.is_none());
    }
}
