//! Wire codec for coordinator ↔ node messages.
//!
//! Every frame starts with a discriminator string naming the message kind,
//! followed by its fields in declared order. No schema negotiation:
//!
//! - string: u16 big-endian byte length, then UTF-8 bytes
//! - bool: one byte, zero is false
//! - i64 / i32: big-endian
//!
//! An unknown discriminator decodes to `Ok(None)` so newer peers can add
//! kinds without breaking older ones. Structural faults are errors, which
//! receivers log and drop.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FleetProtocolError;
use crate::types::{NodeName, SessionId, STARTED};

const BACKUP_REQUEST: &str = "BackupRequest";
const STATUS_REQUEST: &str = "StatusRequest";
const BACKUP_RESPONSE: &str = "BackupResponse";
const STATUS_RESPONSE: &str = "StatusResponse";

/// The two logical channels between coordinator and nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Coordinator → node.
    Request,
    /// Node → coordinator.
    Response,
}

impl Channel {
    pub const fn name(&self) -> &'static str {
        match self {
            Channel::Request => "fleetbackup:request",
            Channel::Response => "fleetbackup:response",
        }
    }
}

/// Ask a node to run a backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    pub session_id: SessionId,
    /// Passed to the node unchanged (e.g. "world", "full").
    pub backup_kind: String,
}

/// Ask a node for its local backup state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRequest {
    pub session_id: SessionId,
}

/// A node's answer to a [`BackupRequest`]: either the `STARTED`
/// acknowledgment or the final outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupResponse {
    pub session_id: SessionId,
    pub node_name: NodeName,
    pub success: bool,
    pub message: String,
    pub duration_ms: i64,
    pub size_bytes: i64,
}

impl BackupResponse {
    /// The liveness acknowledgment sent before the backup runs.
    pub fn started(session_id: SessionId, node_name: NodeName) -> Self {
        Self {
            session_id,
            node_name,
            success: true,
            message: STARTED.to_string(),
            duration_ms: 0,
            size_bytes: 0,
        }
    }

    /// An immediate failure with no duration or size.
    pub fn failed(session_id: SessionId, node_name: NodeName, message: impl Into<String>) -> Self {
        Self {
            session_id,
            node_name,
            success: false,
            message: fit_field(message.into()),
            duration_ms: 0,
            size_bytes: 0,
        }
    }

    /// Whether this is the non-terminal `STARTED` sentinel.
    pub fn is_started(&self) -> bool {
        self.message == STARTED
    }
}

/// A node's answer to a [`StatusRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub session_id: SessionId,
    pub node_name: NodeName,
    pub api_available: bool,
    pub backup_running: bool,
    pub backup_count: i32,
}

/// Any message that can travel on either channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    BackupRequest(BackupRequest),
    StatusRequest(StatusRequest),
    BackupResponse(BackupResponse),
    StatusResponse(StatusResponse),
}

impl WireMessage {
    /// Discriminator written at the head of the frame.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::BackupRequest(_) => BACKUP_REQUEST,
            WireMessage::StatusRequest(_) => STATUS_REQUEST,
            WireMessage::BackupResponse(_) => BACKUP_RESPONSE,
            WireMessage::StatusResponse(_) => STATUS_RESPONSE,
        }
    }

    /// Channel this message kind travels on.
    pub fn channel(&self) -> Channel {
        match self {
            WireMessage::BackupRequest(_) | WireMessage::StatusRequest(_) => Channel::Request,
            WireMessage::BackupResponse(_) | WireMessage::StatusResponse(_) => Channel::Response,
        }
    }

    /// Serialize to a frame.
    pub fn encode(&self) -> Result<Bytes, FleetProtocolError> {
        let mut out = BytesMut::with_capacity(64);
        put_str(&mut out, "kind", self.kind())?;
        match self {
            WireMessage::BackupRequest(m) => {
                put_str(&mut out, "session_id", m.session_id.as_str())?;
                put_str(&mut out, "backup_kind", &m.backup_kind)?;
            }
            WireMessage::StatusRequest(m) => {
                put_str(&mut out, "session_id", m.session_id.as_str())?;
            }
            WireMessage::BackupResponse(m) => {
                put_str(&mut out, "session_id", m.session_id.as_str())?;
                put_str(&mut out, "node_name", &m.node_name)?;
                out.put_u8(m.success as u8);
                put_str(&mut out, "message", &m.message)?;
                out.put_i64(m.duration_ms);
                out.put_i64(m.size_bytes);
            }
            WireMessage::StatusResponse(m) => {
                put_str(&mut out, "session_id", m.session_id.as_str())?;
                put_str(&mut out, "node_name", &m.node_name)?;
                out.put_u8(m.api_available as u8);
                out.put_u8(m.backup_running as u8);
                out.put_i32(m.backup_count);
            }
        }
        Ok(out.freeze())
    }

    /// Parse a frame. `Ok(None)` means the discriminator is not one we know.
    pub fn decode(data: &[u8]) -> Result<Option<Self>, FleetProtocolError> {
        let mut buf = data;
        let kind = get_str(&mut buf, "kind")?;
        let message = match kind.as_str() {
            BACKUP_REQUEST => WireMessage::BackupRequest(BackupRequest {
                session_id: get_str(&mut buf, "session_id")?.into(),
                backup_kind: get_str(&mut buf, "backup_kind")?,
            }),
            STATUS_REQUEST => WireMessage::StatusRequest(StatusRequest {
                session_id: get_str(&mut buf, "session_id")?.into(),
            }),
            BACKUP_RESPONSE => WireMessage::BackupResponse(BackupResponse {
                session_id: get_str(&mut buf, "session_id")?.into(),
                node_name: get_str(&mut buf, "node_name")?,
                success: get_bool(&mut buf, "success")?,
                message: get_str(&mut buf, "message")?,
                duration_ms: get_i64(&mut buf, "duration_ms")?,
                size_bytes: get_i64(&mut buf, "size_bytes")?,
            }),
            STATUS_RESPONSE => WireMessage::StatusResponse(StatusResponse {
                session_id: get_str(&mut buf, "session_id")?.into(),
                node_name: get_str(&mut buf, "node_name")?,
                api_available: get_bool(&mut buf, "api_available")?,
                backup_running: get_bool(&mut buf, "backup_running")?,
                backup_count: get_i32(&mut buf, "backup_count")?,
            }),
            other => {
                tracing::debug!(kind = other, "ignoring unknown message kind");
                return Ok(None);
            }
        };

        if buf.has_remaining() {
            return Err(FleetProtocolError::TrailingBytes {
                remaining: buf.remaining(),
            });
        }
        Ok(Some(message))
    }

    /// Parse a frame received on `channel`, rejecting kinds that belong to
    /// the other channel.
    pub fn decode_on(channel: Channel, data: &[u8]) -> Result<Option<Self>, FleetProtocolError> {
        match Self::decode(data)? {
            Some(message) if message.channel() != channel => Err(FleetProtocolError::WrongChannel {
                kind: message.kind(),
            }),
            decoded => Ok(decoded),
        }
    }
}

impl From<BackupRequest> for WireMessage {
    fn from(m: BackupRequest) -> Self {
        WireMessage::BackupRequest(m)
    }
}

impl From<StatusRequest> for WireMessage {
    fn from(m: StatusRequest) -> Self {
        WireMessage::StatusRequest(m)
    }
}

impl From<BackupResponse> for WireMessage {
    fn from(m: BackupResponse) -> Self {
        WireMessage::BackupResponse(m)
    }
}

impl From<StatusResponse> for WireMessage {
    fn from(m: StatusResponse) -> Self {
        WireMessage::StatusResponse(m)
    }
}

// ── Field helpers ────────────────────────────────────────────────────

/// Cut `value` to the longest prefix that fits a string field, on a char
/// boundary.
pub fn fit_field(mut value: String) -> String {
    let max = usize::from(u16::MAX);
    if value.len() > max {
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

fn put_str(out: &mut BytesMut, field: &'static str, value: &str) -> Result<(), FleetProtocolError> {
    let len = u16::try_from(value.len()).map_err(|_| FleetProtocolError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    out.put_u16(len);
    out.put_slice(value.as_bytes());
    Ok(())
}

fn get_str(buf: &mut &[u8], field: &'static str) -> Result<String, FleetProtocolError> {
    if buf.remaining() < 2 {
        return Err(FleetProtocolError::Truncated { field });
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(FleetProtocolError::Truncated { field });
    }
    let text = std::str::from_utf8(&buf[..len])
        .map_err(|_| FleetProtocolError::InvalidUtf8 { field })?
        .to_string();
    buf.advance(len);
    Ok(text)
}

fn get_bool(buf: &mut &[u8], field: &'static str) -> Result<bool, FleetProtocolError> {
    if buf.remaining() < 1 {
        return Err(FleetProtocolError::Truncated { field });
    }
    Ok(buf.get_u8() != 0)
}

fn get_i64(buf: &mut &[u8], field: &'static str) -> Result<i64, FleetProtocolError> {
    if buf.remaining() < 8 {
        return Err(FleetProtocolError::Truncated { field });
    }
    Ok(buf.get_i64())
}

fn get_i32(buf: &mut &[u8], field: &'static str) -> Result<i32, FleetProtocolError> {
    if buf.remaining() < 4 {
        return Err(FleetProtocolError::Truncated { field });
    }
    Ok(buf.get_i32())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> BackupResponse {
        BackupResponse {
            session_id: "a1b2c3d4".into(),
            node_name: "lobby".into(),
            success: true,
            message: "SUCCESS".into(),
            duration_ms: 500,
            size_bytes: 1_048_576,
        }
    }

    #[test]
    fn request_layout_is_discriminator_then_fields() {
        let frame = WireMessage::from(BackupRequest {
            session_id: "abcd1234".into(),
            backup_kind: "world".into(),
        })
        .encode()
        .unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&13u16.to_be_bytes());
        expected.extend_from_slice(b"BackupRequest");
        expected.extend_from_slice(&8u16.to_be_bytes());
        expected.extend_from_slice(b"abcd1234");
        expected.extend_from_slice(&5u16.to_be_bytes());
        expected.extend_from_slice(b"world");
        assert_eq!(&frame[..], &expected[..]);
    }

    #[test]
    fn backup_response_roundtrip() {
        let msg = WireMessage::from(response());
        let frame = msg.encode().unwrap();
        assert_eq!(WireMessage::decode(&frame).unwrap(), Some(msg));
    }

    #[test]
    fn unknown_kind_is_ignored() {
        let mut out = BytesMut::new();
        put_str(&mut out, "kind", "PingRequest").unwrap();
        put_str(&mut out, "session_id", "whatever").unwrap();
        assert_eq!(WireMessage::decode(&out).unwrap(), None);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let frame = WireMessage::from(response()).encode().unwrap();
        let cut = &frame[..frame.len() - 3];
        let err = WireMessage::decode(cut).unwrap_err();
        assert!(matches!(
            err,
            FleetProtocolError::Truncated {
                field: "size_bytes"
            }
        ));
    }

    #[test]
    fn empty_frame_is_an_error() {
        assert!(matches!(
            WireMessage::decode(&[]),
            Err(FleetProtocolError::Truncated { field: "kind" })
        ));
    }

    #[test]
    fn trailing_bytes_are_an_error() {
        let frame = WireMessage::from(StatusRequest {
            session_id: "s1".into(),
        })
        .encode()
        .unwrap();
        let mut padded = frame.to_vec();
        padded.push(0xFF);
        assert!(matches!(
            WireMessage::decode(&padded),
            Err(FleetProtocolError::TrailingBytes { remaining: 1 })
        ));
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let mut out = BytesMut::new();
        put_str(&mut out, "kind", STATUS_REQUEST).unwrap();
        out.put_u16(2);
        out.put_slice(&[0xC3, 0x28]);
        assert!(matches!(
            WireMessage::decode(&out),
            Err(FleetProtocolError::InvalidUtf8 { field: "session_id" })
        ));
    }

    #[test]
    fn oversized_string_is_rejected_on_encode() {
        let mut resp = response();
        resp.message = "x".repeat(70_000);
        assert!(matches!(
            WireMessage::from(resp).encode(),
            Err(FleetProtocolError::FieldTooLong {
                field: "message",
                len: 70_000
            })
        ));
    }

    #[test]
    fn failed_response_is_cut_to_fit() {
        // Two-byte chars straddle the limit, so the cut lands one byte short.
        let resp = BackupResponse::failed("s1".into(), "hub".into(), "é".repeat(40_000));
        assert_eq!(resp.message.len(), 65_534);
        assert!(resp.message.chars().all(|c| c == 'é'));
        assert!(WireMessage::from(resp).encode().is_ok());

        let short = BackupResponse::failed("s1".into(), "hub".into(), "FAILED: disk full");
        assert_eq!(short.message, "FAILED: disk full");
    }

    #[test]
    fn decode_on_rejects_wrong_channel() {
        let frame = WireMessage::from(response()).encode().unwrap();
        assert!(WireMessage::decode_on(Channel::Response, &frame).unwrap().is_some());
        assert!(matches!(
            WireMessage::decode_on(Channel::Request, &frame),
            Err(FleetProtocolError::WrongChannel {
                kind: "BackupResponse"
            })
        ));
    }

    #[test]
    fn started_sentinel() {
        let ack = BackupResponse::started("s1".into(), "hub".into());
        assert!(ack.is_started());
        assert!(ack.success);
        assert_eq!(ack.duration_ms, 0);
        assert!(!response().is_started());
    }
}
