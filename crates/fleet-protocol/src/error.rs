/// Protocol-level errors for the fleet backup core.
///
/// Codec faults (truncation, bad text, trailing bytes) stay local to the
/// receiving loop: callers log them and drop the frame.
#[derive(Debug, thiserror::Error)]
pub enum FleetProtocolError {
    #[error("no backend nodes registered")]
    NoNodes,

    #[error("server not found: {node}")]
    UnknownNode { node: String },

    #[error("server unreachable: {node}")]
    Unreachable { node: String },

    #[error("frame truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("field {field} too long: {len} bytes (max 65535)")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("{remaining} trailing bytes after message")]
    TrailingBytes { remaining: usize },

    #[error("{kind} is not valid on this channel")]
    WrongChannel { kind: &'static str },

    #[error("backup subsystem unavailable on this node")]
    BackupUnavailable,

    #[error("local status unavailable: {0}")]
    StatusUnavailable(String),
}
