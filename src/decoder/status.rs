use std::fmt;

use serde::Serialize;

use crate::protocol::{STATUS_BUSY, STATUS_INVALID_ARGUMENT, STATUS_SUCCESS};

/// Single-character status markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    /// `*`
    Success,
    /// `!` busy, or in an invalid state for the command
    Busy,
    /// `?`
    InvalidArgument,
}

impl Status {
    pub fn marker(self) -> char {
        match self {
            Status::Success => STATUS_SUCCESS as char,
            Status::Busy => STATUS_BUSY as char,
            Status::InvalidArgument => STATUS_INVALID_ARGUMENT as char,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.marker())
    }
}

/// A response is either a bare status marker or a structured payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusResult<'a> {
    Status(Status),
    Payload(&'a [u8]),
}

/// Classify a response payload.
///
/// Anything that is not exactly one status marker is left for a
/// type-specific decoder.
pub fn decode_status(payload: &[u8]) -> StatusResult<'_> {
    match payload {
        [STATUS_SUCCESS] => StatusResult::Status(Status::Success),
        [STATUS_BUSY] => StatusResult::Status(Status::Busy),
        [STATUS_INVALID_ARGUMENT] => StatusResult::Status(Status::InvalidArgument),
        other => StatusResult::Payload(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_markers() {
        assert_eq!(decode_status(b"*"), StatusResult::Status(Status::Success));
        assert_eq!(decode_status(b"!"), StatusResult::Status(Status::Busy));
        assert_eq!(
            decode_status(b"?"),
            StatusResult::Status(Status::InvalidArgument)
        );
    }

    #[test]
    fn test_structured_payloads_are_forwarded() {
        assert_eq!(decode_status(b"0000"), StatusResult::Payload(b"0000"));
        assert_eq!(decode_status(b"**"), StatusResult::Payload(b"**"));
        assert_eq!(decode_status(b""), StatusResult::Payload(b""));
    }
}
