//! Device commands.
//!
//! A command is a single-letter operation code plus an optional fixed-width
//! argument. Queries end in `?`.

use std::fmt;

use super::constants::{LENGTH_DIGITS, MAX_DATA_FRAME_LEN};
use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `t` release the trigger without result output
    Trigger,
    /// `c0NN` activate application NN (group is always 0)
    SelectApplication(u8),
    /// `p1` / `p0` enable or disable result output
    SetOutput(bool),
    /// `T?` trigger, evaluate and return the result
    Evaluate,
    /// `I?` last image
    LastImage,
    /// `F?` last bad image
    LastBadImage,
    /// `E?` current error code
    ErrorCode,
    /// `D?` device information
    DeviceInfo,
    /// `V?` protocol versions
    ProtocolVersion,
    /// `vNN` select protocol version
    SetProtocolVersion(u8),
    /// `a?` application assignment
    Applications,
    /// `s?` statistics
    Statistics,
    /// `R?` last result
    LastResult,
    /// `i<length><data>` transmit an image for evaluation
    UploadImage(Vec<u8>),
}

impl Command {
    /// Bytes placed between the ticket and the CRLF of the data frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = match self {
            Command::Trigger => b"t".to_vec(),
            Command::SelectApplication(id) => {
                if *id > 99 {
                    return Err(ProtocolError::InvalidArgument(format!(
                        "application id {} is not in 0..=99",
                        id
                    )));
                }
                format!("c0{:02}", id).into_bytes()
            }
            Command::SetOutput(enabled) => format!("p{}", u8::from(*enabled)).into_bytes(),
            Command::Evaluate => b"T?".to_vec(),
            Command::LastImage => b"I?".to_vec(),
            Command::LastBadImage => b"F?".to_vec(),
            Command::ErrorCode => b"E?".to_vec(),
            Command::DeviceInfo => b"D?".to_vec(),
            Command::ProtocolVersion => b"V?".to_vec(),
            Command::SetProtocolVersion(version) => {
                if *version > 99 {
                    return Err(ProtocolError::InvalidArgument(format!(
                        "protocol version {} is not two digits",
                        version
                    )));
                }
                format!("v{:02}", version).into_bytes()
            }
            Command::Applications => b"a?".to_vec(),
            Command::Statistics => b"s?".to_vec(),
            Command::LastResult => b"R?".to_vec(),
            Command::UploadImage(data) => {
                if data.len() > MAX_DATA_FRAME_LEN {
                    return Err(ProtocolError::EncodingError { len: data.len() });
                }
                let mut bytes = Vec::with_capacity(1 + LENGTH_DIGITS + data.len());
                bytes.push(b'i');
                bytes.extend_from_slice(format!("{:09}", data.len()).as_bytes());
                bytes.extend_from_slice(data);
                bytes
            }
        };
        Ok(bytes)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::UploadImage(data) => write!(f, "i<{} bytes>", data.len()),
            other => match other.to_bytes() {
                Ok(bytes) => write!(f, "{}", String::from_utf8_lossy(&bytes)),
                Err(_) => write!(f, "{:?}", other),
            },
        }
    }
}
