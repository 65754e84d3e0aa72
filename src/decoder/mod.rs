//! Typed decoding of response payloads.
//!
//! Every decoder takes the payload of a data frame (ticket and CRLF already
//! removed by the frame codec) and reports contract violations as
//! [`ProtocolError::MalformedResponse`](crate::error::ProtocolError).

mod chunk;
mod error_codes;
mod evaluation;
mod info;
mod status;

pub use chunk::{
    CHUNK_HEADER_MIN_LEN, CHUNK_HEADER_VERSION, ChunkHeader, ImageChunk, decode_image_chunk,
    decode_image_response,
};
pub use error_codes::{ErrorCodeInfo, decode_error_code, lookup_error_code};
pub use evaluation::{Detection, EvaluationResult, Verdict, decode_evaluation};
pub use info::{
    ApplicationList, ApplicationSlot, DeviceInfo, ProtocolVersions, Statistics,
    decode_applications, decode_device_info, decode_protocol_version, decode_statistics,
};
pub use status::{Status, StatusResult, decode_status};

#[cfg(test)]
pub(crate) use chunk::tests::build_chunk;
