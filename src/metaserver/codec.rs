//! Raft log envelope for metadata operators.
//!
//! Wire format:
//! ```text
//! +----------------+---------------------------------+
//! | operator tag   | serialized request payload      |
//! | 4 bytes, BE    | variable length                 |
//! +----------------+---------------------------------+
//! ```
//!
//! The envelope is the only artifact the state machine persists; responses
//! are never logged.

use super::message::{MetaRequest, OperatorType};

/// Fixed-size header carrying the operator tag.
pub const LOG_HEADER_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("log entry shorter than the 4-byte header: {0} bytes")]
    Truncated(usize),

    #[error("unknown operator tag: {0}")]
    UnknownTag(u32),

    #[error("request payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Encodes a request into a log entry: operator tag + payload.
pub fn encode(request: &MetaRequest) -> Result<Vec<u8>, CodecError> {
    let payload = request.encode_payload()?;
    let mut buf = Vec::with_capacity(LOG_HEADER_LEN + payload.len());
    buf.extend_from_slice(&(request.op_type() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes a committed log entry back into a request.
pub fn decode(data: &[u8]) -> Result<MetaRequest, CodecError> {
    if data.len() < LOG_HEADER_LEN {
        return Err(CodecError::Truncated(data.len()));
    }
    let tag = u32::from_be_bytes(data[..LOG_HEADER_LEN].try_into().expect("4-byte header"));
    let op = OperatorType::from_wire_tag(tag).ok_or(CodecError::UnknownTag(tag))?;
    Ok(MetaRequest::decode_payload(op, &data[LOG_HEADER_LEN..])?)
}
