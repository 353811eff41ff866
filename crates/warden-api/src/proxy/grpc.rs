//! Minimal gRPC message inspection.
//!
//! Only what attribute extraction needs: unwrap one uncompressed frame and
//! read top-level string fields by number, without a message descriptor.

use bytes::Buf;
use prost::encoding::{decode_key, decode_varint, skip_field, DecodeContext, WireType};
use thiserror::Error;

const FRAME_HEADER_LEN: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrpcError {
    #[error("gRPC frame is truncated")]
    Truncated,

    #[error("compressed gRPC frames are not supported")]
    Compressed,

    #[error("malformed protobuf message: {0}")]
    Malformed(String),

    #[error("field {field} is not a length-delimited string")]
    NotAString { field: u32 },
}

/// Returns the message bytes of the first frame in `body`.
pub fn decode_frame(body: &[u8]) -> Result<&[u8], GrpcError> {
    if body.len() < FRAME_HEADER_LEN {
        return Err(GrpcError::Truncated);
    }
    if body[0] != 0 {
        return Err(GrpcError::Compressed);
    }
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    body.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + len)
        .ok_or(GrpcError::Truncated)
}

/// Collects every occurrence of string field `field` in `message`.
pub fn string_fields(message: &[u8], field: u32) -> Result<Vec<String>, GrpcError> {
    let mut buf = message;
    let mut values = Vec::new();
    while buf.has_remaining() {
        let (tag, wire_type) = decode_key(&mut buf).map_err(malformed)?;
        if tag != field {
            skip_field(wire_type, tag, &mut buf, DecodeContext::default()).map_err(malformed)?;
            continue;
        }
        if wire_type != WireType::LengthDelimited {
            return Err(GrpcError::NotAString { field });
        }
        let len = decode_varint(&mut buf).map_err(malformed)? as usize;
        if len > buf.remaining() {
            return Err(GrpcError::Truncated);
        }
        let value = std::str::from_utf8(&buf[..len])
            .map_err(|_| GrpcError::NotAString { field })?
            .to_string();
        buf.advance(len);
        values.push(value);
    }
    Ok(values)
}

fn malformed(err: prost::DecodeError) -> GrpcError {
    GrpcError::Malformed(err.to_string())
}

/// Wraps `message` in an uncompressed frame.
pub fn encode_frame(message: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + message.len());
    frame.push(0);
    frame.extend_from_slice(&(message.len() as u32).to_be_bytes());
    frame.extend_from_slice(message);
    frame
}

#[cfg(test)]
mod tests {
    use prost::encoding::{int64, string};

    use super::*;

    fn message() -> Vec<u8> {
        let mut buf = Vec::new();
        string::encode(1, &"fh-1".to_string(), &mut buf);
        int64::encode(2, &42i64, &mut buf);
        string::encode(3, &"foo".to_string(), &mut buf);
        string::encode(3, &"bar".to_string(), &mut buf);
        buf
    }

    #[test]
    fn test_reads_string_fields() {
        let frame = encode_frame(&message());
        let body = decode_frame(&frame).unwrap();

        assert_eq!(string_fields(body, 1).unwrap(), vec!["fh-1"]);
        assert_eq!(string_fields(body, 3).unwrap(), vec!["foo", "bar"]);
        assert!(string_fields(body, 9).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_string_field() {
        let message = message();
        assert_eq!(
            string_fields(&message, 2),
            Err(GrpcError::NotAString { field: 2 })
        );
    }

    #[test]
    fn test_frame_errors() {
        assert_eq!(decode_frame(&[0, 0]), Err(GrpcError::Truncated));
        assert_eq!(decode_frame(&[1, 0, 0, 0, 0]), Err(GrpcError::Compressed));
        assert_eq!(decode_frame(&[0, 0, 0, 0, 9, 1]), Err(GrpcError::Truncated));
    }
}
