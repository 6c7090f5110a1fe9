// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Schema Codec contract (spec §2, §4.7).
//!
//! The real per-call payload shapes live outside this crate (a schema
//! compiler would normally generate them); what the Query Subsystem
//! needs is just the "skip/fetch/free trio" driven by a type descriptor.
//! Rust's ownership model makes the "free" step unnecessary (the decoded
//! value is dropped like anything else), so [`ResponseCodec`] only needs
//! to `skip` (validate the shape without materializing it) and `fetch`
//! (materialize it).
//!
//! Per the Design Notes ("opaque decoded tree ... re-express as a typed
//! accessor closure"), the decoded value is a type-erased [`DecodedValue`]
//! that a concrete `Query` downcasts back to its own response type; a
//! codec implementation is provided per call by the embedding host, not
//! by this crate.
use crate::serialize::{Cursor, DeserializeError};
use std::any::Any;
use std::fmt;

#[derive(Debug)]
pub enum CodecError {
    /// `skip_type_any` did not advance to exactly the end of the buffer:
    /// a fatal protocol violation (spec §4.7 step 1, S6).
    UnderOrOverConsumption { consumed: usize, total: usize },

    /// The underlying bytes could not be parsed as the declared shape.
    Deserialize(DeserializeError),
}

impl std::error::Error for CodecError {}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnderOrOverConsumption { consumed, total } => write!(
                f,
                "schema codec consumed {consumed} of {total} bytes, response is corrupt"
            ),
            Self::Deserialize(err) => write!(f, "schema codec failed to decode: {err}"),
        }
    }
}

impl From<DeserializeError> for CodecError {
    fn from(err: DeserializeError) -> Self {
        Self::Deserialize(err)
    }
}

/// A type-erased decoded response tree, standing in for the source
/// library's `void*`. A `Query` downcasts this back to its own response
/// type inside `on_answer`.
pub struct DecodedValue(Box<dyn Any + Send>);

impl DecodedValue {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Downcast into the concrete type a particular `Query` expects.
    /// Returns `Err(self)` unchanged if the type does not match, so a
    /// caller can try an alternative decode path (mirrors the
    /// `gzip_packed` vs. plain payload branch in `handle_result`).
    pub fn downcast<T: Any + Send>(self) -> Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(boxed) => Err(Self(boxed)),
        }
    }
}

/// The "skip/fetch" half of the skip/fetch/free trio (spec §2 item 3).
///
/// Implemented once per RPC response shape by whatever owns the payload
/// codecs (the `host` crate, standing in for a schema compiler).
pub trait ResponseCodec: Send {
    /// Validate the response's shape without materializing it. Must
    /// advance `cursor` to exactly the end of the declared type; any
    /// other outcome (short or long) is the fatal "corrupt session"
    /// case spec §4.7 describes.
    fn skip(&self, cursor: &mut Cursor) -> Result<(), CodecError>;

    /// Materialize the decoded value. Only called after `skip` has
    /// confirmed the shape is well-formed.
    fn fetch(&self, cursor: &mut Cursor) -> Result<DecodedValue, CodecError>;
}

/// Run the full skip-then-fetch pass spec §4.7 describes, given a
/// buffer covering exactly the response body (envelope already
/// stripped, any `gzip_packed` layer already inflated).
pub fn decode_response(
    codec: &dyn ResponseCodec,
    body: &[u8],
) -> Result<DecodedValue, CodecError> {
    let mut skip_cursor = Cursor::from_slice(body);
    codec.skip(&mut skip_cursor)?;
    if !skip_cursor.is_empty() {
        return Err(CodecError::UnderOrOverConsumption {
            consumed: skip_cursor.pos(),
            total: body.len(),
        });
    }

    let mut fetch_cursor = Cursor::from_slice(body);
    let decoded = codec.fetch(&mut fetch_cursor)?;
    if !fetch_cursor.is_empty() {
        return Err(CodecError::UnderOrOverConsumption {
            consumed: fetch_cursor.pos(),
            total: body.len(),
        });
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::{Deserializable, Serializable};

    struct I32Codec;

    impl ResponseCodec for I32Codec {
        fn skip(&self, cursor: &mut Cursor) -> Result<(), CodecError> {
            i32::deserialize(cursor)?;
            Ok(())
        }

        fn fetch(&self, cursor: &mut Cursor) -> Result<DecodedValue, CodecError> {
            Ok(DecodedValue::new(i32::deserialize(cursor)?))
        }
    }

    #[test]
    fn decodes_and_downcasts() {
        let body = 42i32.to_bytes();
        let decoded = decode_response(&I32Codec, &body).unwrap();
        assert_eq!(decoded.downcast::<i32>().unwrap(), 42);
    }

    #[test]
    fn under_consumption_is_fatal() {
        let mut body = 42i32.to_bytes();
        body.extend_from_slice(&[0, 0, 0, 0]); // trailing garbage word
        let err = decode_response(&I32Codec, &body).unwrap_err();
        assert!(matches!(err, CodecError::UnderOrOverConsumption { .. }));
    }

    #[test]
    fn wrong_downcast_returns_value_back() {
        let body = 42i32.to_bytes();
        let decoded = decode_response(&I32Codec, &body).unwrap();
        let returned = decoded.downcast::<String>().unwrap_err();
        assert_eq!(returned.downcast::<i32>().unwrap(), 42);
    }
}
