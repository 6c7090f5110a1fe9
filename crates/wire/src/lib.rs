// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Wire-level primitives for an MTProto-style protocol: an append-only
//! word buffer (the Wire Serializer), envelope framing (message
//! containers and gzip packing), and the Schema Codec contract that lets
//! a [`Query`](https://docs.rs/mtp-query) decode a response without this
//! crate knowing anything about individual RPC shapes.
#![deny(unsafe_code)]

pub mod codec;
pub mod envelope;
pub mod serialize;

pub use codec::{decode_response, CodecError, DecodedValue, ResponseCodec};
pub use envelope::{GzipPacked, Message, MessageContainer, GZIP_PACKED_ID, MESSAGE_CONTAINER_ID};
pub use serialize::{Cursor, Deserializable, DeserializeError, Identifiable, Serializable};
