// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

pub fn encode_msgpack<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value)
        .map_err(|err| Error::invalid_response(format!("msgpack encode error: {err}")))
}

pub fn decode_msgpack_into<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    rmp_serde::from_slice::<T>(data)
        .map_err(|err| Error::invalid_response(format!("msgpack decode error: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Envelope, Handle, Metadata, Reply, Request, StreamItem};

    #[test]
    fn chunks_are_encoded_as_binary() {
        let bytes = encode_msgpack(&StreamItem::Chunk(vec![1, 2, 3])).unwrap();
        // bin8 marker, length, payload
        assert!(bytes.ends_with(&[0xc4, 0x03, 0x01, 0x02, 0x03]));
        let item: StreamItem = decode_msgpack_into(&bytes).unwrap();
        assert_eq!(item, StreamItem::Chunk(vec![1, 2, 3]));
    }

    #[test]
    fn envelope_carries_metadata_with_the_request() {
        let mut metadata = Metadata::new();
        metadata.insert("authentication".into(), "Basic Z3Vlc3Q=".into());
        let envelope = Envelope {
            metadata,
            body: Request::CloseCollection {
                collection: Handle::new("c-7"),
            },
        };
        let bytes = encode_msgpack(&envelope).unwrap();
        let decoded: Envelope<Request> = decode_msgpack_into(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn garbage_is_an_invalid_response() {
        let err = decode_msgpack_into::<Reply>(&[0xc1]).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(ref msg) if msg.starts_with("msgpack decode error")));
    }
}
