//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named`, i.e. as maps keyed by
//! field name. Peers written in dynamic languages decode that shape
//! directly; the positional array form only round-trips between peers
//! that share the struct definition.
//!
//! ```
//! use rsocket_wire::codec::MsgPackCodec;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Tick {
//!     seq: u64,
//!     symbol: String,
//! }
//!
//! let tick = Tick { seq: 42, symbol: "RSK".to_string() };
//! let encoded = MsgPackCodec::encode(&tick).unwrap();
//! let decoded: Tick = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, tick);
//! ```

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes, structs as maps.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: TestStruct = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_struct_is_written_as_map() {
        let test = TestStruct {
            id: 1,
            name: "x".to_string(),
            active: false,
        };

        let encoded = MsgPackCodec::encode(&test).unwrap();

        // 0x83 = fixmap with 3 entries; array form would be 0x93
        assert_eq!(encoded[0], 0x83, "got {:02X}", encoded[0]);
    }

    #[test]
    fn test_binary_data() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Blob {
            #[serde(with = "serde_bytes")]
            data: Vec<u8>,
        }

        let blob = Blob {
            data: vec![0, 1, 2, 255],
        };
        let encoded = MsgPackCodec::encode(&blob).unwrap();
        let decoded: Blob = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, blob);
    }

    #[test]
    fn test_encode_decode_option() {
        for value in [Some(42i32), None] {
            let encoded = MsgPackCodec::encode(&value).unwrap();
            let decoded: Option<i32> = MsgPackCodec::decode(&encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<TestStruct> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }
}
