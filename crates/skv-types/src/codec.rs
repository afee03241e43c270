//! bincode helpers shared by storage and the RPC layer.

use crate::SkvError;

pub fn encode<T: serde::Serialize>(val: &T) -> Result<Vec<u8>, SkvError> {
    bincode::serde::encode_to_vec(val, bincode::config::standard())
        .map_err(|e| SkvError::Codec(e.to_string()))
}

pub fn decode<T: for<'de> serde::Deserialize<'de>>(bytes: &[u8]) -> Result<T, SkvError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(v, _)| v)
        .map_err(|e| SkvError::Codec(e.to_string()))
}
