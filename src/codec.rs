use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Converts typed keys and values to and from the raw bytes the log carries.
///
/// Implementations must be invertible: `deserialize(serialize(v)) == v` for
/// every value the system produces. The store decodes feed payloads with the
/// same codec that encoded them, so a decode failure on the feed path is an
/// inconsistency, not a recoverable condition.
pub trait Codec<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<T>;
}

/// UTF-8 string codec.
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn serialize(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        Ok(std::str::from_utf8(bytes)
            .context("value is not valid UTF-8")?
            .to_string())
    }
}

/// Big-endian i32 codec.
pub struct I32Codec;

impl Codec<i32> for I32Codec {
    fn serialize(&self, value: &i32) -> Result<Vec<u8>> {
        Ok(value.to_be_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<i32> {
        let bytes: [u8; 4] = bytes.try_into().context("expected exactly 4 bytes")?;
        Ok(i32::from_be_bytes(bytes))
    }
}

/// Codec for any serde-serializable type, encoded with bincode.
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            value,
            bincode::config::standard(),
        )?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(value)
    }
}
