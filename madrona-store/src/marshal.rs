use serde::{Serialize, de::DeserializeOwned};

use crate::MadronaStoreError;

/// A [`Marshaler`] converts individual keys and values to and from bytes.
///
/// The tree stores exactly the bytes the marshaler produces, so two trees can
/// only share nodes (and compare by hash) when they marshal entries
/// identically. The marshaler is carried by the tree as a value; there is no
/// process-global default.
pub trait Marshaler: Clone + Send + Sync + 'static {
    /// Serialize a key or value into bytes.
    fn marshal<T>(&self, value: &T) -> Result<Vec<u8>, MadronaStoreError>
    where
        T: Serialize;

    /// Deserialize a key or value from bytes.
    fn unmarshal<T>(&self, bytes: &[u8]) -> Result<T, MadronaStoreError>
    where
        T: DeserializeOwned;
}

/// A [`Marshaler`] that encodes entries as JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonMarshaler;

impl Marshaler for JsonMarshaler {
    fn marshal<T>(&self, value: &T) -> Result<Vec<u8>, MadronaStoreError>
    where
        T: Serialize,
    {
        serde_json::to_vec(value)
            .map_err(|error| MadronaStoreError::MarshalFailed(format!("{error}")))
    }

    fn unmarshal<T>(&self, bytes: &[u8]) -> Result<T, MadronaStoreError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes)
            .map_err(|error| MadronaStoreError::UnmarshalFailed(format!("{error}")))
    }
}

/// A [`Marshaler`] that encodes entries as IPLD-compatible CBOR.
#[derive(Clone, Copy, Debug, Default)]
pub struct CborMarshaler;

impl Marshaler for CborMarshaler {
    fn marshal<T>(&self, value: &T) -> Result<Vec<u8>, MadronaStoreError>
    where
        T: Serialize,
    {
        serde_ipld_dagcbor::to_vec(value)
            .map_err(|error| MadronaStoreError::MarshalFailed(format!("{error}")))
    }

    fn unmarshal<T>(&self, bytes: &[u8]) -> Result<T, MadronaStoreError>
    where
        T: DeserializeOwned,
    {
        serde_ipld_dagcbor::from_slice(bytes)
            .map_err(|error| MadronaStoreError::UnmarshalFailed(format!("{error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::{CborMarshaler, JsonMarshaler, Marshaler};

    #[test]
    fn json_round_trips() {
        let bytes = JsonMarshaler.marshal(&("key", 42u64)).unwrap();
        let (key, value): (String, u64) = JsonMarshaler.unmarshal(&bytes).unwrap();
        assert_eq!(key, "key");
        assert_eq!(value, 42);
    }

    #[test]
    fn cbor_round_trips() {
        let bytes = CborMarshaler.marshal(&vec![1u8, 2, 3]).unwrap();
        let decoded: Vec<u8> = CborMarshaler.unmarshal(&bytes).unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn unmarshal_rejects_garbage() {
        let result: Result<u64, _> = JsonMarshaler.unmarshal(b"not json");
        assert!(result.is_err());
    }
}
