//! String encoding for values held in the shared tier.
//!
//! Every value is stored as compact JSON, so booleans become `true`/`false`,
//! numbers their decimal form, strings a quoted JSON string, and permission
//! sets a JSON array. [`decode`] is the exact inverse of [`encode`].

use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes a value for the shared store.
pub fn encode<V: Serialize>(value: &V) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decodes a value previously produced by [`encode`].
pub fn decode<V: DeserializeOwned>(raw: &str) -> Result<V> {
    Ok(serde_json::from_str(raw)?)
}
