//! Row <-> domain-entity conversions. Enums are stored as their
//! `snake_case`/`kebab-case` serde representation in `TEXT` columns so a
//! `psql` session can read them directly; `serde_json` does the
//! roundtrip rather than hand-written `match` tables.

use serde::{de::DeserializeOwned, Serialize};

use browsergrid_core::ports::outbound::{StoreError, StoreResult};

pub fn encode_enum<T: Serialize>(value: &T) -> StoreResult<String> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(StoreError::Transient(format!("enum did not encode to a string: {other}"))),
        Err(e) => Err(StoreError::Transient(format!("enum encode failed: {e}"))),
    }
}

pub fn decode_enum<T: DeserializeOwned>(raw: &str) -> StoreResult<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| StoreError::Transient(format!("enum decode failed for '{raw}': {e}")))
}
