//! Bincode codec for record groups and table metadata.
//!
//! The wire layout is the legacy bincode encoding behind a length prefix on
//! the page; it is versioned by that prefix and otherwise opaque.

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, Record};

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Encode any serde-serializable payload (table metadata, index arenas).
pub fn encode<T: serde::Serialize>(value: &T) -> DbResult<Vec<u8>> {
    encode_to_vec(value, bincode_config())
        .map_err(|e| DbError::Storage(format!("encode failed: {e}")))
}

/// Decode a payload produced by [`encode`].
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    let (value, _) = decode_from_slice(bytes, bincode_config())
        .map_err(|e| DbError::Storage(format!("decode failed: {e}")))?;
    Ok(value)
}

/// Encode a record group destined for one data page.
pub fn encode_records(records: &[Record]) -> DbResult<Vec<u8>> {
    encode(&records)
}

/// Decode a record group from a data page payload.
pub fn decode_records(bytes: &[u8]) -> DbResult<Vec<Record>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    decode(bytes)
}

/// Encoded size of one record, used for memtable accounting and page packing.
pub fn record_size(record: &Record) -> DbResult<usize> {
    Ok(encode(record)?.len())
}
