use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::record::{to_json_text, Observation};

/// Fields that identify an observation: station, pollutant, timestamp and values.
pub const DEDUP_FIELDS: [&str; 9] = [
    "country",
    "state",
    "city",
    "station",
    "pollutant_id",
    "last_update",
    "pollutant_avg",
    "pollutant_min",
    "pollutant_max",
];

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Dedup key of an observation, lowercase hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordHash(String);

impl RecordHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn stable_hash(record: &Observation) -> RecordHash {
    let digest = Sha256::digest(canonical_text(record).as_bytes());
    RecordHash(hex::encode(digest))
}

/// The exact text that gets digested: dedup fields only, keys sorted at every
/// depth, absent fields as `null`.
pub fn canonical_text(record: &Observation) -> String {
    let projected: BTreeMap<&str, Value> = DEDUP_FIELDS
        .iter()
        .map(|field| (*field, record.get(field).map(sort_keys).unwrap_or(Value::Null)))
        .collect();
    to_json_text(&projected).expect("serializing JSON values into memory cannot fail")
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let mut out = Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k.clone(), sort_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
