use std::io;

use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::ser::Formatter;
use serde_json::{Map, Value};

use crate::hash::DEDUP_FIELDS;

/// One air-quality observation as returned by the resource API.
///
/// The nine dedup fields are named; everything else the source sends lands in
/// `extra`. A named field is `None` only when the key was absent, an explicit
/// JSON `null` is kept as `Some(Value::Null)`. Serializing writes keys back in
/// the order they were read; keys set afterwards follow, named fields first.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub country: Option<Value>,
    pub state: Option<Value>,
    pub city: Option<Value>,
    pub station: Option<Value>,
    pub pollutant_id: Option<Value>,
    pub last_update: Option<Value>,
    pub pollutant_avg: Option<Value>,
    pub pollutant_min: Option<Value>,
    pub pollutant_max: Option<Value>,
    pub extra: Map<String, Value>,
    key_order: Vec<String>,
}

impl Observation {
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Look up a field by its source name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self.slot(field) {
            Some(named) => named.as_ref(),
            None => self.extra.get(field),
        }
    }

    fn slot(&self, field: &str) -> Option<&Option<Value>> {
        let named = match field {
            "country" => &self.country,
            "state" => &self.state,
            "city" => &self.city,
            "station" => &self.station,
            "pollutant_id" => &self.pollutant_id,
            "last_update" => &self.last_update,
            "pollutant_avg" => &self.pollutant_avg,
            "pollutant_min" => &self.pollutant_min,
            "pollutant_max" => &self.pollutant_max,
            _ => return None,
        };
        Some(named)
    }

    fn slot_mut(&mut self, field: &str) -> Option<&mut Option<Value>> {
        let named = match field {
            "country" => &mut self.country,
            "state" => &mut self.state,
            "city" => &mut self.city,
            "station" => &mut self.station,
            "pollutant_id" => &mut self.pollutant_id,
            "last_update" => &mut self.last_update,
            "pollutant_avg" => &mut self.pollutant_avg,
            "pollutant_min" => &mut self.pollutant_min,
            "pollutant_max" => &mut self.pollutant_max,
            _ => return None,
        };
        Some(named)
    }

    fn was_read(&self, field: &str) -> bool {
        self.key_order.iter().any(|k| k == field)
    }

    /// Full record as stored in the raw log's `record` column.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        to_json_text(self)
    }
}

/// Key order is presentation only; two observations with the same fields are equal.
impl PartialEq for Observation {
    fn eq(&self, other: &Self) -> bool {
        DEDUP_FIELDS.iter().all(|f| self.slot(f) == other.slot(f)) && self.extra == other.extra
    }
}

impl<'de> Deserialize<'de> for Observation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Map::<String, Value>::deserialize(deserializer)?;
        let mut obs = Observation {
            key_order: Vec::with_capacity(fields.len()),
            ..Observation::default()
        };
        for (key, value) in fields {
            obs.key_order.push(key.clone());
            if let Some(slot) = obs.slot_mut(&key) {
                *slot = Some(value);
            } else {
                obs.extra.insert(key, value);
            }
        }
        Ok(obs)
    }
}

impl Serialize for Observation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for key in &self.key_order {
            if let Some(value) = self.get(key) {
                map.serialize_entry(key, value)?;
            }
        }
        for field in DEDUP_FIELDS {
            if let Some(Some(value)) = self.slot(field) {
                if !self.was_read(field) {
                    map.serialize_entry(field, value)?;
                }
            }
        }
        for (key, value) in &self.extra {
            if !self.was_read(key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// JSON text with `", "` between items and `": "` after keys, non-ASCII left
/// unescaped, the layout of Python's `json.dumps` defaults.
pub fn to_json_text<T: ?Sized + Serialize>(value: &T) -> serde_json::Result<String> {
    let mut buf = Vec::with_capacity(256);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(serde_json::Error::custom)
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}
