//! JSON encoding for floats that may not be finite
//!
//! JSON has no NaN or infinity; `serde_json` silently writes them as `null`.
//! Sensor dropouts produce exactly those values, so they are written as the
//! strings `"NaN"`, `"inf"` and `"-inf"` and read back as the same floats.
//! Finite values stay plain numbers. `null` is read as NaN.
//!
//! Use with `#[serde(with = "json_float")]` on an `f64`, or the `vec` and
//! `rows` submodules on `Vec<f64>` and `Vec<Vec<f64>>`.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NAN: &str = "NaN";
pub const INFINITY: &str = "inf";
pub const NEG_INFINITY: &str = "-inf";

/// An `f64` with the non-finite encoding applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JsonF64(pub f64);

impl Serialize for JsonF64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v = self.0;
        if v.is_finite() {
            serializer.serialize_f64(v)
        } else if v.is_nan() {
            serializer.serialize_str(NAN)
        } else if v > 0.0 {
            serializer.serialize_str(INFINITY)
        } else {
            serializer.serialize_str(NEG_INFINITY)
        }
    }
}

struct JsonF64Visitor;

impl<'de> Visitor<'de> for JsonF64Visitor {
    type Value = JsonF64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number, \"NaN\", \"inf\", \"-inf\" or null")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<JsonF64, E> {
        Ok(JsonF64(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<JsonF64, E> {
        Ok(JsonF64(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<JsonF64, E> {
        Ok(JsonF64(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<JsonF64, E> {
        match v {
            NAN => Ok(JsonF64(f64::NAN)),
            INFINITY => Ok(JsonF64(f64::INFINITY)),
            NEG_INFINITY => Ok(JsonF64(f64::NEG_INFINITY)),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }

    fn visit_unit<E: de::Error>(self) -> Result<JsonF64, E> {
        Ok(JsonF64(f64::NAN))
    }

    fn visit_none<E: de::Error>(self) -> Result<JsonF64, E> {
        Ok(JsonF64(f64::NAN))
    }
}

impl<'de> Deserialize<'de> for JsonF64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(JsonF64Visitor)
    }
}

/// A float as a JSON value, using the same encoding
pub fn to_value(v: f64) -> serde_json::Value {
    match serde_json::Number::from_f64(v) {
        Some(n) => serde_json::Value::Number(n),
        None if v.is_nan() => serde_json::Value::from(NAN),
        None if v > 0.0 => serde_json::Value::from(INFINITY),
        None => serde_json::Value::from(NEG_INFINITY),
    }
}

pub fn serialize<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    JsonF64(*v).serialize(serializer)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    JsonF64::deserialize(deserializer).map(|v| v.0)
}

pub mod vec {
    use super::JsonF64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| JsonF64(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<JsonF64>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.0).collect())
    }
}

pub mod rows {
    use super::JsonF64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(rows: &[Vec<f64>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            rows.iter()
                .map(|row| row.iter().map(|v| JsonF64(*v)).collect::<Vec<_>>()),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<f64>>, D::Error> {
        let rows = Vec::<Vec<JsonF64>>::deserialize(deserializer)?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.0).collect())
            .collect())
    }
}
