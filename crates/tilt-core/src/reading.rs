//! Sensor reading schema.
//!
//! A reading arrives as a loose JSON object. [`Reading::from_value`] checks
//! that the device identifier and every required measurement key are
//! present; [`Reading::sanitize`] then replaces null measurements with `0`.
//! A missing key is an error, a null value is not.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::timestamp::Timestamp;

/// Key holding the device identifier.
pub const DEVICE_ID_FIELD: &str = "devid";

/// Key the store writes the assigned timestamp into.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Measurements every reading must carry. Nulls are coerced to zero.
pub const REQUIRED_NUMERIC_FIELDS: [&str; 6] = [
    "TiltFB",
    "TiltLR",
    "Direction",
    "altitude",
    "latitude",
    "longitude",
];

/// Why an ingest payload could not be turned into a [`Reading`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedReading {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("device identifier must be a string")]
    InvalidDeviceId,
}

/// One device's measurements at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Reading {
    fields: Map<String, Value>,
}

impl Reading {
    /// Validate a decoded payload.
    pub fn from_value(value: Value) -> Result<Self, MalformedReading> {
        let Value::Object(fields) = value else {
            return Err(MalformedReading::NotAnObject);
        };

        match fields.get(DEVICE_ID_FIELD) {
            None => return Err(MalformedReading::MissingField(DEVICE_ID_FIELD)),
            Some(Value::String(_)) => {}
            Some(_) => return Err(MalformedReading::InvalidDeviceId),
        }

        if let Some(missing) = REQUIRED_NUMERIC_FIELDS
            .into_iter()
            .find(|key| !fields.contains_key(*key))
        {
            return Err(MalformedReading::MissingField(missing));
        }

        Ok(Self { fields })
    }

    /// Decode and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, MalformedReading> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| MalformedReading::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn device_id(&self) -> &str {
        // Presence and type are checked in `from_value`.
        self.fields
            .get(DEVICE_ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Replace null measurements with `0`, logging each one.
    ///
    /// Returns the names of the fields that were rewritten.
    pub fn sanitize(&mut self) -> Vec<&'static str> {
        let mut fixed = Vec::new();
        for key in REQUIRED_NUMERIC_FIELDS {
            if let Some(value) = self.fields.get_mut(key) {
                if value.is_null() {
                    *value = Value::from(0);
                    fixed.push(key);
                }
            }
        }
        if !fixed.is_empty() {
            let devid = self.device_id();
            for field in &fixed {
                warn!(%devid, field = *field, "sanitized null field");
            }
        }
        fixed
    }

    /// Overwrite any client-supplied timestamp with the store's own.
    pub fn stamp(&mut self, ts: Timestamp) {
        self.fields
            .insert(TIMESTAMP_FIELD.to_string(), Value::from(ts.as_u64()));
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}
