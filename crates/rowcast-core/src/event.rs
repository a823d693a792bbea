//! CloudEvents envelopes.
//!
//! One [`EventEnvelope`] is built per row. The row is encoded once, at
//! construction, and kept as raw JSON so every delivery attempt sends the
//! same bytes.

use crate::config::EventConfig;
use crate::row::Row;
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

/// CloudEvents specification version emitted.
pub const SPEC_VERSION: &str = "1.0";

/// Content type of the `data` attribute.
pub const DATA_CONTENT_TYPE: &str = "application/json";

/// Content type of a structured-mode request body.
pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";

/// Run-scoped event attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventIdentity {
    pub event_type: String,
    pub event_source: String,
}

impl EventIdentity {
    pub fn new(event_type: impl Into<String>, event_source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            event_source: event_source.into(),
        }
    }
}

impl From<&EventConfig> for EventIdentity {
    fn from(config: &EventConfig) -> Self {
        Self::new(config.event_type.clone(), config.event_source.clone())
    }
}

/// A CloudEvents 1.0 envelope carrying one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub data: Box<RawValue>,
}

impl EventEnvelope {
    /// Build an envelope for `row` with a fresh id and timestamp.
    ///
    /// Fails with [`Error::Serialization`] when the row cannot be encoded.
    pub fn from_row(identity: &EventIdentity, row: &Row) -> Result<Self> {
        let encoded = String::from_utf8(row.to_json()?)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let data = RawValue::from_string(encoded)?;

        Ok(Self {
            specversion: SPEC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            source: identity.event_source.clone(),
            event_type: identity.event_type.clone(),
            time: Utc::now(),
            datacontenttype: DATA_CONTENT_TYPE.to_string(),
            data,
        })
    }

    /// Encoded row, exactly as it is sent.
    pub fn data_bytes(&self) -> &[u8] {
        self.data.get().as_bytes()
    }

    /// Decode `data` back into a JSON value.
    pub fn decode_data(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(self.data.get())?)
    }

    /// Structured-mode body: the whole envelope as JSON.
    pub fn to_structured(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Binary-mode attribute headers.
    pub fn binary_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ce-specversion", self.specversion.clone()),
            ("ce-id", self.id.clone()),
            ("ce-source", self.source.clone()),
            ("ce-type", self.event_type.clone()),
            (
                "ce-time",
                self.time.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            ("content-type", self.datacontenttype.clone()),
        ]
    }
}
