//! Shared row-mapping helpers for the SQLite repositories.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::error::StoreError;

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Serialization(format!("bad uuid '{s}': {e}")))
}

pub(crate) fn parse_uuid_opt(s: &Option<String>) -> Result<Option<Uuid>, StoreError> {
    s.as_deref().map(parse_uuid).transpose()
}

pub(crate) fn parse_dt(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{s}': {e}")))
}

pub(crate) fn parse_dt_opt(s: &Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.as_deref().map(parse_dt).transpose()
}

pub(crate) fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn fmt_dt_opt(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(fmt_dt)
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_str(s).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}
