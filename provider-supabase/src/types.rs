//! Wire format of the `sync_data` table

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use core_sync::{Category, Platform, SyncRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SupabaseError};

/// One row of the remote table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRow {
    pub id: String,
    pub user_id: String,

    /// Category tag
    #[serde(rename = "type")]
    pub kind: String,

    pub data: Value,

    /// Writer time (RFC 3339)
    pub timestamp: String,

    pub platform: String,
    pub version: u64,

    /// Arrival time at the remote (RFC 3339), stamped by the table default.
    /// Never sent by clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<String>,
}

impl SyncRow {
    pub fn from_record(user_id: &str, record: &SyncRecord) -> Result<Self> {
        Ok(Self {
            id: record.id.clone(),
            user_id: user_id.to_string(),
            kind: record.category.as_str().to_string(),
            data: record.payload.clone(),
            timestamp: to_iso(record.timestamp)?,
            platform: record.origin_platform.as_str().to_string(),
            version: record.version,
            synced_at: None,
        })
    }

    pub fn into_record(self) -> Result<SyncRecord> {
        Ok(SyncRecord {
            timestamp: parse_iso(&self.timestamp)?,
            id: self.id,
            category: Category::from(self.kind),
            payload: self.data,
            origin_platform: Platform::from(self.platform),
            version: self.version,
            synced: true,
        })
    }
}

/// Milliseconds since epoch to RFC 3339 with millisecond precision
pub fn to_iso(millis: i64) -> Result<String> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| SupabaseError::InvalidTimestamp(millis.to_string()))
}

/// RFC 3339 (any offset) to milliseconds since epoch
pub fn parse_iso(value: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .map_err(|_| SupabaseError::InvalidTimestamp(value.to_string()))
}
