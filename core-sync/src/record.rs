//! The unit of synchronization and its tags

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Installation that authored a record version.
///
/// Serialized as a plain string so rows written by other clients with
/// platform names this build does not know still round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Platform {
    Mobile,
    BrowserExtension,
    Web,
    Other(String),
}

impl Platform {
    pub fn as_str(&self) -> &str {
        match self {
            Platform::Mobile => "mobile",
            Platform::BrowserExtension => "browser-extension",
            Platform::Web => "web",
            Platform::Other(name) => name,
        }
    }
}

impl From<String> for Platform {
    fn from(value: String) -> Self {
        match value.as_str() {
            "mobile" => Platform::Mobile,
            "browser-extension" => Platform::BrowserExtension,
            "web" => Platform::Web,
            _ => Platform::Other(value),
        }
    }
}

impl From<&str> for Platform {
    fn from(value: &str) -> Self {
        Platform::from(value.to_string())
    }
}

impl From<Platform> for String {
    fn from(value: Platform) -> Self {
        match value {
            Platform::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data category; selects the conflict strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    AnalysisResult,
    UsageCounter,
    Preference,
    EntitlementSnapshot,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::AnalysisResult => "analysis-result",
            Category::UsageCounter => "usage-counter",
            Category::Preference => "preference",
            Category::EntitlementSnapshot => "entitlement-snapshot",
            Category::Other(name) => name,
        }
    }
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        match value.as_str() {
            "analysis-result" => Category::AnalysisResult,
            "usage-counter" => Category::UsageCounter,
            "preference" => Category::Preference,
            "entitlement-snapshot" => Category::EntitlementSnapshot,
            _ => Category::Other(value),
        }
    }
}

impl From<&str> for Category {
    fn from(value: &str) -> Self {
        Category::from(value.to_string())
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        match value {
            Category::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One version of one logical entity.
///
/// `version` never decreases for an `id` on a given installation; merges
/// produce a version above both inputs. `timestamp` is the writer's clock in
/// milliseconds and only breaks ties inside a merge strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub id: String,
    pub category: Category,
    pub payload: Value,
    pub timestamp: i64,
    pub origin_platform: Platform,
    pub version: u64,
    #[serde(default)]
    pub synced: bool,
}

impl SyncRecord {
    /// Size of the payload as sent over the wire
    pub fn payload_size(&self) -> u64 {
        serde_json::to_string(&self.payload)
            .map(|s| s.len() as u64)
            .unwrap_or(0)
    }

    pub fn same_version(&self, other: &SyncRecord) -> bool {
        self.id == other.id && self.version == other.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_uses_camel_case_and_string_tags() {
        let record = SyncRecord {
            id: "p1".into(),
            category: Category::Preference,
            payload: json!({ "theme": "dark" }),
            timestamp: 100,
            origin_platform: Platform::BrowserExtension,
            version: 1,
            synced: false,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["originPlatform"], "browser-extension");
        assert_eq!(value["category"], "preference");
        assert_eq!(value["synced"], false);

        let back: SyncRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_unknown_tags_are_preserved() {
        let category = Category::from("reading-list");
        assert_eq!(category, Category::Other("reading-list".into()));
        assert_eq!(String::from(category), "reading-list");

        let platform: Platform = serde_json::from_str("\"desktop\"").unwrap();
        assert_eq!(platform.as_str(), "desktop");
    }

    #[test]
    fn test_missing_synced_defaults_to_false() {
        let record: SyncRecord = serde_json::from_value(json!({
            "id": "c1",
            "category": "usage-counter",
            "payload": { "summaries": 1 },
            "timestamp": 5,
            "originPlatform": "mobile",
            "version": 2
        }))
        .unwrap();
        assert!(!record.synced);
        assert_eq!(record.payload_size(), "{\"summaries\":1}".len() as u64);
    }
}
