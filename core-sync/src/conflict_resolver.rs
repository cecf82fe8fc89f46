//! # Conflict Resolver Registry
//!
//! Decides which version of an entity becomes authoritative when a local and
//! a remote version of the same `id` disagree.
//!
//! ## Strategies
//!
//! | category | strategy |
//! |---|---|
//! | `analysis-result` | [`MostRecentWins`] |
//! | `usage-counter` | [`CounterSum`] |
//! | `preference` | [`MostRecentWins`] |
//! | `entitlement-snapshot` | [`RemoteWins`] |
//! | anything else | the registry default, [`MostRecentWins`] |
//!
//! Whatever the strategy returns, the registry stamps the local `id` and
//! `version = max(local, remote) + 1` on the result.
//!
//! ## Failure handling
//!
//! A strategy that returns an error or panics is logged and replaced by the
//! default strategy for that call; resolution itself never fails.
//!
//! ## Usage
//!
//! ```
//! use core_sync::conflict_resolver::{ConflictResolver, RemoteWins};
//! use core_sync::Category;
//! use std::sync::Arc;
//!
//! let mut resolver = ConflictResolver::with_defaults();
//! resolver.register(Category::Other("feature-flags".into()), Arc::new(RemoteWins));
//! ```

use crate::error::{Result, SyncError};
use crate::record::{Category, SyncRecord};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Merge policy for one category
pub trait ConflictStrategy: Send + Sync {
    /// Stable name reported in events and logs
    fn name(&self) -> &'static str;

    /// Produce the authoritative payload-bearing record. `id` and `version`
    /// of the returned record are overwritten by the registry.
    fn merge(&self, local: &SyncRecord, remote: &SyncRecord) -> Result<SyncRecord>;
}

/// Ordering used by timestamp-based strategies: timestamp, then version,
/// then origin platform string.
fn recency(record: &SyncRecord) -> (i64, u64, &str) {
    (
        record.timestamp,
        record.version,
        record.origin_platform.as_str(),
    )
}

/// Larger `timestamp` wins. Exact ties on timestamp, version and origin go
/// to the remote side.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostRecentWins;

impl ConflictStrategy for MostRecentWins {
    fn name(&self) -> &'static str {
        "most-recent-wins"
    }

    fn merge(&self, local: &SyncRecord, remote: &SyncRecord) -> Result<SyncRecord> {
        let winner = match recency(local).cmp(&recency(remote)) {
            Ordering::Greater => local,
            Ordering::Less | Ordering::Equal => remote,
        };
        Ok(winner.clone())
    }
}

/// Remote version always wins
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWins;

impl ConflictStrategy for RemoteWins {
    fn name(&self) -> &'static str {
        "remote-wins"
    }

    fn merge(&self, _local: &SyncRecord, remote: &SyncRecord) -> Result<SyncRecord> {
        Ok(remote.clone())
    }
}

/// Per-key sum of numeric counters.
///
/// Keys present on one side only are copied; keys whose values are not both
/// numbers take the remote value. Both payloads must be JSON objects.
/// `timestamp` and `origin_platform` come from whichever side is later by
/// `(timestamp, origin)`, so applying the same deltas in any order yields
/// the same record.
///
/// The same physical event recorded on two installations is counted twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSum;

impl CounterSum {
    fn sum(local: &Value, remote: &Value) -> Value {
        if let (Some(a), Some(b)) = (local.as_i64(), remote.as_i64()) {
            if let Some(total) = a.checked_add(b) {
                return Value::from(total);
            }
        }
        if let (Some(a), Some(b)) = (local.as_f64(), remote.as_f64()) {
            if let Some(total) = Number::from_f64(a + b) {
                return Value::Number(total);
            }
        }
        remote.clone()
    }
}

impl ConflictStrategy for CounterSum {
    fn name(&self) -> &'static str {
        "counter-sum"
    }

    fn merge(&self, local: &SyncRecord, remote: &SyncRecord) -> Result<SyncRecord> {
        let (Some(local_counts), Some(remote_counts)) =
            (local.payload.as_object(), remote.payload.as_object())
        else {
            return Err(SyncError::Resolution {
                category: local.category.to_string(),
                message: "counter payloads must be JSON objects".to_string(),
            });
        };

        let mut merged: Map<String, Value> = local_counts.clone();
        for (key, remote_value) in remote_counts {
            let value = match local_counts.get(key) {
                Some(local_value) if local_value.is_number() && remote_value.is_number() => {
                    Self::sum(local_value, remote_value)
                }
                _ => remote_value.clone(),
            };
            merged.insert(key.clone(), value);
        }

        let later = if (local.timestamp, local.origin_platform.as_str())
            > (remote.timestamp, remote.origin_platform.as_str())
        {
            local
        } else {
            remote
        };

        Ok(SyncRecord {
            payload: Value::Object(merged),
            timestamp: later.timestamp,
            origin_platform: later.origin_platform.clone(),
            ..local.clone()
        })
    }
}

/// Outcome of [`ConflictResolver::resolve`]
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub record: SyncRecord,
    /// Name of the strategy that produced `record`
    pub strategy: &'static str,
    /// Whether the registered strategy failed and the default was used
    pub fell_back: bool,
}

/// Category -> strategy lookup table
pub struct ConflictResolver {
    strategies: HashMap<Category, Arc<dyn ConflictStrategy>>,
    default_strategy: Arc<dyn ConflictStrategy>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ConflictResolver {
    /// Empty registry; every category uses `default_strategy`.
    pub fn new(default_strategy: Arc<dyn ConflictStrategy>) -> Self {
        Self {
            strategies: HashMap::new(),
            default_strategy,
        }
    }

    /// Registry with the built-in category policies
    pub fn with_defaults() -> Self {
        let mut resolver = Self::new(Arc::new(MostRecentWins));
        resolver.register(Category::AnalysisResult, Arc::new(MostRecentWins));
        resolver.register(Category::UsageCounter, Arc::new(CounterSum));
        resolver.register(Category::Preference, Arc::new(MostRecentWins));
        resolver.register(Category::EntitlementSnapshot, Arc::new(RemoteWins));
        resolver
    }

    /// Register or replace the strategy for `category`
    pub fn register(&mut self, category: Category, strategy: Arc<dyn ConflictStrategy>) {
        self.strategies.insert(category, strategy);
    }

    pub fn strategy_for(&self, category: &Category) -> &Arc<dyn ConflictStrategy> {
        self.strategies
            .get(category)
            .unwrap_or(&self.default_strategy)
    }

    /// Merge `local` and `remote` versions of the same entity.
    pub fn resolve(&self, local: &SyncRecord, remote: &SyncRecord) -> Resolution {
        let strategy = self.strategy_for(&local.category);

        let (merged, name, fell_back) = match Self::run(strategy.as_ref(), local, remote) {
            Ok(record) => (record, strategy.name(), false),
            Err(message) => {
                warn!(
                    record_id = %local.id,
                    category = %local.category,
                    strategy = strategy.name(),
                    error = %message,
                    "Conflict strategy failed; using default"
                );
                let fallback = Self::run(self.default_strategy.as_ref(), local, remote)
                    .unwrap_or_else(|message| {
                        warn!(record_id = %local.id, error = %message, "Default strategy failed; keeping remote");
                        remote.clone()
                    });
                (fallback, self.default_strategy.name(), true)
            }
        };

        let record = SyncRecord {
            id: local.id.clone(),
            version: local.version.max(remote.version) + 1,
            ..merged
        };

        debug!(
            record_id = %record.id,
            strategy = name,
            version = record.version,
            "Resolved conflict"
        );

        Resolution {
            record,
            strategy: name,
            fell_back,
        }
    }

    fn run(
        strategy: &dyn ConflictStrategy,
        local: &SyncRecord,
        remote: &SyncRecord,
    ) -> std::result::Result<SyncRecord, String> {
        match catch_unwind(AssertUnwindSafe(|| strategy.merge(local, remote))) {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("strategy '{}' panicked", strategy.name())),
        }
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut categories: Vec<&str> = self.strategies.keys().map(Category::as_str).collect();
        categories.sort_unstable();
        f.debug_struct("ConflictResolver")
            .field("categories", &categories)
            .field("default", &self.default_strategy.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Platform;
    use serde_json::json;

    fn record(
        category: Category,
        payload: Value,
        timestamp: i64,
        origin: Platform,
        version: u64,
    ) -> SyncRecord {
        SyncRecord {
            id: "r1".into(),
            category,
            payload,
            timestamp,
            origin_platform: origin,
            version,
            synced: true,
        }
    }

    #[test]
    fn test_most_recent_timestamp_wins() {
        let resolver = ConflictResolver::with_defaults();
        let local = record(Category::Preference, json!({ "theme": "dark" }), 100, Platform::Mobile, 1);
        let remote = record(Category::Preference, json!({ "theme": "light" }), 200, Platform::Web, 1);

        let resolved = resolver.resolve(&local, &remote);
        assert_eq!(resolved.record.payload["theme"], "light");
        assert_eq!(resolved.record.version, 2);
        assert_eq!(resolved.strategy, "most-recent-wins");
        assert!(!resolved.fell_back);

        let reversed = resolver.resolve(&remote, &local);
        assert_eq!(reversed.record.payload["theme"], "light");
    }

    #[test]
    fn test_timestamp_ties_use_version_then_origin() {
        let resolver = ConflictResolver::with_defaults();
        let older = record(Category::AnalysisResult, json!("a"), 100, Platform::Web, 1);
        let newer = record(Category::AnalysisResult, json!("b"), 100, Platform::Mobile, 3);
        assert_eq!(resolver.resolve(&older, &newer).record.payload, json!("b"));
        assert_eq!(resolver.resolve(&newer, &older).record.payload, json!("b"));

        let web = record(Category::AnalysisResult, json!("web"), 100, Platform::Web, 1);
        let mobile = record(Category::AnalysisResult, json!("mobile"), 100, Platform::Mobile, 1);
        assert_eq!(resolver.resolve(&web, &mobile).record.payload, json!("web"));
        assert_eq!(resolver.resolve(&mobile, &web).record.payload, json!("web"));
    }

    #[test]
    fn test_counter_sum_is_commutative() {
        let resolver = ConflictResolver::with_defaults();
        let a = record(
            Category::UsageCounter,
            json!({ "summaries": 2, "exports": 1, "plan": "free" }),
            100,
            Platform::Mobile,
            1,
        );
        let b = record(
            Category::UsageCounter,
            json!({ "summaries": 3, "searches": 4, "plan": "pro" }),
            90,
            Platform::Web,
            2,
        );

        let ab = resolver.resolve(&a, &b).record;
        let ba = resolver.resolve(&b, &a).record;

        assert_eq!(ab.payload["summaries"], 5);
        assert_eq!(ab.payload["exports"], 1);
        assert_eq!(ab.payload["searches"], 4);
        assert_eq!(ab.payload["plan"], "pro");
        assert_eq!(ab.timestamp, 100);
        assert_eq!(ab.origin_platform, Platform::Mobile);
        assert_eq!(ab.version, 3);

        assert_eq!(ba.payload["summaries"], ab.payload["summaries"]);
        assert_eq!(ba.timestamp, ab.timestamp);
        assert_eq!(ba.origin_platform, ab.origin_platform);
    }

    #[test]
    fn test_counter_sum_handles_floats_and_overflow() {
        let strategy = CounterSum;
        let a = record(Category::UsageCounter, json!({ "minutes": 1.5, "n": i64::MAX }), 1, Platform::Web, 1);
        let b = record(Category::UsageCounter, json!({ "minutes": 2, "n": 1 }), 1, Platform::Web, 1);

        let merged = strategy.merge(&a, &b).unwrap();
        assert_eq!(merged.payload["minutes"], 3.5);
        assert!(merged.payload["n"].as_f64().unwrap() > 9.2e18);
    }

    #[test]
    fn test_entitlement_remote_always_wins() {
        let resolver = ConflictResolver::with_defaults();
        let local = record(Category::EntitlementSnapshot, json!({ "tier": "pro" }), 500, Platform::Mobile, 4);
        let remote = record(Category::EntitlementSnapshot, json!({ "tier": "free" }), 10, Platform::Web, 1);

        let resolved = resolver.resolve(&local, &remote);
        assert_eq!(resolved.record.payload["tier"], "free");
        assert_eq!(resolved.record.version, 5);
        assert_eq!(resolved.strategy, "remote-wins");
    }

    #[test]
    fn test_unregistered_category_uses_default() {
        let resolver = ConflictResolver::with_defaults();
        let category = Category::Other("notes".into());
        let local = record(category.clone(), json!(1), 300, Platform::Mobile, 1);
        let remote = record(category, json!(2), 200, Platform::Web, 1);

        let resolved = resolver.resolve(&local, &remote);
        assert_eq!(resolved.record.payload, json!(1));
        assert_eq!(resolved.strategy, "most-recent-wins");
    }

    struct Panicking;

    impl ConflictStrategy for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn merge(&self, _: &SyncRecord, _: &SyncRecord) -> Result<SyncRecord> {
            panic!("strategy bug")
        }
    }

    #[test]
    fn test_failing_strategies_fall_back_to_default() {
        let mut resolver = ConflictResolver::with_defaults();
        resolver.register(Category::Preference, Arc::new(Panicking));

        let local = record(Category::Preference, json!("old"), 1, Platform::Mobile, 1);
        let remote = record(Category::Preference, json!("new"), 2, Platform::Web, 1);
        let resolved = resolver.resolve(&local, &remote);
        assert!(resolved.fell_back);
        assert_eq!(resolved.strategy, "most-recent-wins");
        assert_eq!(resolved.record.payload, json!("new"));

        // Non-object counters make CounterSum return an error
        let local = record(Category::UsageCounter, json!(3), 5, Platform::Mobile, 1);
        let remote = record(Category::UsageCounter, json!({ "n": 1 }), 1, Platform::Web, 2);
        let resolved = resolver.resolve(&local, &remote);
        assert!(resolved.fell_back);
        assert_eq!(resolved.record.payload, json!(3));
        assert_eq!(resolved.record.version, 3);
    }

    #[test]
    fn test_result_keeps_local_id() {
        let resolver = ConflictResolver::with_defaults();
        let local = record(Category::Preference, json!(1), 1, Platform::Mobile, 1);
        let mut remote = record(Category::Preference, json!(2), 2, Platform::Web, 1);
        remote.id = "R1".into();

        assert_eq!(resolver.resolve(&local, &remote).record.id, "r1");
    }
}
