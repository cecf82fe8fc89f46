//! PostgREST connector implementing `RemoteStore`

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bytes::Bytes;
use core_runtime::config::RemoteEndpointConfig;
use core_sync::{PullFilter, RemoteStore, SyncError, SyncRecord};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{Result, SupabaseError};
use crate::types::{to_iso, SyncRow};

/// Columns making a row unique; every pushed version is its own row
const CONFLICT_TARGET: &str = "id,platform,version";

/// Supabase-backed remote store
///
/// # Example
///
/// ```ignore
/// use provider_supabase::SupabaseRemoteStore;
///
/// let store = SupabaseRemoteStore::new(http_client, &endpoint)?;
/// store.set_access_token(Some(session.access_token));
/// ```
pub struct SupabaseRemoteStore {
    http_client: Arc<dyn HttpClient>,
    endpoint: RemoteEndpointConfig,
    /// User session token; the anon key is sent when absent
    access_token: RwLock<Option<String>>,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl SupabaseRemoteStore {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        endpoint: &RemoteEndpointConfig,
    ) -> Result<Self> {
        endpoint
            .validate()
            .map_err(|e| SupabaseError::InvalidConfig(e.to_string()))?;

        let mut endpoint = endpoint.clone();
        endpoint.base_url = endpoint.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            http_client,
            endpoint,
            access_token: RwLock::new(None),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn set_access_token(&self, token: Option<String>) {
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.endpoint.base_url, self.endpoint.table)
    }

    fn request(&self, method: HttpMethod, url: String) -> HttpRequest {
        let bearer = self
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.endpoint.api_key.clone());

        HttpRequest::new(method, url)
            .header("apikey", self.endpoint.api_key.clone())
            .bearer_token(bearer)
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
    }

    fn upsert_url(&self) -> String {
        format!("{}?on_conflict={}", self.table_url(), CONFLICT_TARGET)
    }

    fn query_url(&self, user_id: &str, filter: &PullFilter) -> Result<String> {
        Ok(format!(
            "{}?select=*&user_id=eq.{}&synced_at=gte.{}&platform=neq.{}&order=synced_at.asc,version.asc",
            self.table_url(),
            urlencoding::encode(user_id),
            urlencoding::encode(&to_iso(filter.since)?),
            urlencoding::encode(filter.excluding_origin.as_str()),
        ))
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self
            .http_client
            .execute_with_retry(request, self.retry.clone())
            .await?;

        if response.is_success() {
            return Ok(response);
        }

        let body = String::from_utf8_lossy(&response.body);
        warn!(status = response.status, "Supabase request failed");
        Err(SupabaseError::from_status(response.status, &body))
    }

    #[instrument(skip(self, record), fields(record_id = %record.id, version = record.version))]
    async fn upsert_row(&self, user_id: &str, record: &SyncRecord) -> Result<()> {
        let row = SyncRow::from_record(user_id, record)?;
        let body = serde_json::to_vec(&[row]).map_err(|e| SupabaseError::ParseError(e.to_string()))?;

        let mut request = self
            .request(HttpMethod::Post, self.upsert_url())
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=minimal");
        request.body = Some(Bytes::from(body));

        self.send(request).await?;
        debug!("Upserted row");
        Ok(())
    }

    #[instrument(skip(self, user_id), fields(since = filter.since))]
    async fn query_rows(&self, user_id: &str, filter: &PullFilter) -> Result<Vec<SyncRecord>> {
        let url = self.query_url(user_id, filter)?;
        let response = self.send(self.request(HttpMethod::Get, url)).await?;

        let rows: Vec<Value> = serde_json::from_slice(&response.body)
            .map_err(|e| SupabaseError::ParseError(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed = serde_json::from_value::<SyncRow>(row)
                .map_err(|e| SupabaseError::ParseError(e.to_string()))
                .and_then(SyncRow::into_record);
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping malformed remote row"),
            }
        }

        debug!(count = records.len(), "Fetched remote rows");
        Ok(records)
    }
}

#[async_trait]
impl RemoteStore for SupabaseRemoteStore {
    async fn upsert(&self, user_id: &str, record: &SyncRecord) -> core_sync::Result<()> {
        self.upsert_row(user_id, record).await.map_err(SyncError::from)
    }

    async fn query(&self, user_id: &str, filter: &PullFilter) -> core_sync::Result<Vec<SyncRecord>> {
        self.query_rows(user_id, filter).await.map_err(SyncError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use core_sync::{Category, Platform};
    use mockall::mock;
    use serde_json::json;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
            async fn execute_with_retry(&self, request: HttpRequest, policy: RetryPolicy) -> BridgeResult<HttpResponse>;
        }
    }

    fn endpoint() -> RemoteEndpointConfig {
        RemoteEndpointConfig::new("https://xyz.supabase.co/", "anon-key")
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn record() -> SyncRecord {
        SyncRecord {
            id: "p1".into(),
            category: Category::Preference,
            payload: json!({ "theme": "dark" }),
            timestamp: 1_700_000_000_000,
            origin_platform: Platform::Mobile,
            version: 2,
            synced: false,
        }
    }

    fn store(mock: MockHttpClient) -> SupabaseRemoteStore {
        SupabaseRemoteStore::new(Arc::new(mock), &endpoint()).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_request_shape() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute_with_retry()
            .times(1)
            .withf(|request, _| {
                let body: Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
                request.method == HttpMethod::Post
                    && request.url
                        == "https://xyz.supabase.co/rest/v1/sync_data?on_conflict=id,platform,version"
                    && request.headers.get("apikey") == Some(&"anon-key".to_string())
                    && request.headers.get("Authorization") == Some(&"Bearer user-jwt".to_string())
                    && request
                        .headers
                        .get("Prefer")
                        .is_some_and(|p| p.contains("resolution=merge-duplicates"))
                    && body[0]["user_id"] == "user-1"
                    && body[0]["type"] == "preference"
                    && body[0]["version"] == 2
                    && body[0]["timestamp"] == "2023-11-14T22:13:20.000Z"
                    && body[0].get("synced_at").is_none()
            })
            .returning(|_, _| Ok(response(201, "")));

        let store = store(mock);
        store.set_access_token(Some("user-jwt".into()));
        store.upsert("user-1", &record()).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_url_and_row_parsing() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute_with_retry()
            .times(1)
            .withf(|request, _| {
                request.method == HttpMethod::Get
                    && request.url.starts_with("https://xyz.supabase.co/rest/v1/sync_data?select=*")
                    && request.url.contains("user_id=eq.user%201")
                    && request.url.contains("synced_at=gte.2023-11-14T22%3A13%3A20.000Z")
                    && request.url.contains("platform=neq.mobile")
                    && request.url.ends_with("order=synced_at.asc,version.asc")
                    && request.headers.get("Authorization") == Some(&"Bearer anon-key".to_string())
            })
            .returning(|_, _| {
                Ok(response(
                    200,
                    r#"[
                        {
                            "id": "p1",
                            "user_id": "user 1",
                            "type": "preference",
                            "data": {"theme": "light"},
                            "timestamp": "2023-11-14T22:13:30.000+00:00",
                            "platform": "web",
                            "version": 4,
                            "synced_at": "2023-11-14T22:13:40.000+00:00"
                        },
                        {
                            "id": "broken",
                            "user_id": "user 1",
                            "type": "preference",
                            "data": {},
                            "timestamp": "not a time",
                            "platform": "web",
                            "version": 1
                        }
                    ]"#,
                ))
            });

        let filter = PullFilter {
            since: 1_700_000_000_000,
            excluding_origin: Platform::Mobile,
        };
        let records = store(mock).query("user 1", &filter).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload["theme"], "light");
        assert_eq!(records[0].timestamp, 1_700_000_010_000);
        assert_eq!(records[0].origin_platform, Platform::Web);
        assert_eq!(records[0].version, 4);
        assert!(records[0].synced);
    }

    #[tokio::test]
    async fn test_api_error_handling() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute_with_retry()
            .returning(|_, _| Ok(response(401, r#"{"message":"JWT expired"}"#)));

        let err = store(mock).upsert("user-1", &record()).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(msg) if msg.contains("JWT expired")));
    }

    #[tokio::test]
    async fn test_transport_error_handling() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute_with_retry().returning(|_, _| {
            Err(bridge_traits::BridgeError::OperationFailed(
                "connection reset".into(),
            ))
        });

        let filter = PullFilter {
            since: 0,
            excluding_origin: Platform::Web,
        };
        let err = store(mock).query("user-1", &filter).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(msg) if msg.contains("connection reset")));
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let result = SupabaseRemoteStore::new(
            Arc::new(MockHttpClient::new()),
            &RemoteEndpointConfig::new("", "anon-key"),
        );
        assert!(matches!(result, Err(SupabaseError::InvalidConfig(_))));
    }
}
