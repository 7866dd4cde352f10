//! Hosted `PostgREST`-style record store.
//!
//! Talks to `<base_url>/rest/v1/<table>` with the project's anon key in
//! both the `apikey` and `Authorization` headers. Selects are ordered by
//! `created_at.desc`; inserts ask for `return=representation` so the
//! store-assigned id and timestamp come back.
//!
//! Live inserts are delivered by polling `created_at=gt.<last seen>` on a
//! fixed interval. A failed poll is delivered to the subscriber as an
//! error and closes the channel; reconnecting is the subscriber's job.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use protest_map_hazard_models::{HazardReport, NewRecord, PanicAlert, StoredRecord, Table};
use tokio::sync::mpsc;

use crate::retry::{self, Retry};
use crate::{RecordStore, SUBSCRIPTION_BUFFER, SelectFilter, StoreError, Subscription};

/// Default interval between insert polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Connection settings for the hosted store.
#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub base_url: String,
    /// Anon/public API key.
    pub api_key: String,
    /// Interval between insert polls.
    pub poll_interval: Duration,
}

impl RestStoreConfig {
    /// Reads `STORE_URL`, `STORE_API_KEY`, and `STORE_POLL_MS`.
    ///
    /// Returns `None` when `STORE_URL` or `STORE_API_KEY` is unset or
    /// empty, meaning no hosted backend is configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("STORE_URL").ok()?;
        let api_key = std::env::var("STORE_API_KEY").ok()?;
        if base_url.is_empty() || api_key.is_empty() {
            return None;
        }
        let poll_interval = std::env::var("STORE_POLL_MS")
            .ok()
            .and_then(|ms| ms.parse().ok())
            .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis);
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            poll_interval,
        })
    }
}

/// A [`RecordStore`] backed by a hosted REST API.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    config: RestStoreConfig,
}

impl RestStore {
    /// Creates a store client.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Http`] if the HTTP client cannot be built.
    pub fn new(config: RestStoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, config })
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{table}", self.config.base_url)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    async fn fetch(
        &self,
        table: Table,
        params: &[(&str, String)],
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let url = self.table_url(table);
        let body = retry::send_json(Retry::Idempotent, || {
            self.authed(self.client.get(&url).query(params))
        })
        .await?;
        parse_rows(table, body)
    }

    /// Newest `created_at` currently in `table`, if any.
    async fn latest_created_at(&self, table: Table) -> Result<Option<DateTime<Utc>>, StoreError> {
        let rows = self
            .fetch(
                table,
                &[
                    ("select", "*".to_string()),
                    ("order", "created_at.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.first().map(StoredRecord::created_at))
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn insert(&self, record: NewRecord) -> Result<StoredRecord, StoreError> {
        let table = record.table();
        let url = self.table_url(table);
        let body = retry::send_json(Retry::Unsent, || {
            self.authed(self.client.post(&url))
                .header("Prefer", "return=representation")
                .json(&record)
        })
        .await?;

        parse_rows(table, body)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Unavailable {
                message: format!("insert into {table} returned no row"),
            })
    }

    async fn select_all(
        &self,
        table: Table,
        filter: SelectFilter,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let mut params = vec![
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
        ];
        if filter.active_only {
            params.push(("is_active", "eq.true".to_string()));
        }
        self.fetch(table, &params).await
    }

    async fn subscribe_insert(&self, table: Table) -> Result<Subscription, StoreError> {
        let mut last_seen = self.latest_created_at(table).await?.unwrap_or_else(Utc::now);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let store = self.clone();

        log::info!(
            "Polling {table} for inserts every {:?}",
            store.config.poll_interval
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.poll_since(table, last_seen).await {
                    Ok(rows) => {
                        for row in rows {
                            last_seen = last_seen.max(row.created_at());
                            if tx.send(Ok(row)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("Polling {table} failed: {e}");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        });

        Ok(Subscription::new(table, rx, task.abort_handle()))
    }
}

impl RestStore {
    async fn poll_since(
        &self,
        table: Table,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.fetch(
            table,
            &[
                ("select", "*".to_string()),
                (
                    "created_at",
                    format!("gt.{}", since.to_rfc3339_opts(SecondsFormat::Micros, true)),
                ),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }
}

/// Parses a JSON array of rows from `table`.
///
/// # Errors
///
/// Returns [`StoreError::Json`] if any row does not match the table's
/// shape, or [`StoreError::Unavailable`] if the body is not an array.
pub fn parse_rows(table: Table, body: serde_json::Value) -> Result<Vec<StoredRecord>, StoreError> {
    let serde_json::Value::Array(rows) = body else {
        return Err(StoreError::Unavailable {
            message: format!("expected an array of {table} rows"),
        });
    };

    rows.into_iter()
        .map(|row| {
            Ok(match table {
                Table::ChaosReports => {
                    StoredRecord::Hazard(serde_json::from_value::<HazardReport>(row)?)
                }
                Table::PanicAlerts => {
                    StoredRecord::Panic(serde_json::from_value::<PanicAlert>(row)?)
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use actix_web::http::StatusCode;
    use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
    use protest_map_hazard_models::{DangerType, NewHazardReport, Position, RecordId};

    /// A request as the fake backend saw it.
    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        path: String,
        query: HashMap<String, String>,
        prefer: Option<String>,
    }

    /// Scripted `PostgREST` stand-in. Replies are served in order; once
    /// they run out every request gets `200 []`.
    #[derive(Default)]
    struct Backend {
        seen: Mutex<Vec<Seen>>,
        replies: Mutex<VecDeque<(u16, serde_json::Value)>>,
    }

    impl Backend {
        fn reply(&self, status: u16, body: serde_json::Value) {
            self.replies.lock().unwrap().push_back((status, body));
        }

        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    async fn respond(req: HttpRequest, backend: web::Data<Backend>) -> HttpResponse {
        let query = web::Query::<HashMap<String, String>>::from_query(req.query_string())
            .map(web::Query::into_inner)
            .unwrap_or_default();
        backend.seen.lock().unwrap().push(Seen {
            method: req.method().to_string(),
            path: req.path().to_string(),
            query,
            prefer: req
                .headers()
                .get("Prefer")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });

        let (status, body) = backend
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((200, serde_json::json!([])));
        HttpResponse::build(StatusCode::from_u16(status).unwrap()).json(body)
    }

    fn serve(backend: &Arc<Backend>) -> RestStore {
        let data = web::Data::from(backend.clone());
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .default_service(web::to(respond))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        RestStore::new(RestStoreConfig {
            base_url: format!("http://{addr}"),
            api_key: "anon".to_string(),
            poll_interval: Duration::from_millis(20),
        })
        .unwrap()
    }

    fn report_row(id: &str, created_at: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "location_lat": -1.3,
            "location_lng": 36.82,
            "danger_type": "Tear Gas",
            "description": null,
            "created_at": created_at,
            "is_verified": false
        })
    }

    fn tear_gas() -> NewRecord {
        NewRecord::Hazard(NewHazardReport::new(
            Position::new(-1.30, 36.82),
            DangerType::TearGas,
            None,
        ))
    }

    #[actix_web::test]
    async fn selects_newest_first_and_filters_active_alerts() {
        let backend = Arc::new(Backend::default());
        let store = serve(&backend);

        store
            .select_all(Table::PanicAlerts, SelectFilter::for_table(Table::PanicAlerts))
            .await
            .unwrap();
        store
            .select_all(Table::ChaosReports, SelectFilter::for_table(Table::ChaosReports))
            .await
            .unwrap();

        let seen = backend.seen();
        assert_eq!(seen[0].path, "/rest/v1/panic_alerts");
        assert_eq!(seen[0].query["is_active"], "eq.true");
        assert_eq!(seen[0].query["order"], "created_at.desc");
        assert_eq!(seen[1].path, "/rest/v1/chaos_reports");
        assert!(!seen[1].query.contains_key("is_active"));
    }

    #[actix_web::test]
    async fn insert_returns_the_stored_row() {
        let backend = Arc::new(Backend::default());
        backend.reply(201, serde_json::json!([report_row("r-1", "2026-10-16T10:00:00Z")]));
        let store = serve(&backend);

        let stored = store.insert(tear_gas()).await.unwrap();

        assert_eq!(stored.id(), &RecordId::from("r-1"));
        let seen = backend.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].prefer.as_deref(), Some("return=representation"));
    }

    #[actix_web::test]
    async fn insert_is_not_repeated_after_a_server_error() {
        let backend = Arc::new(Backend::default());
        backend.reply(503, serde_json::json!({ "message": "upstream timeout" }));
        backend.reply(201, serde_json::json!([report_row("dup", "2026-10-16T10:00:00Z")]));
        let store = serve(&backend);

        let err = store.insert(tear_gas()).await.unwrap_err();

        assert!(matches!(err, StoreError::Status { status: 503, .. }));
        assert_eq!(backend.seen().len(), 1);
    }

    #[actix_web::test]
    async fn client_errors_are_not_retried() {
        let backend = Arc::new(Backend::default());
        backend.reply(401, serde_json::json!({ "message": "JWT expired" }));
        let store = serve(&backend);

        let err = store
            .select_all(Table::ChaosReports, SelectFilter::default())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Status { status: 401, .. }));
        assert_eq!(backend.seen().len(), 1);
    }

    #[actix_web::test]
    async fn rate_limits_and_server_errors_are_retried_on_reads() {
        let backend = Arc::new(Backend::default());
        backend.reply(503, serde_json::json!({}));
        backend.reply(429, serde_json::json!({}));
        backend.reply(200, serde_json::json!([report_row("r-1", "2026-10-16T10:00:00Z")]));
        let store = serve(&backend);

        let rows = store
            .select_all(Table::ChaosReports, SelectFilter::default())
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(backend.seen().len(), 3);
    }

    #[actix_web::test]
    async fn polling_advances_past_the_newest_row_seen() {
        let backend = Arc::new(Backend::default());
        // Newest existing row, then the first poll's result.
        backend.reply(200, serde_json::json!([report_row("old", "2026-10-16T10:00:00Z")]));
        backend.reply(200, serde_json::json!([report_row("new", "2026-10-16T10:00:05.5Z")]));
        let store = serve(&backend);

        let mut subscription = store.subscribe_insert(Table::ChaosReports).await.unwrap();
        let row = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(row.id(), &RecordId::from("new"));

        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.seen().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let seen = backend.seen();
        assert_eq!(seen[0].query["order"], "created_at.desc");
        assert_eq!(seen[0].query["limit"], "1");
        assert_eq!(seen[1].query["created_at"], "gt.2026-10-16T10:00:00.000000Z");
        assert_eq!(seen[1].query["order"], "created_at.asc");
        assert_eq!(seen[2].query["created_at"], "gt.2026-10-16T10:00:05.500000Z");
    }

    #[test]
    fn parses_chaos_report_rows() {
        let body = serde_json::json!([{
            "id": "0f8e",
            "location_lat": -1.3,
            "location_lng": 36.82,
            "danger_type": "Police Raid",
            "description": "near Kenyatta Avenue",
            "created_at": "2026-10-16T10:00:00.123456+00:00",
            "is_verified": true
        }]);
        let rows = parse_rows(Table::ChaosReports, body).unwrap();
        assert_eq!(rows.len(), 1);
        let StoredRecord::Hazard(report) = &rows[0] else {
            panic!("expected hazard row");
        };
        assert_eq!(report.id, RecordId::from("0f8e"));
        assert!(report.is_verified);
        assert_eq!(report.description.as_deref(), Some("near Kenyatta Avenue"));
    }

    #[test]
    fn parses_panic_rows_with_numeric_ids() {
        let body = serde_json::json!([{
            "id": 17,
            "location_lat": -1.29,
            "location_lng": 36.82,
            "emergency_note": null,
            "created_at": "2026-10-16T10:00:00Z",
            "is_active": true
        }]);
        let rows = parse_rows(Table::PanicAlerts, body).unwrap();
        assert_eq!(rows[0].id(), &RecordId::from("17"));
        assert_eq!(rows[0].table(), Table::PanicAlerts);
    }

    #[test]
    fn rejects_non_array_bodies() {
        let body = serde_json::json!({ "message": "JWT expired" });
        assert!(matches!(
            parse_rows(Table::ChaosReports, body),
            Err(StoreError::Unavailable { .. })
        ));
    }

    #[test]
    fn rejects_rows_of_the_wrong_shape() {
        let body = serde_json::json!([{ "id": "x", "created_at": "2026-10-16T10:00:00Z" }]);
        assert!(matches!(
            parse_rows(Table::ChaosReports, body),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn config_from_env_requires_url_and_key() {
        // Safety: test-only; no other threads depend on these env vars.
        unsafe {
            std::env::remove_var("STORE_URL");
            std::env::remove_var("STORE_API_KEY");
        }
        assert!(RestStoreConfig::from_env().is_none());
    }
}
