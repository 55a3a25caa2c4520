//! End-to-end pipeline tests against a mocked HTTP provider
//!
//! Covers retry and failure isolation, key rejection, batch boundaries, idempotent
//! re-runs and pagination. Rows land in a `MemoryStore`.

use psw_sync::config::{ApiSettings, HttpSettings};
use psw_sync::engine::{
    Backoff, ColumnType, EngineSettings, FetchUnit, MappingRules, MemoryStore, RateLimitedFetcher, RawPayload,
    RequestSpec, RetryPolicy, RunReport, RunState, SyncOrchestrator, SyncSource, TableSpec, Value,
};
use psw_sync::sources::countries::CountriesSource;
use psw_sync::sources::fx_rates::{CurrencyPair, FxRatesSource};
use psw_sync::sources::kpi::{KpiCombination, KpiGlobalSource};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Generic key/val source reading `{base}/records`
struct KeyValueSource {
    url: String,
    table: TableSpec,
    mapping: MappingRules,
}

impl KeyValueSource {
    fn new(server: &MockServer) -> Self {
        Self {
            url: format!("{}/records", server.uri()),
            table: TableSpec::new("kv")
                .key("key", ColumnType::Text)
                .column("val", ColumnType::BigInt),
            mapping: MappingRules::new().key("key", "key").field("val", "val"),
        }
    }
}

impl SyncSource for KeyValueSource {
    fn name(&self) -> &str {
        "kv"
    }

    fn table(&self) -> &TableSpec {
        &self.table
    }

    fn mapping(&self) -> &MappingRules {
        &self.mapping
    }

    fn units(&self) -> Vec<FetchUnit> {
        vec![FetchUnit::new("records", RequestSpec::get(&self.url))]
    }

    fn payload_keys(&self) -> &[&'static str] {
        &["data"]
    }

    fn next_page(&self, request: &RequestSpec, payload: &RawPayload) -> Option<RequestSpec> {
        let next = payload.get("next")?.as_u64()?;
        Some(request.clone().with_cursor("page", next))
    }
}

fn settings(batch_size: usize) -> EngineSettings {
    EngineSettings {
        batch_size,
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            backoff: Backoff::Exponential,
        },
        min_request_interval: Duration::ZERO,
        isolate_failed_rows: false,
    }
}

async fn run(source: impl SyncSource + 'static, store: &MemoryStore, batch_size: usize, interval: Duration) -> RunReport {
    let fetcher = RateLimitedFetcher::new(&HttpSettings::default(), interval).unwrap();
    SyncOrchestrator::new(Arc::new(source), fetcher, Box::new(store.clone()), settings(batch_size))
        .run()
        .await
}

fn api_for(server: &MockServer) -> ApiSettings {
    ApiSettings {
        borsdata_api_key: Some("test-key".to_string()),
        borsdata_base_url: server.uri(),
        freecurrency_api_key: Some("fx-key".to_string()),
        freecurrency_base_url: server.uri(),
        restcountries_base_url: server.uri(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_rejected_key_and_trailing_flush() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"key": "SE", "val": 10},
            {"key": "", "val": 20},
            {"key": "NO", "val": 30}
        ])))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let report = run(KeyValueSource::new(&server), &store, 2, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.stats.fetched, 3);
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(report.stats.written, 2);
    assert_eq!(report.stats.api_calls, 1);
    assert_eq!(store.write_calls(), 1);
    assert_eq!(store.len("kv"), 2);
    assert_eq!(store.open_handles(), 0);
}

#[tokio::test]
async fn test_rerun_updates_without_duplicates() {
    let server = MockServer::start().await;
    let store = MemoryStore::new();

    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"key": "SE", "val": 10},
            {"key": "NO", "val": 30}
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let first = run(KeyValueSource::new(&server), &store, 100, Duration::ZERO).await;
    assert_eq!((first.stats.inserted, first.stats.updated), (2, 0));

    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"key": "SE", "val": 15},
            {"key": "NO", "val": 30}
        ])))
        .mount(&server)
        .await;
    let second = run(KeyValueSource::new(&server), &store, 100, Duration::ZERO).await;

    assert_eq!(second.state, RunState::Done);
    assert_eq!((second.stats.inserted, second.stats.updated), (0, 2));
    assert_eq!(store.len("kv"), 2);
    let se = store.row("kv", &["SE"]).unwrap();
    assert_eq!(se.get("val"), Some(&Value::Int(15)));
}

#[tokio::test]
async fn test_batch_boundaries() {
    let server = MockServer::start().await;
    let records: Vec<_> = (0..7).map(|i| json!({"key": format!("K{i}"), "val": i})).collect();
    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": records})))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let report = run(KeyValueSource::new(&server), &store, 3, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(store.batch_sizes(), vec![3, 3, 1]);
    assert_eq!(report.stats.batches_written, 3);
    assert_eq!(report.stats.written, 7);
}

#[tokio::test]
async fn test_pages_are_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"key": "DK", "val": 3}]})))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"key": "SE", "val": 1}, {"key": "NO", "val": 2}],
            "next": 2
        })))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let report = run(KeyValueSource::new(&server), &store, 10, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.stats.api_calls, 2);
    assert_eq!(report.stats.units_total, 1);
    assert_eq!(store.len("kv"), 3);
}

#[tokio::test]
async fn test_rate_limited_unit_eventually_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3.1/all"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3.1/all"))
        .and(query_param("fields", "cca2,cca3,ccn3,cioc,car,tld,currencies,idd,name,flag"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"cca2": "SE", "name": {"common": "Sweden"}, "currencies": {"SEK": {}}},
            {"cca2": "NO", "name": {"common": "Norway"}, "idd": {"root": "+4", "suffixes": ["7"]}}
        ])))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let report = run(CountriesSource::new(&api_for(&server)), &store, 100, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.stats.api_calls, 4);
    assert_eq!(report.stats.units_failed, 0);
    assert_eq!(report.stats.written, 2);
    let norway = store.row("country_info", &["NO"]).unwrap();
    assert_eq!(norway.get("calling_code"), Some(&Value::text("+47")));
    assert_eq!(norway.get("currency_code"), Some(&Value::Null));
}

#[tokio::test]
async fn test_retry_after_is_respected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3.1/all"))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3.1/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"cca2": "FI"}])))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let started = Instant::now();
    let report = run(CountriesSource::new(&api_for(&server)), &store, 100, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.stats.api_calls, 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_failed_unit_does_not_stop_the_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/latest"))
        .and(query_param("base_currency", "EUR"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/latest"))
        .and(query_param("base_currency", "USD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"SEK": 10.5}})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/latest"))
        .and(query_param("base_currency", "GBP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"SEK": 13.2}})))
        .mount(&server)
        .await;

    let mut api = api_for(&server);
    api.currency_pairs = vec![
        CurrencyPair::new("USD", "SEK"),
        CurrencyPair::new("EUR", "SEK"),
        CurrencyPair::new("GBP", "SEK"),
    ];
    let store = MemoryStore::new();
    let report = run(FxRatesSource::new(&api), &store, 100, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Partial);
    assert_eq!(report.stats.units_total, 3);
    assert_eq!(report.stats.units_failed, 1);
    // 1 + 4 attempts + 1
    assert_eq!(report.stats.api_calls, 6);
    // SEK/SEK seed plus USD and GBP
    assert_eq!(report.stats.written, 3);
    assert_eq!(store.len("fx_rates_freecurrency"), 3);
    assert_eq!(report.state.exit_code(), 2);
}

#[tokio::test]
async fn test_seed_rows_do_not_hide_fetch_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/latest"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut api = api_for(&server);
    api.currency_pairs = vec![CurrencyPair::new("USD", "SEK"), CurrencyPair::new("EUR", "SEK")];
    let store = MemoryStore::new();
    let report = run(FxRatesSource::new(&api), &store, 100, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.state.exit_code(), 1);
    assert_eq!(report.stats.units_failed, 2);
    assert_eq!(report.stats.units_succeeded, 0);
    // Only the SEK/SEK seed row reached the store
    assert_eq!(report.stats.written, 1);
    assert!(report.error.unwrap().contains("all 2 fetch units failed"));
}

#[tokio::test]
async fn test_partial_run_with_nothing_to_write() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/instruments/global/kpis/2/1year/mean"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/instruments/global/kpis/1/1year/mean"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": []})))
        .mount(&server)
        .await;

    let mut api = api_for(&server);
    api.kpi_combinations = vec![KpiCombination::new(2, "1year", "mean"), KpiCombination::new(1, "1year", "mean")];
    let store = MemoryStore::new();
    let report = run(KpiGlobalSource::new(&api), &store, 100, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Partial);
    assert_eq!(report.state.exit_code(), 2);
    assert_eq!(report.stats.api_calls, 5);
    assert_eq!((report.stats.units_succeeded, report.stats.units_failed), (1, 1));
    assert_eq!(report.stats.written, 0);
    assert!(report.error.is_none());
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/instruments/global/kpis/2/1year/mean"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such kpi"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/instruments/global/kpis/1/1year/mean"))
        .and(query_param("authKey", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": [{"i": 750, "n": 3.1}]})))
        .mount(&server)
        .await;

    let mut api = api_for(&server);
    api.kpi_combinations = vec![KpiCombination::new(2, "1year", "mean"), KpiCombination::new(1, "1year", "mean")];
    let store = MemoryStore::new();
    let report = run(KpiGlobalSource::new(&api), &store, 100, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Partial);
    assert_eq!(report.stats.api_calls, 2);
    assert_eq!(report.stats.units_failed, 1);
    assert!(store.row("kpi_global", &["1", "1year", "mean", "750"]).is_some());
}

#[tokio::test]
async fn test_authentication_failure_aborts_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid authKey"))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let report = run(KpiGlobalSource::new(&api_for(&server)), &store, 100, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.stats.api_calls, 1);
    assert!(report.error.unwrap().contains("401"));
    assert_eq!(store.open_handles(), 0);
}

#[tokio::test]
async fn test_invalid_json_is_decode_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let report = run(KeyValueSource::new(&server), &store, 10, Duration::ZERO).await;

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.stats.api_calls, 1);
    assert_eq!(report.stats.units_failed, 1);
    assert_eq!(report.stats.written, 0);
}

#[tokio::test]
async fn test_requests_are_paced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": []})))
        .mount(&server)
        .await;

    let mut api = api_for(&server);
    api.kpi_combinations = vec![
        KpiCombination::new(1, "1year", "mean"),
        KpiCombination::new(2, "1year", "mean"),
        KpiCombination::new(3, "1year", "mean"),
    ];
    let store = MemoryStore::new();
    let started = Instant::now();
    let report = run(KpiGlobalSource::new(&api), &store, 100, Duration::from_millis(200)).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.stats.api_calls, 3);
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test]
async fn test_pacing_starts_after_slow_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"values": []}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let mut api = api_for(&server);
    api.kpi_combinations = vec![KpiCombination::new(1, "1year", "mean"), KpiCombination::new(2, "1year", "mean")];
    let store = MemoryStore::new();
    let started = Instant::now();
    let report = run(KpiGlobalSource::new(&api), &store, 100, Duration::from_millis(200)).await;

    assert_eq!(report.state, RunState::Done);
    // 300ms response, 200ms gap, 300ms response
    assert!(started.elapsed() >= Duration::from_millis(800));
}
