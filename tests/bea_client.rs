use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use macro_ingest::{BeaClient, ExtractionError, Extractor};
use macro_ingest_config::BeaConfig;
use macro_ingest_core::bea::BeaQuery;
use macro_ingest_core::stable_payload_hash;
use serde_json::json;

static PULLS: AtomicU64 = AtomicU64::new(0);

/// Differs on every response, like the real `UTCProductionTime`.
fn production_stamp() -> String {
    let n = PULLS.fetch_add(1, Ordering::SeqCst);
    format!("2026-10-19T06:00:{:02}.000", n % 60)
}

/// Stand-in for the BEA endpoint; behaviour is picked by the API key.
async fn bea(Query(params): Query<HashMap<String, String>>) -> Response {
    let key = params.get("UserID").cloned().unwrap_or_default();
    match key.as_str() {
        "denied" => (StatusCode::UNAUTHORIZED, "no").into_response(),
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        "api-error" => Json(json!({
            "BEAAPI": {"Results": {"Error": {
                "APIErrorCode": "40",
                "APIErrorDescription": "The dataset requested requires parameter TableName"
            }}}
        }))
        .into_response(),
        "empty" => Json(json!({"BEAAPI": {"Results": {"Data": []}}})).into_response(),
        _ => Json(json!({
            "BEAAPI": {
                "Request": {"RequestParam": [
                    {"ParameterName": "USERID", "ParameterValue": key},
                    {"ParameterName": "TABLENAME", "ParameterValue": params.get("TableName")},
                    {"ParameterName": "YEAR", "ParameterValue": params.get("Year")}
                ]},
                "Results": {"UTCProductionTime": production_stamp(), "Data": [
                    {"Code": "SQPCE-1", "GeoFips": "01000", "GeoName": "Alabama", "TimePeriod": "2023",
                     "CL_UNIT": "Millions of current dollars", "UNIT_MULT": "6", "DataValue": "190,123.4"},
                    {"Code": "SQPCE-1", "GeoFips": "02000", "GeoName": "Alaska", "TimePeriod": "2023",
                     "CL_UNIT": "Millions of current dollars", "UNIT_MULT": "6", "DataValue": "(NA)"}
                ]}
            }
        }))
        .into_response(),
    }
}

async fn spawn_server() -> SocketAddr {
    let app = Router::new().route("/api/data", get(bea));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr, api_key: &str) -> BeaClient {
    BeaClient::new(&BeaConfig {
        api_key: api_key.to_string(),
        api_url: format!("http://{addr}/api/data"),
        http_timeout_secs: 5,
        ..BeaConfig::default()
    })
    .unwrap()
}

fn query() -> BeaQuery {
    BeaQuery::new("Regional", "SQPCE")
}

#[tokio::test]
async fn successful_pull_is_redacted() {
    let addr = spawn_server().await;

    let extraction = client(addr, "secret-key").extract(&query().smoke()).await.unwrap();

    assert_eq!(extraction.row_count, 2);
    let params = extraction.payload["BEAAPI"]["Request"]["RequestParam"]
        .as_array()
        .unwrap();
    assert_eq!(params.len(), 2);
    assert!(!extraction.payload.to_string().contains("secret-key"));
    // the server saw the smoke year
    assert_eq!(params[1]["ParameterValue"], "LAST5");

    assert!(!extraction.request_params.contains_key("UserID"));
    assert_eq!(extraction.request_params["TableName"], "SQPCE");
    assert_eq!(extraction.request_params["Year"], "LAST5");
}

#[tokio::test]
async fn repeated_pulls_of_unchanged_data_hash_identically() {
    let addr = spawn_server().await;
    let bea = client(addr, "secret-key");

    let first = bea.extract(&query()).await.unwrap();
    let second = bea.extract(&query()).await.unwrap();

    assert!(first.payload["BEAAPI"]["Results"].get("UTCProductionTime").is_none());
    assert_eq!(
        stable_payload_hash(&first.payload).unwrap(),
        stable_payload_hash(&second.payload).unwrap()
    );
}

#[tokio::test]
async fn api_error_inside_ok_response() {
    let addr = spawn_server().await;

    let err = client(addr, "api-error").extract(&query()).await.unwrap_err();

    match &err {
        ExtractionError::Api { code, description } => {
            assert_eq!(code.as_deref(), Some("40"));
            assert!(description.contains("TableName"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().starts_with("[E002]"));
}

#[tokio::test]
async fn empty_data_is_an_error() {
    let addr = spawn_server().await;

    let err = client(addr, "empty").extract(&query()).await.unwrap_err();

    assert!(matches!(err, ExtractionError::EmptyResult { .. }), "got {err}");
}

#[tokio::test]
async fn rejected_credentials() {
    let addr = spawn_server().await;

    let err = client(addr, "denied").extract(&query()).await.unwrap_err();

    assert!(matches!(err, ExtractionError::Authentication { status: 401 }), "got {err}");
}

#[tokio::test]
async fn server_error_quotes_the_body() {
    let addr = spawn_server().await;

    let err = client(addr, "broken").extract(&query()).await.unwrap_err();

    match err {
        ExtractionError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_an_http_error() {
    // bind then drop so nothing listens on the port
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(addr, "secret-key").extract(&query()).await.unwrap_err();

    assert!(matches!(err, ExtractionError::Http { .. }), "got {err}");
    assert!(!err.to_string().contains("secret-key"));
}
