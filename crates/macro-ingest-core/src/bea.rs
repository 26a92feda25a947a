//! BEA request/response model.
//!
//! Only the pieces the pipeline relies on: the query and its recorded
//! parameters, credential redaction, and error/data lookup inside the
//! `BEAAPI` envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::manifest::RequestParams;

pub const BEA_SOURCE: &str = "bea";

/// Request parameter carrying the API key. Never recorded.
pub const USER_ID_PARAM: &str = "UserID";

/// `BEAAPI.Results` keys stamped per request rather than per release.
pub const VOLATILE_RESULT_KEYS: &[&str] = &["UTCProductionTime"];

/// Year range used by `--smoke` runs.
pub const SMOKE_YEAR: &str = "LAST5";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaQuery {
    pub dataset: String,
    pub table_name: String,
    pub frequency: String,
    pub year: String,
    pub line_code: String,
    pub geo_fips: String,
}

impl BeaQuery {
    pub fn new(dataset: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table_name: table_name.into(),
            frequency: "A".to_string(),
            year: "ALL".to_string(),
            line_code: "1".to_string(),
            geo_fips: "STATE".to_string(),
        }
    }

    /// Same query restricted to the last few years.
    pub fn smoke(&self) -> Self {
        Self {
            year: SMOKE_YEAR.to_string(),
            ..self.clone()
        }
    }

    /// Parameters sent upstream, minus credentials.
    pub fn request_params(&self) -> RequestParams {
        [
            ("method", "GetData"),
            ("datasetname", self.dataset.as_str()),
            ("TableName", self.table_name.as_str()),
            ("LineCode", self.line_code.as_str()),
            ("GeoFips", self.geo_fips.as_str()),
            ("Year", self.year.as_str()),
            ("Frequency", self.frequency.as_str()),
            ("ResultFormat", "JSON"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
    }

    /// Parameters as query-string pairs (values rendered as plain strings).
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.request_params()
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect()
    }
}

/// Error reported inside a 200 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: Option<String>,
    pub description: String,
}

/// Remove the echoed `UserID` from `BEAAPI.Request.RequestParam`.
///
/// Returns how many entries were removed.
pub fn redact_credentials(payload: &mut Value) -> usize {
    let Some(params) = payload
        .pointer_mut("/BEAAPI/Request/RequestParam")
        .and_then(Value::as_array_mut)
    else {
        return 0;
    };
    let before = params.len();
    params.retain(|p| {
        p.get("ParameterName")
            .and_then(Value::as_str)
            .map(|name| !name.eq_ignore_ascii_case(USER_ID_PARAM))
            .unwrap_or(true)
    });
    before - params.len()
}

/// Drop per-request metadata so unchanged data hashes the same on every pull.
///
/// Returns how many keys were removed.
pub fn strip_volatile_metadata(payload: &mut Value) -> usize {
    let Some(results) = payload
        .pointer_mut("/BEAAPI/Results")
        .and_then(Value::as_object_mut)
    else {
        return 0;
    };
    VOLATILE_RESULT_KEYS
        .iter()
        .filter(|key| results.remove(**key).is_some())
        .count()
}

/// `BEAAPI.Error` or `BEAAPI.Results.Error`, whichever is present.
pub fn api_error(payload: &Value) -> Option<ApiError> {
    let error = payload
        .pointer("/BEAAPI/Error")
        .or_else(|| payload.pointer("/BEAAPI/Results/Error"))?;
    let code = error.get("APIErrorCode").map(scalar_text);
    let description = error
        .get("APIErrorDescription")
        .map(scalar_text)
        .unwrap_or_else(|| error.to_string());
    Some(ApiError { code, description })
}

/// `BEAAPI.Results.Data`, if the envelope has one.
pub fn data_rows(payload: &Value) -> Option<&Vec<Value>> {
    payload
        .pointer("/BEAAPI/Results/Data")
        .and_then(Value::as_array)
}

pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
