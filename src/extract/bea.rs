use async_trait::async_trait;
use macro_ingest_config::BeaConfig;
use macro_ingest_core::bea::{api_error, data_rows, redact_credentials, strip_volatile_metadata, BeaQuery, USER_ID_PARAM};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info};

use super::{Extraction, ExtractionError, Extractor};

/// Longest response body quoted in an error.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the BEA `GetData` endpoint.
pub struct BeaClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl BeaClient {
    pub fn new(config: &BeaConfig) -> Result<Self, ExtractionError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| ExtractionError::Client(e.to_string()))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            timeout_secs: config.http_timeout_secs,
        })
    }

    fn request_error(&self, err: reqwest::Error) -> ExtractionError {
        if err.is_timeout() {
            ExtractionError::Timeout {
                url: self.api_url.clone(),
                timeout_secs: self.timeout_secs,
            }
        } else {
            // without_url keeps the key in the query string out of the message
            ExtractionError::Http {
                url: self.api_url.clone(),
                reason: err.without_url().to_string(),
            }
        }
    }
}

#[async_trait]
impl Extractor for BeaClient {
    async fn extract(&self, query: &BeaQuery) -> Result<Extraction, ExtractionError> {
        let request_params = query.request_params();
        let mut pairs = vec![(USER_ID_PARAM.to_string(), self.api_key.clone())];
        pairs.extend(query.query_pairs());

        debug!(
            url = %self.api_url,
            dataset = %query.dataset,
            table_name = %query.table_name,
            year = %query.year,
            "Requesting BEA data"
        );

        let response = self
            .http
            .get(&self.api_url)
            .query(&pairs)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ExtractionError::Authentication {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut payload: Value = response
            .json()
            .await
            .map_err(|e| ExtractionError::InvalidResponse(e.without_url().to_string()))?;

        if let Some(err) = api_error(&payload) {
            return Err(ExtractionError::Api {
                code: err.code,
                description: err.description,
            });
        }

        let redacted = redact_credentials(&mut payload);
        strip_volatile_metadata(&mut payload);

        let row_count = data_rows(&payload)
            .ok_or_else(|| ExtractionError::InvalidResponse("BEAAPI.Results.Data is missing".to_string()))?
            .len() as u64;
        if row_count == 0 {
            return Err(ExtractionError::EmptyResult {
                dataset: query.dataset.clone(),
                table_name: query.table_name.clone(),
            });
        }

        info!(
            dataset = %query.dataset,
            table_name = %query.table_name,
            rows = row_count,
            redacted_params = redacted,
            "BEA data received"
        );

        Ok(Extraction {
            payload,
            request_params,
            row_count,
        })
    }
}
