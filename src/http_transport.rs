//! [`RecordTransport`] for HTTP ingestion gateways that accept newline-delimited JSON.
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use url::Url;

use crate::{
    error::{ConfigurationError, TransportError},
    transport::{BatchEntryResult, PutRecordBatchResponse, RecordTransport},
};

const NDJSON: &str = "application/x-ndjson";

/// Posts records to `{base_url}/streams/{stream}/records` and batches to
/// `{base_url}/streams/{stream}/batch`.
pub struct HttpTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    base_url: Url,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutRecordResponse {
    record_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    #[serde(default)]
    results: Vec<BatchResponseEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponseEntry {
    record_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: Option<String>) -> crate::Result<HttpTransport> {
        let base_url = Url::parse(base_url).map_err(ConfigurationError::InvalidEndpoint)?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigurationError::InvalidEndpoint(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            )
            .into());
        }

        Ok(HttpTransport {
            client: reqwest::blocking::Client::new(),
            base_url,
            api_key,
        })
    }

    fn url(&self, stream_name: &str, action: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["streams", stream_name, action]);
        }
        url
    }

    fn post(
        &self,
        url: Url,
        body: Vec<u8>,
    ) -> Result<reqwest::blocking::Response, TransportError> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, NDJSON)
            .body(body);
        if let Some(api_key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {api_key}"));
        }

        let response = request.send()?;
        let response = response.error_for_status().map_err(|err| {
            log::warn!(target: "experiment_firehose",
                       "received non-2xx response from ingestion endpoint: {:?}", err.status());
            TransportError::from(err)
        })?;
        Ok(response)
    }
}

impl RecordTransport for HttpTransport {
    fn put_record(&self, stream_name: &str, data: Vec<u8>) -> Result<String, TransportError> {
        let response = self.post(self.url(stream_name, "records"), data)?;
        let response: PutRecordResponse = response.json()?;
        Ok(response.record_id)
    }

    fn put_record_batch(
        &self,
        stream_name: &str,
        records: Vec<Vec<u8>>,
    ) -> Result<PutRecordBatchResponse, TransportError> {
        let submitted = records.len();
        // Records are already newline-terminated.
        let body = records.concat();

        let response = self.post(self.url(stream_name, "batch"), body)?;
        let response: BatchResponse = response.json()?;

        let mut entries: Vec<BatchEntryResult> = response
            .results
            .into_iter()
            .map(|entry| match (entry.record_id, entry.error_code) {
                (Some(record_id), None) => BatchEntryResult::Delivered { record_id },
                (_, Some(code)) => BatchEntryResult::Failed(TransportError::Service {
                    code,
                    message: entry.error_message.unwrap_or_default(),
                }),
                (None, None) => BatchEntryResult::Failed(TransportError::Unavailable),
            })
            .collect();
        entries.resize(submitted, BatchEntryResult::Failed(TransportError::Unavailable));

        let failed_put_count = entries
            .iter()
            .filter(|entry| matches!(entry, BatchEntryResult::Failed(_)))
            .count();

        Ok(PutRecordBatchResponse {
            failed_put_count,
            entries,
        })
    }
}
