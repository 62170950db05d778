//! [`RecordTransport`] backed by Amazon Data Firehose.
use aws_config::{BehaviorVersion, Region};
use aws_sdk_firehose::{
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::Blob,
    types::Record,
};

use crate::{
    delivery_config::{ResolvedCredentials, ResolvedDelivery},
    error::{ConfigurationError, TransportError},
    transport::{BatchEntryResult, PutRecordBatchResponse, RecordTransport},
};

/// Firehose rejects batches of more than 500 records.
const MAX_BATCH_SIZE: usize = 500;
/// Firehose rejects batches larger than 4 MiB.
const MAX_BATCH_BYTES: usize = 4 * 1024 * 1024;

/// A blocking Firehose client.
///
/// The AWS SDK is asynchronous, so the transport owns a small Tokio runtime and blocks on it.
/// Like `reqwest::blocking`, it must not be used from within an async context.
pub struct FirehoseTransport {
    runtime: tokio::runtime::Runtime,
    // Client holds a connection pool internally and is safe to share between threads.
    client: aws_sdk_firehose::Client,
}

impl FirehoseTransport {
    /// Fails with [`ConfigurationError::Runtime`] when called from within an async context.
    pub fn new(delivery: &ResolvedDelivery) -> crate::Result<FirehoseTransport> {
        // Blocking on the owned runtime (or dropping it) inside another runtime panics.
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ConfigurationError::Runtime(
                "Firehose transport cannot be created from within an async context".to_owned(),
            )
            .into());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("experiment-firehose")
            .enable_all()
            .build()
            .map_err(|err| ConfigurationError::Runtime(err.to_string()))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(delivery.region.clone()));

        if let Some(endpoint_url) = &delivery.endpoint_url {
            loader = loader.endpoint_url(endpoint_url.as_str());
        }

        match &delivery.credentials {
            ResolvedCredentials::Explicit {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                let credentials = aws_credential_types::Credentials::new(
                    access_key_id,
                    secret_access_key,
                    session_token.clone(),
                    None,
                    "experiment_firehose",
                );
                loader = loader.credentials_provider(credentials);
            }
            ResolvedCredentials::Ambient => {
                // Default credential chain.
            }
        }

        let sdk_config = runtime.block_on(loader.load());
        let client = aws_sdk_firehose::Client::new(&sdk_config);

        log::debug!(target: "experiment_firehose",
                    region:display = delivery.region,
                    credentials:? = delivery.credentials;
                    "created Firehose transport");

        Ok(FirehoseTransport { runtime, client })
    }
}

fn record(data: Vec<u8>) -> std::result::Result<Record, TransportError> {
    Record::builder()
        .data(Blob::new(data))
        .build()
        .map_err(|err| TransportError::Network(err.to_string()))
}

fn transport_error<E, R>(err: SdkError<E, R>) -> TransportError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error() {
        Some(service_error) => TransportError::Service {
            code: service_error.code().unwrap_or("Unknown").to_owned(),
            message: service_error.message().unwrap_or_default().to_owned(),
        },
        None => TransportError::Network(DisplayErrorContext(&err).to_string()),
    }
}

impl RecordTransport for FirehoseTransport {
    fn put_record(
        &self,
        stream_name: &str,
        data: Vec<u8>,
    ) -> std::result::Result<String, TransportError> {
        let request = self
            .client
            .put_record()
            .delivery_stream_name(stream_name)
            .record(record(data)?)
            .send();

        let output = self.runtime.block_on(request).map_err(transport_error)?;
        Ok(output.record_id().to_owned())
    }

    fn put_record_batch(
        &self,
        stream_name: &str,
        records: Vec<Vec<u8>>,
    ) -> std::result::Result<PutRecordBatchResponse, TransportError> {
        let records = records
            .into_iter()
            .map(record)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let submitted = records.len();

        let request = self
            .client
            .put_record_batch()
            .delivery_stream_name(stream_name)
            .set_records(Some(records))
            .send();

        let output = self.runtime.block_on(request).map_err(transport_error)?;

        let mut entries: Vec<BatchEntryResult> = output
            .request_responses()
            .iter()
            .map(|entry| match (entry.record_id(), entry.error_code()) {
                (Some(record_id), None) => BatchEntryResult::Delivered {
                    record_id: record_id.to_owned(),
                },
                (_, Some(code)) => BatchEntryResult::Failed(TransportError::Service {
                    code: code.to_owned(),
                    message: entry.error_message().unwrap_or_default().to_owned(),
                }),
                (None, None) => BatchEntryResult::Failed(TransportError::Unavailable),
            })
            .collect();
        // Responses map to records by position; anything the service didn't answer for failed.
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

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    fn max_batch_bytes(&self) -> usize {
        MAX_BATCH_BYTES
    }
}

#[cfg(test)]
mod tests {
    use crate::{error::ConfigurationError, DeliveryClient, DeliveryConfig, Error};

    use super::FirehoseTransport;

    #[test]
    fn builds_with_ambient_credentials_only() {
        let delivery = DeliveryConfig::new()
            .stream_name("experiments")
            .region("eu-west-1")
            .resolve()
            .unwrap();

        assert!(FirehoseTransport::new(&delivery).is_ok());
    }

    #[test]
    fn builds_with_explicit_credentials_and_endpoint() {
        let delivery = DeliveryConfig::new()
            .stream_name("experiments")
            .endpoint_url("http://localhost:4566")
            .static_credentials("AKIA", "secret")
            .resolve()
            .unwrap();

        assert!(FirehoseTransport::new(&delivery).is_ok());
    }

    #[tokio::test]
    async fn construction_inside_async_context_is_an_error() {
        let mut config = DeliveryConfig::new();
        config.stream_name("experiments");

        let result = DeliveryClient::new(&config);

        assert!(matches!(
            result,
            Err(Error::Configuration(ConfigurationError::Runtime(_)))
        ));
    }
}
