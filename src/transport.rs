//! The ingestion endpoint as seen by [`DeliveryClient`](crate::DeliveryClient).
use crate::error::TransportError;

/// Result of submitting a single record of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEntryResult {
    Delivered { record_id: String },
    Failed(TransportError),
}

/// Response to a batch submission. `entries` are in the order records were submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecordBatchResponse {
    pub failed_put_count: usize,
    pub entries: Vec<BatchEntryResult>,
}

/// A streaming ingestion endpoint that accepts opaque records.
///
/// Implementations are shared between evaluation threads, so they must be usable concurrently
/// without external locking.
pub trait RecordTransport: Send + Sync {
    /// Submit a single record, returning the id assigned by the endpoint.
    fn put_record(&self, stream_name: &str, data: Vec<u8>) -> Result<String, TransportError>;

    /// Submit several records in one request.
    ///
    /// An `Err` means the request as a whole failed. Individual records rejected by the endpoint
    /// are reported through [`PutRecordBatchResponse::entries`].
    fn put_record_batch(
        &self,
        stream_name: &str,
        records: Vec<Vec<u8>>,
    ) -> Result<PutRecordBatchResponse, TransportError>;

    /// Maximum number of records accepted by a single `put_record_batch` call.
    fn max_batch_size(&self) -> usize {
        500
    }

    /// Maximum total size in bytes of the records in a single `put_record_batch` call.
    fn max_batch_bytes(&self) -> usize {
        usize::MAX
    }
}
