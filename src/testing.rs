//! Test doubles.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use crate::{
    error::TransportError,
    transport::{BatchEntryResult, PutRecordBatchResponse, RecordTransport},
};

/// A transport that keeps every record in memory.
pub(crate) struct RecordingTransport {
    records: Mutex<Vec<(String, Vec<u8>)>>,
    single_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    fail: bool,
    max_batch_size: usize,
    max_batch_bytes: usize,
    // Positions within a batch request that the service rejects.
    rejected: Vec<usize>,
    // Number of trailing records the batch response says nothing about.
    unanswered: usize,
}

impl RecordingTransport {
    pub fn new() -> Arc<RecordingTransport> {
        Self::build(false, 500)
    }

    /// A transport whose every request fails with a network error.
    pub fn failing() -> Arc<RecordingTransport> {
        Self::build(true, 500)
    }

    pub fn with_max_batch_size(max_batch_size: usize) -> Arc<RecordingTransport> {
        Self::build(false, max_batch_size)
    }

    pub fn with_max_batch_bytes(max_batch_bytes: usize) -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport {
            max_batch_bytes,
            ..Self::unshared(false, 500)
        })
    }

    /// A transport whose batch responses reject the records at `rejected` positions and omit
    /// entries for the last `unanswered` records.
    pub fn rejecting(rejected: &[usize], unanswered: usize) -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport {
            rejected: rejected.to_vec(),
            unanswered,
            ..Self::unshared(false, 500)
        })
    }

    fn build(fail: bool, max_batch_size: usize) -> Arc<RecordingTransport> {
        Arc::new(Self::unshared(fail, max_batch_size))
    }

    fn unshared(fail: bool, max_batch_size: usize) -> RecordingTransport {
        RecordingTransport {
            records: Mutex::new(Vec::new()),
            single_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            fail,
            max_batch_size,
            max_batch_bytes: usize::MAX,
            rejected: Vec::new(),
            unanswered: 0,
        }
    }

    pub fn raw_records(&self) -> Vec<Vec<u8>> {
        let records = self.records.lock().unwrap();
        records.iter().map(|(_, data)| data.clone()).collect()
    }

    pub fn records(&self) -> Vec<serde_json::Value> {
        self.raw_records()
            .iter()
            .map(|data| serde_json::from_slice(data).unwrap())
            .collect()
    }

    pub fn streams(&self) -> Vec<String> {
        let records = self.records.lock().unwrap();
        records.iter().map(|(stream, _)| stream.clone()).collect()
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn store(&self, stream_name: &str, data: Vec<u8>) -> String {
        let mut records = self.records.lock().unwrap();
        records.push((stream_name.to_owned(), data));
        format!("record-{}", records.len() - 1)
    }
}

impl RecordTransport for RecordingTransport {
    fn put_record(&self, stream_name: &str, data: Vec<u8>) -> Result<String, TransportError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TransportError::Network("connection refused".to_owned()));
        }
        Ok(self.store(stream_name, data))
    }

    fn put_record_batch(
        &self,
        stream_name: &str,
        records: Vec<Vec<u8>>,
    ) -> Result<PutRecordBatchResponse, TransportError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TransportError::Network("connection refused".to_owned()));
        }
        let answered = records.len().saturating_sub(self.unanswered);
        let entries: Vec<BatchEntryResult> = records
            .into_iter()
            .take(answered)
            .enumerate()
            .map(|(position, data)| {
                if self.rejected.contains(&position) {
                    BatchEntryResult::Failed(TransportError::Service {
                        code: "ServiceUnavailableException".to_owned(),
                        message: "slow down".to_owned(),
                    })
                } else {
                    BatchEntryResult::Delivered {
                        record_id: self.store(stream_name, data),
                    }
                }
            })
            .collect();
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
        self.max_batch_size
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }
}
