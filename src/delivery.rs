use std::sync::Arc;

use crate::{
    envelope::EventEnvelope,
    error::TransportError,
    firehose::FirehoseTransport,
    transport::{BatchEntryResult, RecordTransport},
    DeliveryConfig, Error, Result,
};

/// Outcome of delivering a single envelope.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub success: bool,
    /// Id assigned by the ingestion endpoint.
    pub record_id: Option<String>,
    pub error: Option<Error>,
}

impl DeliveryOutcome {
    fn delivered(record_id: String) -> Self {
        DeliveryOutcome {
            success: true,
            record_id: Some(record_id),
            error: None,
        }
    }

    fn failed(error: impl Into<Error>) -> Self {
        DeliveryOutcome {
            success: false,
            record_id: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of delivering a batch. `outcomes` are in the order envelopes were passed in.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub outcomes: Vec<DeliveryOutcome>,
    pub failed_count: usize,
}

impl BatchOutcome {
    pub fn delivered_count(&self) -> usize {
        self.outcomes.len() - self.failed_count
    }
}

/// Ships [`EventEnvelope`]s to a delivery stream.
///
/// The client performs no retries: a failed delivery is reported once and left to the ingestion
/// layer. It is cheap to clone and safe to share between threads; all clones use the same
/// transport (and its connection pool).
#[derive(Clone)]
pub struct DeliveryClient {
    stream_name: String,
    transport: Arc<dyn RecordTransport>,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("stream_name", &self.stream_name)
            .finish_non_exhaustive()
    }
}

impl DeliveryClient {
    /// Create a client shipping records to Amazon Data Firehose.
    ///
    /// Fails if no stream name can be resolved from `config`, or when called from within an async
    /// context (the client blocks on its own runtime). Credentials are optional: without explicit
    /// ones, the ambient provider chain is used.
    pub fn new(config: &DeliveryConfig) -> Result<DeliveryClient> {
        let delivery = config.resolve()?;
        let transport = FirehoseTransport::new(&delivery)?;

        log::debug!(target: "experiment_firehose",
                    stream_name:display = delivery.stream_name;
                    "created delivery client");

        Ok(DeliveryClient::with_transport(
            delivery.stream_name,
            Arc::new(transport),
        ))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(
        stream_name: impl Into<String>,
        transport: Arc<dyn RecordTransport>,
    ) -> DeliveryClient {
        DeliveryClient {
            stream_name: stream_name.into(),
            transport,
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Deliver a single envelope as one newline-terminated JSON record.
    pub fn put_record(&self, envelope: &EventEnvelope) -> DeliveryOutcome {
        let data = match envelope.to_json_line() {
            Ok(data) => data,
            Err(err) => {
                log::warn!(target: "experiment_firehose",
                           flag_key:display = envelope.flag_key;
                           "failed to serialize event envelope: {:?}", err);
                return DeliveryOutcome::failed(err);
            }
        };

        match self.transport.put_record(&self.stream_name, data) {
            Ok(record_id) => {
                log::debug!(target: "experiment_firehose",
                            flag_key:display = envelope.flag_key,
                            record_id:display = record_id;
                            "delivered event envelope");
                DeliveryOutcome::delivered(record_id)
            }
            Err(err) => {
                log::warn!(target: "experiment_firehose",
                           flag_key:display = envelope.flag_key,
                           stream_name:display = self.stream_name;
                           "failed to deliver event envelope: {:?}", err);
                DeliveryOutcome::failed(err)
            }
        }
    }

    /// Deliver envelopes in as few requests as the transport allows.
    ///
    /// Envelopes that fail to serialize are left out of the request and counted as failed; the
    /// rest are still delivered.
    pub fn put_batch(&self, envelopes: &[EventEnvelope]) -> BatchOutcome {
        let mut outcomes: Vec<Option<DeliveryOutcome>> = vec![None; envelopes.len()];

        let mut pending = Vec::with_capacity(envelopes.len());
        for (index, envelope) in envelopes.iter().enumerate() {
            match envelope.to_json_line() {
                Ok(data) => pending.push((index, data)),
                Err(err) => {
                    log::warn!(target: "experiment_firehose",
                               flag_key:display = envelope.flag_key;
                               "excluding event envelope from batch: {:?}", err);
                    outcomes[index] = Some(DeliveryOutcome::failed(err));
                }
            }
        }

        let max_batch_size = self.transport.max_batch_size().max(1);
        let max_batch_bytes = self.transport.max_batch_bytes();
        for chunk in chunks(pending, max_batch_size, max_batch_bytes) {
            let (indices, records): (Vec<usize>, Vec<Vec<u8>>) = chunk.into_iter().unzip();

            match self.transport.put_record_batch(&self.stream_name, records) {
                Ok(response) => {
                    let mut entries = response.entries.into_iter();
                    for index in indices {
                        outcomes[index] = Some(match entries.next() {
                            Some(BatchEntryResult::Delivered { record_id }) => {
                                DeliveryOutcome::delivered(record_id)
                            }
                            Some(BatchEntryResult::Failed(err)) => DeliveryOutcome::failed(err),
                            None => DeliveryOutcome::failed(TransportError::Unavailable),
                        });
                    }
                }
                Err(err) => {
                    log::warn!(target: "experiment_firehose",
                               stream_name:display = self.stream_name,
                               records = indices.len();
                               "failed to deliver event batch: {:?}", err);
                    for index in indices {
                        outcomes[index] = Some(DeliveryOutcome::failed(err.clone()));
                    }
                }
            }
        }

        let outcomes: Vec<DeliveryOutcome> = outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| DeliveryOutcome::failed(TransportError::Unavailable))
            })
            .collect();
        let failed_count = outcomes.iter().filter(|outcome| !outcome.success).count();

        if failed_count > 0 {
            log::warn!(target: "experiment_firehose",
                       stream_name:display = self.stream_name,
                       failed_count,
                       total = outcomes.len();
                       "some event envelopes were not delivered");
        } else {
            log::debug!(target: "experiment_firehose",
                        stream_name:display = self.stream_name,
                        total = outcomes.len();
                        "delivered event batch");
        }

        BatchOutcome {
            outcomes,
            failed_count,
        }
    }
}

/// Split `records` into consecutive chunks holding at most `max_records` records and at most
/// `max_bytes` bytes. A record larger than `max_bytes` is sent alone.
fn chunks(
    records: Vec<(usize, Vec<u8>)>,
    max_records: usize,
    max_bytes: usize,
) -> Vec<Vec<(usize, Vec<u8>)>> {
    let mut chunks = Vec::new();
    let mut current: Vec<(usize, Vec<u8>)> = Vec::new();
    let mut current_bytes = 0usize;

    for (index, data) in records {
        let full = current.len() >= max_records
            || current_bytes.saturating_add(data.len()) > max_bytes;
        if full && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes = current_bytes.saturating_add(data.len());
        current.push((index, data));
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use crate::{
        envelope::{build_at, CaptureSource, EventEnvelope},
        error::TransportError,
        sanitizer::extract,
        testing::RecordingTransport,
        AttributeValue, DeliveryConfig, EvaluationContext, EvaluationDetail, Error,
    };

    use super::{chunks, DeliveryClient};

    fn envelope(flag_key: &str, value: AttributeValue) -> EventEnvelope {
        build_at(
            flag_key,
            extract(&EvaluationContext::new("u1")),
            &EvaluationDetail::default_value(value),
            CaptureSource::Wrapper,
            Utc::now(),
        )
    }

    #[test]
    fn construction_requires_stream_name() {
        let result = DeliveryClient::new(&DeliveryConfig::new());

        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn put_record_sends_newline_terminated_json() {
        let transport = RecordingTransport::new();
        let client = DeliveryClient::with_transport("experiments", transport.clone());

        let outcome = client.put_record(&envelope("flag", "on".into()));

        assert!(outcome.success);
        assert_eq!(outcome.record_id.as_deref(), Some("record-0"));
        let raw = transport.raw_records();
        assert_eq!(raw.len(), 1);
        assert!(raw[0].ends_with(b"\n"));
        assert_eq!(transport.records()[0]["flag_value"], "on");
        assert_eq!(transport.streams(), vec!["experiments".to_owned()]);
    }

    #[test]
    fn transport_failure_is_reported_without_retry() {
        let transport = RecordingTransport::failing();
        let client = DeliveryClient::with_transport("experiments", transport.clone());

        let outcome = client.put_record(&envelope("flag", "on".into()));

        assert!(!outcome.success);
        assert!(matches!(
            outcome.error,
            Some(Error::Transport(TransportError::Network(_)))
        ));
        assert_eq!(transport.single_calls(), 1);
    }

    #[test]
    fn unencodable_envelope_is_not_sent() {
        let transport = RecordingTransport::new();
        let client = DeliveryClient::with_transport("experiments", transport.clone());

        let outcome = client.put_record(&envelope("flag", f64::NAN.into()));

        assert!(matches!(outcome.error, Some(Error::Serialization(_))));
        assert_eq!(transport.single_calls(), 0);
    }

    #[test]
    fn batch_excludes_malformed_records() {
        let transport = RecordingTransport::new();
        let client = DeliveryClient::with_transport("experiments", transport.clone());
        let envelopes = vec![
            envelope("a", 1i64.into()),
            envelope("b", f64::NAN.into()),
            envelope("c", 3i64.into()),
            envelope("d", f64::INFINITY.into()),
            envelope("e", 5i64.into()),
        ];

        let outcome = client.put_batch(&envelopes);

        assert_eq!(outcome.failed_count, 2);
        assert_eq!(outcome.delivered_count(), 3);
        let success: Vec<bool> = outcome.outcomes.iter().map(|o| o.success).collect();
        assert_eq!(success, vec![true, false, true, false, true]);

        let delivered: Vec<String> = transport
            .records()
            .iter()
            .map(|record| record["flag_key"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(delivered, vec!["a", "c", "e"]);
        assert_eq!(transport.batch_calls(), 1);
    }

    #[test]
    fn batch_is_split_by_transport_limit() {
        let transport = RecordingTransport::with_max_batch_size(2);
        let client = DeliveryClient::with_transport("experiments", transport.clone());
        let envelopes: Vec<EventEnvelope> = (0..5i64)
            .map(|i| envelope(&format!("flag-{i}"), i.into()))
            .collect();

        let outcome = client.put_batch(&envelopes);

        assert_eq!(outcome.failed_count, 0);
        assert_eq!(transport.batch_calls(), 3);
        let delivered: Vec<i64> = transport
            .records()
            .iter()
            .map(|record| record["flag_value"].as_i64().unwrap())
            .collect();
        assert_eq!(delivered, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn rejected_and_unanswered_records_count_as_failed() {
        // Positions 1 and 3 are rejected; the response stops before the last record.
        let transport = RecordingTransport::rejecting(&[1, 3], 1);
        let client = DeliveryClient::with_transport("experiments", transport.clone());
        let envelopes: Vec<EventEnvelope> = (0..5i64)
            .map(|i| envelope(&format!("flag-{i}"), i.into()))
            .collect();

        let outcome = client.put_batch(&envelopes);

        assert_eq!(outcome.failed_count, 3);
        assert_eq!(outcome.delivered_count(), 2);
        let success: Vec<bool> = outcome.outcomes.iter().map(|o| o.success).collect();
        assert_eq!(success, vec![true, false, true, false, false]);
        assert_eq!(outcome.outcomes[0].record_id.as_deref(), Some("record-0"));
        assert_eq!(outcome.outcomes[2].record_id.as_deref(), Some("record-1"));
        assert!(matches!(
            outcome.outcomes[1].error,
            Some(Error::Transport(TransportError::Service { .. }))
        ));
        assert!(matches!(
            outcome.outcomes[4].error,
            Some(Error::Transport(TransportError::Unavailable))
        ));
        assert_eq!(transport.batch_calls(), 1);
    }

    #[test]
    fn batch_is_split_by_request_size() {
        let record_len = envelope("flag-0", 0i64.into()).to_json_line().unwrap().len();
        // Room for two records per request.
        let transport = RecordingTransport::with_max_batch_bytes(record_len * 2 + record_len / 2);
        let client = DeliveryClient::with_transport("experiments", transport.clone());
        let envelopes: Vec<EventEnvelope> = (0..5i64)
            .map(|i| envelope(&format!("flag-{i}"), i.into()))
            .collect();

        let outcome = client.put_batch(&envelopes);

        assert_eq!(outcome.failed_count, 0);
        assert_eq!(transport.batch_calls(), 3);
        let delivered: Vec<i64> = transport
            .records()
            .iter()
            .map(|record| record["flag_value"].as_i64().unwrap())
            .collect();
        assert_eq!(delivered, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn oversized_record_is_sent_alone() {
        let records = vec![(0, vec![0u8; 3]), (1, vec![0u8; 10]), (2, vec![0u8; 3])];

        let split: Vec<Vec<usize>> = chunks(records, 500, 8)
            .into_iter()
            .map(|chunk| chunk.into_iter().map(|(index, _)| index).collect())
            .collect();

        assert_eq!(split, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn failed_batch_request_fails_every_record() {
        let transport = RecordingTransport::failing();
        let client = DeliveryClient::with_transport("experiments", transport.clone());

        let outcome = client.put_batch(&[envelope("a", 1i64.into()), envelope("b", 2i64.into())]);

        assert_eq!(outcome.failed_count, 2);
        assert_eq!(outcome.delivered_count(), 0);
    }

    #[test]
    fn empty_batch_makes_no_request() {
        let transport = RecordingTransport::new();
        let client = DeliveryClient::with_transport("experiments", transport.clone());

        let outcome = client.put_batch(&[]);

        assert_eq!(outcome.failed_count, 0);
        assert_eq!(transport.batch_calls(), 0);
    }

    #[test]
    fn client_can_be_shared_between_threads() {
        let transport = RecordingTransport::new();
        let client = Arc::new(DeliveryClient::with_transport(
            "experiments",
            transport.clone(),
        ));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let client = Arc::clone(&client);
                std::thread::spawn(move || {
                    for j in 0..10i64 {
                        client.put_record(&envelope(&format!("flag-{i}"), j.into()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(transport.single_calls(), 40);
        assert_eq!(transport.records().len(), 40);
    }
}
